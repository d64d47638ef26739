use std::str::FromStr;
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{prelude::*, Registry};

use crate::error::{ConfigError, Error};

#[derive(Debug)]
pub struct TraceConfig {
    pub level: String,
    pub format: String,
    pub file: Option<String>,
}

pub fn prepare_tracing(conf: TraceConfig) -> Result<(), Error> {
    let level = LevelFilter::from_str(&conf.level)
        .map_err(|e| Error::Config(ConfigError::InvalidValue(e.to_string())))?;
    let file = match conf.file {
        Some(path) => Some(std::fs::File::create(path)?),
        None => None,
    };
    let res = if conf.format == "json" {
        if let Some(file) = file {
            Registry::default()
                .with(tracing_subscriber::fmt::Layer::new().with_writer(Mutex::new(file)))
                .with(tracing_subscriber::fmt::Layer::new().with_ansi(true).json())
                .with(level)
                .try_init()
        } else {
            Registry::default()
                .with(tracing_subscriber::fmt::Layer::new().with_ansi(true).json())
                .with(level)
                .try_init()
        }
    } else if let Some(file) = file {
        Registry::default()
            .with(tracing_subscriber::fmt::Layer::new().with_writer(Mutex::new(file)))
            .with(tracing_subscriber::fmt::Layer::new().with_ansi(true))
            .with(level)
            .try_init()
    } else {
        Registry::default()
            .with(tracing_subscriber::fmt::Layer::new().with_ansi(true))
            .with(level)
            .try_init()
    };
    res.map_err(|e| Error::Config(ConfigError::InvalidValue(e.to_string())))
}
