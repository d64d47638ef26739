use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use bgp_speaker::trace::{prepare_tracing, TraceConfig};
use bgp_speaker::{Config, Error, RouteListener, RouteUpdate, RouteUpdateKind, SessionManager};

#[derive(Parser, Debug)]
#[command(author, version, about = "Passive BGP-4 speaker", long_about = None)]
struct Cmd {
    #[arg(short = 'f', long, help = "Config file path")]
    file: Option<String>,

    #[arg(long = "as", help = "Local AS Number")]
    asn: Option<u32>,

    #[arg(long, help = "Local router id(must be ipv4 format)")]
    router_id: Option<Ipv4Addr>,

    #[arg(long, help = "Listen port(default is 179)")]
    port: Option<u16>,

    #[arg(
        short,
        long,
        default_value = "info",
        help = "Log level(trace, debug, info, warn, error)"
    )]
    level: String,

    #[arg(
        value_enum,
        short = 'd',
        long,
        default_value = "plain",
        help = "Log display format"
    )]
    format: Format,

    #[arg(short = 'o', long = "log-file", help = "Log output file path")]
    log_file: Option<String>,
}

#[derive(Debug, Clone, ValueEnum)]
enum Format {
    Plain,
    Json,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Plain => write!(f, "plain"),
            Format::Json => write!(f, "json"),
        }
    }
}

struct LogListener;

impl RouteListener for LogListener {
    fn update(&self, updates: Vec<RouteUpdate>) {
        for update in updates.iter() {
            match update.kind {
                RouteUpdateKind::Add => tracing::info!(route = %update.entry, "best route added"),
                RouteUpdateKind::Withdraw => {
                    tracing::info!(route = %update.entry, "best route withdrawn")
                }
            }
        }
    }
}

fn build_config(cmd: &Cmd) -> Result<Config, Error> {
    let mut conf = match &cmd.file {
        Some(file) => Config::load(file)?,
        None => Config::new(0, Ipv4Addr::UNSPECIFIED),
    };
    if let Some(asn) = cmd.asn {
        conf.set_as_number(asn);
    }
    if let Some(router_id) = cmd.router_id {
        conf.set_router_id(router_id);
    }
    if let Some(port) = cmd.port {
        conf.port = port;
    }
    conf.validate()?;
    Ok(conf)
}

async fn serve(conf: Config) -> Result<(), Error> {
    let port = conf.port;
    let mut manager = SessionManager::new(conf, Arc::new(LogListener));
    manager.start(port).await?;
    tokio::signal::ctrl_c().await?;
    tracing::info!("received ctrl-c, shutting down");
    manager.stop().await
}

fn main() -> ExitCode {
    let cmd = Cmd::parse();

    if let Err(e) = prepare_tracing(TraceConfig {
        level: cmd.level.clone(),
        format: cmd.format.to_string(),
        file: cmd.log_file.clone(),
    }) {
        eprintln!("failed to initialize tracing: {e}");
        return ExitCode::FAILURE;
    }

    let conf = match build_config(&cmd) {
        Ok(conf) => conf,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(conf)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "bgp speaker failed");
            ExitCode::FAILURE
        }
    }
}
