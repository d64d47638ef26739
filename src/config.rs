use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::*;
use crate::packet::message::Message;
use crate::path::RouteEntryBuilder;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub asn: u32,
    pub router_id: Ipv4Addr,
    #[serde(default = "Config::default_port")]
    pub port: u16,
    #[serde(default = "Config::default_hold_time")]
    pub hold_time: u16,
    #[serde(default)]
    pub neighbors: Vec<NeighborConfig>,
    #[serde(default = "Config::default_local_pref")]
    pub default_local_pref: u32,
    #[serde(default = "Config::default_rib_channel_size")]
    pub rib_channel_size: usize,
    #[serde(default = "Config::default_listener_queue_size")]
    pub listener_queue_size: usize,
    /// Seconds `stop` waits for sessions to close.
    #[serde(default = "Config::default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Config {
    pub const BGP_PORT: u16 = 179;

    pub fn new(asn: u32, router_id: Ipv4Addr) -> Self {
        Config {
            asn,
            router_id,
            port: Self::default_port(),
            hold_time: Self::default_hold_time(),
            neighbors: Vec::new(),
            default_local_pref: Self::default_local_pref(),
            rib_channel_size: Self::default_rib_channel_size(),
            listener_queue_size: Self::default_listener_queue_size(),
            shutdown_timeout: Self::default_shutdown_timeout(),
        }
    }

    pub fn load(file: &str) -> Result<Self, Error> {
        let contents = fs::read_to_string(file).map_err(Error::StdIoErr)?;
        let conf: Config = serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(ConfigError::FailedToLoad(e)))?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: String| Err(Error::Config(ConfigError::InvalidValue(msg)));
        if self.asn == 0 {
            return invalid("asn must not be 0".to_string());
        }
        if self.router_id.is_unspecified() {
            return invalid("router_id must not be 0.0.0.0".to_string());
        }
        if self.hold_time != 0 && self.hold_time < 3 {
            return invalid(format!("hold_time {} must be 0 or at least 3", self.hold_time));
        }
        if self.rib_channel_size == 0 || self.listener_queue_size == 0 {
            return invalid("channel sizes must be positive".to_string());
        }
        Ok(())
    }

    pub fn set_as_number(&mut self, asn: u32) {
        self.asn = asn;
    }

    pub fn set_router_id(&mut self, router_id: Ipv4Addr) {
        self.router_id = router_id;
    }

    pub fn neighbor(&self, addr: &IpAddr) -> Option<&NeighborConfig> {
        self.neighbors.iter().find(|n| n.address.eq(addr))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    fn default_port() -> u16 {
        Self::BGP_PORT
    }

    fn default_hold_time() -> u16 {
        Message::DEFAULT_HOLD_TIME
    }

    fn default_local_pref() -> u32 {
        RouteEntryBuilder::DEFAULT_LOCAL_PREF
    }

    fn default_rib_channel_size() -> usize {
        1024
    }

    fn default_listener_queue_size() -> usize {
        128
    }

    fn default_shutdown_timeout() -> u64 {
        5
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
pub struct NeighborConfig {
    pub name: String,
    pub asn: u32,
    pub address: IpAddr,
}
