use std::net::SocketAddr;
use std::time::Duration;

use envconfig::Envconfig;
use tracing::Level;

use crate::validation::ValidationLimits;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    // Unset means valuable events are only logged
    pub history_store_url: Option<String>,

    #[envconfig(default = "5000")]
    pub persistence_timeout_ms: u64,

    pub persist_additional_kinds: Option<String>, // Comma-delimited kinds

    #[envconfig(default = "100000")]
    pub max_payload_bytes: usize,

    #[envconfig(default = "10")]
    pub max_nesting_depth: usize,

    #[envconfig(default = "100")]
    pub max_kind_length: usize,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "info")]
    pub log_level: Level,

    #[envconfig(default = "false")]
    pub log_json: bool,
}

impl Config {
    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_timeout_ms)
    }

    pub fn validation_limits(&self) -> ValidationLimits {
        ValidationLimits {
            max_payload_bytes: self.max_payload_bytes,
            max_nesting_depth: self.max_nesting_depth,
            max_kind_length: self.max_kind_length,
        }
    }

    pub fn additional_valuable_kinds(&self) -> Vec<String> {
        self.persist_additional_kinds
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|kind| !kind.is_empty())
            .map(String::from)
            .collect()
    }
}
