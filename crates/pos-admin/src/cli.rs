//! Command-line argument parsing with clap.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use pos_guard::GuardConfig;

use crate::config::AdminConfig;

/// POS request admission service and security admin API.
#[derive(Parser, Debug, Clone)]
#[command(name = "pos-admin")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long, env = "POS_GUARD_BIND", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// JSON-lines file for attack events. Kept in memory when unset.
    #[arg(long, env = "POS_GUARD_ATTACK_LOG")]
    pub attack_log: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long)]
    pub log_json: bool,

    /// Identity exempt from rate limiting and slow-down (repeatable).
    #[arg(long = "trusted", value_name = "IP")]
    pub trusted: Vec<String>,

    /// Allowed CORS origin (repeatable). All origins when none given.
    #[arg(long = "cors-origin", value_name = "ORIGIN")]
    pub cors_origins: Vec<String>,
}

impl Cli {
    /// Build the server configuration from the parsed arguments.
    #[must_use]
    pub fn to_config(&self) -> AdminConfig {
        let guard = self
            .trusted
            .iter()
            .fold(GuardConfig::builder(), |builder, ip| builder.trust_identity(ip.as_str()))
            .build();

        let mut config = AdminConfig::new(self.bind).with_guard(guard);
        if let Some(path) = &self.attack_log {
            config = config.with_attack_log(path.clone());
        }
        self.cors_origins
            .iter()
            .fold(config, |config, origin| config.with_cors_origin(origin.as_str()))
    }
}
