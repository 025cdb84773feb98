// src/config.rs
use std::net::SocketAddr;
use std::str::FromStr;

use clap::Parser;
use log::LevelFilter;
use uuid::Uuid;

use crate::quote::DEFAULT_BASE_URL;

/// Runtime settings, read from flags or the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "finance", about = "Simulated stock trading web application")]
pub struct Config {
    /// Alpha Vantage API key used for quote lookups.
    #[arg(long, env = "API_KEY")]
    pub api_key: String,

    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:finance.db")]
    pub database_url: String,

    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3030")]
    pub bind_addr: SocketAddr,

    /// Key for signing session cookies. Random when unset.
    #[arg(long, env = "SESSION_SECRET")]
    pub session_secret: Option<String>,

    #[arg(long, env = "QUOTE_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub quote_base_url: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn log_filter(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::Info)
    }

    pub fn session_secret(&self) -> String {
        self.session_secret
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()))
    }
}
