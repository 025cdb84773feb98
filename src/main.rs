// src/main.rs
mod api;
mod auth;
mod config;
mod db;
mod error;
mod models;
mod quote;
mod trading;
mod views;

use clap::Parser;
use env_logger::Builder;
use log::{error, info};

use crate::api::AppState;
use crate::auth::Sessions;
use crate::config::Config;
use crate::quote::QuoteClient;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    Builder::new()
        .filter_level(config.log_filter())
        .format_timestamp_secs()
        .init();

    let pool = match db::init(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };
    info!("Connected to database...");

    let state = AppState {
        pool,
        quotes: QuoteClient::new_with_base_url(&config.quote_base_url, &config.api_key),
        sessions: Sessions::new(config.session_secret()),
    };

    info!("Starting the finance application...");
    let app = api::routes(state);

    info!("Server running on http://{}", config.bind_addr);
    warp::serve(app).run(config.bind_addr).await;
}
