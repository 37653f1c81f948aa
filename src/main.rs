//! Quest bot
//!
//! Keeps a list of quest API accounts authenticated, reports their balances
//! and optionally completes and claims quests, pass after pass.
//!
//! # Usage
//!
//! ```bash
//! # List the accounts found in data.txt
//! questbot accounts
//!
//! # Process every account once
//! questbot once --base-url https://api.example.com
//!
//! # Loop forever, claiming quests, 5 accounts at a time
//! export API_BASE_URL="https://api.example.com"
//! questbot run --auto-task --max-threads 5
//! ```

mod account;
mod api;
mod cli;
mod commands;
mod device;
mod persistence;
mod processor;
mod runner;
mod token;
mod transport;

use clap::Parser;
use cli::Cli;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let mut logger = pretty_env_logger::formatted_timed_builder();
    logger.filter_level(log::LevelFilter::Info);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        logger.parse_filters(&filters);
    }
    logger.init();

    log::info!("Application started version={}", env!("CARGO_PKG_VERSION"));
    let cli = Cli::parse();

    if let Err(e) = commands::run(cli).await {
        log::error!("Application error: {}", e);
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
