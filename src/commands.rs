//! Command execution logic.
//!
//! Startup (configuration, data files, API reachability) is the only place
//! where errors end the process. Once the runner starts, failures stay
//! inside the account that hit them.

use std::sync::Arc;

use crate::account::{self, Account};
use crate::api::ApiClient;
use crate::cli::{Cli, Commands, Settings};
use crate::persistence::{SessionStore, TokenStore};
use crate::runner::Runner;
use crate::transport::ReqwestTransport;

/// Executes the CLI command specified in the parsed arguments.
///
/// # Errors
///
/// Returns `Err(String)` if:
/// - the data file cannot be read
/// - the API base URL is missing or the API is unreachable
/// - the token or session file is corrupt
pub async fn run(cli: Cli) -> Result<(), String> {
    let settings = cli.settings;
    let accounts = account::load_accounts(&settings.data_file)?;

    match cli.command {
        Commands::Accounts => print_accounts(&accounts),
        Commands::Once => {
            let runner = build_runner(&settings, accounts).await?;
            runner.run_pass().await;
        }
        Commands::Run => {
            let runner = build_runner(&settings, accounts).await?;
            runner.run_forever().await;
        }
    }
    Ok(())
}

async fn build_runner(settings: &Settings, accounts: Vec<Account>) -> Result<Runner, String> {
    if accounts.is_empty() {
        return Err(format!("No usable accounts in {}", settings.data_file));
    }

    let transport = ReqwestTransport::new()?;
    let api = ApiClient::new(
        Arc::new(transport),
        settings.base_url()?,
        settings.retry_policy(),
    );
    let status = api.probe().await?;
    log::info!("API reachable url={} status={}", api.base_url(), status);

    let tokens = TokenStore::load(&settings.token_file)?;
    let sessions = SessionStore::load(&settings.session_file)?;

    log::info!(
        "Starting accounts={} max_threads={} auto_task={} sleep_minutes={}",
        accounts.len(),
        settings.max_threads,
        settings.auto_task,
        settings.sleep_minutes
    );

    Ok(Runner::new(
        accounts,
        Arc::new(api),
        tokens,
        sessions,
        settings.processor_options(),
        settings.max_threads as usize,
        settings.sleep(),
    ))
}

fn print_accounts(accounts: &[Account]) {
    if accounts.is_empty() {
        println!("No accounts found");
        return;
    }
    for account in accounts {
        println!(
            "Account {} | id={} | {}",
            account.number(),
            account.id,
            account.display_name()
        );
    }
}
