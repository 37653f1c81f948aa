//! Command-line interface definitions.
//!
//! Every setting can come from a flag, an environment variable, or a `.env`
//! file in the working directory (loaded before parsing), in that order of
//! precedence. Defaults apply when none is given.

use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use crate::api::RetryPolicy;
use crate::processor::ProcessorOptions;

/// Main CLI structure for the quest bot.
#[derive(Parser)]
#[command(name = "questbot", about = "Keeps quest API accounts logged in and claims quests", version)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Process all accounts, sleep, and repeat forever
    Run,
    /// Process all accounts once and exit
    Once,
    /// List the accounts decoded from the data file
    Accounts,
}

/// Runtime settings shared by all commands.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Base URL of the quest API
    #[arg(long, env = "API_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Account credentials, one init-data string per line
    #[arg(long, env = "DATA_FILE", default_value = "data.txt", global = true)]
    pub data_file: String,

    /// JSON map of account id to bearer token
    #[arg(long, env = "TOKEN_FILE", default_value = "token.json", global = true)]
    pub token_file: String,

    /// JSON map of account id to user agent
    #[arg(
        long,
        env = "SESSION_FILE",
        default_value = "session_user_agents.json",
        global = true
    )]
    pub session_file: String,

    /// Extra attempts after a transient request failure
    #[arg(long, env = "MAX_RETRIES", default_value_t = 1, global = true)]
    pub retries: u32,

    /// Seconds to wait before retrying a request
    #[arg(long, env = "DELAY_BETWEEN_REQUESTS", default_value_t = 3, global = true)]
    pub retry_delay: u64,

    /// Accounts processed concurrently per batch
    #[arg(
        long,
        env = "MAX_THREADS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u32).range(1..),
        global = true
    )]
    pub max_threads: u32,

    /// Minutes to sleep between passes
    #[arg(long, env = "TIME_SLEEP", default_value_t = 60, global = true)]
    pub sleep_minutes: u64,

    /// Referral code sent when logging in
    #[arg(long, env = "REF_ID", default_value = "Iil4QcC4TF", global = true)]
    pub ref_code: String,

    /// Complete and claim quests
    #[arg(long, env = "AUTO_TASK", default_value_t = false, global = true)]
    pub auto_task: bool,

    /// Comma-separated quest ids to leave alone
    #[arg(long, env = "SKIP_TASKS", value_delimiter = ',', global = true)]
    pub skip_tasks: Vec<String>,
}

impl Settings {
    /// The API base URL.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` when neither `--base-url` nor `API_BASE_URL` is
    /// set.
    pub fn base_url(&self) -> Result<&str, String> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| "API base URL not set (use --base-url or API_BASE_URL)".to_string())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            delay: Duration::from_secs(self.retry_delay),
        }
    }

    pub fn processor_options(&self) -> ProcessorOptions {
        ProcessorOptions {
            ref_code: self.ref_code.clone(),
            auto_task: self.auto_task,
            skip_tasks: self
                .skip_tasks
                .iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }

    /// Pause between passes. Huge minute counts saturate instead of overflowing.
    pub fn sleep(&self) -> Duration {
        Duration::from_secs(self.sleep_minutes.saturating_mul(60))
    }
}
