//! One account's pass: token, user info, balance report, optional quests.
//!
//! Every failure is turned into a log line at the step where it happens.
//! [`AccountProcessor::process`] returns `Err` only to tell the runner why the
//! pass ended early; the runner logs it and moves on.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::account::Account;
use crate::api::{ApiClient, AuthResponse, Credential, Quest, RequestContext, UserInfo};
use crate::device::DeviceProfile;
use crate::persistence::TokenStore;
use crate::token;

/// Attempts at `GET /user` per pass, each with the client's own retries.
const USER_INFO_ATTEMPTS: u32 = 2;
/// Pause before each quest.
const QUEST_DELAY: Duration = Duration::from_secs(2);
/// Pause between completing a quest and claiming it.
const CLAIM_DELAY: Duration = Duration::from_secs(5);

/// Behaviour switches shared by all processors.
#[derive(Debug, Clone, Default)]
pub struct ProcessorOptions {
    /// Referral code sent with `/auth/create-user`.
    pub ref_code: String,
    /// Completes and claims quests when set.
    pub auto_task: bool,
    /// Quest ids never touched.
    pub skip_tasks: Vec<String>,
}

/// Owns one account for one pass: its credential, pinned device profile and
/// cached token.
pub struct AccountProcessor {
    account: Account,
    profile: DeviceProfile,
    token: Option<String>,
    api: Arc<ApiClient>,
    tokens: Arc<Mutex<TokenStore>>,
    options: Arc<ProcessorOptions>,
}

impl AccountProcessor {
    /// Creates a processor for `account`.
    ///
    /// # Arguments
    ///
    /// * `account` - The account to process
    /// * `profile` - Device fingerprint pinned to the account's session
    /// * `token` - Token cached in the token store, if any
    /// * `api` - Shared API client
    /// * `tokens` - Token store that receives freshly issued tokens
    /// * `options` - Referral code and quest settings
    pub fn new(
        account: Account,
        profile: DeviceProfile,
        token: Option<String>,
        api: Arc<ApiClient>,
        tokens: Arc<Mutex<TokenStore>>,
        options: Arc<ProcessorOptions>,
    ) -> Self {
        Self {
            account,
            profile,
            token,
            api,
            tokens,
            options,
        }
    }

    /// The account this processor works for.
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Runs the account's pass.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` describing the step that ended the pass early.
    pub async fn process(&mut self) -> Result<(), String> {
        let number = self.account.number();
        let token = self.valid_token().await.ok_or_else(|| {
            format!("Can't get token for account {number}, skipping...")
        })?;

        let info = self.fetch_user_info(&token).await?;
        let report = info
            .report()
            .map_err(|e| format!("Unexpected user info, skipping: {e}"))?;
        log::info!("[Account {}] {}", number, report);

        if log::log_enabled!(log::Level::Debug) {
            match self.api.user_id(&self.bearer(&token)).await {
                Ok(user_id) => log::debug!("[Account {}] Remote user id: {}", number, user_id),
                Err(e) => log::debug!("[Account {}] Can't get user id: {}", number, e),
            }
        }

        if self.options.auto_task {
            self.handle_quests(&token).await;
        }
        Ok(())
    }

    /// Returns a usable bearer token, logging in when the cached one is
    /// missing or expired. A fresh token is saved to the token store.
    pub async fn valid_token(&mut self) -> Option<String> {
        let number = self.account.number();

        if let Some(token) = self
            .token
            .as_deref()
            .filter(|token| !token::is_expired(token, Utc::now()))
        {
            log::info!("[Account {}] Using valid token", number);
            return Some(token.to_string());
        }

        log::warn!("[Account {}] Token not found or expired, logging in...", number);
        let ctx = RequestContext {
            account: number,
            profile: &self.profile,
            credential: Credential::InitData(&self.account.init_data),
        };
        match self.api.authenticate(&ctx, &self.options.ref_code).await {
            Ok(AuthResponse {
                token: Some(token),
            }) if !token.is_empty() => {
                self.tokens
                    .lock()
                    .await
                    .save_token(&self.account.session_key(), token.clone());
                self.token = Some(token.clone());
                Some(token)
            }
            Ok(_) => {
                log::warn!("[Account {}] Login succeeded without a token", number);
                None
            }
            Err(e) => {
                log::warn!(
                    "[Account {}] Can't get token, try get new query_id! {}",
                    number,
                    e
                );
                None
            }
        }
    }

    async fn fetch_user_info(&self, token: &str) -> Result<UserInfo, String> {
        let ctx = self.bearer(token);
        let mut last_error = String::new();
        for _ in 0..USER_INFO_ATTEMPTS {
            match self.api.user_info(&ctx).await {
                Ok(info) => return Ok(info),
                Err(e) => last_error = e.to_string(),
            }
        }
        Err(format!("Can't get user info, skipping: {last_error}"))
    }

    async fn handle_quests(&self, token: &str) {
        let number = self.account.number();
        let ctx = self.bearer(token);

        let quests = match self.api.quests(&ctx).await {
            Ok(quests) => quests,
            Err(e) => {
                log::warn!("[Account {}] Can't get tasks: {}", number, e);
                return;
            }
        };

        let pending = pending_quests(quests, &self.options.skip_tasks);
        if pending.is_empty() {
            log::warn!("[Account {}] No tasks available!", number);
            return;
        }

        for quest in &pending {
            tokio::time::sleep(QUEST_DELAY).await;

            if !quest.is_doing {
                log::info!(
                    "[Account {}] Completing task {} | {}...",
                    number,
                    quest.key(),
                    quest.name
                );
                if let Err(e) = self.api.complete_quest(&ctx, quest).await {
                    log::warn!(
                        "[Account {}] Can't complete task {} | {}: {}",
                        number,
                        quest.key(),
                        quest.name,
                        e
                    );
                    continue;
                }
            }

            tokio::time::sleep(CLAIM_DELAY).await;
            match self.api.claim_quest(&ctx, quest).await {
                Ok(_) => log::info!(
                    "[Account {}] Task {} | {} completed successfully!",
                    number,
                    quest.key(),
                    quest.name
                ),
                Err(e) => log::warn!(
                    "[Account {}] Can't claim task {} | {}: {}",
                    number,
                    quest.key(),
                    quest.name,
                    e
                ),
            }
        }
    }

    fn bearer<'a>(&'a self, token: &'a str) -> RequestContext<'a> {
        RequestContext {
            account: self.account.number(),
            profile: &self.profile,
            credential: Credential::Bearer(token),
        }
    }
}

/// Quests that are neither done nor skip-listed.
fn pending_quests(quests: Vec<Quest>, skip: &[String]) -> Vec<Quest> {
    quests
        .into_iter()
        .filter(|quest| !quest.is_done && !skip.contains(&quest.key()))
        .collect()
}
