//! Pass scheduling.
//!
//! A pass walks the account list in batches of `max_threads`. Accounts of a
//! batch run concurrently on the calling task, each bounded by
//! [`ACCOUNT_TIMEOUT`]; the next batch starts only once every account of the
//! current one has settled. [`Runner::run_forever`] repeats passes with a
//! sleep in between and never returns.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{self, error::Elapsed};

use crate::account::Account;
use crate::api::ApiClient;
use crate::device::DeviceProfile;
use crate::persistence::{SessionStore, TokenStore};
use crate::processor::{AccountProcessor, ProcessorOptions};

/// Upper bound for one account's pass.
pub const ACCOUNT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
/// Pause between the last batch and the pass summary.
const PASS_PAUSE: Duration = Duration::from_secs(5);

/// Runs `work` over `items`, `batch_size` at a time, each bounded by
/// `limit`. Batches run strictly one after another; results keep the input
/// order.
pub async fn settle_in_batches<T, R, F, Fut>(
    items: Vec<T>,
    batch_size: usize,
    limit: Duration,
    mut work: F,
) -> Vec<Result<R, Elapsed>>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    let batch_size = batch_size.max(1);
    let mut outcomes = Vec::with_capacity(items.len());
    let mut items = items.into_iter().peekable();

    while items.peek().is_some() {
        let batch: Vec<_> = items
            .by_ref()
            .take(batch_size)
            .map(|item| time::timeout(limit, work(item)))
            .collect();
        log::debug!("Starting batch size={}", batch.len());
        outcomes.extend(join_all(batch).await);
    }
    outcomes
}

/// How a pass went, per account.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// Drives passes over the whole account list.
pub struct Runner {
    accounts: Vec<Account>,
    api: Arc<ApiClient>,
    tokens: Arc<Mutex<TokenStore>>,
    sessions: Mutex<SessionStore>,
    options: Arc<ProcessorOptions>,
    max_threads: usize,
    sleep: Duration,
}

impl Runner {
    /// Creates a runner over `accounts`.
    ///
    /// # Arguments
    ///
    /// * `accounts` - Accounts in data-file order
    /// * `api` - Client shared by every processor
    /// * `tokens` - Token store, reloaded before each pass
    /// * `sessions` - User agents pinned per session
    /// * `options` - Referral code and quest settings
    /// * `max_threads` - Accounts per batch; 0 is treated as 1
    /// * `sleep` - Pause between passes in [`Runner::run_forever`]
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let runner = Runner::new(accounts, api, tokens, sessions, options, 10, Duration::from_secs(3600));
    /// runner.run_forever().await;
    /// ```
    pub fn new(
        accounts: Vec<Account>,
        api: Arc<ApiClient>,
        tokens: TokenStore,
        sessions: SessionStore,
        options: ProcessorOptions,
        max_threads: usize,
        sleep: Duration,
    ) -> Self {
        Self {
            accounts,
            api,
            tokens: Arc::new(Mutex::new(tokens)),
            sessions: Mutex::new(sessions),
            options: Arc::new(options),
            max_threads,
            sleep,
        }
    }

    /// Repeats passes forever.
    pub async fn run_forever(&self) {
        loop {
            self.run_pass().await;
            time::sleep(PASS_PAUSE).await;
            log::info!(
                "Complete all accounts | Wait {} minute=============",
                self.sleep.as_secs() / 60
            );
            time::sleep(self.sleep).await;
        }
    }

    /// Processes every account once.
    ///
    /// # Returns
    ///
    /// How many accounts finished, failed, or hit [`ACCOUNT_TIMEOUT`]. All
    /// outcomes are already logged.
    pub async fn run_pass(&self) -> PassSummary {
        self.tokens.lock().await.refresh();

        let numbers: Vec<usize> = self.accounts.iter().map(Account::number).collect();
        let outcomes = settle_in_batches(
            self.accounts.clone(),
            self.max_threads,
            ACCOUNT_TIMEOUT,
            |account| self.process_account(account),
        )
        .await;

        let mut summary = PassSummary::default();
        for (number, outcome) in numbers.into_iter().zip(outcomes) {
            match outcome {
                Ok(Ok(())) => summary.succeeded += 1,
                Ok(Err(e)) => {
                    log::error!("[Account {}] {}", number, e);
                    summary.failed += 1;
                }
                Err(_) => {
                    log::error!(
                        "[Account {}] Account processing error: timed out after {}h",
                        number,
                        ACCOUNT_TIMEOUT.as_secs() / 3600
                    );
                    summary.timed_out += 1;
                }
            }
        }

        log::info!(
            "Pass finished succeeded={} failed={} timed_out={}",
            summary.succeeded,
            summary.failed,
            summary.timed_out
        );
        summary
    }

    async fn process_account(&self, account: Account) -> Result<(), String> {
        log::info!(
            "=========Account {} | {}",
            account.number(),
            account.display_name()
        );

        let key = account.session_key();
        let user_agent = self.sessions.lock().await.user_agent_for(&key);
        let token = self.tokens.lock().await.token(&key);

        let mut processor = AccountProcessor::new(
            account,
            DeviceProfile::new(user_agent),
            token,
            self.api.clone(),
            self.tokens.clone(),
            self.options.clone(),
        );
        log::debug!(
            "[Account {}] Processing session={}",
            processor.account().number(),
            key
        );
        processor.process().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RetryPolicy;
    use crate::api::tests::{ok, status};
    use crate::token::tests::jwt_expiring_at;
    use crate::transport::MockTransport;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Start(usize),
        End(usize),
    }

    #[tokio::test(start_paused = true)]
    async fn batches_settle_before_the_next_starts() {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let recorder = events.clone();

        let outcomes = settle_in_batches(
            (0..5).collect(),
            2,
            Duration::from_secs(60),
            |i: usize| {
                let events = recorder.clone();
                async move {
                    events.lock().unwrap().push(Event::Start(i));
                    // Later items finish first within a batch.
                    time::sleep(Duration::from_millis(100 - 10 * i as u64)).await;
                    events.lock().unwrap().push(Event::End(i));
                    i * 10
                }
            },
        )
        .await;

        use Event::{End, Start};
        assert_eq!(
            events.lock().unwrap().clone(),
            vec![
                Start(0),
                Start(1),
                End(1),
                End(0),
                Start(2),
                Start(3),
                End(3),
                End(2),
                Start(4),
                End(4),
            ]
        );
        let values: Vec<usize> = outcomes.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40]);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_item_does_not_block_its_batch() {
        let outcomes = settle_in_batches(
            vec![1u64, 100, 2],
            3,
            Duration::from_secs(10),
            |secs| async move {
                time::sleep(Duration::from_secs(secs)).await;
                secs
            },
        )
        .await;

        assert!(matches!(outcomes[0], Ok(1)));
        assert!(outcomes[1].is_err());
        assert!(matches!(outcomes[2], Ok(2)));
    }

    #[tokio::test]
    async fn zero_batch_size_still_progresses() {
        let outcomes = settle_in_batches(vec![1, 2], 0, Duration::from_secs(1), |n| async move {
            n
        })
        .await;

        assert_eq!(outcomes.len(), 2);
    }

    fn account(index: usize, id: i64) -> Account {
        let line = format!(
            "query_id=q{id}&user=%7B%22id%22%3A{id}%2C%22first_name%22%3A%22User{id}%22%7D&hash=h"
        );
        Account::parse(index, &line).unwrap()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        token_path: String,
        session_path: String,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token.json").to_str().unwrap().to_string();
        let session_path = dir.path().join("sessions.json").to_str().unwrap().to_string();
        Fixture {
            _dir: dir,
            token_path,
            session_path,
        }
    }

    fn runner(fixture: &Fixture, mock: MockTransport, ids: &[i64]) -> Runner {
        let api = ApiClient::new(
            Arc::new(mock),
            "https://api.example.test",
            RetryPolicy {
                retries: 0,
                delay: Duration::from_secs(1),
            },
        );
        Runner::new(
            ids.iter()
                .enumerate()
                .map(|(index, id)| account(index, *id))
                .collect(),
            Arc::new(api),
            TokenStore::load(&fixture.token_path).unwrap(),
            SessionStore::load(&fixture.session_path).unwrap(),
            ProcessorOptions::default(),
            2,
            Duration::from_secs(60 * 60),
        )
    }

    fn user_json() -> serde_json::Value {
        json!({
            "user": { "userName": "u" },
            "userBalances": [{}, {}, {}]
        })
    }

    #[tokio::test(start_paused = true)]
    async fn pass_logs_in_every_account_and_pins_user_agents() {
        let fixture = fixture();
        let mut mock = MockTransport::new();
        mock.expect_send()
            .withf(|request| request.url.ends_with("/auth/create-user"))
            .times(5)
            .returning(|_| ok(json!({ "token": jwt_expiring_at(Utc::now().timestamp() + 86_400) })));
        mock.expect_send()
            .withf(|request| request.url.ends_with("/user"))
            .times(5)
            .returning(|_| ok(user_json()));
        let runner = runner(&fixture, mock, &[11, 12, 13, 14, 15]);

        let summary = runner.run_pass().await;

        assert_eq!(
            summary,
            PassSummary {
                succeeded: 5,
                failed: 0,
                timed_out: 0
            }
        );
        let tokens = TokenStore::load(&fixture.token_path).unwrap();
        for id in 11..=15 {
            assert!(tokens.token(&id.to_string()).is_some());
        }
        let mut sessions = SessionStore::load(&fixture.session_path).unwrap();
        let agent = sessions.user_agent_for("11");
        assert_eq!(runner.sessions.lock().await.user_agent_for("11"), agent);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_accounts_are_counted_not_fatal() {
        let fixture = fixture();
        let mut mock = MockTransport::new();
        mock.expect_send()
            .withf(|request| request.url.ends_with("/auth/create-user"))
            .times(3)
            .returning(|request| {
                if request.header("Authorization") == Some("tma query_id=q22&user=%7B%22id%22%3A22%2C%22first_name%22%3A%22User22%22%7D&hash=h") {
                    status(400)
                } else {
                    ok(json!({ "token": jwt_expiring_at(Utc::now().timestamp() + 86_400) }))
                }
            });
        mock.expect_send()
            .withf(|request| request.url.ends_with("/user"))
            .times(2)
            .returning(|_| ok(user_json()));
        let runner = runner(&fixture, mock, &[21, 22, 23]);

        let summary = runner.run_pass().await;

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forever_loop_reuses_saved_tokens_between_passes() {
        let fixture = fixture();
        let mut mock = MockTransport::new();
        mock.expect_send()
            .withf(|request| request.url.ends_with("/auth/create-user"))
            .times(2)
            .returning(|_| ok(json!({ "token": jwt_expiring_at(Utc::now().timestamp() + 86_400) })));
        mock.expect_send()
            .withf(|request| request.url.ends_with("/user"))
            .times(6)
            .returning(|_| ok(user_json()));
        let runner = runner(&fixture, mock, &[31, 32]);

        // Passes start at 0s, 3605s and 7210s; the fourth would start after
        // the window closes.
        let result = time::timeout(Duration::from_secs(3 * 60 * 60), runner.run_forever()).await;

        assert!(result.is_err());
    }
}
