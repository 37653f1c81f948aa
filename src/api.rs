//! Quest API client.
//!
//! [`ApiClient`] turns one logical API call into up to `retries + 1` HTTP
//! exchanges:
//!
//! - transport errors and non-rejected error statuses are retried after the
//!   configured delay, with one warning per retry;
//! - rejected requests (4xx other than 408 and 429) fail on the first attempt;
//! - a 2xx with an empty or falsy payload is a failure, never retried;
//! - a 2xx body that is not JSON is kept as a JSON string.
//!
//! Typed endpoint methods decode the payload into the models below and fail
//! with [`RequestError::Decode`] when it does not fit.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::device::DeviceProfile;
use crate::transport::{HttpRequest, Method, Transport};

/// Why a logical API call failed.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("request failed after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },
    #[error("response payload was empty")]
    Empty,
    #[error("unexpected response payload: {0}")]
    Decode(String),
}

/// How often and how patiently transient failures are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub retries: u32,
    /// Pause before every retry.
    pub delay: Duration,
}

/// Value of the `Authorization` header.
#[derive(Debug, Clone, Copy)]
pub enum Credential<'a> {
    /// Raw init data, only accepted by `/auth/create-user`.
    InitData(&'a str),
    /// Token issued by `/auth/create-user`.
    Bearer(&'a str),
}

impl Credential<'_> {
    fn header_value(&self) -> String {
        match self {
            Credential::InitData(init_data) => format!("tma {init_data}"),
            Credential::Bearer(token) => format!("Bearer {token}"),
        }
    }
}

/// Who a request is sent for.
pub struct RequestContext<'a> {
    /// One-based account number, used in log lines.
    pub account: usize,
    pub profile: &'a DeviceProfile,
    pub credential: Credential<'a>,
}

/// A numeric or string amount, printed as the API sent it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(serde_json::Number),
    Text(String),
}

impl Default for Amount {
    fn default() -> Self {
        Amount::Number(0.into())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Number(number) => write!(f, "{number}"),
            Amount::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Balance {
    #[serde(default)]
    pub pending: Amount,
    #[serde(default)]
    pub unprocessed: Amount,
    #[serde(default)]
    pub used: Amount,
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} pending - {} unprocessed - {} used]",
            self.pending, self.unprocessed, self.used
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub user_name: Option<String>,
}

/// Payload of `GET /user`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default)]
    pub user: UserProfile,
    #[serde(default)]
    pub user_balances: Vec<Balance>,
}

impl UserInfo {
    /// The balance summary logged once per pass.
    ///
    /// `userBalances` is positional: TON, HIGH, WATER.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` when fewer than three balances are present.
    pub fn report(&self) -> Result<String, String> {
        let [ton, high, water] = match self.user_balances.as_slice() {
            [ton, high, water, ..] => [ton, high, water],
            other => {
                return Err(format!(
                    "expected 3 balances (ton, high, water), got {}",
                    other.len()
                ));
            }
        };
        Ok(format!(
            "User: {} | Ton: {} | High: {} | Water: {}",
            self.user.user_name.as_deref().unwrap_or("unknown"),
            ton,
            high,
            water
        ))
    }
}

/// Payload of `POST /auth/create-user`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub token: Option<String>,
}

/// One entry of `GET /user/quest`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quest {
    /// Echoed back verbatim as `questId`.
    pub id: Value,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_done: bool,
    #[serde(default)]
    pub is_doing: bool,
}

impl Quest {
    /// The id as compared against the skip list.
    pub fn key(&self) -> String {
        match &self.id {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        }
    }
}

/// Client for the quest API, shared by all account processors.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    policy: RetryPolicy,
}

impl ApiClient {
    /// Creates a client for the API rooted at `base_url`.
    ///
    /// # Arguments
    ///
    /// * `transport` - Performs the HTTP exchanges
    /// * `base_url` - API root; a trailing `/` is ignored
    /// * `policy` - Retry count and delay for transient failures
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let api = ApiClient::new(
    ///     Arc::new(ReqwestTransport::new()?),
    ///     "https://api.example.com/",
    ///     RetryPolicy { retries: 1, delay: Duration::from_secs(3) },
    /// );
    /// assert_eq!(api.base_url(), "https://api.example.com");
    /// ```
    pub fn new(transport: Arc<dyn Transport>, base_url: &str, policy: RetryPolicy) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
        }
    }

    /// The API root without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Checks that the API host answers at all. Any HTTP status counts.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` if no response arrives.
    pub async fn probe(&self) -> Result<u16, String> {
        let request = HttpRequest {
            method: Method::Get,
            url: self.base_url.clone(),
            headers: Vec::new(),
            body: None,
        };
        self.transport
            .send(request)
            .await
            .map(|response| response.status)
            .map_err(|e| format!("API {} is unreachable: {e}", self.base_url))
    }

    /// Logs in with `POST /auth/create-user`.
    ///
    /// `ctx` should carry [`Credential::InitData`]; the referral code is sent
    /// as `refCode`.
    ///
    /// # Returns
    ///
    /// The decoded response. Its `token` may still be `None` when the API
    /// answered without one.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestError`] when the request fails after retries, is
    /// rejected, or answers with an empty or undecodable payload.
    pub async fn authenticate(
        &self,
        ctx: &RequestContext<'_>,
        ref_code: &str,
    ) -> Result<AuthResponse, RequestError> {
        let body = json!({ "refCode": ref_code });
        decode(self.request(ctx, Method::Post, "/auth/create-user", Some(body)).await?)
    }

    /// Fetches the user name and balances with `GET /user`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::authenticate`].
    pub async fn user_info(&self, ctx: &RequestContext<'_>) -> Result<UserInfo, RequestError> {
        decode(self.request(ctx, Method::Get, "/user", None).await?)
    }

    /// `GET /user/user-id`, returned undecoded.
    pub async fn user_id(&self, ctx: &RequestContext<'_>) -> Result<Value, RequestError> {
        self.request(ctx, Method::Get, "/user/user-id", None).await
    }

    /// Lists the account's quests with `GET /user/quest`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::authenticate`].
    pub async fn quests(&self, ctx: &RequestContext<'_>) -> Result<Vec<Quest>, RequestError> {
        decode(self.request(ctx, Method::Get, "/user/quest", None).await?)
    }

    /// Starts `quest` with `POST /user/do-quest`.
    ///
    /// Any non-empty payload counts as success, JSON or not.
    pub async fn complete_quest(
        &self,
        ctx: &RequestContext<'_>,
        quest: &Quest,
    ) -> Result<Value, RequestError> {
        let body = json!({ "questId": quest.id });
        self.request(ctx, Method::Post, "/user/do-quest", Some(body)).await
    }

    /// Claims the reward of `quest` with `POST /user/sucess-quest`.
    pub async fn claim_quest(
        &self,
        ctx: &RequestContext<'_>,
        quest: &Quest,
    ) -> Result<Value, RequestError> {
        let body = json!({ "questId": quest.id });
        self.request(ctx, Method::Post, "/user/sucess-quest", Some(body)).await
    }

    async fn request(
        &self,
        ctx: &RequestContext<'_>,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, RequestError> {
        let url = format!("{}{}", self.base_url, path);
        let attempts = self.policy.retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let request = HttpRequest {
                method,
                url: url.clone(),
                headers: headers(ctx),
                body: body.clone(),
            };

            let message = match self.transport.send(request).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    return payload(&response.body);
                }
                Ok(response) if is_rejected(response.status) => {
                    log::debug!(
                        "[Account {}] Request rejected url={} status={} body={}",
                        ctx.account,
                        url,
                        response.status,
                        response.body
                    );
                    return Err(RequestError::Rejected {
                        status: response.status,
                        body: response.body,
                    });
                }
                Ok(response) => format!("status {}", response.status),
                Err(e) => e.to_string(),
            };

            if attempt < attempts {
                log::warn!(
                    "[Account {}] Request failed: {} | {} | trying again...",
                    ctx.account,
                    url,
                    message
                );
                tokio::time::sleep(self.policy.delay).await;
            }
            last_error = message;
        }

        Err(RequestError::Exhausted {
            attempts,
            message: last_error,
        })
    }
}

fn headers(ctx: &RequestContext<'_>) -> Vec<(String, String)> {
    let mut headers = vec![
        (
            "Accept".to_string(),
            "application/json, text/plain, */*".to_string(),
        ),
        ("Accept-Language".to_string(), "en-US,en;q=0.9".to_string()),
        ("Content-Type".to_string(), "application/json".to_string()),
    ];
    headers.extend(ctx.profile.headers());
    headers.push(("Authorization".to_string(), ctx.credential.header_value()));
    headers
}

/// 4xx means the server understood and refused; only timeouts and rate
/// limits among them are worth retrying.
fn is_rejected(status: u16) -> bool {
    (400..500).contains(&status) && status != 408 && status != 429
}

fn payload(body: &str) -> Result<Value, RequestError> {
    if body.trim().is_empty() {
        return Err(RequestError::Empty);
    }
    // Plain-text bodies are successes too; only typed endpoints can reject them.
    let value: Value =
        serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()));
    if is_falsy(&value) {
        return Err(RequestError::Empty);
    }
    Ok(value)
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, RequestError> {
    serde_json::from_value(value).map_err(|e| RequestError::Decode(e.to_string()))
}
