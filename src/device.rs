//! Simulated device fingerprint.
//!
//! Every account is pinned to one mobile user agent (see
//! [`crate::persistence::SessionStore`]); the headers below are derived from
//! it so the API always sees the same device for the same account.

use rand::{Rng as _, rngs::OsRng};

/// Mobile WebView user agents to pick from.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148",
    "Mozilla/5.0 (iPad; CPU OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148",
    "Mozilla/5.0 (Linux; Android 14; SM-S918B Build/UP1A.231005.007; wv) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/127.0.6533.103 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 13; Pixel 7 Build/TQ3A.230901.001; wv) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/127.0.6533.64 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 14; 23049PCD8G Build/UKQ1.230804.001; wv) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/126.0.6478.134 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 12; SM-A525F Build/SP1A.210812.016; wv) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/127.0.6533.103 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 13; CPH2487 Build/TP1A.220905.001; wv) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/125.0.6422.165 Mobile Safari/537.36",
];

/// Returns a uniformly chosen entry of [`USER_AGENTS`].
pub fn random_user_agent() -> &'static str {
    USER_AGENTS[OsRng.gen_range(0..USER_AGENTS.len())]
}

/// Platform label reported in `sec-ch-ua-platform`.
pub fn platform(user_agent: &str) -> &'static str {
    let lower = user_agent.to_ascii_lowercase();
    if lower.contains("iphone") || lower.contains("ipad") {
        "ios"
    } else if lower.contains("android") {
        "android"
    } else {
        "Unknown"
    }
}

/// The fingerprint headers of one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub user_agent: String,
    pub platform: &'static str,
}

impl DeviceProfile {
    pub fn new(user_agent: String) -> Self {
        let platform = platform(&user_agent);
        Self {
            user_agent,
            platform,
        }
    }

    /// Header pairs sent with every request of this account.
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("User-Agent".to_string(), self.user_agent.clone()),
            (
                "sec-ch-ua".to_string(),
                format!(
                    r#""Not)A;Brand";v="99", "{} WebView";v="127", "Chromium";v="127""#,
                    self.platform
                ),
            ),
            ("sec-ch-ua-mobile".to_string(), "?1".to_string()),
            ("sec-ch-ua-platform".to_string(), format!(r#""{}""#, self.platform)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_platforms() {
        assert_eq!(platform(USER_AGENTS[0]), "ios");
        assert_eq!(platform(USER_AGENTS[3]), "ios");
        assert_eq!(platform(USER_AGENTS[4]), "android");
        assert_eq!(platform("curl/8.0"), "Unknown");
    }

    #[test]
    fn random_agent_comes_from_the_list() {
        for _ in 0..50 {
            assert!(USER_AGENTS.contains(&random_user_agent()));
        }
    }

    #[test]
    fn headers_carry_user_agent_and_platform() {
        let profile = DeviceProfile::new(USER_AGENTS[4].to_string());
        let headers = profile.headers();

        assert!(headers.contains(&("User-Agent".to_string(), USER_AGENTS[4].to_string())));
        assert!(headers.contains(&("sec-ch-ua-platform".to_string(), "\"android\"".to_string())));
        assert!(headers.iter().any(|(name, value)| name == "sec-ch-ua"
            && value.contains("android WebView")));
    }
}
