use std::env;
use std::time::Duration;
use url::Url;

use crate::errors::ChatError;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: Url,
    pub stream_timeout: Duration,
    pub api_token: Option<String>,
    pub user_id: Option<String>,
}

impl ClientConfig {
    pub fn new(api_base_url: Url) -> Self {
        Self {
            api_base_url,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            api_token: None,
            user_id: None,
        }
    }

    /// Reads `CHAT_API_BASE_URL`, `CHAT_STREAM_TIMEOUT_SECS`, `CHAT_API_TOKEN`
    /// and `CHAT_USER_ID`. Call `dotenv().ok()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = lookup("CHAT_API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let api_base_url = Url::parse(&base)?;

        let stream_timeout = match lookup("CHAT_STREAM_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    ChatError::Config(format!("CHAT_STREAM_TIMEOUT_SECS must be a whole number of seconds, got {raw:?}"))
                })?;
                if secs == 0 {
                    return Err(ChatError::Config("CHAT_STREAM_TIMEOUT_SECS must be positive".to_string()));
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_STREAM_TIMEOUT,
        };

        Ok(Self {
            api_base_url,
            stream_timeout,
            api_token: lookup("CHAT_API_TOKEN").filter(|t| !t.is_empty()),
            user_id: lookup("CHAT_USER_ID").filter(|u| !u.is_empty()),
        })
    }

    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }
}
