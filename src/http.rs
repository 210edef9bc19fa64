use reqwest::Client;
use std::time::Duration;

/// Outbound HTTP timeouts carried inside each marketplace config. Read from
/// the environment once at construction, never at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request: Duration,
    pub connect: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(15),
            connect: Duration::from_secs(5),
        }
    }
}

impl HttpTimeouts {
    pub fn from_env() -> Self {
        Self {
            request: Duration::from_secs(parse_secs(
                std::env::var("HTTP_TIMEOUT_SECS").ok(),
                15,
            )),
            connect: Duration::from_secs(parse_secs(
                std::env::var("HTTP_CONNECT_TIMEOUT_SECS").ok(),
                5,
            )),
        }
    }
}

pub fn build_client(timeouts: HttpTimeouts) -> Client {
    Client::builder()
        .timeout(timeouts.request)
        .connect_timeout(timeouts.connect)
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn parse_secs(raw: Option<String>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok()).unwrap_or(default)
}
