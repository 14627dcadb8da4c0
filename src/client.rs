use std::time::Duration;

use tracing::info;

/// Configuration for building the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(20),
            max_idle_per_host: 32,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Builds the reqwest client shared by every worker.
///
/// The timeout covers the whole request including reading the body.
pub fn build_client(config: &ClientConfig) -> Result<reqwest::Client, reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .pool_max_idle_per_host(config.max_idle_per_host)
        .pool_idle_timeout(config.idle_timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;

    info!(
        request_timeout = ?config.request_timeout,
        max_idle_per_host = config.max_idle_per_host,
        idle_timeout = ?config.idle_timeout,
        "HTTP client configured"
    );

    Ok(client)
}
