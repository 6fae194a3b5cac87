use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Transport settings shared by every network analyzer
#[derive(Debug, Clone)]
pub struct AnalyzerHttpConfig {
    /// Refuse plain-HTTP analyzer endpoints
    pub require_https: bool,
    /// Per-request timeout enforced by the client itself. The aggregator
    /// applies its own (usually tighter) deadline on top.
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for AnalyzerHttpConfig {
    fn default() -> Self {
        Self {
            require_https: true,
            timeout_ms: 2_000,
            user_agent: "modguard/0.1 (toxicity analyzer client)".to_string(),
        }
    }
}

/// Build the reqwest client used by remote analyzers
pub fn build_client(config: &AnalyzerHttpConfig) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .user_agent(config.user_agent.clone());

    if config.require_https {
        builder = builder.https_only(true);
        info!("HTTPS enforced for analyzer endpoints");
    } else {
        warn!("Analyzer endpoints may use plain HTTP - do not send real traffic this way");
    }

    builder.build().context("Failed to create analyzer HTTP client")
}

/// Parse an analyzer endpoint and enforce the scheme policy
pub fn validate_endpoint(endpoint: &str, require_https: bool) -> Result<Url> {
    let parsed = Url::parse(endpoint).with_context(|| format!("Invalid analyzer endpoint: {endpoint}"))?;

    if require_https && parsed.scheme() != "https" {
        return Err(anyhow::anyhow!(
            "HTTPS is required but analyzer endpoint uses {}: {}",
            parsed.scheme(),
            endpoint
        ));
    }
    if parsed.host_str().is_none() {
        return Err(anyhow::anyhow!("Analyzer endpoint has no host: {}", endpoint));
    }

    Ok(parsed)
}
