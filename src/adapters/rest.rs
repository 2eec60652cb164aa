//! REST Stats Source
//!
//! Implements the `StatsSource` port over HTTP: the configuration document is
//! a plain JSON file, counts come from a Bugzilla-style REST endpoint that
//! answers `{"bug_count": N}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::domain::{ConfigDocument, StatsSource};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the REST source
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// URL of the tracking configuration document
    pub config_url: String,

    /// Upper bound for a single request, body included
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            config_url: "http://mozilla.github.io/releasehealth/js/bzconfig.json".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct CountResponse {
    bug_count: CountValue,
}

/// Some deployments quote the count.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CountValue {
    Number(i64),
    Text(String),
}

impl CountValue {
    fn into_count(self) -> std::result::Result<i64, String> {
        match self {
            CountValue::Number(n) => Ok(n),
            CountValue::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| format!("bug_count '{}' is not an integer", s)),
        }
    }
}

// =============================================================================
// REST Stats Source
// =============================================================================

/// HTTP implementation of the remote source
pub struct RestStatsSource {
    config: FetchConfig,
    client: Client,
}

impl RestStatsSource {
    /// Create a new source with a client bounded by `config.timeout`
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("releasewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| Error::Connection {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|source| Error::Connection {
            url: url.to_string(),
            source,
        })?;

        serde_json::from_slice(&body).map_err(|e| Error::ResponseParse {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Debug for RestStatsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestStatsSource")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl StatsSource for RestStatsSource {
    #[instrument(skip(self))]
    async fn fetch_config_document(&self) -> Result<ConfigDocument> {
        debug!("Fetching tracking configuration from {}", self.config.config_url);
        self.get_json(&self.config.config_url).await
    }

    #[instrument(skip(self))]
    async fn fetch_count(&self, url: &str) -> Result<i64> {
        let response: CountResponse = self.get_json(url).await?;
        response
            .bug_count
            .into_count()
            .map_err(|reason| Error::ResponseParse {
                url: url.to_string(),
                reason,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();

        assert_eq!(
            config.config_url,
            "http://mozilla.github.io/releasehealth/js/bzconfig.json"
        );
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_source_new() {
        let source = RestStatsSource::new(FetchConfig::default());
        assert!(source.is_ok());
        assert!(format!("{:?}", source.unwrap()).contains("RestStatsSource"));
    }

    #[test]
    fn test_count_response_number() {
        let response: CountResponse = serde_json::from_str(r#"{"bug_count": 17}"#).unwrap();
        assert_eq!(response.bug_count.into_count().unwrap(), 17);
    }

    #[test]
    fn test_count_response_quoted() {
        let response: CountResponse = serde_json::from_str(r#"{"bug_count": " 8 "}"#).unwrap();
        assert_eq!(response.bug_count.into_count().unwrap(), 8);
    }

    #[test]
    fn test_count_response_garbage() {
        let response: CountResponse = serde_json::from_str(r#"{"bug_count": "many"}"#).unwrap();
        assert!(response.bug_count.into_count().is_err());

        let missing = serde_json::from_str::<CountResponse>(r#"{"bugs": []}"#);
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connection_error() {
        let source = RestStatsSource::new(FetchConfig {
            config_url: "http://127.0.0.1:1/bzconfig.json".to_string(),
            timeout: Duration::from_secs(2),
        })
        .unwrap();

        let err = source.fetch_config_document().await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert!(err.is_fetch());
    }
}
