use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::app::ports::SpecSourcePort;
use crate::app::tool_generator::SPEC_BASE_URL;
use crate::domain::errors::{DomainError, Result};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads API specification namespace files over HTTP.
///
/// Certificate checks follow the same `OPENSEARCH_SSL_VERIFY` setting as the
/// cluster connection.
pub struct HttpSpecSource {
    http: Client,
    base_url: String,
    verify_ssl: bool,
}

impl HttpSpecSource {
    pub fn new(base_url: impl Into<String>, verify_ssl: bool) -> Result<Self> {
        let http = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(|e| DomainError::SpecFetch(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            verify_ssl,
        })
    }

    pub fn published(verify_ssl: bool) -> Result<Self> {
        Self::new(SPEC_BASE_URL, verify_ssl)
    }

    fn url_for(&self, file_name: &str) -> String {
        format!("{}/{}", self.base_url, file_name)
    }
}

#[async_trait]
impl SpecSourcePort for HttpSpecSource {
    async fn fetch_spec(&self, file_name: &str) -> Result<String> {
        let url = self.url_for(file_name);
        tracing::debug!("fetching API specification {}", url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DomainError::SpecFetch(format!("{}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DomainError::SpecFetch(format!("{} returned {}", url, status)));
        }
        response
            .text()
            .await
            .map_err(|e| DomainError::SpecFetch(format!("{}: {}", url, e)))
    }
}
