//! Production upstream fetcher over HTTP.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{UpstreamFetcher, UpstreamPayload};
use crate::error::FetchError;

/// Fetches `{base_url}/{endpoint}?{params}` with a shared reqwest client.
///
/// Non-2xx responses and transport failures surface as
/// [`FetchError::Upstream`]; the orchestrator owns the call timeout.
pub struct HttpFetcher {
    client: Client,
    base_url: String,
}

impl HttpFetcher {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl UpstreamFetcher for HttpFetcher {
    async fn fetch(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<UpstreamPayload, FetchError> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        debug!(url = %url, "upstream fetch");

        let response = self
            .client
            .get(&url)
            .query(&params.iter().collect::<Vec<_>>())
            .send()
            .await
            .map_err(|e| FetchError::Upstream {
                endpoint: endpoint.to_string(),
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Upstream {
                endpoint: endpoint.to_string(),
                status: Some(status.as_u16()),
                message: format!("non-success response: {status}"),
            });
        }

        let bytes = response.bytes().await.map_err(|e| FetchError::Upstream {
            endpoint: endpoint.to_string(),
            status: Some(status.as_u16()),
            message: e.to_string(),
        })?;

        // Providers disagree on where (and whether) an event timestamp lives
        // in the body, so extraction is left to the caller's params/config;
        // the payload itself stays opaque here.
        Ok(UpstreamPayload {
            bytes: bytes.to_vec(),
            event_time: None,
        })
    }
}
