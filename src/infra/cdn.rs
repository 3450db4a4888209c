//! Edge CDN purge client (zone purge API, bearer-token authenticated).

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{EdgeCdn, PurgeError};
use crate::config::CdnSettings;
use crate::infra::error::InfraError;

const API_BASE: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum PurgeBody<'a> {
    Files { files: &'a [String] },
    Prefixes { prefixes: &'a [String] },
    Everything { purge_everything: bool },
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Clone)]
pub struct HttpEdgeCdn {
    client: Client,
    endpoint: String,
    api_token: String,
    timeout: Duration,
    chunk_size: NonZeroUsize,
}

impl HttpEdgeCdn {
    /// Build a client when both zone id and token are configured.
    pub fn from_settings(settings: &CdnSettings) -> Result<Option<Self>, InfraError> {
        let Some((zone_id, api_token)) = settings.credentials() else {
            info!(
                target = "cms_sync::cdn",
                "edge CDN credentials missing; CDN tier disabled"
            );
            return Ok(None);
        };
        let client = Client::builder()
            .user_agent(concat!("cms-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(InfraError::http_client)?;

        Ok(Some(Self {
            client,
            endpoint: format!("{API_BASE}/zones/{zone_id}/purge_cache"),
            api_token: api_token.to_string(),
            timeout: settings.request_timeout,
            chunk_size: settings.max_urls_per_request,
        }))
    }

    async fn send(&self, body: &PurgeBody<'_>) -> Result<(), PurgeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|err| PurgeError::Transport(err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| PurgeError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(PurgeError::Status {
                status: status.as_u16(),
                message: text,
            });
        }

        let parsed: ApiResponse = serde_json::from_str(&text)
            .map_err(|err| PurgeError::Transport(format!("invalid purge response: {err}")))?;
        if !parsed.success {
            let message = parsed
                .errors
                .iter()
                .map(|error| format!("{}: {}", error.code, error.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PurgeError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    async fn send_chunked(
        &self,
        items: Vec<String>,
        wrap: impl for<'a> Fn(&'a [String]) -> PurgeBody<'a>,
    ) -> Result<(), PurgeError> {
        for chunk in items.chunks(self.chunk_size.get()) {
            self.send(&wrap(chunk)).await?;
            debug!(target = "cms_sync::cdn", count = chunk.len(), "edge purge batch sent");
        }
        Ok(())
    }
}

/// Sorted and de-duplicated.
fn unique(items: &[String]) -> Vec<String> {
    items
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Prefix purges are expressed as `host/path`, without a scheme.
fn strip_scheme(url: &str) -> String {
    url.split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url)
        .to_string()
}

#[async_trait]
impl EdgeCdn for HttpEdgeCdn {
    async fn purge_urls(&self, urls: &[String]) -> Result<(), PurgeError> {
        let urls = unique(urls);
        if urls.is_empty() {
            return Ok(());
        }
        self.send_chunked(urls, |files| PurgeBody::Files { files })
            .await
    }

    async fn purge_prefixes(&self, prefixes: &[String]) -> Result<(), PurgeError> {
        let prefixes: Vec<String> = unique(prefixes)
            .iter()
            .map(|prefix| strip_scheme(prefix))
            .collect();
        if prefixes.is_empty() {
            return Ok(());
        }
        self.send_chunked(prefixes, |prefixes| PurgeBody::Prefixes { prefixes })
            .await
    }

    async fn purge_everything(&self) -> Result<(), PurgeError> {
        self.send(&PurgeBody::Everything {
            purge_everything: true,
        })
        .await
    }
}
