//! Framework cache tier backed by the site's revalidation endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::cache::{FrameworkCache, PurgeError};
use crate::config::InvalidationSettings;
use crate::infra::error::InfraError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Serialize)]
struct RevalidateBody<'a> {
    #[serde(skip_serializing_if = "is_empty")]
    tags: &'a [String],
    #[serde(skip_serializing_if = "is_empty")]
    paths: &'a [String],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    all: bool,
}

fn is_empty(items: &&[String]) -> bool {
    items.is_empty()
}

#[derive(Clone)]
pub struct HttpRevalidator {
    client: Client,
    endpoint: Url,
    secret: Option<String>,
}

impl HttpRevalidator {
    pub fn from_settings(settings: &InvalidationSettings) -> Result<Option<Self>, InfraError> {
        let Some(endpoint) = settings.revalidate_url.clone() else {
            return Ok(None);
        };
        let client = Client::builder()
            .user_agent(concat!("cms-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(InfraError::http_client)?;
        Ok(Some(Self {
            client,
            endpoint,
            secret: settings.revalidate_secret.clone(),
        }))
    }

    async fn post(&self, body: &RevalidateBody<'_>) -> Result<(), PurgeError> {
        let mut request = self.client.post(self.endpoint.clone()).json(body);
        if let Some(secret) = self.secret.as_deref() {
            request = request.bearer_auth(secret);
        }
        let response = request
            .send()
            .await
            .map_err(|err| PurgeError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PurgeError::Status {
                status: status.as_u16(),
                message,
            });
        }
        debug!(
            target = "cms_sync::revalidate",
            tags = body.tags.len(),
            paths = body.paths.len(),
            all = body.all,
            "framework revalidation accepted"
        );
        Ok(())
    }
}

#[async_trait]
impl FrameworkCache for HttpRevalidator {
    async fn invalidate_tags(&self, tags: &[String]) -> Result<(), PurgeError> {
        self.post(&RevalidateBody {
            tags,
            ..Default::default()
        })
        .await
    }

    async fn invalidate_paths(&self, paths: &[String]) -> Result<(), PurgeError> {
        self.post(&RevalidateBody {
            paths,
            ..Default::default()
        })
        .await
    }

    async fn invalidate_all(&self) -> Result<(), PurgeError> {
        self.post(&RevalidateBody {
            all: true,
            ..Default::default()
        })
        .await
    }
}
