//! HTTP gateway to the CMS query API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::application::cms::{CmsError, CmsGateway, RelatedDocument, TranslationLookup};
use crate::config::CmsSettings;
use crate::infra::error::InfraError;

const RELATED_PROJECTION: &str = r#"{_id, _type, "slug": slug.current, language}"#;

const TRANSLATION_QUERY: &str = r#"{
  "meta": *[_type == "translation.metadata" && references($id)][0]{
    _id,
    "siblings": translations[].value._ref
  },
  "language": *[_id == $id][0].language
}"#;

const LANGUAGE_QUERY: &str = r#"*[_id == $id][0].language"#;

#[derive(Debug, Deserialize)]
struct QueryResponse<T> {
    result: T,
}

#[derive(Debug, Default, Deserialize)]
struct TranslationRow {
    #[serde(default)]
    meta: Option<TranslationMeta>,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranslationMeta {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    siblings: Option<Vec<Option<String>>>,
}

/// Read-only client for the CMS query endpoint.
#[derive(Clone)]
pub struct HttpCmsGateway {
    client: Client,
    endpoint: Url,
    token: Option<String>,
    timeout: Duration,
}

impl HttpCmsGateway {
    /// Build a gateway when a project id is configured.
    pub fn from_settings(settings: &CmsSettings) -> Result<Option<Self>, InfraError> {
        let Some(project_id) = settings.project_id.as_deref() else {
            return Ok(None);
        };
        let endpoint = Url::parse(&format!(
            "https://{project_id}.api.sanity.io/v{}/data/query/{}",
            settings.api_version.trim_start_matches('v'),
            settings.dataset
        ))
        .map_err(|err| InfraError::configuration(format!("invalid cms endpoint: {err}")))?;

        let client = Client::builder()
            .user_agent(concat!("cms-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(InfraError::http_client)?;

        Ok(Some(Self {
            client,
            endpoint,
            token: settings.token.clone(),
            timeout: settings.query_timeout,
        }))
    }

    async fn query<T: DeserializeOwned>(
        &self,
        groq: &str,
        params: &[(&str, Value)],
    ) -> Result<T, CmsError> {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("query", groq);
            for (name, value) in params {
                pairs.append_pair(&format!("${name}"), &value.to_string());
            }
        }

        let mut request = self.client.get(url).timeout(self.timeout);
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|err| transport_error(err, started))?;

        let status = response.status();
        if status != StatusCode::OK {
            let message = response.text().await.unwrap_or_default();
            return Err(CmsError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: QueryResponse<T> = response.json().await.map_err(|err| {
            if err.is_timeout() {
                timeout_error(started)
            } else {
                CmsError::Decode(err.to_string())
            }
        })?;
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cms query completed"
        );
        Ok(body.result)
    }
}

fn timeout_error(started: Instant) -> CmsError {
    CmsError::Timeout {
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

fn transport_error(err: reqwest::Error, started: Instant) -> CmsError {
    if err.is_timeout() {
        timeout_error(started)
    } else {
        CmsError::Transport(err.to_string())
    }
}

#[async_trait]
impl CmsGateway for HttpCmsGateway {
    async fn translation_lookup(&self, document_id: &str) -> Result<TranslationLookup, CmsError> {
        let row: Option<TranslationRow> = self
            .query(TRANSLATION_QUERY, &[("id", json!(document_id))])
            .await?;
        let row = row.unwrap_or_default();

        let (group_id, sibling_ids) = match row.meta {
            Some(meta) => (
                Some(meta.id),
                meta.siblings
                    .unwrap_or_default()
                    .into_iter()
                    .flatten()
                    .collect(),
            ),
            None => (None, Vec::new()),
        };

        Ok(TranslationLookup {
            group_id,
            language: row.language,
            sibling_ids,
        })
    }

    async fn document_language(&self, document_id: &str) -> Result<Option<String>, CmsError> {
        self.query(LANGUAGE_QUERY, &[("id", json!(document_id))])
            .await
    }

    async fn referencing_documents(
        &self,
        document_id: &str,
    ) -> Result<Vec<RelatedDocument>, CmsError> {
        let groq = format!("*[references($id)]{RELATED_PROJECTION}");
        self.query(&groq, &[("id", json!(document_id))]).await
    }

    async fn children_of(&self, document_id: &str) -> Result<Vec<RelatedDocument>, CmsError> {
        let groq = format!(
            "coalesce(*[_id == $id][0].photos, *[_id == $id][0].logs, [])[]->{RELATED_PROJECTION}"
        );
        let children: Vec<Option<RelatedDocument>> =
            self.query(&groq, &[("id", json!(document_id))]).await?;
        Ok(children.into_iter().flatten().collect())
    }

    async fn fetch_documents(&self, ids: &[String]) -> Result<Vec<RelatedDocument>, CmsError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let groq = format!("*[_id in $ids]{RELATED_PROJECTION}");
        self.query(&groq, &[("ids", json!(ids))]).await
    }
}
