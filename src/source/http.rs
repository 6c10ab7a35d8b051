use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::SourcesConfig;
use crate::error::{Error, Result};
use crate::source::{DocumentationFeed, RegistryFeed, ReleaseHistoryFeed, StatsSource};

/// Fetches the whole-document feeds over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFeeds {
    client: reqwest::Client,
    update_center_url: String,
    release_history_url: String,
    documentation_url: String,
}

impl HttpFeeds {
    pub fn new(client: reqwest::Client, config: &SourcesConfig) -> Self {
        Self {
            client,
            update_center_url: config.update_center_url.clone(),
            release_history_url: config.release_history_url.clone(),
            documentation_url: config.documentation_url.clone(),
        }
    }

    pub async fn registry(&self) -> Result<RegistryFeed> {
        let body = get_text(&self.client, "registry feed", &self.update_center_url).await?;
        decode("registry feed", strip_jsonp(&body))
    }

    pub async fn release_history(&self) -> Result<ReleaseHistoryFeed> {
        let body = get_text(&self.client, "release history", &self.release_history_url).await?;
        decode("release history", &body)
    }

    pub async fn documentation(&self) -> Result<DocumentationFeed> {
        let body = get_text(&self.client, "documentation feed", &self.documentation_url).await?;
        decode("documentation feed", &body)
    }
}

async fn get_text(client: &reqwest::Client, source: &str, url: &str) -> Result<String> {
    debug!("GET {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::source_unavailable(source, e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::source_unavailable(
            source,
            format!("unexpected response from {url} - {status}"),
        ));
    }
    response
        .text()
        .await
        .map_err(|e| Error::source_unavailable(source, e))
}

fn decode<T: DeserializeOwned>(source: &str, body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| Error::source_unavailable(source, format!("returned invalid JSON: {e}")))
}

/// Strip an `updateCenter.post(...);` style wrapper, if present.
fn strip_jsonp(body: &str) -> &str {
    let trimmed = body.trim();
    if trimmed.starts_with('{') {
        return trimmed;
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Fetches `{base_url}/{plugin}.stats.json`, one request per plugin.
#[derive(Debug, Clone)]
pub struct HttpStatsSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatsSource {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StatsSource for HttpStatsSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, plugin: &str) -> Result<Option<Value>> {
        let url = format!("{}/{}.stats.json", self.base_url, plugin);
        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(Error::Internal(format!(
                "unexpected response for statistics from {url} - {status}"
            ))),
        }
    }
}
