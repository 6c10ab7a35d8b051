//! Catalog snapshots and their on-disk format.
//!
//! A snapshot is written once by the generator as gzip-compressed JSON and
//! read back by the server. The loader remembers the last snapshot it was
//! told has been processed and reports it as `None` until it changes.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use jiff::Timestamp;
use reqwest::header::{HeaderMap, HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use pluginsite_core::PluginRecord;

use crate::error::{Error, Result};

/// Schema and engine fingerprints a snapshot was generated for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprints {
    pub schema: String,
    pub engine: String,
}

impl Fingerprints {
    pub fn new(schema: impl Into<String>, engine: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            engine: engine.into(),
        }
    }
}

/// An immutable catalog, one record per plugin name, sorted by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    plugins: Vec<PluginRecord>,
    created_at: Timestamp,
    schema_fingerprint: String,
    engine_fingerprint: String,
}

impl CatalogSnapshot {
    pub fn new(plugins: Vec<PluginRecord>, created_at: Timestamp, fingerprints: Fingerprints) -> Self {
        Self {
            plugins,
            created_at,
            schema_fingerprint: fingerprints.schema,
            engine_fingerprint: fingerprints.engine,
        }
    }

    pub fn plugins(&self) -> &[PluginRecord] {
        &self.plugins
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn fingerprints(&self) -> Fingerprints {
        Fingerprints::new(&self.schema_fingerprint, &self.engine_fingerprint)
    }

    pub fn to_gzip(&self) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, self)?;
        encoder.flush()?;
        Ok(encoder.finish()?)
    }

    pub fn from_gzip(data: &[u8]) -> Result<Self> {
        let mut json = Vec::new();
        GzDecoder::new(data).read_to_end(&mut json)?;
        Ok(serde_json::from_slice(&json)?)
    }

    pub async fn write_to(&self, path: &Path) -> Result<()> {
        let data = self.to_gzip()?;
        tokio::fs::write(path, data).await?;
        info!(
            path = %path.display(),
            plugins = self.plugins.len(),
            "Snapshot written"
        );
        Ok(())
    }

    pub async fn read_from(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path).await?;
        Self::from_gzip(&data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Validator {
    ETag(String),
    LastModified(String),
    Modified(SystemTime),
}

#[derive(Debug, Clone)]
enum Location {
    Url(String),
    File(PathBuf),
}

impl Location {
    fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Location::Url(location.to_string())
        } else {
            let path = location.strip_prefix("file://").unwrap_or(location);
            Location::File(PathBuf::from(path))
        }
    }
}

/// A fetched snapshot and the version it was fetched at.
///
/// Until it is passed to [`SnapshotLoader::commit`], every load returns the
/// same snapshot again.
#[derive(Debug)]
pub struct LoadedSnapshot {
    snapshot: CatalogSnapshot,
    version: Option<Validator>,
}

impl LoadedSnapshot {
    pub fn snapshot(&self) -> &CatalogSnapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> CatalogSnapshot {
        self.snapshot
    }
}

/// Fetches the generated snapshot, skipping committed versions.
#[derive(Debug)]
pub struct SnapshotLoader {
    client: reqwest::Client,
    location: Location,
    last: Mutex<Option<Validator>>,
}

impl SnapshotLoader {
    /// `location` is an http(s) URL or a local path.
    pub fn new(client: reqwest::Client, location: &str) -> Self {
        Self {
            client,
            location: Location::parse(location),
            last: Mutex::new(None),
        }
    }

    /// The snapshot, or `None` if it has not changed since the last commit.
    pub async fn load(&self) -> Result<Option<LoadedSnapshot>> {
        let last = self.last.lock().await.clone();
        let fetched = match &self.location {
            Location::Url(url) => self.fetch_url(url, last.as_ref()).await?,
            Location::File(path) => fetch_file(path, last.as_ref()).await?,
        };
        let Some((body, validator)) = fetched else {
            debug!("Snapshot unchanged");
            return Ok(None);
        };

        let snapshot = tokio::task::spawn_blocking(move || CatalogSnapshot::from_gzip(&body))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
            .map_err(|e| Error::source_unavailable("snapshot", e))?;
        info!(
            plugins = snapshot.plugins.len(),
            created_at = %snapshot.created_at,
            "Snapshot loaded"
        );
        Ok(Some(LoadedSnapshot {
            snapshot,
            version: validator,
        }))
    }

    /// Mark `loaded` as processed; later loads skip it until it changes.
    pub async fn commit(&self, loaded: &LoadedSnapshot) {
        *self.last.lock().await = loaded.version.clone();
        debug!(created_at = %loaded.snapshot.created_at, "Snapshot committed");
    }

    async fn fetch_url(
        &self,
        url: &str,
        last: Option<&Validator>,
    ) -> Result<Option<(Bytes, Option<Validator>)>> {
        let mut request = self.client.get(url);
        match last {
            Some(Validator::ETag(etag)) => request = request.header(IF_NONE_MATCH, etag),
            Some(Validator::LastModified(date)) => request = request.header(IF_MODIFIED_SINCE, date),
            _ => {}
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::source_unavailable("snapshot", e))?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::source_unavailable(
                "snapshot",
                format!("unexpected response from {url} - {status}"),
            ));
        }

        let validator = http_validator(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::source_unavailable("snapshot", e))?;
        Ok(Some((body, validator)))
    }
}

/// `ETag` is preferred over `Last-Modified`.
fn http_validator(headers: &HeaderMap) -> Option<Validator> {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(String::from)
    };
    header(ETAG)
        .map(Validator::ETag)
        .or_else(|| header(LAST_MODIFIED).map(Validator::LastModified))
}

async fn fetch_file(
    path: &Path,
    last: Option<&Validator>,
) -> Result<Option<(Bytes, Option<Validator>)>> {
    let unavailable = |e: std::io::Error| Error::source_unavailable("snapshot", format!("{}: {e}", path.display()));
    let modified = tokio::fs::metadata(path)
        .await
        .and_then(|meta| meta.modified())
        .map_err(unavailable)?;
    let validator = Validator::Modified(modified);
    if last == Some(&validator) {
        return Ok(None);
    }
    let body = tokio::fs::read(path).await.map_err(unavailable)?;
    Ok(Some((Bytes::from(body), Some(validator))))
}
