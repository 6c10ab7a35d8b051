//! Index lifecycle manager.
//!
//! A generation is an index built from exactly one snapshot and named after
//! its creation time. Readers only ever go through the alias, which is moved
//! in a single backend call once a generation is fully populated. The
//! previous generation is deleted only after that move succeeded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jiff::civil::DateTime;
use jiff::tz::TimeZone;
use jiff::Timestamp;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::backend::{BulkDocument, Mapping, SearchBackend};
use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::scheduler::Job;
use crate::snapshot::{CatalogSnapshot, Fingerprints, LoadedSnapshot, SnapshotLoader};

const GENERATION_FORMAT: &str = "%Y.%m.%d_%H.%M.%S";
const DEFAULT_BULK_TIMEOUT: Duration = Duration::from_secs(120);

/// Generation name for a snapshot, e.g. `plugins_2024.05.01_12.00.00`.
pub fn generation_name(alias: &str, created_at: Timestamp) -> String {
    format!("{alias}_{}", created_at.strftime(GENERATION_FORMAT))
}

/// The creation time encoded in a generation name.
pub fn generation_timestamp(alias: &str, name: &str) -> Option<Timestamp> {
    let stamp = name.strip_prefix(alias)?.strip_prefix('_')?;
    DateTime::strptime(GENERATION_FORMAT, stamp)
        .ok()?
        .to_zoned(TimeZone::UTC)
        .ok()
        .map(|zoned| zoned.timestamp())
}

/// Whether `snapshot` should replace the current generation.
///
/// Only snapshots strictly newer than the current generation, compared at
/// second precision, and generated for the same schema and engine qualify.
pub fn should_rebuild(
    snapshot: Option<&CatalogSnapshot>,
    current: Option<Timestamp>,
    own: &Fingerprints,
) -> bool {
    let Some(snapshot) = snapshot else {
        debug!("No new snapshot");
        return false;
    };
    if let Some(current) = current {
        if snapshot.created_at().as_second() <= current.as_second() {
            info!(
                snapshot = %snapshot.created_at(),
                current = %current,
                "Snapshot is not newer than the current generation"
            );
            return false;
        }
    }
    let theirs = snapshot.fingerprints();
    if theirs != *own {
        warn!(
            snapshot_schema = %theirs.schema,
            snapshot_engine = %theirs.engine,
            schema = %own.schema,
            engine = %own.engine,
            "Snapshot was generated for a different schema or engine, keeping current generation"
        );
        return false;
    }
    true
}

/// What is currently being served.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub alias: String,
    pub generation: Option<String>,
    pub created_at: Option<Timestamp>,
    pub fingerprints: Fingerprints,
}

/// Builds, publishes and retires index generations behind one alias.
pub struct IndexManager {
    backend: Arc<dyn SearchBackend>,
    mapping: Mapping,
    alias: String,
    bulk_timeout: Duration,
}

impl IndexManager {
    pub fn new(backend: Arc<dyn SearchBackend>, mapping: Mapping, alias: impl Into<String>) -> Self {
        Self {
            backend,
            mapping,
            alias: alias.into(),
            bulk_timeout: DEFAULT_BULK_TIMEOUT,
        }
    }

    pub fn from_config(backend: Arc<dyn SearchBackend>, mapping: Mapping, config: &IndexConfig) -> Self {
        Self::new(backend, mapping, &config.alias).with_bulk_timeout(config.bulk_timeout())
    }

    pub fn with_bulk_timeout(mut self, timeout: Duration) -> Self {
        self.bulk_timeout = timeout;
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Fingerprints of the running mapping and engine.
    pub fn fingerprints(&self) -> Fingerprints {
        Fingerprints::new(self.mapping.fingerprint(), self.backend.engine_fingerprint())
    }

    pub async fn current_generation(&self) -> Result<Option<String>> {
        self.backend.alias_target(&self.alias).await
    }

    /// Timestamp of the aliased generation; an unparsable name counts as none.
    pub async fn current_timestamp(&self) -> Result<Option<Timestamp>> {
        Ok(self
            .current_generation()
            .await?
            .and_then(|name| generation_timestamp(&self.alias, &name)))
    }

    pub async fn should_rebuild(&self, snapshot: Option<&CatalogSnapshot>) -> Result<bool> {
        let current = self.current_timestamp().await?;
        Ok(should_rebuild(snapshot, current, &self.fingerprints()))
    }

    /// Create and fully populate a new generation, returning its name.
    ///
    /// Any document failure or a bulk timeout discards the new generation.
    /// An unpublished index left behind by an earlier attempt is replaced.
    pub async fn rebuild(&self, snapshot: &CatalogSnapshot) -> Result<String> {
        let name = generation_name(&self.alias, snapshot.created_at());
        if self.current_generation().await?.as_deref() == Some(name.as_str()) {
            return Err(Error::IndexExists(name));
        }
        match self.backend.delete_index(&name).await {
            Ok(()) => warn!(index = %name, "Removed stale unpublished generation"),
            Err(Error::IndexNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.backend.create_index(&name, &self.mapping).await?;
        info!(index = %name, "Index created");

        if let Err(e) = self.populate(&name, snapshot).await {
            error!(index = %name, error = %e, "Problem populating index");
            self.discard(&name).await;
            return Err(e);
        }
        Ok(name)
    }

    async fn populate(&self, name: &str, snapshot: &CatalogSnapshot) -> Result<()> {
        let documents = snapshot
            .plugins()
            .iter()
            .map(|plugin| {
                Ok(BulkDocument {
                    id: plugin.name.clone(),
                    body: serde_json::to_value(plugin)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let total = documents.len();

        let results = tokio::time::timeout(self.bulk_timeout, self.backend.bulk_index(name, documents))
            .await
            .map_err(|_| Error::BulkTimeout(self.bulk_timeout))??;

        let failures: Vec<_> = results.iter().filter(|r| !r.is_ok()).collect();
        for failure in &failures {
            warn!(
                index = %name,
                plugin = %failure.id,
                error = failure.error.as_deref().unwrap_or_default(),
                "Document failed to index"
            );
        }
        if !failures.is_empty() {
            return Err(Error::BulkIndex {
                failed: failures.len(),
                total,
            });
        }
        info!(index = %name, documents = total, "Documents indexed");
        Ok(())
    }

    /// Point the alias at `generation`, then delete the previous one.
    ///
    /// If the swap fails the previous generation stays aliased and the new
    /// one is discarded.
    pub async fn publish(&self, generation: &str) -> Result<()> {
        let previous = self.current_generation().await?;
        if previous.as_deref() == Some(generation) {
            debug!(index = %generation, "Generation already published");
            return Ok(());
        }

        if let Err(e) = self
            .backend
            .alias_swap(&self.alias, previous.as_deref(), generation)
            .await
        {
            error!(alias = %self.alias, index = %generation, error = %e, "Problem moving alias");
            self.discard(generation).await;
            return Err(match e {
                Error::AliasSwap { .. } => e,
                other => Error::AliasSwap {
                    alias: self.alias.clone(),
                    reason: other.to_string(),
                },
            });
        }
        info!(alias = %self.alias, index = %generation, "Generation published");

        if let Some(previous) = previous {
            match self.backend.delete_index(&previous).await {
                Ok(()) => info!(index = %previous, "Previous generation deleted"),
                Err(e) => warn!(index = %previous, error = %e, "Problem deleting previous generation"),
            }
        }
        Ok(())
    }

    /// Rebuild and publish when `snapshot` qualifies; returns the new generation.
    pub async fn refresh(&self, snapshot: Option<&CatalogSnapshot>) -> Result<Option<String>> {
        if !self.should_rebuild(snapshot).await? {
            return Ok(None);
        }
        let Some(snapshot) = snapshot else {
            return Ok(None);
        };
        let generation = self.rebuild(snapshot).await?;
        self.publish(&generation).await?;
        Ok(Some(generation))
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        let generation = self.current_generation().await?;
        let created_at = generation
            .as_deref()
            .and_then(|name| generation_timestamp(&self.alias, name));
        Ok(IndexStatus {
            alias: self.alias.clone(),
            generation,
            created_at,
            fingerprints: self.fingerprints(),
        })
    }

    async fn discard(&self, name: &str) {
        match self.backend.delete_index(name).await {
            Ok(()) => info!(index = %name, "Discarded unpublished generation"),
            Err(e) => warn!(index = %name, error = %e, "Problem discarding generation"),
        }
    }
}

/// Scheduled job: load the latest snapshot and refresh the index from it.
pub struct RebuildJob {
    loader: SnapshotLoader,
    manager: Arc<IndexManager>,
}

impl RebuildJob {
    pub fn new(loader: SnapshotLoader, manager: Arc<IndexManager>) -> Self {
        Self { loader, manager }
    }
}

#[async_trait]
impl Job for RebuildJob {
    fn name(&self) -> &'static str {
        "index-rebuild"
    }

    /// A snapshot is only committed once refresh succeeds, so a failed
    /// rebuild is retried with the same snapshot on the next run.
    async fn run(&self) -> Result<()> {
        let loaded = self.loader.load().await?;
        let snapshot = loaded.as_ref().map(LoadedSnapshot::snapshot);
        if let Some(generation) = self.manager.refresh(snapshot).await? {
            info!(index = %generation, "Index refreshed");
        }
        if let Some(loaded) = &loaded {
            self.loader.commit(loaded).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pluginsite_core::PluginRecord;

    use super::*;
    use crate::backend::MemoryBackend;

    fn at(ts: &str) -> Timestamp {
        ts.parse().unwrap()
    }

    fn snapshot(created_at: &str, fingerprints: Fingerprints, names: &[&str]) -> CatalogSnapshot {
        let plugins = names
            .iter()
            .map(|name| PluginRecord {
                name: name.to_string(),
                ..PluginRecord::default()
            })
            .collect();
        CatalogSnapshot::new(plugins, at(created_at), fingerprints)
    }

    fn manager() -> (Arc<MemoryBackend>, IndexManager) {
        let backend = Arc::new(MemoryBackend::new());
        let manager = IndexManager::new(backend.clone(), Mapping::bundled().unwrap(), "plugins");
        (backend, manager)
    }

    #[test]
    fn generation_names_sort_with_time() {
        let early = generation_name("plugins", at("2024-05-01T09:30:00Z"));
        let late = generation_name("plugins", at("2024-11-20T18:05:07Z"));
        assert_eq!(early, "plugins_2024.05.01_09.30.00");
        assert!(early < late);
        assert_eq!(generation_timestamp("plugins", &late), Some(at("2024-11-20T18:05:07Z")));
        assert_eq!(generation_timestamp("plugins", "plugins_garbage"), None);
        assert_eq!(generation_timestamp("plugins", "other_2024.05.01_09.30.00"), None);
    }

    #[test]
    fn should_rebuild_rules() {
        let own = Fingerprints::new("schema", "engine");
        let fresh = snapshot("2024-05-01T12:00:00.500Z", own.clone(), &[]);

        assert!(!should_rebuild(None, None, &own));
        assert!(should_rebuild(Some(&fresh), None, &own));
        assert!(should_rebuild(Some(&fresh), Some(at("2024-05-01T11:59:59Z")), &own));
        assert!(!should_rebuild(Some(&fresh), Some(at("2024-05-01T12:00:00Z")), &own));

        let other_schema = snapshot("2024-05-02T00:00:00Z", Fingerprints::new("v2", "engine"), &[]);
        assert!(!should_rebuild(Some(&other_schema), None, &own));
        let other_engine = snapshot("2024-05-02T00:00:00Z", Fingerprints::new("schema", "es-8"), &[]);
        assert!(!should_rebuild(Some(&other_engine), None, &own));
    }

    #[tokio::test]
    async fn refresh_publishes_and_retires_previous() {
        let (backend, manager) = manager();
        let own = manager.fingerprints();

        let first = snapshot("2024-05-01T12:00:00Z", own.clone(), &["git", "ant"]);
        let generation = manager.refresh(Some(&first)).await.unwrap().unwrap();
        assert_eq!(generation, "plugins_2024.05.01_12.00.00");
        assert_eq!(backend.count("plugins").await.unwrap(), 2);

        assert_eq!(manager.refresh(Some(&first)).await.unwrap(), None);

        let second = snapshot("2024-05-01T13:00:00Z", own, &["git"]);
        manager.refresh(Some(&second)).await.unwrap().unwrap();
        assert_eq!(backend.indices().await, ["plugins_2024.05.01_13.00.00"]);
        assert_eq!(backend.count("plugins").await.unwrap(), 1);

        let status = manager.status().await.unwrap();
        assert_eq!(status.generation.as_deref(), Some("plugins_2024.05.01_13.00.00"));
        assert_eq!(status.created_at, Some(at("2024-05-01T13:00:00Z")));
    }

    #[tokio::test]
    async fn mismatched_snapshot_keeps_current_generation() {
        let (backend, manager) = manager();
        let first = snapshot("2024-05-01T12:00:00Z", manager.fingerprints(), &["git"]);
        manager.refresh(Some(&first)).await.unwrap();

        let stale_schema = snapshot(
            "2024-05-02T12:00:00Z",
            Fingerprints::new("old-schema", manager.fingerprints().engine),
            &["git", "ant"],
        );
        assert_eq!(manager.refresh(Some(&stale_schema)).await.unwrap(), None);
        assert_eq!(
            manager.current_generation().await.unwrap().as_deref(),
            Some("plugins_2024.05.01_12.00.00")
        );
        assert_eq!(backend.indices().await.len(), 1);
    }
}
