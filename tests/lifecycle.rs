//! Lifecycle atomicity: a failed rebuild or alias swap never leaves readers
//! without a current generation, and never removes the one being served.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;

use pluginsite::backend::{
    BulkDocument, BulkItemResult, Mapping, MemoryBackend, QueryResponse, SearchBackend,
};
use pluginsite::lifecycle::{IndexManager, RebuildJob};
use pluginsite::query::QueryPlan;
use pluginsite::scheduler::Job;
use pluginsite::search::SearchService;
use pluginsite::snapshot::SnapshotLoader;
use pluginsite::{CatalogSnapshot, Error, Fingerprints, Lookups, PluginRecord, Result, SearchOptions};

/// Wraps the in-memory backend and injects failures on demand.
#[derive(Default)]
struct FlakyBackend {
    inner: MemoryBackend,
    fail_swap: AtomicBool,
    fail_next_bulk: AtomicBool,
    reject: Option<String>,
    bulk_delay: Duration,
}

#[async_trait]
impl SearchBackend for FlakyBackend {
    fn engine_fingerprint(&self) -> String {
        self.inner.engine_fingerprint()
    }

    async fn create_index(&self, name: &str, mapping: &Mapping) -> Result<()> {
        self.inner.create_index(name, mapping).await
    }

    async fn bulk_index(&self, name: &str, documents: Vec<BulkDocument>) -> Result<Vec<BulkItemResult>> {
        tokio::time::sleep(self.bulk_delay).await;
        let mut results = self.inner.bulk_index(name, documents).await?;
        let fail_all = self.fail_next_bulk.swap(false, Ordering::SeqCst);
        for result in &mut results {
            if fail_all || self.reject.as_deref() == Some(result.id.as_str()) {
                result.error = Some("mapper_parsing_exception".to_string());
            }
        }
        Ok(results)
    }

    async fn query(&self, index: &str, plan: &QueryPlan) -> Result<QueryResponse> {
        self.inner.query(index, plan).await
    }

    async fn alias_swap(&self, alias: &str, from: Option<&str>, to: &str) -> Result<()> {
        if self.fail_swap.load(Ordering::SeqCst) {
            return Err(Error::Backend("connection reset by peer".to_string()));
        }
        self.inner.alias_swap(alias, from, to).await
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        self.inner.delete_index(name).await
    }

    async fn alias_target(&self, alias: &str) -> Result<Option<String>> {
        self.inner.alias_target(alias).await
    }
}

fn snapshot(created_at: &str, fingerprints: Fingerprints, names: &[&str]) -> CatalogSnapshot {
    let plugins = names
        .iter()
        .map(|name| PluginRecord {
            name: name.to_string(),
            title: Some(name.to_uppercase()),
            ..PluginRecord::default()
        })
        .collect();
    CatalogSnapshot::new(plugins, created_at.parse::<Timestamp>().unwrap(), fingerprints)
}

fn setup(backend: FlakyBackend) -> (Arc<FlakyBackend>, IndexManager, SearchService) {
    let backend = Arc::new(backend);
    let manager = IndexManager::new(backend.clone(), Mapping::bundled().unwrap(), "plugins");
    let search = SearchService::new(backend.clone(), "plugins", Lookups::bundled().unwrap());
    (backend, manager, search)
}

const FIRST: &str = "plugins_2024.05.01_12.00.00";

#[tokio::test]
async fn swap_failure_keeps_old_generation_aliased() {
    let (backend, manager, search) = setup(FlakyBackend::default());
    let own = manager.fingerprints();
    manager
        .refresh(Some(&snapshot("2024-05-01T12:00:00Z", own.clone(), &["git"])))
        .await
        .unwrap();

    backend.fail_swap.store(true, Ordering::SeqCst);
    let err = manager
        .refresh(Some(&snapshot("2024-05-02T12:00:00Z", own, &["git", "ant"])))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AliasSwap { .. }), "{err}");
    assert_eq!(manager.current_generation().await.unwrap().as_deref(), Some(FIRST));
    assert_eq!(backend.inner.indices().await, [FIRST]);
    let page = search.search(&SearchOptions::default()).await.unwrap();
    assert_eq!(page.total_items, 1);
}

#[tokio::test]
async fn document_failure_discards_new_generation() {
    let (backend, manager, _) = setup(FlakyBackend {
        reject: Some("ant".to_string()),
        ..FlakyBackend::default()
    });
    let own = manager.fingerprints();
    manager
        .refresh(Some(&snapshot("2024-05-01T12:00:00Z", own.clone(), &["git"])))
        .await
        .unwrap();

    let err = manager
        .refresh(Some(&snapshot("2024-05-02T12:00:00Z", own, &["git", "ant"])))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::BulkIndex { failed: 1, total: 2 }), "{err}");
    assert_eq!(manager.current_generation().await.unwrap().as_deref(), Some(FIRST));
    assert_eq!(backend.inner.indices().await, [FIRST]);
}

#[tokio::test]
async fn bulk_timeout_discards_new_generation() {
    let (backend, manager, _) = setup(FlakyBackend {
        bulk_delay: Duration::from_millis(200),
        ..FlakyBackend::default()
    });
    let manager = manager.with_bulk_timeout(Duration::from_millis(20));

    let err = manager
        .rebuild(&snapshot("2024-05-01T12:00:00Z", manager.fingerprints(), &["git"]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::BulkTimeout(_)), "{err}");
    assert!(backend.inner.indices().await.is_empty());
    assert_eq!(manager.current_generation().await.unwrap(), None);
}

#[tokio::test]
async fn schema_mismatch_skips_rebuild() {
    let (backend, manager, search) = setup(FlakyBackend::default());
    let own = manager.fingerprints();
    manager
        .refresh(Some(&snapshot("2024-05-01T12:00:00Z", own.clone(), &["git"])))
        .await
        .unwrap();

    let other = Fingerprints::new("another-schema", own.engine);
    let skipped = manager
        .refresh(Some(&snapshot("2024-05-02T12:00:00Z", other, &["git", "ant"])))
        .await
        .unwrap();

    assert_eq!(skipped, None);
    assert_eq!(manager.current_generation().await.unwrap().as_deref(), Some(FIRST));
    assert_eq!(backend.inner.indices().await, [FIRST]);
    assert_eq!(search.search(&SearchOptions::default()).await.unwrap().total_items, 1);
}

#[tokio::test]
async fn failed_rebuild_is_retried_on_next_run() {
    let (backend, manager, _) = setup(FlakyBackend::default());
    let manager = Arc::new(manager);
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("plugins.json.gz");
    snapshot("2024-05-01T12:00:00Z", manager.fingerprints(), &["git"])
        .write_to(&file)
        .await
        .unwrap();
    let loader = SnapshotLoader::new(reqwest::Client::new(), &file.display().to_string());
    let job = RebuildJob::new(loader, manager.clone());

    backend.fail_next_bulk.store(true, Ordering::SeqCst);
    let err = job.run().await.unwrap_err();
    assert!(matches!(err, Error::BulkIndex { failed: 1, total: 1 }), "{err}");
    assert_eq!(manager.current_generation().await.unwrap(), None);

    job.run().await.unwrap();
    assert_eq!(manager.current_generation().await.unwrap().as_deref(), Some(FIRST));

    job.run().await.unwrap();
    assert_eq!(backend.inner.indices().await, [FIRST]);
}

#[tokio::test]
async fn stale_unpublished_generation_is_replaced() {
    let (backend, manager, search) = setup(FlakyBackend::default());
    backend
        .inner
        .create_index(FIRST, &Mapping::bundled().unwrap())
        .await
        .unwrap();

    let published = manager
        .refresh(Some(&snapshot("2024-05-01T12:00:00Z", manager.fingerprints(), &["git", "ant"])))
        .await
        .unwrap();

    assert_eq!(published.as_deref(), Some(FIRST));
    assert_eq!(backend.inner.indices().await, [FIRST]);
    assert_eq!(search.search(&SearchOptions::default()).await.unwrap().total_items, 2);

    let err = manager
        .rebuild(&snapshot("2024-05-01T12:00:00Z", manager.fingerprints(), &["git"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IndexExists(_)), "{err}");
    assert_eq!(search.search(&SearchOptions::default()).await.unwrap().total_items, 2);
}

#[tokio::test]
async fn readers_always_see_a_complete_generation() {
    let (_, manager, search) = setup(FlakyBackend {
        bulk_delay: Duration::from_millis(5),
        ..FlakyBackend::default()
    });
    let own = manager.fingerprints();
    manager
        .refresh(Some(&snapshot("2024-05-01T12:00:00Z", own.clone(), &["a", "b"])))
        .await
        .unwrap();

    let search = Arc::new(search);
    let reader = {
        let search = search.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                let total = search
                    .search(&SearchOptions::default())
                    .await
                    .unwrap()
                    .total_items;
                assert!(total == 2 || total == 3, "saw {total} documents");
                tokio::task::yield_now().await;
            }
        })
    };

    for (hour, names) in [("13", ["a", "b", "c"]), ("14", ["a", "b", "d"])] {
        let created_at = format!("2024-05-01T{hour}:00:00Z");
        manager
            .refresh(Some(&snapshot(&created_at, own.clone(), &names)))
            .await
            .unwrap();
    }
    reader.await.unwrap();

    assert_eq!(
        manager.current_generation().await.unwrap().as_deref(),
        Some("plugins_2024.05.01_14.00.00")
    );
}
