//! Upstream feeds the catalog is assembled from.
//!
//! Every whole feed is fetched up front; a failure there aborts the run. The
//! per-plugin statistics are fetched afterwards with bounded parallelism, and a
//! failure for one plugin only drops that plugin's statistics.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Config, StatsConfig};
use crate::error::Result;

pub mod http;
pub mod stats;

pub use http::{HttpFeeds, HttpStatsSource};
pub use stats::{ArchiveStatsSource, DirectoryStatsSource};

/// The plugin registry feed.
///
/// Entries are kept as raw JSON so that a malformed field in one plugin only
/// affects the field group that reads it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryFeed {
    #[serde(default)]
    pub plugins: BTreeMap<String, Value>,
    #[serde(default)]
    pub warnings: Vec<Value>,
}

/// The release-history feed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseHistoryFeed {
    #[serde(default)]
    pub release_history: Vec<ReleaseDay>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseDay {
    #[serde(default)]
    pub releases: Vec<Release>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    #[serde(default)]
    pub gav: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub first_release: bool,
}

/// The documentation-URL feed, keyed by plugin name.
pub type DocumentationFeed = BTreeMap<String, DocumentationEntry>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentationEntry {
    #[serde(default)]
    pub url: Option<String>,
}

/// Everything the catalog builder consumes for one run.
#[derive(Debug, Clone, Default)]
pub struct SourceFeeds {
    pub registry: RegistryFeed,
    pub release_history: ReleaseHistoryFeed,
    pub documentation: DocumentationFeed,
    /// Raw statistics documents keyed by plugin name.
    pub stats: BTreeMap<String, Value>,
}

/// Retrieval strategy for per-plugin installation statistics.
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Fetch the statistics document for a plugin, `None` if there is none
    async fn fetch(&self, plugin: &str) -> Result<Option<Value>>;
}

/// Create the configured statistics source.
///
/// Sources that need a one-off download or a local checkout resolve it here,
/// so an unusable source fails before any plugin is processed.
pub async fn stats_source(
    config: &StatsConfig,
    client: &reqwest::Client,
) -> Result<Arc<dyn StatsSource>> {
    Ok(match config {
        StatsConfig::Http { base_url } => {
            Arc::new(HttpStatsSource::new(client.clone(), base_url.clone()))
        }
        StatsConfig::Directory { path } => Arc::new(DirectoryStatsSource::open(path.clone())?),
        StatsConfig::Archive { url } => Arc::new(ArchiveStatsSource::download(client, url).await?),
    })
}

/// All upstream sources for one generation run.
pub struct Sources {
    feeds: HttpFeeds,
    stats: Arc<dyn StatsSource>,
    concurrency: usize,
}

impl Sources {
    pub fn new(feeds: HttpFeeds, stats: Arc<dyn StatsSource>) -> Self {
        Self {
            feeds,
            stats,
            concurrency: default_concurrency(),
        }
    }

    pub async fn from_config(config: &Config, client: reqwest::Client) -> Result<Self> {
        let stats = stats_source(&config.sources.stats, &client).await?;
        Ok(Self::new(HttpFeeds::new(client, &config.sources), stats))
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fetch every feed, then the statistics for every plugin in the registry.
    pub async fn fetch(&self) -> Result<SourceFeeds> {
        info!("Downloading registry, release history and documentation feeds");
        let (registry, release_history, documentation) = tokio::try_join!(
            self.feeds.registry(),
            self.feeds.release_history(),
            self.feeds.documentation(),
        )?;
        info!(plugins = registry.plugins.len(), "Registry feed downloaded");

        let names = registry
            .plugins
            .iter()
            .map(|(key, entry)| plugin_name(key, entry))
            .collect();
        let stats = fetch_stats(self.stats.as_ref(), names, self.concurrency).await;

        Ok(SourceFeeds {
            registry,
            release_history,
            documentation,
            stats,
        })
    }
}

/// Name of a registry entry, falling back to its key.
pub fn plugin_name(key: &str, entry: &Value) -> String {
    entry
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(key)
        .to_string()
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}

/// Fetch statistics for `names` with at most `concurrency` requests in flight.
pub async fn fetch_stats(
    source: &dyn StatsSource,
    names: Vec<String>,
    concurrency: usize,
) -> BTreeMap<String, Value> {
    let total = names.len();
    let results: Vec<(String, Option<Value>)> = stream::iter(names)
        .map(|name| async move {
            match source.fetch(&name).await {
                Ok(Some(stats)) => (name, Some(stats)),
                Ok(None) => {
                    debug!(plugin = %name, "No statistics available");
                    (name, None)
                }
                Err(e) => {
                    warn!(plugin = %name, source = source.name(), error = %e, "Problem getting statistics");
                    (name, None)
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let stats: BTreeMap<_, _> = results
        .into_iter()
        .filter_map(|(name, stats)| stats.map(|s| (name, s)))
        .collect();
    info!(
        source = source.name(),
        found = stats.len(),
        total,
        "Statistics fetched"
    );
    stats
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::error::Error;

    struct CountingSource {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl StatsSource for CountingSource {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn fetch(&self, plugin: &str) -> Result<Option<Value>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match plugin {
                "broken" => Err(Error::Internal("boom".into())),
                "missing" => Ok(None),
                _ => Ok(Some(json!({ "installations": {} }))),
            }
        }
    }

    #[tokio::test]
    async fn fan_out_is_bounded_and_skips_failures() {
        let source = CountingSource {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        let names = ["a", "b", "broken", "c", "missing", "d", "e"]
            .into_iter()
            .map(String::from)
            .collect();

        let stats = fetch_stats(&source, names, 2).await;

        assert!(source.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(stats.len(), 5);
        assert!(!stats.contains_key("broken"));
        assert!(!stats.contains_key("missing"));
    }

    #[test]
    fn plugin_name_falls_back_to_key() {
        assert_eq!(plugin_name("git", &json!({ "name": "git-client" })), "git-client");
        assert_eq!(plugin_name("git", &json!({ "name": "  " })), "git");
        assert_eq!(plugin_name("git", &json!({})), "git");
    }

    #[test]
    fn release_history_tolerates_missing_fields() {
        let feed: ReleaseHistoryFeed = serde_json::from_value(json!({
            "releaseHistory": [
                { "releases": [{ "gav": "org:git:1.0", "timestamp": 1, "firstRelease": true }] },
                {}
            ]
        }))
        .unwrap();
        assert_eq!(feed.release_history.len(), 2);
        assert!(feed.release_history[0].releases[0].first_release);
    }
}
