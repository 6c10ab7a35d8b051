//! Query execution and result shaping against the current generation.

use std::cmp::Ordering;
use std::sync::Arc;

use semver::Version;
use tracing::debug;

use pluginsite_core::{Category, Label, PluginRecord, SearchOptions, SearchResult};

use crate::backend::{QueryResponse, SearchBackend};
use crate::error::{Error, Result};
use crate::lookup::Lookups;
use crate::query::{self, QueryPlan};

/// Read side of the catalog. Every query goes through the alias.
pub struct SearchService {
    backend: Arc<dyn SearchBackend>,
    alias: String,
    lookups: Lookups,
}

impl SearchService {
    pub fn new(backend: Arc<dyn SearchBackend>, alias: impl Into<String>, lookups: Lookups) -> Self {
        Self {
            backend,
            alias: alias.into(),
            lookups,
        }
    }

    pub fn plan(&self, options: &SearchOptions) -> Result<QueryPlan> {
        query::plan(options)
    }

    /// Run a plan and shape the hits into a page of records.
    pub async fn execute(&self, plan: &QueryPlan) -> Result<SearchResult<PluginRecord>> {
        let response = self.backend.query(&self.alias, plan).await?;
        debug!(total = response.total, hits = response.hits.len(), "Query executed");

        let items = records(response.hits.into_iter().map(|hit| (hit.id, hit.source)))?;
        let page_size = u32::try_from(plan.size).unwrap_or(u32::MAX);
        let page = plan
            .from
            .checked_div(plan.size)
            .and_then(|pages| u32::try_from(pages + 1).ok())
            .unwrap_or(1);
        Ok(SearchResult::new(items, response.total, page, page_size))
    }

    pub async fn search(&self, options: &SearchOptions) -> Result<SearchResult<PluginRecord>> {
        let plan = self.plan(options)?;
        self.execute(&plan).await
    }

    /// A single plugin by exact name; `None` when unknown.
    pub async fn get_plugin(&self, name: &str) -> Result<Option<PluginRecord>> {
        let response = self.backend.query(&self.alias, &QueryPlan::lookup(name)).await?;
        Ok(records(response.hits.into_iter().map(|hit| (hit.id, hit.source)))?
            .into_iter()
            .next())
    }

    /// Categories present in the index, in reference-table order.
    pub async fn categories(&self) -> Result<Vec<Category>> {
        let present = self.distinct("categories", "categories").await?;
        Ok(self
            .lookups
            .categories()
            .iter()
            .filter(|category| present.contains(&category.id))
            .cloned()
            .collect())
    }

    /// Labels present in the index with their display titles, sorted by id.
    pub async fn labels(&self) -> Result<Vec<Label>> {
        let mut ids = self.distinct("labels", "labels").await?;
        ids.sort();
        Ok(ids.iter().map(|id| self.lookups.label(id)).collect())
    }

    /// Distinct maintainer ids, sorted.
    pub async fn maintainers(&self) -> Result<Vec<String>> {
        let mut ids = self.distinct("maintainers", "maintainers.id").await?;
        ids.sort();
        Ok(ids)
    }

    /// Distinct required-core versions, newest first.
    pub async fn versions(&self) -> Result<Vec<String>> {
        let mut versions = self.distinct("versions", "requiredCore").await?;
        versions.sort_by(|a, b| compare_versions(b, a));
        Ok(versions)
    }

    async fn distinct(&self, name: &str, field: &str) -> Result<Vec<String>> {
        let QueryResponse { mut aggregations, .. } = self
            .backend
            .query(&self.alias, &QueryPlan::aggregation(name, field))
            .await?;
        Ok(aggregations
            .remove(name)
            .unwrap_or_default()
            .into_iter()
            .map(|bucket| bucket.key)
            .collect())
    }
}

fn records(hits: impl Iterator<Item = (String, serde_json::Value)>) -> Result<Vec<PluginRecord>> {
    hits.map(|(id, source)| {
        serde_json::from_value(source)
            .map_err(|e| Error::Backend(format!("stored document {id} is not a plugin record: {e}")))
    })
    .collect()
}

/// Parse `2.60`, `2.60.3` or `1.625.3-rc1` style versions.
fn lenient_version(value: &str) -> Option<Version> {
    if let Ok(version) = Version::parse(value) {
        return Some(version);
    }
    let (release, pre) = match value.split_once('-') {
        Some((release, pre)) => (release, Some(pre)),
        None => (value, None),
    };
    let parts = release
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    let mut version = match parts.as_slice() {
        [major] => Version::new(*major, 0, 0),
        [major, minor] => Version::new(*major, *minor, 0),
        [major, minor, patch] => Version::new(*major, *minor, *patch),
        _ => return None,
    };
    if let Some(pre) = pre {
        version.pre = semver::Prerelease::new(pre).ok()?;
    }
    Some(version)
}

/// Semantic order where both parse, parsed before unparsed, else by string.
fn compare_versions(a: &str, b: &str) -> Ordering {
    match (lenient_version(a), lenient_version(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}
