//! Catalog builder.
//!
//! Each raw registry entry is turned into one [`PluginRecord`] by running a
//! fixed, ordered list of field-group parsers over it. A parser only writes its
//! own fields. When a parser fails for one plugin the failure is logged and the
//! group keeps its default, so a malformed entry never aborts the run.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

use pluginsite_core::PluginRecord;

use crate::config::ScmConfig;
use crate::error::Result;
use crate::lookup::Lookups;
use crate::snapshot::{CatalogSnapshot, Fingerprints};
use crate::source::{plugin_name, SourceFeeds, Sources};

mod relations;
mod release;
mod root;
mod security;
mod stats;
mod wiki;

pub use relations::{DependenciesParser, MaintainersParser, ReverseDependenciesParser};
pub use release::{FirstReleaseParser, ScmParser};
pub use root::{CategoriesParser, DatesParser, LabelsParser, RootParser};
pub use security::SecurityWarningsParser;
pub use stats::StatsParser;
pub use wiki::WikiParser;

/// A defect in one field group of one plugin.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed '{field}': {reason}")]
    Field { field: &'static str, reason: String },

    #[error("unparsable date in '{field}': {value:?}")]
    Date { field: &'static str, value: String },

    #[error("invalid statistics: {0}")]
    Stats(String),
}

/// One registry entry as seen by the parsers.
#[derive(Debug, Clone, Copy)]
pub struct RawEntry<'a> {
    name: &'a str,
    value: &'a Value,
}

impl<'a> RawEntry<'a> {
    pub fn new(name: &'a str, value: &'a Value) -> Self {
        Self { name, value }
    }

    /// The plugin name, which is also the record key.
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// A string field, `None` when missing, not a string, or blank.
    pub fn str(&self, field: &str) -> Option<&'a str> {
        self.value
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// A typed field, `Ok(None)` when missing or null.
    pub fn field<T: DeserializeOwned>(&self, field: &'static str) -> std::result::Result<Option<T>, ParseError> {
        match self.value.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|e| ParseError::Field {
                    field,
                    reason: e.to_string(),
                }),
        }
    }
}

/// A single-responsibility transform populating one slice of a record.
pub trait FieldParser: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Parse the relevant pieces of `entry` into `record`.
    ///
    /// On error the parser must leave its fields untouched.
    fn parse(&self, entry: &RawEntry<'_>, record: &mut PluginRecord) -> std::result::Result<(), ParseError>;
}

/// Builds canonical plugin records from fetched source feeds.
#[derive(Debug, Clone)]
pub struct CatalogBuilder {
    lookups: Lookups,
    scm: ScmConfig,
}

impl CatalogBuilder {
    pub fn new(lookups: Lookups, scm: ScmConfig) -> Self {
        Self { lookups, scm }
    }

    /// The ordered parser pipeline for one run.
    ///
    /// Cross-entry indexes (dependency titles, reverse dependencies, release
    /// history, advisories) are built here, once, before any entry is parsed.
    pub fn pipeline<'a>(&'a self, feeds: &'a SourceFeeds) -> Vec<Box<dyn FieldParser + 'a>> {
        vec![
            Box::new(RootParser),
            Box::new(DatesParser),
            Box::new(LabelsParser),
            Box::new(CategoriesParser::new(&self.lookups)),
            Box::new(DependenciesParser::new(&feeds.registry)),
            Box::new(ReverseDependenciesParser::new(&feeds.registry)),
            Box::new(MaintainersParser),
            Box::new(FirstReleaseParser::new(&feeds.release_history)),
            Box::new(ScmParser::new(&self.scm)),
            Box::new(SecurityWarningsParser::new(&feeds.registry)),
            Box::new(StatsParser::new(&feeds.stats)),
            Box::new(WikiParser::new(&feeds.documentation)),
        ]
    }

    /// Parse every registry entry, returning records sorted by name.
    pub fn records(&self, feeds: &SourceFeeds) -> Vec<PluginRecord> {
        let parsers = self.pipeline(feeds);
        let mut records: BTreeMap<String, PluginRecord> = BTreeMap::new();

        for (key, value) in &feeds.registry.plugins {
            let name = plugin_name(key, value);
            if records.contains_key(&name) {
                warn!(plugin = %name, key = %key, "Duplicate plugin name in registry feed, keeping first");
                continue;
            }
            let entry = RawEntry::new(&name, value);
            let mut record = PluginRecord {
                name: name.clone(),
                ..PluginRecord::default()
            };
            for parser in &parsers {
                if let Err(e) = parser.parse(&entry, &mut record) {
                    warn!(plugin = %name, parser = parser.name(), error = %e, "Problem parsing plugin");
                }
            }
            records.insert(name, record);
        }

        records.into_values().collect()
    }

    /// Build an immutable snapshot from already fetched feeds.
    pub fn build(
        &self,
        feeds: &SourceFeeds,
        fingerprints: &Fingerprints,
        created_at: Timestamp,
    ) -> CatalogSnapshot {
        let plugins = self.records(feeds);
        info!(plugins = plugins.len(), "Catalog built");
        CatalogSnapshot::new(plugins, created_at, fingerprints.clone())
    }

    /// Fetch every source and build a snapshot stamped with the current time.
    pub async fn generate(&self, sources: &Sources, fingerprints: &Fingerprints) -> Result<CatalogSnapshot> {
        let feeds = sources.fetch().await?;
        Ok(self.build(&feeds, fingerprints, Timestamp::now()))
    }
}
