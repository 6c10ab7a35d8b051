//! Core types for the pluginsite plugin catalog.
//!
//! This crate provides the shared data types used by the catalog generator,
//! the index lifecycle manager and the search layer, as well as any client
//! that consumes search results.
//!
//! # Overview
//!
//! The main types are:
//!
//! - [`PluginRecord`] - The canonical, merged record for one plugin
//! - [`SearchOptions`] - User-facing filter, sort and paging options
//! - [`SortBy`] - The closed set of sort modes
//! - [`SearchResult`] - A paginated result wrapper
//! - [`Category`] and [`Label`] - Classification metadata
//!
//! # Example
//!
//! ```
//! use pluginsite_core::{SearchOptions, SortBy};
//!
//! let options = SearchOptions {
//!     query: Some("git".to_string()),
//!     sort_by: SortBy::Installed,
//!     ..SearchOptions::default()
//! };
//!
//! assert_eq!(options.limit, 50);
//! assert_eq!(options.page, 1);
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use jiff::civil::Date;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// The canonical record for a single plugin.
///
/// One record exists per plugin `name`. Every field group is filled by an
/// independent parser, so any group may be left at its default when the
/// source data for that group was missing or malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRecord {
    /// Unique plugin identifier (e.g., `"git"`).
    pub name: String,
    /// Human-readable title.
    #[serde(default)]
    pub title: Option<String>,
    /// Current version.
    #[serde(default)]
    pub version: Option<String>,
    /// Version released before the current one.
    #[serde(default)]
    pub previous_version: Option<String>,
    /// Minimum core version required by the current release.
    #[serde(default)]
    pub required_core: Option<String>,
    /// `group:artifact:version` coordinate.
    #[serde(default)]
    pub gav: Option<String>,
    #[serde(default)]
    pub sha1: Option<String>,
    /// Download URL of the current release.
    #[serde(default)]
    pub url: Option<String>,
    /// Short description.
    #[serde(default)]
    pub excerpt: Option<String>,

    #[serde(default)]
    pub build_date: Option<Date>,
    #[serde(default)]
    pub release_timestamp: Option<Timestamp>,
    #[serde(default)]
    pub previous_timestamp: Option<Timestamp>,
    /// When the very first release of this plugin was published.
    #[serde(default)]
    pub first_release: Option<Timestamp>,

    /// Labels as published by the registry feed.
    #[serde(default)]
    pub labels: BTreeSet<String>,
    /// Categories derived from `labels`.
    #[serde(default)]
    pub categories: BTreeSet<String>,

    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub maintainers: Vec<Maintainer>,
    /// True when no other plugin in the catalog depends on this one.
    #[serde(default)]
    pub has_no_reverse_dependencies: bool,

    #[serde(default)]
    pub scm: Option<Scm>,
    #[serde(default)]
    pub wiki: Option<Wiki>,

    /// Present only when at least one advisory targets this plugin.
    #[serde(default)]
    pub security_warnings: Option<Vec<SecurityWarning>>,

    /// Present only when a statistics file exists for this plugin.
    #[serde(default)]
    pub stats: Option<Stats>,
}

/// A dependency on another plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub name: String,
    /// Title of the dependency, or its name when unknown to the catalog.
    pub title: String,
    #[serde(default)]
    pub optional: bool,
    /// Minimum version constraint.
    #[serde(default)]
    pub version: Option<String>,
}

/// A plugin maintainer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    /// Explicit id, else the name, else the email.
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Source-control links derived for a plugin.
///
/// `issues` is always populated. The repository links are only set when the
/// source repository lives on a recognized hosting domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scm {
    pub issues: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub in_latest_release: Option<String>,
    #[serde(default)]
    pub since_latest_release: Option<String>,
    #[serde(default)]
    pub pull_requests: Option<String>,
}

/// Documentation location for a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wiki {
    pub url: String,
}

/// A security advisory attached to a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityWarning {
    pub id: String,
    pub message: String,
    pub url: String,
    /// Whether the plugin's current version is affected.
    pub active: bool,
    #[serde(default)]
    pub versions: Vec<SecurityWarningVersion>,
}

/// An affected version range of an advisory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityWarningVersion {
    #[serde(default)]
    pub first_version: Option<String>,
    #[serde(default)]
    pub last_version: Option<String>,
}

/// Installation statistics.
///
/// All series are sorted ascending by their key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    #[serde(default)]
    pub installations: Vec<Installation>,
    #[serde(default)]
    pub installations_percentage: Vec<InstallationPercentage>,
    #[serde(default)]
    pub installations_per_version: Vec<InstallationVersion>,
    #[serde(default)]
    pub installations_percentage_per_version: Vec<InstallationPercentageVersion>,
    /// Install count of the most recent data point.
    #[serde(default)]
    pub current_installs: u64,
    /// Peak install count observed in the series.
    #[serde(default)]
    pub lifetime: u64,
    /// Difference between the two most recent install counts.
    #[serde(default)]
    pub trend: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationPercentage {
    pub timestamp: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationVersion {
    pub version: String,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationPercentageVersion {
    pub version: String,
    pub percentage: f64,
}

/// Sort modes for search results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Relevance,
    Name,
    Title,
    Installed,
    Updated,
    Trend,
    FirstRelease,
}

impl SortBy {
    pub const ALL: [SortBy; 7] = [
        SortBy::Relevance,
        SortBy::Name,
        SortBy::Title,
        SortBy::Installed,
        SortBy::Updated,
        SortBy::Trend,
        SortBy::FirstRelease,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Relevance => "relevance",
            SortBy::Name => "name",
            SortBy::Title => "title",
            SortBy::Installed => "installed",
            SortBy::Updated => "updated",
            SortBy::Trend => "trend",
            SortBy::FirstRelease => "first_release",
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown sort mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSortByError(String);

impl fmt::Display for ParseSortByError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown sort mode: {}", self.0)
    }
}

impl std::error::Error for ParseSortByError {}

impl FromStr for SortBy {
    type Err = ParseSortByError;

    /// Parses a sort mode case-insensitively.
    ///
    /// ```
    /// use pluginsite_core::SortBy;
    ///
    /// assert_eq!("INSTALLED".parse::<SortBy>().unwrap(), SortBy::Installed);
    /// assert_eq!("first_release".parse::<SortBy>().unwrap(), SortBy::FirstRelease);
    /// assert!("popularity".parse::<SortBy>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        SortBy::ALL
            .into_iter()
            .find(|sort| sort.as_str() == wanted)
            .ok_or_else(|| ParseSortByError(s.to_string()))
    }
}

/// Options for searching the catalog.
///
/// Filters in `categories`, `labels` and `maintainers` are OR-combined within
/// each set and AND-combined across sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    /// Free-text query.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub maintainers: BTreeSet<String>,
    /// Exact required-core version.
    #[serde(default)]
    pub core: Option<String>,
    /// Page size. Defaults to 50.
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Page number (1-indexed). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: u32,
}

fn default_limit() -> u32 {
    50
}

fn default_page() -> u32 {
    1
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            query: None,
            sort_by: SortBy::default(),
            categories: BTreeSet::new(),
            labels: BTreeSet::new(),
            maintainers: BTreeSet::new(),
            core: None,
            limit: default_limit(),
            page: default_page(),
        }
    }
}

impl SearchOptions {
    /// Returns a copy with blank strings trimmed away.
    ///
    /// ```
    /// use pluginsite_core::SearchOptions;
    ///
    /// let options = SearchOptions {
    ///     query: Some("   ".to_string()),
    ///     core: Some(" 2.60 ".to_string()),
    ///     ..SearchOptions::default()
    /// }
    /// .normalized();
    ///
    /// assert_eq!(options.query, None);
    /// assert_eq!(options.core.as_deref(), Some("2.60"));
    /// ```
    pub fn normalized(mut self) -> Self {
        self.query = trim_to_none(self.query);
        self.core = trim_to_none(self.core);
        for set in [&mut self.categories, &mut self.labels, &mut self.maintainers] {
            *set = std::mem::take(set)
                .into_iter()
                .filter_map(|v| trim_to_none(Some(v)))
                .collect();
        }
        self
    }

    /// Splits a comma-separated list into a filter set.
    ///
    /// ```
    /// use pluginsite_core::SearchOptions;
    ///
    /// let set = SearchOptions::split_list(Some("scm, dev,,"));
    /// assert_eq!(set.len(), 2);
    /// assert!(set.contains("dev"));
    /// ```
    pub fn split_list(value: Option<&str>) -> BTreeSet<String> {
        value
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn trim_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A paginated search result.
///
/// # Example
///
/// ```
/// use pluginsite_core::SearchResult;
///
/// let result = SearchResult::new(vec!["a"], 101, 3, 50);
///
/// assert_eq!(result.total_items, 101);
/// assert_eq!(result.total_pages, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult<T> {
    /// The items in this page.
    pub items: Vec<T>,
    /// Current page number (1-indexed).
    pub page: u32,
    /// Number of items per page.
    pub page_size: u32,
    /// Total number of matching items across all pages.
    pub total_items: u64,
    /// Total number of pages.
    pub total_pages: u64,
}

impl<T> SearchResult<T> {
    /// Creates a new paginated result.
    ///
    /// Calculates `total_pages` as `ceil(total_items / page_size)`.
    pub fn new(items: Vec<T>, total_items: u64, page: u32, page_size: u32) -> Self {
        let size = u64::from(page_size.max(1));
        Self {
            items,
            page,
            page_size,
            total_items,
            total_pages: total_items.div_ceil(size),
        }
    }
}

/// A plugin category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Labels that map onto this category.
    #[serde(default)]
    pub labels: Vec<String>,
}

/// A plugin label with its display title, when one is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}
