//! Search query planner.
//!
//! Turns [`SearchOptions`] into a backend-neutral [`QueryPlan`]. Free text is
//! a scoring clause; every filter is a non-scoring conjunct. Each sort mode
//! maps to a total order: the plugin name always breaks ties, so pages stay
//! stable.

use serde::Serialize;

use pluginsite_core::{SearchOptions, SortBy};

use crate::error::{Error, Result};

/// Field holding the unanalyzed plugin name, also the document id.
pub const NAME_FIELD: &str = "name.raw";

/// One predicate of a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Clause {
    /// Analyzed match; scores by the share of query tokens found in the field.
    Match { field: String, query: String, boost: f64 },
    /// Exact match against any of `values`.
    Terms { field: String, values: Vec<String>, boost: f64 },
    /// Matches when any child matches; scores are summed.
    Any(Vec<Clause>),
}

impl Clause {
    pub fn matches(field: &str, query: &str, boost: f64) -> Self {
        Clause::Match {
            field: field.to_string(),
            query: query.to_string(),
            boost,
        }
    }

    pub fn terms<I, S>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Clause::Terms {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
            boost: 1.0,
        }
    }

    pub fn term(field: &str, value: &str) -> Self {
        Self::terms(field, [value])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Relevance score
    Score,
    Field(String),
}

/// One sort criterion. Documents missing the field always sort last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortClause {
    pub key: SortKey,
    pub order: SortOrder,
}

impl SortClause {
    pub fn asc(field: &str) -> Self {
        Self {
            key: SortKey::Field(field.to_string()),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            key: SortKey::Field(field.to_string()),
            order: SortOrder::Desc,
        }
    }

    pub fn score() -> Self {
        Self {
            key: SortKey::Score,
            order: SortOrder::Desc,
        }
    }
}

/// A terms aggregation over one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Aggregation {
    pub name: String,
    pub field: String,
    /// Maximum number of buckets, all when `None`.
    pub size: Option<usize>,
}

/// A fully resolved query, ready for a [`SearchBackend`](crate::backend::SearchBackend).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    /// Scoring clause; every document matches with score 1 when absent.
    pub query: Option<Clause>,
    /// Non-scoring conjuncts.
    pub filter: Vec<Clause>,
    pub sort: Vec<SortClause>,
    pub from: u64,
    pub size: u64,
    pub aggregations: Vec<Aggregation>,
}

impl QueryPlan {
    /// Exact lookup of a single plugin by name.
    pub fn lookup(name: &str) -> Self {
        Self {
            query: None,
            filter: vec![Clause::term(NAME_FIELD, name)],
            sort: Vec::new(),
            from: 0,
            size: 1,
            aggregations: Vec::new(),
        }
    }

    /// Only the named aggregation over every document.
    pub fn aggregation(name: &str, field: &str) -> Self {
        Self {
            query: None,
            filter: Vec::new(),
            sort: Vec::new(),
            from: 0,
            size: 0,
            aggregations: vec![Aggregation {
                name: name.to_string(),
                field: field.to_string(),
                size: None,
            }],
        }
    }
}

/// Field boosts for free-text search.
const TEXT_FIELDS: [(&str, f64); 5] = [
    ("title", 3.0),
    ("name", 2.0),
    ("maintainers.id", 1.0),
    ("maintainers.name", 1.0),
    ("excerpt", 1.0),
];

/// Keyword fields matched against the comma-split, lower-cased query.
const TOKEN_FIELDS: [&str; 3] = ["categories", "labels", "requiredCore"];

/// Plan a search.
///
/// Fails with [`Error::InvalidOptions`] when `limit` or `page` is zero.
pub fn plan(options: &SearchOptions) -> Result<QueryPlan> {
    let options = options.clone().normalized();
    if options.limit == 0 {
        return Err(Error::InvalidOptions("limit must be at least 1".to_string()));
    }
    if options.page == 0 {
        return Err(Error::InvalidOptions("page must be at least 1".to_string()));
    }

    let query = options.query.as_deref().map(free_text);

    let mut filter = Vec::new();
    if !options.categories.is_empty() {
        filter.push(Clause::terms("categories", &options.categories));
    }
    if !options.labels.is_empty() {
        filter.push(Clause::terms("labels", &options.labels));
    }
    if !options.maintainers.is_empty() {
        filter.push(Clause::Any(vec![
            Clause::terms("maintainers.id", &options.maintainers),
            Clause::terms("maintainers.name", &options.maintainers),
        ]));
    }
    if let Some(core) = &options.core {
        filter.push(Clause::term("requiredCore", core));
    }

    let limit = u64::from(options.limit);
    Ok(QueryPlan {
        query,
        filter,
        sort: sort_clauses(options.sort_by),
        from: u64::from(options.page - 1) * limit,
        size: limit,
        aggregations: Vec::new(),
    })
}

fn free_text(query: &str) -> Clause {
    let mut clauses: Vec<Clause> = TEXT_FIELDS
        .iter()
        .map(|(field, boost)| Clause::matches(field, query, *boost))
        .collect();

    let lowered = query.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if !tokens.is_empty() {
        clauses.extend(TOKEN_FIELDS.iter().map(|field| Clause::terms(field, tokens.iter().copied())));
    }
    Clause::Any(clauses)
}

/// The backend sort for a mode, always ending in a name tiebreak.
pub fn sort_clauses(sort_by: SortBy) -> Vec<SortClause> {
    let primary = match sort_by {
        SortBy::Relevance => Some(SortClause::score()),
        SortBy::Name => None,
        SortBy::Title => Some(SortClause::asc("title.raw")),
        SortBy::Installed => Some(SortClause::desc("stats.currentInstalls")),
        SortBy::Updated => Some(SortClause::desc("releaseTimestamp")),
        SortBy::Trend => Some(SortClause::desc("stats.trend")),
        SortBy::FirstRelease => Some(SortClause::desc("firstRelease")),
    };
    primary
        .into_iter()
        .chain(std::iter::once(SortClause::asc(NAME_FIELD)))
        .collect()
}
