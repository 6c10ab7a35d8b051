use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use jiff::Timestamp;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::backend::{
    parse_date, Bucket, BulkDocument, BulkItemResult, FieldType, Hit, Mapping, QueryResponse,
    SearchBackend,
};
use crate::error::{Error, Result};
use crate::query::{Aggregation, Clause, QueryPlan, SortClause, SortKey, SortOrder};

/// Engine identifier reported as the engine fingerprint.
pub const ENGINE_VERSION: &str = concat!("memory-", env!("CARGO_PKG_VERSION"));

#[derive(Debug)]
struct Index {
    mapping: Mapping,
    documents: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
struct State {
    indices: BTreeMap<String, Index>,
    aliases: BTreeMap<String, String>,
}

impl State {
    fn resolve(&self, name: &str) -> Result<&Index> {
        let index = self.aliases.get(name).map_or(name, String::as_str);
        self.indices
            .get(index)
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))
    }
}

/// In-process search backend holding every index in memory.
///
/// Used by the CLI and by tests; behaves like a single-node engine with
/// atomic alias updates.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all indices, sorted.
    pub async fn indices(&self) -> Vec<String> {
        self.state.read().await.indices.keys().cloned().collect()
    }

    /// Number of documents in an index or alias.
    pub async fn count(&self, index: &str) -> Result<usize> {
        Ok(self.state.read().await.resolve(index)?.documents.len())
    }
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    fn engine_fingerprint(&self) -> String {
        ENGINE_VERSION.to_string()
    }

    async fn create_index(&self, name: &str, mapping: &Mapping) -> Result<()> {
        let mut state = self.state.write().await;
        if state.indices.contains_key(name) || state.aliases.contains_key(name) {
            return Err(Error::IndexExists(name.to_string()));
        }
        state.indices.insert(
            name.to_string(),
            Index {
                mapping: mapping.clone(),
                documents: BTreeMap::new(),
            },
        );
        debug!(index = %name, "Index created");
        Ok(())
    }

    async fn bulk_index(&self, name: &str, documents: Vec<BulkDocument>) -> Result<Vec<BulkItemResult>> {
        let mut state = self.state.write().await;
        let index = state
            .indices
            .get_mut(name)
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))?;

        let results = documents
            .into_iter()
            .map(|document| {
                let error = if document.id.is_empty() {
                    Some("document id must not be empty".to_string())
                } else {
                    index.mapping.validate(&document.body).err()
                };
                if error.is_none() {
                    index.documents.insert(document.id.clone(), document.body);
                }
                BulkItemResult {
                    id: document.id,
                    error,
                }
            })
            .collect();
        Ok(results)
    }

    async fn query(&self, index: &str, plan: &QueryPlan) -> Result<QueryResponse> {
        let state = self.state.read().await;
        let index = state.resolve(index)?;
        let mapping = &index.mapping;

        let mut matched: Vec<(&String, &Value, f64)> = index
            .documents
            .iter()
            .filter(|(_, doc)| plan.filter.iter().all(|clause| score(mapping, clause, doc).is_some()))
            .filter_map(|(id, doc)| {
                let score = match &plan.query {
                    Some(clause) => score(mapping, clause, doc)?,
                    None => 1.0,
                };
                Some((id, doc, score))
            })
            .collect();

        matched.sort_by(|a, b| compare(mapping, &plan.sort, a, b));

        let aggregations = plan
            .aggregations
            .iter()
            .map(|aggregation| {
                let buckets = aggregate(mapping, aggregation, matched.iter().map(|(_, doc, _)| *doc));
                (aggregation.name.clone(), buckets)
            })
            .collect();

        let from = usize::try_from(plan.from).unwrap_or(usize::MAX);
        let size = usize::try_from(plan.size).unwrap_or(usize::MAX);
        let hits = matched
            .iter()
            .skip(from)
            .take(size)
            .map(|(id, doc, score)| Hit {
                id: id.to_string(),
                score: *score,
                source: (*doc).clone(),
            })
            .collect();

        Ok(QueryResponse {
            total: matched.len() as u64,
            hits,
            aggregations,
        })
    }

    async fn alias_swap(&self, alias: &str, from: Option<&str>, to: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.indices.contains_key(to) {
            return Err(Error::IndexNotFound(to.to_string()));
        }
        if state.indices.contains_key(alias) {
            return Err(Error::AliasSwap {
                alias: alias.to_string(),
                reason: "an index with that name exists".to_string(),
            });
        }
        let current = state.aliases.get(alias).map(String::as_str);
        if current != from {
            return Err(Error::AliasSwap {
                alias: alias.to_string(),
                reason: format!("expected {from:?}, found {current:?}"),
            });
        }
        state.aliases.insert(alias.to_string(), to.to_string());
        info!(alias = %alias, from = ?from, to = %to, "Alias updated");
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.aliases.values().any(|target| target == name) {
            return Err(Error::Backend(format!("index {name} is aliased")));
        }
        state
            .indices
            .remove(name)
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))?;
        debug!(index = %name, "Index deleted");
        Ok(())
    }

    async fn alias_target(&self, alias: &str) -> Result<Option<String>> {
        Ok(self.state.read().await.aliases.get(alias).cloned())
    }
}

/// Every value at a dotted path, flattening arrays at each step.
fn values_at<'a>(document: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![document];
    for segment in path.split('.') {
        current = current
            .into_iter()
            .flat_map(|value| match value {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            })
            .filter_map(|value| value.get(segment))
            .collect();
    }
    current
        .into_iter()
        .flat_map(|value| match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        })
        .filter(|value| !value.is_null())
        .collect()
}

fn field_values<'a>(mapping: &Mapping, document: &'a Value, field: &str) -> Vec<&'a Value> {
    values_at(document, mapping.source_path(field))
}

fn as_term(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Lower-cased alphanumeric tokens.
fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// The score of a matching clause, `None` if it does not match.
fn score(mapping: &Mapping, clause: &Clause, document: &Value) -> Option<f64> {
    match clause {
        Clause::Match { field, query, boost } => {
            let wanted = tokens(query);
            if wanted.is_empty() {
                return None;
            }
            let present: BTreeSet<String> = field_values(mapping, document, field)
                .into_iter()
                .filter_map(Value::as_str)
                .flat_map(tokens)
                .collect();
            let found = wanted.iter().filter(|t| present.contains(*t)).count();
            (found > 0).then(|| boost * found as f64 / wanted.len() as f64)
        }
        Clause::Terms { field, values, boost } => field_values(mapping, document, field)
            .into_iter()
            .filter_map(as_term)
            .any(|term| values.contains(&term))
            .then_some(*boost),
        Clause::Any(clauses) => clauses
            .iter()
            .filter_map(|clause| score(mapping, clause, document))
            .reduce(|a, b| a + b),
    }
}

#[derive(Debug, PartialEq, PartialOrd)]
enum SortValue {
    Number(f64),
    Time(Timestamp),
    Text(String),
    Bool(bool),
}

fn sort_value(mapping: &Mapping, field: &str, document: &Value) -> Option<SortValue> {
    let value = field_values(mapping, document, field).into_iter().next()?;
    match mapping.field_type(field) {
        Some(FieldType::Long | FieldType::Double) => value.as_f64().map(SortValue::Number),
        Some(FieldType::Date) => value.as_str().and_then(parse_date).map(SortValue::Time),
        Some(FieldType::Boolean) => value.as_bool().map(SortValue::Bool),
        _ => match value {
            Value::Number(n) => n.as_f64().map(SortValue::Number),
            Value::Bool(b) => Some(SortValue::Bool(*b)),
            other => as_term(other).map(SortValue::Text),
        },
    }
}

fn compare(
    mapping: &Mapping,
    sort: &[SortClause],
    (a_id, a_doc, a_score): &(&String, &Value, f64),
    (b_id, b_doc, b_score): &(&String, &Value, f64),
) -> Ordering {
    for clause in sort {
        let ordering = match &clause.key {
            SortKey::Score => {
                let ordering = a_score.total_cmp(b_score);
                match clause.order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            }
            SortKey::Field(field) => {
                let a = sort_value(mapping, field, a_doc);
                let b = sort_value(mapping, field, b_doc);
                match (a, b) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Greater,
                    (Some(_), None) => Ordering::Less,
                    (Some(a), Some(b)) => {
                        let ordering = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
                        match clause.order {
                            SortOrder::Asc => ordering,
                            SortOrder::Desc => ordering.reverse(),
                        }
                    }
                }
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a_id.cmp(b_id)
}

/// Terms buckets, by count descending then key ascending.
fn aggregate<'a>(
    mapping: &Mapping,
    aggregation: &Aggregation,
    documents: impl Iterator<Item = &'a Value>,
) -> Vec<Bucket> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for document in documents {
        let terms: BTreeSet<String> = field_values(mapping, document, &aggregation.field)
            .into_iter()
            .filter_map(as_term)
            .collect();
        for term in terms {
            *counts.entry(term).or_default() += 1;
        }
    }
    let mut buckets: Vec<Bucket> = counts
        .into_iter()
        .map(|(key, count)| Bucket { key, count })
        .collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    if let Some(size) = aggregation.size {
        buckets.truncate(size);
    }
    buckets
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn backend_with(documents: Vec<Value>) -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend
            .create_index("plugins_1", &Mapping::bundled().unwrap())
            .await
            .unwrap();
        let documents = documents
            .into_iter()
            .map(|body| BulkDocument {
                id: body["name"].as_str().unwrap().to_string(),
                body,
            })
            .collect();
        let results = backend.bulk_index("plugins_1", documents).await.unwrap();
        assert!(results.iter().all(BulkItemResult::is_ok));
        backend.alias_swap("plugins", None, "plugins_1").await.unwrap();
        backend
    }

    fn plan(query: Option<Clause>, filter: Vec<Clause>, sort: Vec<SortClause>) -> QueryPlan {
        QueryPlan {
            query,
            filter,
            sort,
            from: 0,
            size: 100,
            aggregations: Vec::new(),
        }
    }

    fn ids(response: &QueryResponse) -> Vec<&str> {
        response.hits.iter().map(|hit| hit.id.as_str()).collect()
    }

    fn documents() -> Vec<Value> {
        vec![
            json!({ "name": "git", "title": "Git plugin", "labels": ["scm"], "stats": { "currentInstalls": 200 },
                    "maintainers": [{ "id": "kohsuke", "name": "Kohsuke" }] }),
            json!({ "name": "git-client", "title": "Git client", "labels": ["scm", "library"], "stats": { "currentInstalls": 300 } }),
            json!({ "name": "ant", "title": "Ant", "labels": ["builder"], "excerpt": "Runs git-free builds" }),
        ]
    }

    #[tokio::test]
    async fn bulk_reports_invalid_documents() {
        let backend = MemoryBackend::new();
        backend
            .create_index("plugins_1", &Mapping::bundled().unwrap())
            .await
            .unwrap();
        let results = backend
            .bulk_index(
                "plugins_1",
                vec![
                    BulkDocument { id: "git".into(), body: json!({ "name": "git" }) },
                    BulkDocument { id: "bad".into(), body: json!({ "stats": { "trend": "up" } }) },
                    BulkDocument { id: "".into(), body: json!({}) },
                ],
            )
            .await
            .unwrap();
        let ok: Vec<bool> = results.iter().map(BulkItemResult::is_ok).collect();
        assert_eq!(ok, [true, false, false]);
        assert_eq!(backend.count("plugins_1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn match_scores_by_boost_and_token_share() {
        let backend = backend_with(documents()).await;
        let query = Clause::Any(vec![
            Clause::matches("title", "git client", 3.0),
            Clause::matches("name", "git client", 2.0),
        ]);
        let response = backend
            .query("plugins", &plan(Some(query), vec![], vec![SortClause::score()]))
            .await
            .unwrap();

        assert_eq!(ids(&response), ["git-client", "git"]);
        assert_eq!(response.hits[0].score, 5.0);
        assert_eq!(response.hits[1].score, 2.5);
    }

    #[tokio::test]
    async fn filters_and_nested_terms() {
        let backend = backend_with(documents()).await;
        let filter = vec![
            Clause::terms("labels", ["scm"]),
            Clause::terms("maintainers.id", ["kohsuke"]),
        ];
        let response = backend.query("plugins", &plan(None, filter, vec![])).await.unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(ids(&response), ["git"]);
        assert_eq!(response.hits[0].score, 1.0);
    }

    #[tokio::test]
    async fn numeric_sort_puts_missing_last() {
        let backend = backend_with(documents()).await;
        let response = backend
            .query("plugins", &plan(None, vec![], vec![SortClause::desc("stats.currentInstalls")]))
            .await
            .unwrap();
        assert_eq!(ids(&response), ["git-client", "git", "ant"]);

        let response = backend
            .query("plugins", &plan(None, vec![], vec![SortClause::asc("stats.currentInstalls")]))
            .await
            .unwrap();
        assert_eq!(ids(&response), ["git", "git-client", "ant"]);
    }

    #[tokio::test]
    async fn keyword_sort_is_case_sensitive() {
        let backend = backend_with(vec![
            json!({ "name": "b", "title": "beta" }),
            json!({ "name": "a", "title": "Zulu" }),
        ])
        .await;
        let response = backend
            .query("plugins", &plan(None, vec![], vec![SortClause::asc("title.raw")]))
            .await
            .unwrap();
        assert_eq!(ids(&response), ["a", "b"]);
    }

    #[tokio::test]
    async fn paging_and_aggregations() {
        let backend = backend_with(documents()).await;
        let mut plan = plan(None, vec![], vec![SortClause::asc("name.raw")]);
        plan.from = 1;
        plan.size = 1;
        plan.aggregations.push(Aggregation {
            name: "labels".into(),
            field: "labels".into(),
            size: Some(2),
        });
        let response = backend.query("plugins", &plan).await.unwrap();

        assert_eq!(response.total, 3);
        assert_eq!(ids(&response), ["git"]);
        assert_eq!(
            response.aggregations["labels"],
            vec![
                Bucket { key: "scm".into(), count: 2 },
                Bucket { key: "builder".into(), count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn alias_swap_is_compare_and_set() {
        let backend = backend_with(documents()).await;
        let mapping = Mapping::bundled().unwrap();
        backend.create_index("plugins_2", &mapping).await.unwrap();

        let err = backend.alias_swap("plugins", None, "plugins_2").await.unwrap_err();
        assert!(matches!(err, Error::AliasSwap { .. }));
        assert!(backend.delete_index("plugins_1").await.is_err());

        backend
            .alias_swap("plugins", Some("plugins_1"), "plugins_2")
            .await
            .unwrap();
        assert_eq!(backend.alias_target("plugins").await.unwrap().as_deref(), Some("plugins_2"));
        backend.delete_index("plugins_1").await.unwrap();
        assert_eq!(backend.indices().await, ["plugins_2"]);
    }

    #[tokio::test]
    async fn unknown_index_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend
            .query("plugins", &plan(None, vec![], vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IndexNotFound(_)));
    }
}
