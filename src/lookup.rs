//! Static reference tables used by the catalog builder and the search layer.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::warn;

use pluginsite_core::{Category, Label};

use crate::error::Result;

const CATEGORIES_JSON: &str = include_str!("../resources/categories.json");
const LABELS_JSON: &str = include_str!("../resources/labels.json");

#[derive(Deserialize)]
struct CategoriesFile {
    categories: Vec<Category>,
}

#[derive(Deserialize)]
struct LabelsFile {
    labels: Vec<LabelEntry>,
}

#[derive(Deserialize)]
struct LabelEntry {
    id: String,
    title: String,
}

/// Label and category reference data.
#[derive(Debug, Clone, Default)]
pub struct Lookups {
    categories: Vec<Category>,
    label_to_category: BTreeMap<String, String>,
    label_titles: BTreeMap<String, String>,
}

impl Lookups {
    /// Load the tables bundled with the binary.
    pub fn bundled() -> Result<Self> {
        Self::from_json(CATEGORIES_JSON, LABELS_JSON)
    }

    pub fn from_json(categories_json: &str, labels_json: &str) -> Result<Self> {
        let categories: CategoriesFile = serde_json::from_str(categories_json)?;
        let labels: LabelsFile = serde_json::from_str(labels_json)?;
        let label_titles = labels
            .labels
            .into_iter()
            .map(|label| (label.id, label.title))
            .collect();
        Ok(Self::new(categories.categories, label_titles))
    }

    pub fn new(categories: Vec<Category>, label_titles: BTreeMap<String, String>) -> Self {
        let mut label_to_category = BTreeMap::new();
        for category in &categories {
            for label in &category.labels {
                if let Some(existing) = label_to_category.get(label) {
                    warn!(
                        label = %label,
                        kept = %existing,
                        ignored = %category.id,
                        "label mapped to more than one category"
                    );
                    continue;
                }
                label_to_category.insert(label.clone(), category.id.clone());
            }
        }
        Self {
            categories,
            label_to_category,
            label_titles,
        }
    }

    /// Category id for a label, if the label is mapped.
    pub fn category_for(&self, label: &str) -> Option<&str> {
        self.label_to_category.get(label).map(String::as_str)
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn label(&self, id: &str) -> Label {
        Label {
            id: id.to_string(),
            title: self.label_titles.get(id).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_tables_load() {
        let lookups = Lookups::bundled().unwrap();
        assert!(!lookups.categories().is_empty());
        assert_eq!(lookups.category_for("git"), Some("scm"));
        assert_eq!(lookups.label("git").title.as_deref(), Some("Git"));
    }

    #[test]
    fn unknown_label_has_no_title_or_category() {
        let lookups = Lookups::bundled().unwrap();
        assert_eq!(lookups.category_for("no-such-label"), None);
        assert_eq!(lookups.label("no-such-label").title, None);
    }

    #[test]
    fn first_mapping_wins_for_duplicate_labels() {
        let categories = r#"{"categories": [
            {"id": "a", "title": "A", "labels": ["shared"]},
            {"id": "b", "title": "B", "labels": ["shared", "only-b"]}
        ]}"#;
        let lookups = Lookups::from_json(categories, r#"{"labels": []}"#).unwrap();
        assert_eq!(lookups.category_for("shared"), Some("a"));
        assert_eq!(lookups.category_for("only-b"), Some("b"));
    }
}
