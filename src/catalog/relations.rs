use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use pluginsite_core::{Dependency, Maintainer, PluginRecord};

use crate::catalog::{FieldParser, ParseError, RawEntry};
use crate::source::{plugin_name, RegistryFeed};

#[derive(Deserialize)]
struct RawDependency {
    name: String,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeveloper {
    #[serde(default)]
    developer_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

fn raw_dependencies(entry: &RawEntry<'_>) -> Result<Vec<RawDependency>, ParseError> {
    Ok(entry.field("dependencies")?.unwrap_or_default())
}

/// Dependencies with titles resolved against the whole registry feed.
pub struct DependenciesParser {
    titles: HashMap<String, String>,
}

impl DependenciesParser {
    pub fn new(registry: &RegistryFeed) -> Self {
        let titles = registry
            .plugins
            .iter()
            .filter_map(|(key, value)| {
                let title = value.get("title")?.as_str()?.trim();
                (!title.is_empty()).then(|| (plugin_name(key, value), title.to_string()))
            })
            .collect();
        Self { titles }
    }
}

impl FieldParser for DependenciesParser {
    fn name(&self) -> &'static str {
        "dependencies"
    }

    fn parse(&self, entry: &RawEntry<'_>, record: &mut PluginRecord) -> Result<(), ParseError> {
        record.dependencies = raw_dependencies(entry)?
            .into_iter()
            .map(|dependency| Dependency {
                title: self
                    .titles
                    .get(&dependency.name)
                    .cloned()
                    .unwrap_or_else(|| dependency.name.clone()),
                name: dependency.name,
                optional: dependency.optional,
                version: dependency.version,
            })
            .collect();
        Ok(())
    }
}

/// Flags plugins nothing else depends on.
pub struct ReverseDependenciesParser {
    depended_on: HashSet<String>,
}

impl ReverseDependenciesParser {
    pub fn new(registry: &RegistryFeed) -> Self {
        let depended_on = registry
            .plugins
            .iter()
            .filter_map(|(key, value)| {
                let dependencies = value.get("dependencies")?;
                // Malformed lists are reported by the dependencies parser
                let dependencies = Vec::<RawDependency>::deserialize(dependencies).ok()?;
                let name = plugin_name(key, value);
                Some(
                    dependencies
                        .into_iter()
                        .map(|d| d.name)
                        .filter(move |dependency| *dependency != name),
                )
            })
            .flatten()
            .collect();
        Self { depended_on }
    }
}

impl FieldParser for ReverseDependenciesParser {
    fn name(&self) -> &'static str {
        "reverse-dependencies"
    }

    fn parse(&self, entry: &RawEntry<'_>, record: &mut PluginRecord) -> Result<(), ParseError> {
        record.has_no_reverse_dependencies = !self.depended_on.contains(entry.name());
        Ok(())
    }
}

/// Maintainers from the `developers` list.
///
/// Blank values become `None`; the id falls back to the name, then the email.
pub struct MaintainersParser;

impl FieldParser for MaintainersParser {
    fn name(&self) -> &'static str {
        "maintainers"
    }

    fn parse(&self, entry: &RawEntry<'_>, record: &mut PluginRecord) -> Result<(), ParseError> {
        let developers: Vec<RawDeveloper> = entry.field("developers")?.unwrap_or_default();
        record.maintainers = developers.into_iter().map(maintainer).collect();
        Ok(())
    }
}

fn maintainer(developer: RawDeveloper) -> Maintainer {
    let name = trim_to_none(developer.name);
    let email = trim_to_none(developer.email);
    let id = trim_to_none(developer.developer_id)
        .or_else(|| name.clone())
        .or_else(|| email.clone());
    Maintainer { id, name, email }
}

fn trim_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
