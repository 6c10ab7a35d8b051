use std::collections::HashMap;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use pluginsite_core::{PluginRecord, SecurityWarning, SecurityWarningVersion};

use crate::catalog::{FieldParser, ParseError, RawEntry};
use crate::source::RegistryFeed;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWarning {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    versions: Vec<RawWarningVersion>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWarningVersion {
    #[serde(default)]
    first_version: Option<String>,
    #[serde(default)]
    last_version: Option<String>,
    #[serde(default)]
    pattern: Option<String>,
}

/// An advisory with its version patterns compiled once per run.
struct Advisory {
    warning: SecurityWarning,
    patterns: Vec<Regex>,
}

impl Advisory {
    fn from_raw(raw: RawWarning) -> Self {
        let mut patterns = Vec::new();
        let mut versions = Vec::with_capacity(raw.versions.len());
        for version in raw.versions {
            if let Some(pattern) = version.pattern.as_deref() {
                match Regex::new(&format!("^(?:{pattern})$")) {
                    Ok(regex) => patterns.push(regex),
                    Err(e) => warn!(warning = %raw.id, pattern, error = %e, "Invalid version pattern in security warning"),
                }
            }
            versions.push(SecurityWarningVersion {
                first_version: version.first_version,
                last_version: version.last_version,
            });
        }
        Self {
            warning: SecurityWarning {
                id: raw.id,
                message: raw.message,
                url: raw.url,
                active: false,
                versions,
            },
            patterns,
        }
    }

    /// Active when any range pattern matches the whole version string.
    fn for_version(&self, version: Option<&str>) -> SecurityWarning {
        let active = version.is_some_and(|v| self.patterns.iter().any(|p| p.is_match(v)));
        SecurityWarning {
            active,
            ..self.warning.clone()
        }
    }
}

/// Security advisories of type `plugin`, grouped by plugin name.
pub struct SecurityWarningsParser {
    advisories: HashMap<String, Vec<Advisory>>,
}

impl SecurityWarningsParser {
    pub fn new(registry: &RegistryFeed) -> Self {
        let mut advisories: HashMap<String, Vec<Advisory>> = HashMap::new();
        for value in &registry.warnings {
            let raw = match RawWarning::deserialize(value) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed security warning");
                    continue;
                }
            };
            if !raw.kind.eq_ignore_ascii_case("plugin") {
                continue;
            }
            advisories
                .entry(raw.name.clone())
                .or_default()
                .push(Advisory::from_raw(raw));
        }
        Self { advisories }
    }
}

impl FieldParser for SecurityWarningsParser {
    fn name(&self) -> &'static str {
        "security-warnings"
    }

    fn parse(&self, entry: &RawEntry<'_>, record: &mut PluginRecord) -> Result<(), ParseError> {
        record.security_warnings = self.advisories.get(entry.name()).map(|advisories| {
            let version = entry.str("version");
            advisories.iter().map(|a| a.for_version(version)).collect()
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn registry() -> RegistryFeed {
        serde_json::from_value(json!({
            "plugins": {},
            "warnings": [
                {
                    "id": "SECURITY-1", "type": "plugin", "name": "git",
                    "message": "XSS", "url": "https://jenkins.io/security/advisory/1",
                    "versions": [
                        { "lastVersion": "1.9", "pattern": "1\\..*" },
                        { "pattern": "0\\.9" }
                    ]
                },
                { "id": "CORE-1", "type": "core", "name": "core", "versions": [] },
                { "id": "SECURITY-2", "type": "PLUGIN", "name": "git", "versions": [{ "pattern": "((" }] },
                { "type": "plugin" }
            ]
        }))
        .unwrap()
    }

    fn warnings(version: &str) -> Vec<SecurityWarning> {
        let parser = SecurityWarningsParser::new(&registry());
        let value = json!({ "version": version });
        let mut record = PluginRecord::default();
        parser.parse(&RawEntry::new("git", &value), &mut record).unwrap();
        record.security_warnings.unwrap()
    }

    #[test]
    fn any_matching_range_activates() {
        let warnings = warnings("1.2");
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].active);
        assert_eq!(warnings[0].versions[0].last_version.as_deref(), Some("1.9"));
        assert!(!warnings[1].active);

        assert!(self::warnings("0.9")[0].active);
    }

    #[test]
    fn pattern_must_match_whole_version() {
        assert!(!warnings("2.0")[0].active);
        assert!(!warnings("21.0")[0].active);
    }

    #[test]
    fn plugins_without_advisories_have_none() {
        let parser = SecurityWarningsParser::new(&registry());
        let value = json!({ "version": "1.0" });
        let mut record = PluginRecord::default();
        parser.parse(&RawEntry::new("cvs", &value), &mut record).unwrap();
        assert_eq!(record.security_warnings, None);
    }
}
