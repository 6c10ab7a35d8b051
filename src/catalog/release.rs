use std::collections::HashMap;

use jiff::Timestamp;
use reqwest::Url;

use pluginsite_core::{PluginRecord, Scm};

use crate::catalog::{FieldParser, ParseError, RawEntry};
use crate::config::ScmConfig;
use crate::source::ReleaseHistoryFeed;

/// `group:artifact:version` without the trailing version.
fn release_key(gav: &str) -> &str {
    gav.rsplit_once(':').map_or(gav, |(key, _)| key)
}

/// First release time, looked up by `group:artifact`.
pub struct FirstReleaseParser {
    first_releases: HashMap<String, Timestamp>,
}

impl FirstReleaseParser {
    pub fn new(history: &ReleaseHistoryFeed) -> Self {
        let mut first_releases: HashMap<String, Timestamp> = HashMap::new();
        let releases = history
            .release_history
            .iter()
            .flat_map(|day| &day.releases)
            .filter(|release| release.first_release);
        for release in releases {
            let (Some(gav), Some(millis)) = (&release.gav, release.timestamp) else {
                continue;
            };
            let Ok(timestamp) = Timestamp::from_millisecond(millis) else {
                continue;
            };
            first_releases
                .entry(release_key(gav).to_string())
                .and_modify(|earliest| *earliest = (*earliest).min(timestamp))
                .or_insert(timestamp);
        }
        Self { first_releases }
    }
}

impl FieldParser for FirstReleaseParser {
    fn name(&self) -> &'static str {
        "first-release"
    }

    fn parse(&self, entry: &RawEntry<'_>, record: &mut PluginRecord) -> Result<(), ParseError> {
        record.first_release = entry
            .str("gav")
            .and_then(|gav| self.first_releases.get(release_key(gav)))
            .copied();
        Ok(())
    }
}

/// Issue tracker and repository links.
pub struct ScmParser<'a> {
    config: &'a ScmConfig,
}

impl<'a> ScmParser<'a> {
    pub fn new(config: &'a ScmConfig) -> Self {
        Self { config }
    }

    fn known_host(&self, scm: &str) -> Option<String> {
        let url = Url::parse(scm)
            .or_else(|_| Url::parse(&format!("https://{scm}")))
            .ok()?;
        let host = url.host_str()?.to_ascii_lowercase();
        self.config
            .known_hosts
            .iter()
            .any(|known| host == *known || host.ends_with(&format!(".{known}")))
            .then_some(host)
    }
}

/// Repository names carry a `-plugin` suffix.
fn repository_name(plugin: &str) -> String {
    if plugin.ends_with("-plugin") {
        plugin.to_string()
    } else {
        format!("{plugin}-plugin")
    }
}

impl FieldParser for ScmParser<'_> {
    fn name(&self) -> &'static str {
        "scm"
    }

    fn parse(&self, entry: &RawEntry<'_>, record: &mut PluginRecord) -> Result<(), ParseError> {
        let repository = repository_name(entry.name());
        let mut scm = Scm {
            issues: format!("{}%27{}%27", self.config.issue_tracker, repository),
            ..Scm::default()
        };

        if let Some(host) = entry.str("scm").and_then(|raw| self.known_host(raw.trim())) {
            let link = format!("https://{host}/{}/{repository}", self.config.organization);
            let tag = |version: &str| format!("{}-{version}", entry.name());
            let version = entry.str("version");
            if let (Some(previous), Some(current)) = (entry.str("previousVersion"), version) {
                scm.in_latest_release = Some(format!("{link}/compare/{}...{}", tag(previous), tag(current)));
            }
            if let Some(current) = version {
                scm.since_latest_release = Some(format!("{link}/compare/{}...master", tag(current)));
            }
            scm.pull_requests = Some(format!("{link}/pulls"));
            scm.link = Some(link);
        }

        record.scm = Some(scm);
        Ok(())
    }
}
