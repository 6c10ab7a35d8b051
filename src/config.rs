use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upstream feeds used to generate the catalog
    #[serde(default)]
    pub sources: SourcesConfig,
    /// Location of the generated snapshot (URL or file path)
    #[serde(default = "default_data_file")]
    pub data_file: String,
    /// Index lifecycle settings
    #[serde(default)]
    pub index: IndexConfig,
    /// Source-control link settings
    #[serde(default)]
    pub scm: ScmConfig,
    /// Shared HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_data_file() -> String {
    "plugins.json.gz".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: SourcesConfig::default(),
            data_file: default_data_file(),
            index: IndexConfig::default(),
            scm: ScmConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

/// Upstream feed locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_update_center_url")]
    pub update_center_url: String,
    #[serde(default = "default_release_history_url")]
    pub release_history_url: String,
    #[serde(default = "default_documentation_url")]
    pub documentation_url: String,
    #[serde(default)]
    pub stats: StatsConfig,
}

fn default_update_center_url() -> String {
    "https://updates.jenkins.io/current/update-center.actual.json".to_string()
}

fn default_release_history_url() -> String {
    "https://updates.jenkins.io/current/release-history.json".to_string()
}

fn default_documentation_url() -> String {
    "https://updates.jenkins.io/current/plugin-documentation-urls.json".to_string()
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            update_center_url: default_update_center_url(),
            release_history_url: default_release_history_url(),
            documentation_url: default_documentation_url(),
            stats: StatsConfig::default(),
        }
    }
}

/// Installation statistics retrieval strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StatsConfig {
    /// One request per plugin: `{base_url}/{name}.stats.json`
    Http { base_url: String },
    /// An unpacked checkout containing `plugin-installation-trend/`
    Directory { path: PathBuf },
    /// A `.tar.gz` of that checkout, downloaded once per run
    Archive { url: String },
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig::Http {
            base_url: "https://stats.jenkins.io/plugin-installation-trend".to_string(),
        }
    }
}

/// Index lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Stable alias readers query (default: "plugins")
    #[serde(default = "default_alias")]
    pub alias: String,
    /// Seconds between rebuild attempts (default: 12 hours)
    #[serde(default = "default_rebuild_interval_secs")]
    pub rebuild_interval_secs: u64,
    /// Seconds to wait for a bulk load before discarding it (default: 120)
    #[serde(default = "default_bulk_timeout_secs")]
    pub bulk_timeout_secs: u64,
}

fn default_alias() -> String {
    "plugins".to_string()
}

fn default_rebuild_interval_secs() -> u64 {
    12 * 60 * 60
}

fn default_bulk_timeout_secs() -> u64 {
    120
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            alias: default_alias(),
            rebuild_interval_secs: default_rebuild_interval_secs(),
            bulk_timeout_secs: default_bulk_timeout_secs(),
        }
    }
}

impl IndexConfig {
    pub fn rebuild_interval(&self) -> Duration {
        Duration::from_secs(self.rebuild_interval_secs.max(1))
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_timeout_secs.max(1))
    }
}

/// Source-control link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScmConfig {
    /// Organization owning plugin repositories on the hosting domain
    #[serde(default = "default_organization")]
    pub organization: String,
    /// Issue tracker search URL; the quoted repository name is appended
    #[serde(default = "default_issue_tracker")]
    pub issue_tracker: String,
    /// Hosting domains whose repositories get compare/PR links
    #[serde(default = "default_known_hosts")]
    pub known_hosts: Vec<String>,
}

fn default_organization() -> String {
    "jenkinsci".to_string()
}

fn default_issue_tracker() -> String {
    "https://issues.jenkins.io/issues/?jql=project+%3D+JENKINS+AND+status+in+%28Open%2C+%22In+Progress%22%2C+Reopened%29+AND+component+%3D+".to_string()
}

fn default_known_hosts() -> Vec<String> {
    vec!["github.com".to_string()]
}

impl Default for ScmConfig {
    fn default() -> Self {
        Self {
            organization: default_organization(),
            issue_tracker: default_issue_tracker(),
            known_hosts: default_known_hosts(),
        }
    }
}

/// Shared HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_user_agent() -> String {
    concat!("pluginsite/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    /// Build the HTTP client passed to every fetcher
    pub fn client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .user_agent(self.user_agent.clone())
            .build()
    }
}

/// Values given on the command line, applied last
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_file: Option<String>,
    pub stats_path: Option<PathBuf>,
    pub rebuild_interval_secs: Option<u64>,
}

impl Config {
    /// Load configuration from file, environment, and CLI arguments
    pub fn load(config_path: Option<&PathBuf>, overrides: &Overrides) -> crate::Result<Self> {
        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else if let Ok(content) = std::fs::read_to_string("pluginsite.toml") {
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());

        if let Some(data_file) = &overrides.data_file {
            config.data_file = data_file.clone();
        }
        if let Some(path) = &overrides.stats_path {
            config.sources.stats = StatsConfig::Directory { path: path.clone() };
        }
        if let Some(secs) = overrides.rebuild_interval_secs {
            config.index.rebuild_interval_secs = secs;
        }

        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("PLUGINSITE_UPDATE_CENTER_URL") {
            self.sources.update_center_url = url;
        }
        if let Some(url) = var("PLUGINSITE_RELEASE_HISTORY_URL") {
            self.sources.release_history_url = url;
        }
        if let Some(url) = var("PLUGINSITE_DOCUMENTATION_URL") {
            self.sources.documentation_url = url;
        }
        if let Some(base_url) = var("PLUGINSITE_STATS_URL") {
            self.sources.stats = StatsConfig::Http { base_url };
        }
        if let Some(path) = var("PLUGINSITE_STATS_PATH") {
            self.sources.stats = StatsConfig::Directory {
                path: PathBuf::from(path),
            };
        }
        if let Some(secs) = var("PLUGINSITE_REBUILD_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse() {
                self.index.rebuild_interval_secs = secs;
            }
        }
        if let Some(url) = var("DATA_FILE_URL") {
            let url = url.trim();
            if !url.is_empty() {
                self.data_file = url.to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: Config = toml::from_str("data_file = \"/tmp/plugins.json.gz\"").unwrap();
        assert_eq!(config.data_file, "/tmp/plugins.json.gz");
        assert_eq!(config.index.alias, "plugins");
        assert_eq!(config.index.rebuild_interval(), Duration::from_secs(43_200));
        assert_eq!(config.scm.known_hosts, vec!["github.com".to_string()]);
    }

    #[test]
    fn stats_strategy_is_tagged() {
        let config: Config = toml::from_str(
            r#"
            [sources.stats]
            type = "directory"
            path = "/srv/infra-statistics"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.sources.stats,
            StatsConfig::Directory {
                path: PathBuf::from("/srv/infra-statistics")
            }
        );
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DATA_FILE_URL", " https://example.org/plugins.json.gz "),
            ("PLUGINSITE_REBUILD_INTERVAL_SECS", "60"),
            ("PLUGINSITE_STATS_PATH", "/data/stats"),
        ]);
        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.data_file, "https://example.org/plugins.json.gz");
        assert_eq!(config.index.rebuild_interval_secs, 60);
        assert!(matches!(config.sources.stats, StatsConfig::Directory { .. }));
    }

    #[test]
    fn blank_data_file_env_is_ignored() {
        let mut config = Config::default();
        config.apply_env(|key| (key == "DATA_FILE_URL").then(|| "  ".to_string()));
        assert_eq!(config.data_file, "plugins.json.gz");
    }
}
