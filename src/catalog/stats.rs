use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use pluginsite_core::{
    Installation, InstallationPercentage, InstallationPercentageVersion, InstallationVersion,
    PluginRecord, Stats,
};

use crate::catalog::{FieldParser, ParseError, RawEntry};

/// A `*.stats.json` document; series are keyed by epoch millis or version.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStats {
    #[serde(default)]
    installations: BTreeMap<String, u64>,
    #[serde(default)]
    installations_percentage: BTreeMap<String, f64>,
    #[serde(default)]
    installations_per_version: BTreeMap<String, u64>,
    #[serde(default)]
    installations_percentage_per_version: BTreeMap<String, f64>,
}

/// Installation statistics from the configured statistics source.
pub struct StatsParser<'a> {
    stats: &'a BTreeMap<String, Value>,
}

impl<'a> StatsParser<'a> {
    pub fn new(stats: &'a BTreeMap<String, Value>) -> Self {
        Self { stats }
    }
}

impl FieldParser for StatsParser<'_> {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn parse(&self, entry: &RawEntry<'_>, record: &mut PluginRecord) -> Result<(), ParseError> {
        record.stats = match self.stats.get(entry.name()) {
            Some(value) => Some(stats(value)?),
            None => None,
        };
        Ok(())
    }
}

fn stats(value: &Value) -> Result<Stats, ParseError> {
    let raw = RawStats::deserialize(value).map_err(|e| ParseError::Stats(e.to_string()))?;

    let mut installations = raw
        .installations
        .into_iter()
        .map(|(timestamp, total)| Ok(Installation { timestamp: epoch_millis(&timestamp)?, total }))
        .collect::<Result<Vec<_>, ParseError>>()?;
    installations.sort_by_key(|i| i.timestamp);

    let mut installations_percentage = raw
        .installations_percentage
        .into_iter()
        .map(|(timestamp, percentage)| {
            Ok(InstallationPercentage {
                timestamp: epoch_millis(&timestamp)?,
                percentage,
            })
        })
        .collect::<Result<Vec<_>, ParseError>>()?;
    installations_percentage.sort_by_key(|i| i.timestamp);

    // BTreeMap iteration already yields versions in string order
    let installations_per_version = raw
        .installations_per_version
        .into_iter()
        .map(|(version, total)| InstallationVersion { version, total })
        .collect();
    let installations_percentage_per_version = raw
        .installations_percentage_per_version
        .into_iter()
        .map(|(version, percentage)| InstallationPercentageVersion { version, percentage })
        .collect();

    let current_installs = installations.last().map_or(0, |i| i.total);
    let lifetime = installations.iter().map(|i| i.total).max().unwrap_or(0);
    let trend = match installations.as_slice() {
        [.., previous, last] => Some(signed(last.total).saturating_sub(signed(previous.total))),
        _ => None,
    };

    Ok(Stats {
        installations,
        installations_percentage,
        installations_per_version,
        installations_percentage_per_version,
        current_installs,
        lifetime,
        trend,
    })
}

/// Install counts beyond `i64::MAX` clamp rather than wrap.
fn signed(total: u64) -> i64 {
    i64::try_from(total).unwrap_or(i64::MAX)
}

fn epoch_millis(key: &str) -> Result<i64, ParseError> {
    key.trim()
        .parse()
        .map_err(|_| ParseError::Stats(format!("invalid timestamp key {key:?}")))
}
