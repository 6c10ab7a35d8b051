use std::collections::BTreeSet;

use jiff::civil::{Date, DateTime};
use jiff::tz::TimeZone;
use jiff::Timestamp;

use pluginsite_core::PluginRecord;

use crate::catalog::{FieldParser, ParseError, RawEntry};
use crate::lookup::Lookups;

/// `Mar 03, 2017`
const BUILD_DATE_FORMAT: &str = "%b %d, %Y";
/// `2017-03-15T17:30:51.00Z`
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Identity fields, copied as-is.
pub struct RootParser;

impl FieldParser for RootParser {
    fn name(&self) -> &'static str {
        "root"
    }

    fn parse(&self, entry: &RawEntry<'_>, record: &mut PluginRecord) -> Result<(), ParseError> {
        let owned = |field: &str| entry.str(field).map(String::from);
        record.name = entry.name().to_string();
        record.title = owned("title");
        record.version = owned("version");
        record.previous_version = owned("previousVersion");
        record.required_core = owned("requiredCore");
        record.gav = owned("gav");
        record.sha1 = owned("sha1");
        record.url = owned("url");
        record.excerpt = owned("excerpt");
        Ok(())
    }
}

/// Build date and release timestamps.
///
/// Every date is parsed on its own, so one bad value does not clear the
/// others. The first failure is still reported.
pub struct DatesParser;

impl FieldParser for DatesParser {
    fn name(&self) -> &'static str {
        "dates"
    }

    fn parse(&self, entry: &RawEntry<'_>, record: &mut PluginRecord) -> Result<(), ParseError> {
        let build_date = date_field(entry, "buildDate", parse_build_date);
        let release = date_field(entry, "releaseTimestamp", parse_timestamp);
        let previous = date_field(entry, "previousTimestamp", parse_timestamp);

        record.build_date = build_date.as_ref().ok().copied().flatten();
        record.release_timestamp = release.as_ref().ok().copied().flatten();
        record.previous_timestamp = previous.as_ref().ok().copied().flatten();

        build_date?;
        release?;
        previous?;
        Ok(())
    }
}

fn date_field<T>(
    entry: &RawEntry<'_>,
    field: &'static str,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, ParseError> {
    match entry.str(field) {
        None => Ok(None),
        Some(value) => parse(value.trim()).map(Some).ok_or_else(|| ParseError::Date {
            field,
            value: value.to_string(),
        }),
    }
}

pub(crate) fn parse_build_date(value: &str) -> Option<Date> {
    Date::strptime(BUILD_DATE_FORMAT, value).ok()
}

pub(crate) fn parse_timestamp(value: &str) -> Option<Timestamp> {
    DateTime::strptime(TIMESTAMP_FORMAT, value)
        .ok()?
        .to_zoned(TimeZone::UTC)
        .ok()
        .map(|zoned| zoned.timestamp())
}

fn raw_labels(entry: &RawEntry<'_>) -> Result<BTreeSet<String>, ParseError> {
    Ok(entry
        .field::<Vec<String>>("labels")?
        .unwrap_or_default()
        .into_iter()
        .collect())
}

/// Labels, copied verbatim into a sorted set.
pub struct LabelsParser;

impl FieldParser for LabelsParser {
    fn name(&self) -> &'static str {
        "labels"
    }

    fn parse(&self, entry: &RawEntry<'_>, record: &mut PluginRecord) -> Result<(), ParseError> {
        record.labels = raw_labels(entry)?;
        Ok(())
    }
}

/// Categories derived from labels; unmapped labels are dropped.
pub struct CategoriesParser<'a> {
    lookups: &'a Lookups,
}

impl<'a> CategoriesParser<'a> {
    pub fn new(lookups: &'a Lookups) -> Self {
        Self { lookups }
    }
}

impl FieldParser for CategoriesParser<'_> {
    fn name(&self) -> &'static str {
        "categories"
    }

    fn parse(&self, entry: &RawEntry<'_>, record: &mut PluginRecord) -> Result<(), ParseError> {
        record.categories = raw_labels(entry)?
            .iter()
            .filter_map(|label| self.lookups.category_for(label))
            .map(String::from)
            .collect();
        Ok(())
    }
}
