use reqwest::Url;

use pluginsite_core::{PluginRecord, Wiki};

use crate::catalog::{FieldParser, ParseError, RawEntry};
use crate::source::DocumentationFeed;

const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

/// Documentation URL, dropped unless it is an absolute http(s) URL.
pub struct WikiParser<'a> {
    documentation: &'a DocumentationFeed,
}

impl<'a> WikiParser<'a> {
    pub fn new(documentation: &'a DocumentationFeed) -> Self {
        Self { documentation }
    }
}

impl FieldParser for WikiParser<'_> {
    fn name(&self) -> &'static str {
        "wiki"
    }

    fn parse(&self, entry: &RawEntry<'_>, record: &mut PluginRecord) -> Result<(), ParseError> {
        record.wiki = self
            .documentation
            .get(entry.name())
            .and_then(|doc| doc.url.as_deref())
            .and_then(valid_url)
            .map(|url| Wiki { url });
        Ok(())
    }
}

fn valid_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let url = Url::parse(raw).ok()?;
    (ALLOWED_SCHEMES.contains(&url.scheme()) && url.has_host()).then(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use crate::source::DocumentationEntry;

    use super::*;

    fn wiki(url: Option<&str>) -> Option<Wiki> {
        let documentation = DocumentationFeed::from([(
            "git".to_string(),
            DocumentationEntry {
                url: url.map(String::from),
            },
        )]);
        let entry = serde_json::json!({});
        let mut record = PluginRecord::default();
        WikiParser::new(&documentation)
            .parse(&RawEntry::new("git", &entry), &mut record)
            .unwrap();
        record.wiki
    }

    #[test]
    fn accepts_http_and_https() {
        assert_eq!(
            wiki(Some("https://plugins.jenkins.io/git")).map(|w| w.url).as_deref(),
            Some("https://plugins.jenkins.io/git")
        );
        assert!(wiki(Some(" http://wiki.jenkins-ci.org/display/JENKINS/Git+Plugin ")).is_some());
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert_eq!(wiki(Some("ftp://example.org/git")), None);
        assert_eq!(wiki(Some("javascript:alert(1)")), None);
        assert_eq!(wiki(Some("not a url")), None);
        assert_eq!(wiki(Some("")), None);
        assert_eq!(wiki(None), None);
    }
}
