use std::collections::HashMap;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::info;

use crate::error::{Error, Result};
use crate::source::StatsSource;

const TREND_DIR: &str = "plugin-installation-trend";
const STATS_SUFFIX: &str = ".stats.json";

/// Reads statistics from an unpacked statistics checkout
///
/// Directory structure:
/// ```text
/// {root}/plugin-installation-trend/{plugin}.stats.json
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryStatsSource {
    trend_dir: PathBuf,
}

impl DirectoryStatsSource {
    pub fn open(root: PathBuf) -> Result<Self> {
        let trend_dir = root.join(TREND_DIR);
        if !trend_dir.is_dir() {
            return Err(Error::source_unavailable(
                "statistics checkout",
                format!("{} is not a directory", trend_dir.display()),
            ));
        }
        Ok(Self { trend_dir })
    }

    fn stats_path(&self, plugin: &str) -> Result<PathBuf> {
        let file = format!("{plugin}{STATS_SUFFIX}");
        let mut components = Path::new(&file).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.trend_dir.join(file)),
            _ => Err(Error::Internal(format!("invalid plugin name: {plugin}"))),
        }
    }
}

#[async_trait]
impl StatsSource for DirectoryStatsSource {
    fn name(&self) -> &'static str {
        "directory"
    }

    async fn fetch(&self, plugin: &str) -> Result<Option<Value>> {
        let path = self.stats_path(plugin)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Statistics unpacked from a `.tar.gz` of the statistics checkout
#[derive(Debug, Clone, Default)]
pub struct ArchiveStatsSource {
    files: HashMap<String, String>,
}

impl ArchiveStatsSource {
    /// Download the archive and keep its trend files in memory
    pub async fn download(client: &reqwest::Client, url: &str) -> Result<Self> {
        info!("Downloading statistics archive from {}", url);
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::source_unavailable("statistics archive", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::source_unavailable(
                "statistics archive",
                format!("unexpected response from {url} - {status}"),
            ));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::source_unavailable("statistics archive", e))?;

        let source = tokio::task::spawn_blocking(move || Self::from_bytes(&bytes))
            .await
            .map_err(|e| Error::Internal(e.to_string()))??;
        info!(files = source.files.len(), "Statistics archive unpacked");
        Ok(source)
    }

    /// Unpack every `plugin-installation-trend/*.stats.json` entry
    pub fn from_bytes(package: &[u8]) -> Result<Self> {
        let unavailable = |e: std::io::Error| Error::source_unavailable("statistics archive", e);
        let decoder = flate2::read::GzDecoder::new(package);
        let mut archive = tar::Archive::new(decoder);

        let mut files = HashMap::new();
        for entry in archive.entries().map_err(unavailable)? {
            let mut entry = entry.map_err(unavailable)?;
            let path = entry.path().map_err(unavailable)?.into_owned();
            let in_trend_dir = path
                .parent()
                .and_then(Path::file_name)
                .is_some_and(|dir| dir == TREND_DIR);
            let plugin = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(STATS_SUFFIX))
                .map(String::from);

            if let (true, Some(plugin)) = (in_trend_dir, plugin) {
                let mut content = String::new();
                entry.read_to_string(&mut content).map_err(unavailable)?;
                files.insert(plugin, content);
            }
        }
        Ok(Self { files })
    }
}

#[async_trait]
impl StatsSource for ArchiveStatsSource {
    fn name(&self) -> &'static str {
        "archive"
    }

    async fn fetch(&self, plugin: &str) -> Result<Option<Value>> {
        self.files
            .get(plugin)
            .map(|content| serde_json::from_str(content))
            .transpose()
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;

    fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        let mut encoder = builder.into_inner().unwrap();
        encoder.flush().unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn directory_source_reads_trend_files() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join(TREND_DIR)).unwrap();
        std::fs::write(
            root.path().join(TREND_DIR).join("git.stats.json"),
            r#"{"installations": {"1": 5}}"#,
        )
        .unwrap();

        let source = DirectoryStatsSource::open(root.path().to_path_buf()).unwrap();
        let git = source.fetch("git").await.unwrap().unwrap();
        assert_eq!(git["installations"]["1"], 5);
        assert!(source.fetch("cvs").await.unwrap().is_none());
        assert!(source.fetch("../etc/passwd").await.is_err());
    }

    #[test]
    fn directory_source_requires_trend_dir() {
        let root = tempfile::tempdir().unwrap();
        let err = DirectoryStatsSource::open(root.path().to_path_buf()).unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn archive_source_keeps_only_trend_files() {
        let bytes = archive(&[
            ("infra-statistics/plugin-installation-trend/git.stats.json", r#"{"installations": {}}"#),
            ("infra-statistics/plugin-installation-trend/README.md", "readme"),
            ("infra-statistics/other/cvs.stats.json", "{}"),
        ]);

        let source = ArchiveStatsSource::from_bytes(&bytes).unwrap();
        assert!(source.fetch("git").await.unwrap().is_some());
        assert!(source.fetch("cvs").await.unwrap().is_none());
        assert!(source.fetch("README").await.unwrap().is_none());
    }

    #[test]
    fn corrupt_archive_is_source_unavailable() {
        let err = ArchiveStatsSource::from_bytes(b"definitely not gzip").unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
    }
}
