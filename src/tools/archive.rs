use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::command::{CommandLine, CommandOutput, Result, ToolError};
use crate::config::ArchiveConfig;

/// Tape archive access
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Whether the archive currently accepts requests
    async fn available(&self) -> Result<bool>;

    /// Member names in `archive_dir`, also cached to `listing`
    async fn list_members(&self, archive_dir: &str, listing: &Path) -> Result<Vec<String>>;

    /// Write `night` (relative to `working_dir`) as `archive_dir/member`
    async fn write_member(
        &self,
        working_dir: &Path,
        archive_dir: &str,
        member: &str,
        night: &str,
    ) -> Result<CommandOutput>;
}

#[derive(Debug, Deserialize)]
struct ArchiveStatus {
    status: String,
}

/// [`Archiver`] backed by `hsi` and `htar`
#[derive(Debug, Clone)]
pub struct HpssArchiver {
    config: ArchiveConfig,
    client: Client,
}

impl HpssArchiver {
    pub fn new(config: ArchiveConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("nightrelay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn list_command(&self, archive_dir: &str, listing: &Path) -> CommandLine {
        CommandLine::new(&self.config.hsi)
            .arg("-O")
            .arg(listing.to_string_lossy())
            .args(["ls", "-l", archive_dir])
    }

    pub fn write_command(
        &self,
        working_dir: &Path,
        archive_dir: &str,
        member: &str,
        night: &str,
    ) -> CommandLine {
        let target = format!("{archive_dir}/{member}");
        CommandLine::new(&self.config.htar)
            .args(["-cvhf", target.as_str(), "-H", "crc:verify=all", night])
            .current_dir(working_dir)
    }
}

#[async_trait]
impl Archiver for HpssArchiver {
    async fn available(&self) -> Result<bool> {
        let Some(url) = &self.config.status_url else {
            return Ok(true);
        };
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let status: ArchiveStatus =
            serde_json::from_str(&body).map_err(|e| ToolError::Parse(e.to_string()))?;
        debug!(url = %url, status = %status.status, "Archive status");
        Ok(status.status == "active")
    }

    async fn list_members(&self, archive_dir: &str, listing: &Path) -> Result<Vec<String>> {
        let out = self.list_command(archive_dir, listing).output().await?;
        if !out.success() {
            warn!(archive_dir, status = %out.status_label(), "Archive listing returned an error");
        }
        let text = match tokio::fs::read_to_string(listing).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(parse_member_listing(&text))
    }

    async fn write_member(
        &self,
        working_dir: &Path,
        archive_dir: &str,
        member: &str,
        night: &str,
    ) -> Result<CommandOutput> {
        self.write_command(working_dir, archive_dir, member, night)
            .output()
            .await
    }
}

/// Member names from a long listing: the last field of every line
pub fn parse_member_listing(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.split_whitespace().last())
        .map(String::from)
        .collect()
}
