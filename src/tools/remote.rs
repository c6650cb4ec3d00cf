use async_trait::async_trait;
use tracing::debug;

use super::command::{CommandLine, CommandOutput, Result, ToolError};
use super::rsync::{SyncOutcome, SyncRequest};
use crate::config::{PipelineConfig, RemoteConfig};
use crate::ledger::Marker;
use crate::night::{Exposure, Night};

/// Phase argument passed to the downstream processing command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    /// New exposure arrived
    Update,
    /// A sub-category completion marker was seen
    Marker(Marker),
}

impl PipelinePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelinePhase::Update => "update",
            PipelinePhase::Marker(marker) => marker.as_str(),
        }
    }

    pub fn marker(self) -> Option<Marker> {
        match self {
            PipelinePhase::Update => None,
            PipelinePhase::Marker(marker) => Some(marker),
        }
    }
}

/// Acquisition-site access and downstream triggers
#[async_trait]
pub trait Remote: Send + Sync {
    /// True while the acquisition site is computing checksums
    async fn checksum_lock(&self) -> Result<bool>;

    /// Symbolic links under `source`, one path per entry
    async fn list_symlinks(&self, source: &str) -> Result<Vec<String>>;

    /// Entry names directly under `path`
    async fn list_directory(&self, path: &str) -> Result<Vec<String>>;

    async fn sync(&self, request: &SyncRequest) -> Result<SyncOutcome>;

    async fn trigger_pipeline(
        &self,
        night: &Night,
        exposure: &Exposure,
        phase: PipelinePhase,
    ) -> Result<CommandOutput>;
}

/// [`Remote`] backed by `ssh` and `rsync`
#[derive(Debug, Clone)]
pub struct ShellRemote {
    remote: RemoteConfig,
    pipeline: PipelineConfig,
}

impl ShellRemote {
    pub fn new(remote: RemoteConfig, pipeline: PipelineConfig) -> Self {
        Self { remote, pipeline }
    }

    fn ssh(&self, host: &str) -> CommandLine {
        CommandLine::new(&self.remote.ssh).args(["-q", host])
    }

    /// Trigger invocation, run over ssh when a pipeline host is configured
    pub fn pipeline_command(
        &self,
        night: &Night,
        exposure: &Exposure,
        phase: PipelinePhase,
    ) -> CommandLine {
        let base = match &self.pipeline.host {
            Some(host) => self.ssh(host).arg(&self.pipeline.command),
            None => CommandLine::new(&self.pipeline.command),
        };
        base.arg(phase.as_str())
            .args(["--night".to_string(), night.to_string()])
            .args(["--expid".to_string(), exposure.to_string()])
    }
}

#[async_trait]
impl Remote for ShellRemote {
    async fn checksum_lock(&self) -> Result<bool> {
        let out = self
            .ssh(&self.remote.host)
            .args(["/bin/ls", self.remote.checksum_lock.as_str()])
            .output()
            .await?;
        Ok(!out.stdout.trim().is_empty())
    }

    async fn list_symlinks(&self, source: &str) -> Result<Vec<String>> {
        let out = self
            .ssh(&self.remote.host)
            .args(["/bin/find", source, "-type", "l"])
            .output()
            .await?;
        let mut links: Vec<String> = out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        links.sort();
        debug!(source, count = links.len(), "Listed remote links");
        Ok(links)
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        // rsync without a destination lists the source
        let out = CommandLine::new(&self.remote.rsync)
            .arg(format!("{}:{}/", self.remote.host, path.trim_end_matches('/')))
            .output()
            .await?;
        if !out.success() {
            return Err(ToolError::Failed {
                program: self.remote.rsync.clone(),
                status: out.status_label(),
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(listing_names(&out.stdout))
    }

    async fn sync(&self, request: &SyncRequest) -> Result<SyncOutcome> {
        let out = request
            .command(&self.remote.rsync, &self.remote.host)
            .output()
            .await?;
        Ok(SyncOutcome::from_output(out))
    }

    async fn trigger_pipeline(
        &self,
        night: &Night,
        exposure: &Exposure,
        phase: PipelinePhase,
    ) -> Result<CommandOutput> {
        self.pipeline_command(night, exposure, phase).output().await
    }
}

/// Names from `rsync --list-only` style output, skipping `.`
fn listing_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            // mode, size, date and time precede the name
            let mut rest = line;
            for _ in 0..4 {
                rest = rest.trim_start().split_once(char::is_whitespace)?.1;
            }
            Some(rest.trim_start())
        })
        .filter(|name| !name.is_empty() && *name != ".")
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_names() {
        let stdout = "\
drwxrwxr-x          4,096 2023/10/31 17:02:11 .
drwxrwxr-x          4,096 2023/10/30 08:12:40 20231030
drwxrwxr-x          4,096 2023/10/31 17:02:11 20231031
-rw-rw-r--            512 2023/10/31 17:02:11 index.html
";
        assert_eq!(listing_names(stdout), vec!["20231030", "20231031", "index.html"]);
    }

    #[test]
    fn test_pipeline_command_local() {
        let remote = ShellRemote::new(RemoteConfig::default(), PipelineConfig::default());
        let night: Night = "20231031".parse().unwrap();
        let cmd = remote.pipeline_command(&night, &Exposure::new(127), PipelinePhase::Update);
        assert_eq!(
            cmd.to_string(),
            "desi_night update --night 20231031 --expid 00000127"
        );
    }

    #[test]
    fn test_pipeline_command_over_ssh() {
        let pipeline = PipelineConfig {
            host: Some("cori".to_string()),
            ..PipelineConfig::default()
        };
        let remote = ShellRemote::new(RemoteConfig::default(), pipeline);
        let night: Night = "20231031".parse().unwrap();
        let cmd = remote.pipeline_command(
            &night,
            &Exposure::new(127),
            PipelinePhase::Marker(Marker::Science),
        );
        assert_eq!(
            cmd.to_string(),
            "/bin/ssh -q cori desi_night science --night 20231031 --expid 00000127"
        );
        assert_eq!(PipelinePhase::Marker(Marker::Arcs).marker(), Some(Marker::Arcs));
    }
}
