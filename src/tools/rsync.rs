//! rsync argument construction and output scraping
//!
//! The daemon only ever learns what changed by reading rsync's verbose
//! listing, so the text format coupling lives here and nowhere else.

use std::collections::BTreeSet;

use super::command::{CommandLine, CommandOutput};
use crate::night::Exposure;

/// Which side of the transfer is remote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Remote source, local destination
    Pull,
    /// Local source, remote destination
    Push,
}

/// One synchronization of a directory tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub source: String,
    pub destination: String,
    pub dry_run: bool,
    pub direction: Direction,
}

impl SyncRequest {
    pub fn pull<S: Into<String>, D: Into<String>>(source: S, destination: D) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            dry_run: false,
            direction: Direction::Pull,
        }
    }

    pub fn push<S: Into<String>, D: Into<String>>(source: S, destination: D) -> Self {
        Self {
            direction: Direction::Push,
            ..Self::pull(source, destination)
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Build the rsync invocation against `host`
    pub fn command(&self, rsync: &str, host: &str) -> CommandLine {
        let source = trailing_slash(&self.source);
        let destination = trailing_slash(&self.destination);
        let (source, destination) = match self.direction {
            Direction::Pull => (format!("{host}:{source}"), destination),
            Direction::Push => (source, format!("{host}:{destination}")),
        };

        let mut cmd = CommandLine::new(rsync);
        if self.dry_run {
            cmd = cmd.arg("--dry-run");
        }
        cmd.args([
            "--verbose",
            "--recursive",
            "--copy-dirlinks",
            "--times",
            "--omit-dir-times",
        ])
        .arg(source)
        .arg(destination)
    }
}

fn trailing_slash(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

/// File list reported by a (dry-run) synchronization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    entries: Vec<String>,
}

impl ChangeSet {
    /// Keep only the file-list lines of verbose rsync output
    pub fn parse(stdout: &str) -> Self {
        let entries = stdout
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty() && !is_banner(line))
            .map(String::from)
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Exposures whose directory appears as an 8-digit path prefix
    pub fn exposures(&self) -> BTreeSet<Exposure> {
        self.entries
            .iter()
            .filter_map(|line| {
                let prefix = line.get(..8)?;
                let rest = &line[8..];
                if !prefix.bytes().all(|b| b.is_ascii_digit())
                    || !(rest.is_empty() || rest.starts_with('/'))
                {
                    return None;
                }
                prefix.parse().ok()
            })
            .collect()
    }
}

fn is_banner(line: &str) -> bool {
    if line.starts_with("receiving")
        || line.starts_with("sending incremental file list")
        || line.starts_with("total size")
    {
        return true;
    }
    // "sent 765 bytes  received 238,769 bytes ..."
    line.strip_prefix("sent ")
        .and_then(|rest| rest.split_once(' '))
        .is_some_and(|(count, rest)| {
            !count.is_empty()
                && count.bytes().all(|b| b.is_ascii_digit() || b == b',')
                && rest.starts_with("bytes")
        })
}

/// Result of one synchronization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub output: CommandOutput,
    pub changes: ChangeSet,
}

impl SyncOutcome {
    pub fn from_output(output: CommandOutput) -> Self {
        let changes = ChangeSet::parse(&output.stdout);
        Self { output, changes }
    }

    pub fn success(&self) -> bool {
        self.output.success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: &str = "receiving incremental file list

sent 765 bytes  received 238,769 bytes  159,689.33 bytes/sec
total size is 118,417,836,324  speedup is 494,367.55
";

    const CHANGED: &str = "receiving incremental file list
12345678/foo.txt
12345679/foo.txt
12345679/bar.txt

sent 765 bytes  received 238,769 bytes  159,689.33 bytes/sec
total size is 118,417,836,324  speedup is 494,367.55 (DRY RUN)
";

    #[test]
    fn test_pull_command() {
        let cmd = SyncRequest::pull("/source", "/destination").command("/bin/rsync", "dts");
        assert_eq!(cmd.program, "/bin/rsync");
        assert_eq!(
            cmd.args,
            vec![
                "--verbose",
                "--recursive",
                "--copy-dirlinks",
                "--times",
                "--omit-dir-times",
                "dts:/source/",
                "/destination/"
            ]
        );
    }

    #[test]
    fn test_dry_run_and_push_command() {
        let cmd = SyncRequest::pull("/source/", "/destination")
            .dry_run()
            .command("/bin/rsync", "dts");
        assert_eq!(cmd.args[0], "--dry-run");
        assert_eq!(cmd.args[6], "dts:/source/");

        let cmd = SyncRequest::push("/source", "/destination").command("/bin/rsync", "dts");
        assert_eq!(&cmd.args[5..], &["/source/", "dts:/destination/"]);
    }

    #[test]
    fn test_empty_listing() {
        let changes = ChangeSet::parse(EMPTY);
        assert!(changes.is_empty());
        assert!(changes.exposures().is_empty());
    }

    #[test]
    fn test_changed_listing() {
        let changes = ChangeSet::parse(CHANGED);
        assert!(!changes.is_empty());
        assert_eq!(changes.entries().len(), 3);
        let exposures: Vec<String> = changes.exposures().iter().map(|e| e.to_string()).collect();
        assert_eq!(exposures, vec!["12345678", "12345679"]);
    }

    #[test]
    fn test_non_exposure_changes() {
        let changes = ChangeSet::parse("receiving incremental file list\nfoo/bar.txt\n123456789/x\n");
        assert!(!changes.is_empty());
        assert!(changes.exposures().is_empty());
    }
}
