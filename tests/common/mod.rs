//! Local fakes for the external tool adapters

#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use nightrelay::config::DirectoryConfig;
use nightrelay::night::{Exposure, Night};
use nightrelay::tools::{
    self, Archiver, CommandOutput, PipelinePhase, Remote, SyncOutcome, SyncRequest, ToolError,
};

pub const NIGHT: &str = "20231031";
pub const EXPOSURE: u32 = 127;

pub fn night() -> Night {
    NIGHT.parse().unwrap()
}

pub fn exposure() -> Exposure {
    Exposure::new(EXPOSURE)
}

/// A monitored tree rooted entirely inside `root`
pub fn directory_config(root: &Path) -> DirectoryConfig {
    DirectoryConfig {
        source: root.join("source").to_string_lossy().into_owned(),
        staging: root.join("staging").join("raw"),
        destination: root.join("data"),
        archive: "desi/spectro/data".to_string(),
        checksum_file: "checksum-{exposure}.sha256sum".to_string(),
        expected_files: vec!["desi-{exposure}.fits.fz".to_string()],
        status: Some(root.join("status")),
        permission_fixup: false,
    }
}

/// Write `files` under the remote source plus a manifest listing `listed`
pub fn write_exposure(
    directory: &DirectoryConfig,
    night: &Night,
    exposure: Exposure,
    files: &[(&str, &str)],
    listed: &[(&str, &str)],
) -> PathBuf {
    let dir = PathBuf::from(directory.source_exposure(night, &exposure));
    fs::create_dir_all(&dir).unwrap();
    for (name, content) in files {
        fs::write(dir.join(name), content).unwrap();
    }
    let manifest: String = listed
        .iter()
        .map(|(name, content)| format!("{:x}  {}\n", Sha256::digest(content.as_bytes()), name))
        .collect();
    fs::write(dir.join(directory.checksum_file_name(night, &exposure)), manifest).unwrap();
    dir
}

/// Three data files, all listed
pub fn science_exposure(directory: &DirectoryConfig, night: &Night, exposure: Exposure) -> PathBuf {
    let fits = format!("desi-{exposure}.fits.fz");
    let guide = format!("guide-{exposure}.fits.fz");
    let request = format!("request-{exposure}.json");
    let files = [
        (fits.as_str(), "fits"),
        (guide.as_str(), "guide"),
        (request.as_str(), "{}"),
    ];
    write_exposure(directory, night, exposure, &files, &files)
}

/// Remote backed by local directories
#[derive(Default)]
pub struct FakeRemote {
    pub links: Vec<String>,
    pub locked: bool,
    /// Syncs whose source contains any of these fail with status 23
    pub failing: Vec<String>,
    /// Listings of sources containing any of these fail outright
    pub unreachable: Vec<String>,
    pub syncs: Mutex<Vec<SyncRequest>>,
    pub triggers: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn with_links<I: IntoIterator<Item = String>>(links: I) -> Self {
        Self {
            links: links.into_iter().collect(),
            ..Self::default()
        }
    }

    fn reachable(&self, source: &str) -> tools::Result<()> {
        if self.unreachable.iter().any(|u| source.contains(u.as_str())) {
            return Err(ToolError::Failed {
                program: "ssh".to_string(),
                status: "255".to_string(),
                stderr: format!("ssh: connect to host for {source}: Connection timed out"),
            });
        }
        Ok(())
    }

    pub fn triggers(&self) -> Vec<String> {
        self.triggers.lock().unwrap().clone()
    }

    pub fn sync_count(&self) -> usize {
        self.syncs.lock().unwrap().len()
    }
}

fn listing(entries: &[String]) -> String {
    format!(
        "receiving incremental file list\n{}\n\nsent 100 bytes  received 200 bytes  300.00 bytes/sec\n\
         total size is 300  speedup is 1.00\n",
        entries.join("\n")
    )
}

#[async_trait]
impl Remote for FakeRemote {
    async fn checksum_lock(&self) -> tools::Result<bool> {
        Ok(self.locked)
    }

    async fn list_symlinks(&self, source: &str) -> tools::Result<Vec<String>> {
        self.reachable(source)?;
        Ok(self
            .links
            .iter()
            .filter(|link| link.starts_with(source))
            .cloned()
            .collect())
    }

    async fn list_directory(&self, path: &str) -> tools::Result<Vec<String>> {
        self.reachable(path)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn sync(&self, request: &SyncRequest) -> tools::Result<SyncOutcome> {
        self.syncs.lock().unwrap().push(request.clone());
        let source = PathBuf::from(request.source.trim_end_matches('/'));
        let destination = PathBuf::from(request.destination.trim_end_matches('/'));

        if !source.is_dir() || self.failing.iter().any(|f| request.source.contains(f.as_str())) {
            return Ok(SyncOutcome::from_output(CommandOutput {
                status: Some(23),
                stdout: String::new(),
                stderr: "rsync: change_dir failed: No such file or directory".to_string(),
            }));
        }

        let mut changed = Vec::new();
        for entry in WalkDir::new(&source).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&source).map_err(io::Error::other)?;
            let target = destination.join(relative);
            let content = fs::read(entry.path())?;
            if fs::read(&target).ok().as_ref() == Some(&content) {
                continue;
            }
            changed.push(relative.to_string_lossy().into_owned());
            if !request.dry_run {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&target, &content)?;
            }
        }

        Ok(SyncOutcome::from_output(CommandOutput {
            status: Some(0),
            stdout: listing(&changed),
            stderr: String::new(),
        }))
    }

    async fn trigger_pipeline(
        &self,
        night: &Night,
        exposure: &Exposure,
        phase: PipelinePhase,
    ) -> tools::Result<CommandOutput> {
        self.triggers
            .lock()
            .unwrap()
            .push(format!("{} {night} {exposure}", phase.as_str()));
        Ok(CommandOutput::skipped())
    }
}

/// Archive keeping its member list in memory
pub struct FakeArchiver {
    pub available: bool,
    pub members: Mutex<Vec<String>>,
    pub writes: Mutex<Vec<String>>,
    /// Returned by every write instead of success; nothing is stored
    pub write_output: Option<CommandOutput>,
}

impl FakeArchiver {
    pub fn new(members: &[&str]) -> Self {
        Self {
            available: true,
            members: Mutex::new(members.iter().map(|m| m.to_string()).collect()),
            writes: Mutex::new(Vec::new()),
            write_output: None,
        }
    }

    /// Every write exits with `status` and prints `stderr`
    pub fn failing(status: i32, stderr: &str) -> Self {
        Self {
            write_output: Some(CommandOutput {
                status: Some(status),
                stdout: String::new(),
                stderr: stderr.to_string(),
            }),
            ..Self::new(&[])
        }
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Archiver for FakeArchiver {
    async fn available(&self) -> tools::Result<bool> {
        Ok(self.available)
    }

    async fn list_members(&self, archive_dir: &str, listing: &Path) -> tools::Result<Vec<String>> {
        let members = self.members.lock().unwrap().clone();
        let text: String = members
            .iter()
            .map(|m| format!("-rw-r----- 1 desi desi 1 {archive_dir} {m}\n"))
            .collect();
        fs::write(listing, text)?;
        Ok(members)
    }

    async fn write_member(
        &self,
        working_dir: &Path,
        archive_dir: &str,
        member: &str,
        night: &str,
    ) -> tools::Result<CommandOutput> {
        assert!(working_dir.join(night).is_dir());
        self.writes
            .lock()
            .unwrap()
            .push(format!("{archive_dir}/{member}"));
        if let Some(output) = &self.write_output {
            return Ok(output.clone());
        }
        let mut members = self.members.lock().unwrap();
        members.push(member.to_string());
        members.push(format!("{member}.idx"));
        Ok(CommandOutput::skipped())
    }
}
