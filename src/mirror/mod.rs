//! Bulk mirroring of top-level data directories
//!
//! Each configured directory becomes one rsync job. Jobs are drained by a
//! bounded [`MirrorPool`]; directories not marked as priority run under
//! `nice` so the daily products finish first.

mod pidfile;
mod pool;

pub use pidfile::PidFile;
pub use pool::{MirrorPool, MirrorSummary};

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::MirrorConfig;
use crate::tools::CommandLine;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No mirror destination configured")]
    NoDestination,

    #[error("No mirror source configured")]
    NoSource,

    #[error("Running process detected ({0}), exiting")]
    AlreadyRunning(u32),

    #[error("Upstream status check failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, MirrorError>;

/// Selection switches from the command line
#[derive(Debug, Clone, Default)]
pub struct MirrorRequest {
    /// Also mirror the static directory list
    pub include_static: bool,
    pub exclude: Vec<String>,
    /// Compare file contents rather than size and time
    pub checksum: bool,
    /// Overrides the configured destination
    pub destination: Option<PathBuf>,
}

/// One directory to mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorJob {
    pub directory: String,
    pub priority: bool,
    pub command: CommandLine,
    pub log_file: PathBuf,
}

/// Log file receiving the output of every run for `directory`
pub fn log_file(log_dir: &Path, directory: &str) -> PathBuf {
    log_dir.join(format!("mirror_{}.log", directory.replace('/', "_")))
}

/// rsync invocation for one directory
pub fn rsync_command(
    config: &MirrorConfig,
    destination: &Path,
    directory: &str,
    checksum: bool,
) -> CommandLine {
    let mut cmd = CommandLine::new(&config.rsync).arg("--archive");
    if checksum {
        cmd = cmd.arg("--checksum");
    }
    cmd = cmd.args(["--verbose", "--delete", "--delete-after", "--no-motd"]);
    if let Some(password_file) = &config.password_file {
        cmd = cmd
            .arg("--password-file")
            .arg(password_file.to_string_lossy());
    }
    if let Some(extra) = config.extra_args.get(directory) {
        cmd = cmd.args(extra.iter().cloned());
    }
    cmd.arg(format!("{}/{}/", config.source.trim_end_matches('/'), directory))
        .arg(format!("{}/{}/", destination.display(), directory))
}

/// Build the job queue: priority directories first, in configured order
pub fn plan(config: &MirrorConfig, request: &MirrorRequest) -> Result<Vec<MirrorJob>> {
    if config.source.trim().is_empty() {
        return Err(MirrorError::NoSource);
    }
    let destination = request
        .destination
        .as_ref()
        .or(config.destination.as_ref())
        .ok_or(MirrorError::NoDestination)?;

    let mut directories: Vec<&String> = Vec::new();
    if request.include_static {
        directories.extend(&config.static_dirs);
    }
    directories.extend(&config.dynamic);

    let mut selected = Vec::new();
    for directory in directories {
        if request.exclude.contains(directory) {
            warn!("{} skipped at user request.", directory);
        } else if !selected.contains(&directory) {
            selected.push(directory);
        }
    }

    let (priority, rest): (Vec<&String>, Vec<&String>) = selected
        .into_iter()
        .partition(|d| config.priority.contains(*d));

    let job = |directory: &String, priority: bool| {
        let rsync = rsync_command(config, destination, directory, request.checksum);
        let command = if priority {
            rsync
        } else {
            CommandLine::new("nice")
                .args(["-n".to_string(), config.niceness.to_string()])
                .arg(rsync.program)
                .args(rsync.args)
        };
        MirrorJob {
            directory: directory.clone(),
            priority,
            command,
            log_file: log_file(&config.log_dir, directory),
        }
    };

    Ok(priority
        .into_iter()
        .map(|d| job(d, true))
        .chain(rest.into_iter().map(|d| job(d, false)))
        .collect())
}

/// Block until `url` answers 200, checking every `interval`
pub async fn wait_for_upstream(url: &str, interval: Duration) -> Result<()> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()?;
    loop {
        let status = client.get(url).send().await?.status();
        if status == StatusCode::OK {
            return Ok(());
        }
        info!(%status, "Daily transfer incomplete, sleeping {:?}.", interval);
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config() -> MirrorConfig {
        let mut extra_args = BTreeMap::new();
        extra_args.insert(
            "spectro/desi_spectro_calib".to_string(),
            vec!["--exclude".to_string(), ".svn".to_string()],
        );
        MirrorConfig {
            source: "rsync://dtn.example.org/desi".to_string(),
            destination: Some(PathBuf::from("/desi/root")),
            password_file: Some(PathBuf::from("/home/desi/.desi")),
            priority: vec!["spectro/redux/daily".to_string()],
            static_dirs: vec!["cmx".to_string(), "spectro/desi_spectro_calib".to_string()],
            dynamic: vec![
                "engineering/focalplane".to_string(),
                "spectro/redux/daily".to_string(),
            ],
            extra_args,
            ..MirrorConfig::default()
        }
    }

    #[test]
    fn test_rsync_command() {
        let cmd = rsync_command(&config(), Path::new("/desi/root"), "spectro/desi_spectro_calib", true);
        assert_eq!(
            cmd.to_string(),
            "/usr/bin/rsync --archive --checksum --verbose --delete --delete-after --no-motd \
             --password-file /home/desi/.desi --exclude .svn \
             rsync://dtn.example.org/desi/spectro/desi_spectro_calib/ /desi/root/spectro/desi_spectro_calib/"
        );
    }

    #[test]
    fn test_plan_dynamic_only() {
        let jobs = plan(&config(), &MirrorRequest::default()).unwrap();
        let names: Vec<&str> = jobs.iter().map(|j| j.directory.as_str()).collect();
        assert_eq!(names, vec!["spectro/redux/daily", "engineering/focalplane"]);

        assert!(jobs[0].priority);
        assert_eq!(jobs[0].command.program, "/usr/bin/rsync");
        assert!(!jobs[1].priority);
        assert_eq!(jobs[1].command.program, "nice");
        assert_eq!(&jobs[1].command.args[..3], &["-n", "19", "/usr/bin/rsync"]);
        assert_eq!(
            jobs[1].log_file,
            PathBuf::from("logs/mirror_engineering_focalplane.log")
        );
    }

    #[test]
    fn test_plan_static_and_exclude() {
        let request = MirrorRequest {
            include_static: true,
            exclude: vec!["cmx".to_string()],
            ..MirrorRequest::default()
        };
        let jobs = plan(&config(), &request).unwrap();
        let names: Vec<&str> = jobs.iter().map(|j| j.directory.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "spectro/redux/daily",
                "spectro/desi_spectro_calib",
                "engineering/focalplane"
            ]
        );
    }

    #[test]
    fn test_plan_requires_destination() {
        let mut config = config();
        config.destination = None;
        assert!(matches!(
            plan(&config, &MirrorRequest::default()),
            Err(MirrorError::NoDestination)
        ));

        let request = MirrorRequest {
            destination: Some(PathBuf::from("/elsewhere")),
            ..MirrorRequest::default()
        };
        let jobs = plan(&config, &request).unwrap();
        assert!(jobs[0].command.to_string().ends_with("/elsewhere/spectro/redux/daily/"));
    }
}
