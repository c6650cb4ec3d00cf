use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::Utc;
use tokio::process::Child;
use tracing::{debug, error, info, warn};

use super::{MirrorJob, Result};
use crate::observability::Observer;

/// Directories by final state
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MirrorSummary {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    /// Never started because the kill file appeared
    pub skipped: Vec<String>,
}

struct Running {
    job: MirrorJob,
    child: Child,
}

/// Bounded pool of rsync subprocesses draining a job queue
#[derive(Debug, Clone)]
pub struct MirrorPool {
    processes: usize,
    poll_interval: Duration,
    kill_file: Option<PathBuf>,
}

impl MirrorPool {
    pub fn new(processes: usize, poll_interval: Duration, kill_file: Option<PathBuf>) -> Self {
        Self {
            processes: processes.max(1),
            poll_interval,
            kill_file,
        }
    }

    fn kill_requested(&self) -> bool {
        self.kill_file.as_ref().is_some_and(|path| path.exists())
    }

    /// Run every job, at most `processes` at a time
    ///
    /// Completion is polled once per tick. When the kill file appears no
    /// further jobs are started; running ones are left to finish.
    pub async fn run(&self, jobs: Vec<MirrorJob>, observer: &Observer) -> Result<MirrorSummary> {
        let mut queue: VecDeque<MirrorJob> = jobs.into();
        let mut running: Vec<Running> = Vec::with_capacity(self.processes);
        let mut summary = MirrorSummary::default();
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            ticker.tick().await;

            let mut index = 0;
            while index < running.len() {
                match running[index].child.try_wait() {
                    Ok(Some(status)) => {
                        let done = running.swap_remove(index);
                        finish(&done.job, status, observer, &mut summary);
                    }
                    Ok(None) => index += 1,
                    Err(e) => {
                        let done = running.swap_remove(index);
                        observer.critical(
                            "rsync",
                            &format!("Lost track of mirror of {}: {e}", done.job.directory),
                        );
                        summary.failed.push(done.job.directory);
                    }
                }
            }

            if !queue.is_empty() && self.kill_requested() {
                warn!(pending = queue.len(), "Kill file detected, not starting new transfers");
                summary.skipped.extend(queue.drain(..).map(|job| job.directory));
            }

            while running.len() < self.processes {
                let Some(job) = queue.pop_front() else {
                    break;
                };
                match spawn(&job) {
                    Ok(child) => running.push(Running { job, child }),
                    Err(e) => {
                        observer.critical(
                            "rsync",
                            &format!("Could not start mirror of {}: {e}", job.directory),
                        );
                        summary.failed.push(job.directory);
                    }
                }
            }

            if running.is_empty() && queue.is_empty() {
                break;
            }
        }

        info!(
            completed = summary.completed.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "Mirror finished"
        );
        Ok(summary)
    }
}

fn open_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn spawn(job: &MirrorJob) -> std::io::Result<Child> {
    let mut log = open_log(&job.log_file)?;
    writeln!(log, "=== {} {}", Utc::now().to_rfc3339(), job.command)?;
    let stderr = log.try_clone()?;

    info!(directory = %job.directory, priority = job.priority, "{}", job.command);
    job.command
        .command()
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(stderr))
        .spawn()
}

fn finish(job: &MirrorJob, status: ExitStatus, observer: &Observer, summary: &mut MirrorSummary) {
    if status.success() {
        debug!(directory = %job.directory, "Mirror complete");
        summary.completed.push(job.directory.clone());
    } else {
        observer.critical(
            "rsync",
            &format!(
                "rsync error detected for {} ({status})! Check {}.",
                job.directory,
                job.log_file.display()
            ),
        );
        error!(directory = %job.directory, %status, "Mirror failed");
        summary.failed.push(job.directory.clone());
    }
}
