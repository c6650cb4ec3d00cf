//! Transfer daemon main loop
//!
//! One pass visits every configured directory in turn: new exposures are
//! pulled through the [`ExposurePipeline`], then, once the UTC hour allows,
//! yesterday's night gets a catch-up resync and an archival attempt. Every
//! failure is caught at the exposure or directory boundary and raised
//! through the [`Observer`]; nothing short of a configuration error stops
//! the loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{Config, DirectoryConfig};
use crate::ledger::{Stage, StatusShelf, Target};
use crate::night::{Exposure, Night, parse_exposure_link};
use crate::observability::Observer;
use crate::pipeline::{self, ExposureOutcome, ExposurePipeline, TransferOptions};
use crate::schedule::{
    self, ArchivalTrigger, ArchiveOutcome, CatchupMode, CatchupOutcome, CatchupScanner,
};
use crate::tools::{Archiver, Remote};

/// Command-line switches layered over the configuration
#[derive(Debug, Clone, Default)]
pub struct DaemonSettings {
    pub shadow: bool,
    pub no_backup: bool,
    pub kill_file: Option<PathBuf>,
}

/// What one pass did, for logging and tests
#[derive(Debug, Default)]
pub struct PassReport {
    /// The remote checksum lock was held; nothing ran
    pub locked: bool,
    pub exposures: Vec<(Night, Exposure, ExposureOutcome)>,
    pub catchups: Vec<(String, CatchupOutcome)>,
    pub archives: Vec<(String, ArchiveOutcome)>,
    /// Exposure or directory failures caught and alerted
    pub failures: usize,
}

pub struct Orchestrator {
    config: Arc<Config>,
    remote: Box<dyn Remote>,
    archiver: Box<dyn Archiver>,
    observer: Arc<Observer>,
    options: TransferOptions,
    archive_enabled: bool,
    scratch: PathBuf,
    kill_file: Option<PathBuf>,
    /// One shelf per status directory, shared by directories that map to it
    shelves: HashMap<PathBuf, StatusShelf>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        remote: Box<dyn Remote>,
        archiver: Box<dyn Archiver>,
        observer: Arc<Observer>,
        settings: DaemonSettings,
    ) -> Self {
        let options = TransferOptions {
            shadow: settings.shadow,
            trigger_pipeline: config.pipeline.enabled,
            fixup_tool: config.permissions.fixup_tool.clone(),
        };
        let archive_enabled = config.archive.enabled && !settings.no_backup;
        let scratch = match config.daemon.scratch_dir() {
            Some(dir) => dir.to_path_buf(),
            None => {
                warn!("No scratch candidate exists, using the system temporary directory");
                std::env::temp_dir()
            }
        };
        let kill_file = settings.kill_file.or_else(|| config.daemon.kill_file.clone());

        Self {
            config,
            remote,
            archiver,
            observer,
            options,
            archive_enabled,
            scratch,
            kill_file,
            shelves: HashMap::new(),
        }
    }

    pub fn scratch(&self) -> &std::path::Path {
        &self.scratch
    }

    fn kill_requested(&self) -> bool {
        self.kill_file.as_ref().is_some_and(|path| path.exists())
    }

    /// Run passes until the kill file appears, a shutdown signal arrives,
    /// or after one pass when `once` is set
    pub async fn run(&mut self, once: bool) {
        // Listening from the start keeps signals that arrive mid-pass
        let mut shutdown = tokio::spawn(crate::server::shutdown_signal());
        self.run_until(once, &mut shutdown).await;
        shutdown.abort();
    }

    /// [`run`](Self::run) with an explicit shutdown future; one that
    /// resolves during a pass ends the loop when the pass completes
    pub async fn run_until<F: Future>(&mut self, once: bool, shutdown: F) {
        let sleep = self.config.daemon.sleep;
        info!(sleep = %sleep, shadow = self.options.shadow, "Transfer daemon starting");
        tokio::pin!(shutdown);

        loop {
            let report = self.pass(Utc::now()).await;
            info!(
                locked = report.locked,
                exposures = report.exposures.len(),
                failures = report.failures,
                "Transfer pass complete"
            );

            if self.kill_requested() {
                if let Some(path) = &self.kill_file {
                    info!("{} detected, shutting down transfer daemon.", path.display());
                }
                break;
            }
            if once {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(sleep.as_duration()) => {}
                _ = &mut shutdown => break,
            }
        }

        let metrics = self.observer.metrics.snapshot();
        info!(?metrics, "Transfer daemon stopped");
    }

    /// One pass over every directory as of `now`
    pub async fn pass(&mut self, now: DateTime<Utc>) -> PassReport {
        let mut report = PassReport::default();

        match self.remote.checksum_lock().await {
            Ok(true) => {
                info!("Checksums are being computed at KPNO.");
                report.locked = true;
                return report;
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Could not check the remote checksum lock"),
        }

        let config = Arc::clone(&self.config);
        for (name, directory) in &config.directories {
            info!("Looking for new data in {}.", directory.source);
            let status_dir = directory.status_dir();
            let mut shelf = self
                .shelves
                .remove(&status_dir)
                .unwrap_or_else(|| StatusShelf::new(status_dir.clone()));

            if let Err(e) = self
                .directory(&mut shelf, name, directory, now, &mut report)
                .await
            {
                report.failures += 1;
                self.observer.critical(
                    "transfer",
                    &format!("Exception detected in transfer of {}: {e}", directory.source),
                );
            }
            self.shelves.insert(status_dir, shelf);
        }

        report
    }

    async fn directory(
        &self,
        shelf: &mut StatusShelf,
        name: &str,
        directory: &DirectoryConfig,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> pipeline::Result<()> {
        let links = self.remote.list_symlinks(&directory.source).await?;
        if links.is_empty() {
            warn!("No links found, check connection.");
        }

        let exposures = ExposurePipeline::new(
            directory,
            self.remote.as_ref(),
            &self.observer,
            &self.options,
        );
        for link in &links {
            let Ok((night, exposure)) = parse_exposure_link(link) else {
                warn!("Malformed symlink detected: {}. Skipping.", link);
                continue;
            };
            match exposures.process(shelf, &night, exposure).await {
                Ok(outcome) => {
                    debug!(directory = name, %night, %exposure, ?outcome, "Exposure processed");
                    report.exposures.push((night, exposure, outcome));
                }
                Err(e) => {
                    report.failures += 1;
                    self.observer.critical(
                        "transfer",
                        &format!("Exception detected in transfer of {night}/{exposure}: {e}"),
                    );
                }
            }
        }

        let daemon = &self.config.daemon;
        let catchup_due = schedule::due(now, daemon.catchup_hour);
        let backup_due = schedule::due(now, daemon.backup_hour);
        if !catchup_due && !backup_due {
            return Ok(());
        }

        let yesterday = Night::yesterday(now);
        let catchup = CatchupScanner::new(
            directory,
            self.remote.as_ref(),
            &self.observer,
            &self.options,
            &self.scratch,
        );
        if catchup_due {
            let outcome = catchup.run(shelf, &yesterday, CatchupMode::Daily).await?;
            report.catchups.push((name.to_string(), outcome));
        }

        if backup_due {
            let archival = ArchivalTrigger::new(
                directory,
                self.archiver.as_ref(),
                &self.observer,
                &self.options,
                &self.scratch,
                self.archive_enabled,
            );
            let outcome = archival.run(shelf, &catchup, &yesterday).await?;
            if let ArchiveOutcome::Attempted { success } = outcome {
                debug!(night = %yesterday, success, "Recording night-wide backup status");
                pipeline::record(
                    shelf,
                    &self.observer,
                    &yesterday,
                    Target::All,
                    Stage::Backup,
                    !success,
                    None,
                )?;
            }
            report.archives.push((name.to_string(), outcome));
        }

        Ok(())
    }
}
