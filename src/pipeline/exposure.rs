use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::{ChecksumReport, Result, TransferOptions, permissions, record, verify_and_record};
use crate::config::DirectoryConfig;
use crate::error::TransferError;
use crate::ledger::{Lookup, Marker, Stage, StatusShelf};
use crate::night::{Exposure, Night};
use crate::observability::Observer;
use crate::tools::{CommandOutput, PipelinePhase, Remote, SyncRequest};

/// Where an exposure ended up after one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExposureOutcome {
    /// Already present in staging or destination; nothing transferred
    AlreadyHandled,
    /// Sync failed; verification and promotion were skipped
    TransferFailed { status: String },
    /// Checksums failed; the exposure stays in staging
    VerificationFailed(ChecksumReport),
    /// Moved into the destination, no downstream trigger issued
    Promoted,
    /// Downstream processing triggered `triggers` times
    Notified { triggers: usize },
}

/// Per-exposure state machine for one monitored tree
pub struct ExposurePipeline<'a> {
    directory: &'a DirectoryConfig,
    remote: &'a dyn Remote,
    observer: &'a Observer,
    options: &'a TransferOptions,
}

impl<'a> ExposurePipeline<'a> {
    pub fn new(
        directory: &'a DirectoryConfig,
        remote: &'a dyn Remote,
        observer: &'a Observer,
        options: &'a TransferOptions,
    ) -> Self {
        Self {
            directory,
            remote,
            observer,
            options,
        }
    }

    pub async fn process(
        &self,
        shelf: &mut StatusShelf,
        night: &Night,
        exposure: Exposure,
    ) -> Result<ExposureOutcome> {
        let shadow = self.options.shadow;
        let staging_night = self.directory.staging_night(night);
        let staging_exposure = self.directory.staging_exposure(night, &exposure);
        let destination_night = self.directory.destination_night(night);
        let destination_exposure = self.directory.destination_exposure(night, &exposure);

        if !staging_night.is_dir() {
            debug!("Creating staging night {}", staging_night.display());
            if !shadow {
                fs::create_dir_all(&staging_night)?;
            }
        }

        if staging_exposure.is_dir() || destination_exposure.is_dir() {
            debug!("{} already transferred.", staging_exposure.display());
            let triggers = self.late_markers(shelf, night, exposure).await?;
            return Ok(if triggers > 0 {
                ExposureOutcome::Notified { triggers }
            } else {
                ExposureOutcome::AlreadyHandled
            });
        }

        // Transfer
        let request = SyncRequest::pull(
            self.directory.source_exposure(night, &exposure),
            staging_exposure.to_string_lossy(),
        );
        let output = if shadow {
            debug!(%night, %exposure, "Shadow mode, assuming sync succeeded");
            CommandOutput::skipped()
        } else {
            match self.remote.sync(&request).await {
                Ok(outcome) => outcome.output,
                Err(e) => CommandOutput {
                    status: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                },
            }
        };

        let transferred = output.success();
        if transferred {
            self.observer.metrics.exposure_transferred();
        } else {
            self.observer.metrics.transfer_failed();
            let failure = TransferError::TransferFailure {
                status: output.status_label(),
            };
            self.observer.critical(
                "rsync",
                &format!("{failure} detected for {night}/{exposure}, check logs!"),
            );
            error!("rsync STDOUT = {}", output.stdout);
            error!("rsync STDERR = {}", output.stderr);
        }
        record(
            shelf,
            self.observer,
            night,
            exposure.into(),
            Stage::Rsync,
            !transferred,
            None,
        )?;

        if !shadow {
            permissions::lock(&staging_exposure)?;
        }

        if !transferred {
            return Ok(ExposureOutcome::TransferFailed {
                status: output.status_label(),
            });
        }

        // Verify
        let report = verify_and_record(
            shelf,
            self.observer,
            night,
            exposure,
            &staging_exposure,
            &self.directory.checksum_file_name(night, &exposure),
        )?;
        if !report.is_ok() {
            return Ok(ExposureOutcome::VerificationFailed(report));
        }

        // Promote
        if shadow {
            debug!(%night, %exposure, "Shadow mode, leaving exposure in staging");
            return Ok(ExposureOutcome::Promoted);
        }
        if !destination_night.is_dir() {
            debug!("Creating destination night {}", destination_night.display());
            fs::create_dir_all(&destination_night)?;
        }
        move_tree(&staging_exposure, &destination_exposure)?;
        self.fix_permissions(&destination_night).await;

        // Notify
        if !self.options.trigger_pipeline {
            return Ok(ExposureOutcome::Promoted);
        }
        let missing: Vec<String> = self
            .directory
            .expected_file_names(night, &exposure)
            .into_iter()
            .filter(|name| !destination_exposure.join(name).exists())
            .collect();
        if !missing.is_empty() {
            info!(
                %night, %exposure, ?missing,
                "Expected files not present, skipping processing trigger"
            );
            return Ok(ExposureOutcome::Promoted);
        }

        let mut triggers = 0;
        self.trigger(shelf, night, exposure, PipelinePhase::Update).await?;
        triggers += 1;
        for marker in Marker::ORDERED {
            if marker_path(&destination_exposure, marker, night, exposure).exists() {
                self.trigger(shelf, night, exposure, PipelinePhase::Marker(marker))
                    .await?;
                triggers += 1;
            }
        }
        Ok(ExposureOutcome::Notified { triggers })
    }

    /// Trigger markers that appeared after the exposure was first notified
    async fn late_markers(
        &self,
        shelf: &mut StatusShelf,
        night: &Night,
        exposure: Exposure,
    ) -> Result<usize> {
        let destination_exposure = self.directory.destination_exposure(night, &exposure);
        if self.options.shadow || !self.options.trigger_pipeline || !destination_exposure.is_dir()
        {
            return Ok(0);
        }

        let recorded: Vec<Option<Marker>> = match shelf
            .ledger_for(night)?
            .find(night, Some(exposure), None)
        {
            Ok(Lookup::Records(records)) => records
                .iter()
                .filter(|r| r.stage == Stage::Pipeline)
                .map(|r| r.last_marker)
                .collect(),
            _ => return Ok(0),
        };
        // Only exposures whose update trigger already ran
        if !recorded.contains(&None) {
            return Ok(0);
        }

        let mut triggers = 0;
        for marker in Marker::ORDERED {
            if recorded.contains(&Some(marker))
                || !marker_path(&destination_exposure, marker, night, exposure).exists()
            {
                continue;
            }
            info!(%night, %exposure, %marker, "Completion marker detected");
            self.trigger(shelf, night, exposure, PipelinePhase::Marker(marker))
                .await?;
            triggers += 1;
        }
        Ok(triggers)
    }

    async fn trigger(
        &self,
        shelf: &mut StatusShelf,
        night: &Night,
        exposure: Exposure,
        phase: PipelinePhase,
    ) -> Result<()> {
        let success = match self.remote.trigger_pipeline(night, &exposure, phase).await {
            Ok(out) if out.success() => true,
            Ok(out) => {
                self.observer.critical(
                    "pipeline",
                    &format!(
                        "Processing trigger '{}' failed (status = {}) for {night}/{exposure}: {}",
                        phase.as_str(),
                        out.status_label(),
                        out.stderr.trim()
                    ),
                );
                false
            }
            Err(e) => {
                self.observer.critical(
                    "pipeline",
                    &format!(
                        "Processing trigger '{}' could not run for {night}/{exposure}: {e}",
                        phase.as_str()
                    ),
                );
                false
            }
        };
        record(
            shelf,
            self.observer,
            night,
            exposure.into(),
            Stage::Pipeline,
            !success,
            phase.marker(),
        )?;
        Ok(())
    }

    async fn fix_permissions(&self, destination_night: &Path) {
        if !self.directory.permission_fixup {
            return;
        }
        let Some(tool) = &self.options.fixup_tool else {
            warn!("Permission fixup requested but no fixup tool configured");
            return;
        };
        match permissions::fixup(tool, destination_night).await {
            Ok(out) if out.success() => {
                debug!("Permissions fixed on {}", destination_night.display());
            }
            Ok(out) => self.observer.critical(
                "permissions",
                &format!(
                    "Permission fixup failed (status = {}) on {}: {}",
                    out.status_label(),
                    destination_night.display(),
                    out.stderr.trim()
                ),
            ),
            Err(e) => self.observer.critical(
                "permissions",
                &format!("Permission fixup could not run on {}: {e}", destination_night.display()),
            ),
        }
    }
}

/// Completion marker file inside an exposure directory
pub fn marker_path(
    exposure_dir: &Path,
    marker: Marker,
    night: &Night,
    exposure: Exposure,
) -> PathBuf {
    exposure_dir.join(format!("{marker}-{night}-{exposure}.done"))
}

/// Move a tree, copying when source and target are on different filesystems
///
/// Returns `false` without touching anything when `to` already exists.
pub fn move_tree(from: &Path, to: &Path) -> io::Result<bool> {
    if to.exists() {
        debug!("{} already exists, not moving", to.display());
        return Ok(false);
    }
    debug!("Moving {} to {}", from.display(), to.display());
    match fs::rename(from, to) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            copy_tree(from, to)?;
            fs::remove_dir_all(from)?;
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    // Permissions are copied last so read-only directories can be filled
    let mut directories = Vec::new();
    for entry in WalkDir::new(from) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(from).map_err(io::Error::other)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
            directories.push((target, entry.metadata()?.permissions()));
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    for (dir, permissions) in directories.into_iter().rev() {
        fs::set_permissions(dir, permissions)?;
    }
    Ok(())
}
