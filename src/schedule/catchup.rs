use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::config::DirectoryConfig;
use crate::ledger::StatusShelf;
use crate::night::{Exposure, Night};
use crate::observability::Observer;
use crate::pipeline::{Result, TransferOptions, permissions, verify_and_record};
use crate::tools::{CommandOutput, Remote, SyncRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchupMode {
    /// At most once per night, remembered by a marker file
    Daily,
    /// Always re-check; used right before archiving
    Forced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatchupOutcome {
    /// No destination directory for the night
    NoData,
    /// The daily marker already exists
    AlreadyDone,
    /// The dry run reported no changes
    Unchanged,
    /// The night was resynced; listed exposures were re-verified
    Resynced { exposures: Vec<Exposure> },
}

/// Picks up files that arrived after an exposure was first transferred
pub struct CatchupScanner<'a> {
    directory: &'a DirectoryConfig,
    remote: &'a dyn Remote,
    observer: &'a Observer,
    options: &'a TransferOptions,
    scratch: &'a Path,
}

impl<'a> CatchupScanner<'a> {
    pub fn new(
        directory: &'a DirectoryConfig,
        remote: &'a dyn Remote,
        observer: &'a Observer,
        options: &'a TransferOptions,
        scratch: &'a Path,
    ) -> Self {
        Self {
            directory,
            remote,
            observer,
            options,
            scratch,
        }
    }

    /// Scratch file holding the dry-run output for `night`
    pub fn marker_path(&self, night: &Night, mode: CatchupMode) -> PathBuf {
        let prefix = match mode {
            CatchupMode::Daily => "ketchup",
            CatchupMode::Forced => "backup",
        };
        let suffix = if self.options.shadow { "test.txt" } else { "txt" };
        self.scratch.join(format!(
            "{prefix}_{}_{night}.{suffix}",
            self.directory.destination_stem()
        ))
    }

    pub async fn run(
        &self,
        shelf: &mut StatusShelf,
        night: &Night,
        mode: CatchupMode,
    ) -> Result<CatchupOutcome> {
        let destination_night = self.directory.destination_night(night);
        if !destination_night.is_dir() {
            warn!("No data from {} detected, skipping catch-up transfer.", night);
            return Ok(CatchupOutcome::NoData);
        }

        let marker = self.marker_path(night, mode);
        if mode == CatchupMode::Daily && marker.exists() {
            debug!("{} detected, catch-up transfer is done.", marker.display());
            return Ok(CatchupOutcome::AlreadyDone);
        }

        let request = SyncRequest::pull(
            self.directory.source_night(night),
            destination_night.to_string_lossy(),
        );
        let preview = self.remote.sync(&request.clone().dry_run()).await?;
        fs::write(&marker, &preview.output.stdout)?;

        if preview.changes.is_empty() {
            info!("No files appear to have changed in {}.", night);
            return Ok(CatchupOutcome::Unchanged);
        }

        warn!("New files detected in {}!", night);
        self.resync(night, &destination_night, &request).await?;

        let exposures: Vec<Exposure> = preview.changes.exposures().into_iter().collect();
        if exposures.is_empty() {
            warn!("No updated exposures in night {} detected.", night);
        }
        for exposure in &exposures {
            verify_and_record(
                shelf,
                self.observer,
                night,
                *exposure,
                &self.directory.destination_exposure(night, exposure),
                &self.directory.checksum_file_name(night, exposure),
            )?;
        }

        Ok(CatchupOutcome::Resynced { exposures })
    }

    async fn resync(
        &self,
        night: &Night,
        destination_night: &Path,
        request: &SyncRequest,
    ) -> Result<()> {
        if self.options.shadow {
            debug!(%night, "Shadow mode, skipping catch-up resync");
            return Ok(());
        }

        permissions::unlock(destination_night)?;
        let output = match self.remote.sync(request).await {
            Ok(outcome) => outcome.output,
            Err(e) => CommandOutput {
                status: None,
                stdout: String::new(),
                stderr: e.to_string(),
            },
        };
        if !output.success() {
            self.observer.critical(
                "rsync",
                &format!(
                    "rsync problem (status = {}) detected on catch-up for {night}, check logs!",
                    output.status_label()
                ),
            );
            error!("rsync STDOUT = \n{}", output.stdout);
            error!("rsync STDERR = \n{}", output.stderr);
        }
        permissions::lock(destination_night)?;
        Ok(())
    }
}
