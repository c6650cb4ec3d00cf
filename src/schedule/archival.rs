use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::catchup::{CatchupMode, CatchupScanner};
use crate::config::DirectoryConfig;
use crate::error::TransferError;
use crate::ledger::StatusShelf;
use crate::night::Night;
use crate::observability::Observer;
use crate::pipeline::{Result, TransferOptions, permissions};
use crate::tools::Archiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// No destination directory for the night
    NoData,
    /// The archive reported itself unavailable; retried next pass
    Unavailable,
    /// Both the member and its index are already in the archive
    AlreadyArchived,
    /// A write was issued; the night-wide backup stage should be recorded
    Attempted { success: bool },
    /// Tape writes disabled; only the final resync and lock ran
    Disabled,
}

/// Final resync, lock and tape write for a completed night
pub struct ArchivalTrigger<'a> {
    directory: &'a DirectoryConfig,
    archiver: &'a dyn Archiver,
    observer: &'a Observer,
    options: &'a TransferOptions,
    scratch: &'a Path,
    enabled: bool,
}

impl<'a> ArchivalTrigger<'a> {
    pub fn new(
        directory: &'a DirectoryConfig,
        archiver: &'a dyn Archiver,
        observer: &'a Observer,
        options: &'a TransferOptions,
        scratch: &'a Path,
        enabled: bool,
    ) -> Self {
        Self {
            directory,
            archiver,
            observer,
            options,
            scratch,
            enabled,
        }
    }

    /// Scratch file caching the archive member listing
    pub fn listing_path(&self) -> PathBuf {
        let name = self.directory.archive_listing_name();
        if self.options.shadow {
            self.scratch.join(name.replace(".txt", ".test.txt"))
        } else {
            self.scratch.join(name)
        }
    }

    pub async fn run(
        &self,
        shelf: &mut StatusShelf,
        catchup: &CatchupScanner<'_>,
        night: &Night,
    ) -> Result<ArchiveOutcome> {
        let destination_night = self.directory.destination_night(night);
        if !destination_night.is_dir() {
            warn!("No data from {} detected, skipping HPSS backup.", night);
            return Ok(ArchiveOutcome::NoData);
        }

        let member = self.directory.archive_member(night);
        if self.enabled {
            if !self.available().await {
                return Ok(ArchiveOutcome::Unavailable);
            }
            let members = self.list_members().await?;
            let index = format!("{member}.idx");
            if members.contains(&member) && members.contains(&index) {
                debug!("Backup of {} already complete.", night);
                return Ok(ArchiveOutcome::AlreadyArchived);
            }
        }

        catchup.run(shelf, night, CatchupMode::Forced).await?;

        if !self.options.shadow {
            permissions::strip_write(&destination_night)?;
        }

        if !self.enabled {
            info!("Tape backup disabled by user request.");
            return Ok(ArchiveOutcome::Disabled);
        }
        if self.options.shadow {
            debug!(%night, %member, "Shadow mode, skipping archive write");
            return Ok(ArchiveOutcome::Attempted { success: true });
        }

        self.observer.metrics.archive_attempted();
        let success = match self
            .archiver
            .write_member(
                &self.directory.destination,
                &self.directory.archive,
                &member,
                night.as_str(),
            )
            .await
        {
            Ok(out) if out.success() && out.stderr.trim().is_empty() => true,
            Ok(out) => {
                let mut message = format!(
                    "HTAR Backup failed for {}/{member} (status = {}).",
                    self.directory.archive,
                    out.status_label()
                );
                if !out.stderr.trim().is_empty() {
                    message.push_str(&format!("\nHTAR error message was: {}", out.stderr.trim()));
                }
                let failure = TransferError::ArchivalFailure(message);
                self.observer.critical("htar", &failure.to_string());
                false
            }
            Err(e) => {
                let failure = TransferError::ArchivalFailure(e.to_string());
                self.observer.critical("htar", &failure.to_string());
                false
            }
        };
        Ok(ArchiveOutcome::Attempted { success })
    }

    async fn available(&self) -> bool {
        match self.archiver.available().await {
            Ok(true) => true,
            Ok(false) => {
                self.observer
                    .critical("hpss", "HPSS is not available, postponing backup.");
                false
            }
            Err(e) => {
                self.observer.critical(
                    "hpss",
                    &format!("Error while determining HPSS availability: {e}"),
                );
                false
            }
        }
    }

    async fn list_members(&self) -> Result<Vec<String>> {
        let listing = self.listing_path();
        match fs::remove_file(&listing) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} did not exist, nothing to clear.", listing.display());
            }
            Err(e) => return Err(e.into()),
        }
        Ok(self
            .archiver
            .list_members(&self.directory.archive, &listing)
            .await?)
    }
}
