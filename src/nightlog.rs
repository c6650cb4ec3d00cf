//! Two-way nightlog synchronization
//!
//! Observers at the telescope and collaborators at the data center both
//! edit the nightly log. Each pass pulls tonight's directory from the
//! acquisition host when it exists there, then pushes the local copy back
//! when one existed here before the pull.

use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::NightlogConfig;
use crate::night::Night;
use crate::observability::Observer;
use crate::pipeline::permissions;
use crate::tools::{Remote, SyncRequest};

#[derive(Debug, Error)]
pub enum NightlogError {
    #[error("Transfer error count exceeded ({0}), check logs!")]
    TooManyErrors(usize),
}

/// What one pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NightlogOutcome {
    /// The remote root could not be listed
    ListingFailed,
    /// Neither side has a directory for the night
    NoData,
    /// Syncs were attempted in the flagged directions
    Synced {
        pulled: bool,
        pushed: bool,
        errors: usize,
    },
}

impl NightlogOutcome {
    pub fn errors(&self) -> usize {
        match self {
            NightlogOutcome::ListingFailed => 1,
            NightlogOutcome::NoData => 0,
            NightlogOutcome::Synced { errors, .. } => *errors,
        }
    }
}

pub struct NightlogSync<'a> {
    config: &'a NightlogConfig,
    remote: &'a dyn Remote,
    observer: &'a Observer,
    fixup_tool: Option<&'a str>,
}

impl<'a> NightlogSync<'a> {
    pub fn new(
        config: &'a NightlogConfig,
        remote: &'a dyn Remote,
        observer: &'a Observer,
        fixup_tool: Option<&'a str>,
    ) -> Self {
        Self {
            config,
            remote,
            observer,
            fixup_tool,
        }
    }

    pub fn remote_night(&self, night: &Night) -> String {
        format!("{}/{}", self.config.remote.trim_end_matches('/'), night)
    }

    pub fn local_night(&self, night: &Night) -> PathBuf {
        self.config.local.join(night.as_str())
    }

    /// Pass loop; stops on the kill file, a shutdown signal, too many
    /// accumulated errors, or after one pass when `once` is set
    pub async fn run(&self, kill_file: Option<&Path>, once: bool) -> Result<(), NightlogError> {
        let sleep = self.config.sleep;
        let mut shutdown = tokio::spawn(crate::server::shutdown_signal());
        let mut errors = 0;

        let result = loop {
            if let Some(path) = kill_file.filter(|path| path.exists()) {
                info!("{} detected, shutting down nightlog daemon.", path.display());
                break Ok(());
            }

            let outcome = self.pass(&Night::tonight(Utc::now())).await;
            errors += outcome.errors();
            if errors > self.config.max_errors {
                let failure = NightlogError::TooManyErrors(errors);
                self.observer.critical("nightlog", &failure.to_string());
                break Err(failure);
            }
            if once {
                break Ok(());
            }

            info!("Sleeping for {}.", sleep);
            tokio::select! {
                _ = tokio::time::sleep(sleep.as_duration()) => {}
                _ = &mut shutdown => break Ok(()),
            }
        };

        shutdown.abort();
        result
    }

    pub async fn pass(&self, night: &Night) -> NightlogOutcome {
        info!("Checking for nightlog data from {}.", night);
        let remote_found = match self.remote.list_directory(&self.config.remote).await {
            Ok(names) => names.iter().any(|name| name.ends_with(night.as_str())),
            Err(e) => {
                warn!(error = %e, "Getting remote nightlog file list for {}", night);
                return NightlogOutcome::ListingFailed;
            }
        };
        let local = self.local_night(night);
        let local_found = local.is_dir();
        if !remote_found && !local_found {
            info!("No remote or local nightlog data found for {}.", night);
            return NightlogOutcome::NoData;
        }

        let local_path = local.to_string_lossy().into_owned();
        let mut errors = 0;
        if remote_found {
            info!("Syncing {} remote -> local.", night);
            let request = SyncRequest::pull(self.remote_night(night), local_path.as_str());
            errors += self.sync(&request).await;
        }
        if local_found {
            info!("Syncing {} local -> remote.", night);
            let request = SyncRequest::push(local_path.as_str(), self.remote_night(night));
            errors += self.sync(&request).await;
        }
        if self.config.permission_fixup {
            errors += self.fix_permissions(&local).await;
        } else {
            debug!("Skipping permission changes at user request.");
        }

        NightlogOutcome::Synced {
            pulled: remote_found,
            pushed: local_found,
            errors,
        }
    }

    /// Error count contributed by one sync
    async fn sync(&self, request: &SyncRequest) -> usize {
        match self.remote.sync(request).await {
            Ok(outcome) if outcome.success() => {
                debug!(changed = outcome.changes.entries().len(), "Nightlog sync complete");
                0
            }
            Ok(outcome) => {
                warn!(
                    status = %outcome.output.status_label(),
                    stderr = outcome.output.stderr.trim(),
                    "Syncing {} -> {} failed",
                    request.source,
                    request.destination
                );
                1
            }
            Err(e) => {
                warn!(error = %e, "Syncing {} -> {} failed", request.source, request.destination);
                1
            }
        }
    }

    async fn fix_permissions(&self, local: &Path) -> usize {
        if !local.is_dir() {
            info!("No data yet for {}.", local.display());
            return 0;
        }
        let Some(tool) = self.fixup_tool else {
            debug!("No permission fixup tool configured");
            return 0;
        };
        match permissions::fixup(tool, local).await {
            Ok(out) if out.success() => 0,
            Ok(out) => {
                warn!(status = %out.status_label(), "Fixing permissions for {}", local.display());
                1
            }
            Err(e) => {
                warn!(error = %e, "Fixing permissions for {}", local.display());
                1
            }
        }
    }
}
