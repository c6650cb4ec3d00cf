//! Per-exposure transfer, verification and promotion
//!
//! [`ExposurePipeline`] drives one exposure from the remote acquisition site
//! through staging into the destination tree, recording each stage in the
//! status ledger. The checksum and permission helpers are shared with the
//! catch-up and archival passes.

pub mod checksum;
pub mod exposure;
pub mod permissions;

pub use checksum::ChecksumReport;
pub use exposure::{ExposureOutcome, ExposurePipeline};

use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::error::TransferError;
use crate::ledger::{self, LedgerError, Marker, Stage, StatusShelf, Target};
use crate::night::{Exposure, Night};
use crate::observability::Observer;
use crate::tools::ToolError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Status ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("External tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Behaviour switches shared by every pass of one daemon run
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Observe only: no filesystem or remote changes, ledger still updated
    pub shadow: bool,
    /// Issue downstream processing triggers after promotion
    pub trigger_pipeline: bool,
    /// Tool granting broader access on promoted nights
    pub fixup_tool: Option<String>,
}

/// Write one stage outcome, surfacing a quarantined document once
pub(crate) fn record(
    shelf: &mut StatusShelf,
    observer: &Observer,
    night: &Night,
    target: Target,
    stage: Stage,
    failure: bool,
    marker: Option<Marker>,
) -> ledger::Result<usize> {
    let ledger = shelf.ledger_for(night)?;
    if let Some(bad) = ledger.take_quarantined() {
        observer.critical("ledger", &TransferError::LedgerCorruption(bad).to_string());
    }
    let written = ledger.update(night, target, stage, failure, marker)?;
    if written == 0 {
        debug!(%night, ?target, %stage, failure, "Status unchanged");
    }
    Ok(written)
}

/// Verify an exposure directory and record the `checksum` stage
pub(crate) fn verify_and_record(
    shelf: &mut StatusShelf,
    observer: &Observer,
    night: &Night,
    exposure: Exposure,
    directory: &Path,
    manifest_name: &str,
) -> Result<ChecksumReport> {
    let report = checksum::verify(directory, manifest_name)?;
    if report.is_ok() {
        record(shelf, observer, night, exposure.into(), Stage::Checksum, false, None)?;
    } else {
        observer.metrics.checksum_failed();
        observer.critical(
            "checksum",
            &format!(
                "The following checksum error(s) detected for {night}/{exposure}:\n\n{}",
                report.summary()
            ),
        );
        record(shelf, observer, night, exposure.into(), Stage::Checksum, true, None)?;
    }
    Ok(report)
}
