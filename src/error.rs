//! Failure taxonomy shared by the transfer components
//!
//! Module-level errors (`LedgerError`, `ToolError`, `PipelineError`, ...)
//! describe why an operation could not run. [`TransferError`] describes what
//! went wrong with the data itself; it is what gets reported through the
//! alert channel and recorded as a failed stage.

use std::path::PathBuf;
use thiserror::Error;

/// A single checksum verification problem
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChecksumIssue {
    #[error("no checksum file")]
    MissingManifest,

    #[error("{0} not listed in checksum file")]
    UnlistedFile(String),

    #[error("{0} listed but not downloaded")]
    MissingFile(String),

    #[error("{0} had a checksum mismatch")]
    DigestMismatch(String),
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("rsync problem (status = {status})")]
    TransferFailure { status: String },

    #[error("checksum error: {0}")]
    ChecksumFailure(ChecksumIssue),

    #[error("archive write failed: {0}")]
    ArchivalFailure(String),

    #[error("malformed status document quarantined as {}", .0.display())]
    LedgerCorruption(PathBuf),
}

impl From<ChecksumIssue> for TransferError {
    fn from(issue: ChecksumIssue) -> Self {
        TransferError::ChecksumFailure(issue)
    }
}
