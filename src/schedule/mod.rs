//! Time-gated passes run once the observing night is over
//!
//! The catch-up scanner resyncs yesterday's night to pick up late files;
//! the archival trigger writes a completed night to tape. Both are gated on
//! the UTC hour by the daemon.

pub mod archival;
pub mod catchup;

pub use archival::{ArchivalTrigger, ArchiveOutcome};
pub use catchup::{CatchupMode, CatchupOutcome, CatchupScanner};

use chrono::{DateTime, Timelike, Utc};

/// Whether the UTC hour of `now` has reached `hour`
pub fn due(now: DateTime<Utc>, hour: u32) -> bool {
    now.hour() >= hour
}
