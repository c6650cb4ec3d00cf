//! Stage records and their on-disk row layout
//!
//! Each record is stored as a compact JSON array so the yearly document stays
//! small enough for the dashboard to fetch in one request:
//!
//! - `[stage, success, timestamp_ms]`
//! - `[stage, success, timestamp_ms, "marker"]` for pipeline triggers
//!
//! `stage` is the stage index (rsync=0, checksum=1, backup=2, pipeline=3) and
//! `success` is 0 or 1.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::LedgerError;
use crate::night::Exposure;

/// Transfer stage tracked by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Rsync,
    Checksum,
    Backup,
    Pipeline,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Rsync, Stage::Checksum, Stage::Backup, Stage::Pipeline];

    pub fn index(self) -> u8 {
        match self {
            Stage::Rsync => 0,
            Stage::Checksum => 1,
            Stage::Backup => 2,
            Stage::Pipeline => 3,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Rsync => "rsync",
            Stage::Checksum => "checksum",
            Stage::Backup => "backup",
            Stage::Pipeline => "pipeline",
        }
    }
}

impl FromStr for Stage {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| LedgerError::UnknownStage(s.to_string()))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion marker sub-categories, in trigger order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Marker {
    Flats,
    Arcs,
    Science,
}

impl Marker {
    pub const ORDERED: [Marker; 3] = [Marker::Flats, Marker::Arcs, Marker::Science];

    pub fn as_str(self) -> &'static str {
        match self {
            Marker::Flats => "flats",
            Marker::Arcs => "arcs",
            Marker::Science => "science",
        }
    }
}

impl FromStr for Marker {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ORDERED
            .into_iter()
            .find(|marker| marker.as_str() == s)
            .ok_or_else(|| LedgerError::UnknownMarker(s.to_string()))
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage outcome for one exposure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RecordRow", try_from = "RecordRow")]
pub struct StageRecord {
    pub stage: Stage,
    pub success: bool,
    pub last_marker: Option<Marker>,
    pub timestamp_ms: i64,
}

impl StageRecord {
    pub fn new(stage: Stage, success: bool, last_marker: Option<Marker>, timestamp_ms: i64) -> Self {
        Self {
            stage,
            success,
            last_marker,
            timestamp_ms,
        }
    }

    /// Whether this record occupies the same supersedable slot
    pub(crate) fn same_slot(&self, stage: Stage, marker: Option<Marker>) -> bool {
        self.stage == stage && self.last_marker == marker
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RecordRow {
    Marked(u8, u8, i64, String),
    Plain(u8, u8, i64),
}

impl From<StageRecord> for RecordRow {
    fn from(record: StageRecord) -> Self {
        let stage = record.stage.index();
        let success = u8::from(record.success);
        match record.last_marker {
            Some(marker) => {
                RecordRow::Marked(stage, success, record.timestamp_ms, marker.as_str().to_string())
            }
            None => RecordRow::Plain(stage, success, record.timestamp_ms),
        }
    }
}

impl TryFrom<RecordRow> for StageRecord {
    type Error = LedgerError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let (stage, success, timestamp_ms, marker) = match row {
            RecordRow::Marked(stage, success, ts, marker) => (stage, success, ts, Some(marker)),
            RecordRow::Plain(stage, success, ts) => (stage, success, ts, None),
        };
        let stage =
            Stage::from_index(stage).ok_or_else(|| LedgerError::UnknownStage(stage.to_string()))?;
        let last_marker = match marker.as_deref() {
            None | Some("") => None,
            Some(name) => Some(name.parse()?),
        };
        Ok(StageRecord {
            stage,
            success: success != 0,
            last_marker,
            timestamp_ms,
        })
    }
}

/// Exposure selector for ledger updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Exposure(Exposure),
    /// Every exposure already known for the night
    All,
}

impl FromStr for Target {
    type Err = crate::night::IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            Ok(Target::All)
        } else {
            s.parse().map(Target::Exposure)
        }
    }
}

impl From<Exposure> for Target {
    fn from(exposure: Exposure) -> Self {
        Target::Exposure(exposure)
    }
}
