use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, error, info};

use super::error::{LedgerError, Result};
use super::record::{Marker, Stage, StageRecord, Target};
use crate::night::{Exposure, Night};

/// Records for every exposure of one night
pub type ExposureMap = BTreeMap<Exposure, Vec<StageRecord>>;

type Document = BTreeMap<Night, ExposureMap>;

const FILE_PREFIX: &str = "transfer_status";

/// Mode of a freshly created document; the status dashboard reads it as another user
const DOCUMENT_MODE: u32 = 0o644;

/// Result of a ledger query; the shape depends on which filters were given
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// `find(night)`: the whole per-exposure map
    Night(&'a ExposureMap),
    /// `find(night, stage)`: indices of matching records per exposure
    StageIndices(BTreeMap<Exposure, Vec<usize>>),
    /// `find(night, exposure)`: the exposure's records, oldest first
    Records(&'a [StageRecord]),
    /// `find(night, exposure, stage)`: indices of matching records
    Indices(Vec<usize>),
}

impl Lookup<'_> {
    pub fn len(&self) -> usize {
        match self {
            Lookup::Night(map) => map.len(),
            Lookup::StageIndices(map) => map.len(),
            Lookup::Records(records) => records.len(),
            Lookup::Indices(indices) => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Durable per-year status ledger backed by one JSON document
///
/// The whole document is held in memory and rewritten after every update.
/// A single writer per status directory is assumed; concurrent writers are
/// only protected by the overwrite rule in [`StatusLedger::update_at`].
#[derive(Debug)]
pub struct StatusLedger {
    path: PathBuf,
    year: i32,
    status: Document,
    quarantined: Option<PathBuf>,
}

impl StatusLedger {
    /// Path of the document for `year` inside `directory`
    pub fn document_path(directory: &Path, year: i32) -> PathBuf {
        directory.join(format!("{FILE_PREFIX}_{year}.json"))
    }

    /// Open (or start) the ledger for `year` in `directory`
    ///
    /// A document that cannot be parsed is moved aside with a `.bad` suffix
    /// and replaced by an empty one; corruption is never fatal.
    pub fn open<P: AsRef<Path>>(directory: P, year: i32) -> Result<Self> {
        let directory = directory.as_ref();
        if !directory.is_dir() {
            debug!("Creating status directory: {}", directory.display());
            fs::create_dir_all(directory)?;
        }

        let path = Self::document_path(directory, year);
        info!("Opening status ledger at: {}", path.display());

        let mut ledger = Self {
            path,
            year,
            status: Document::new(),
            quarantined: None,
        };

        match fs::read_to_string(&ledger.path) {
            Ok(text) => match serde_json::from_str::<Document>(&text) {
                Ok(status) => ledger.status = status,
                Err(e) => ledger.quarantine(&e.to_string())?,
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No status document yet at {}", ledger.path.display());
            }
            Err(e) => return Err(e.into()),
        }

        Ok(ledger)
    }

    fn quarantine(&mut self, reason: &str) -> Result<()> {
        let bad = with_suffix(&self.path, ".bad");
        error!(
            reason,
            "Malformed JSON file detected: {}; saving original file as {}.",
            self.path.display(),
            bad.display()
        );
        fs::rename(&self.path, &bad)?;
        self.quarantined = Some(bad);
        info!("Writing empty document to {}.", self.path.display());
        self.status = Document::new();
        self.write_document()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// Location of a document quarantined while opening, reported once
    pub fn take_quarantined(&mut self) -> Option<PathBuf> {
        self.quarantined.take()
    }

    /// Nights present in the ledger, in chronological order
    pub fn nights(&self) -> impl Iterator<Item = &Night> {
        self.status.keys()
    }

    /// Record a stage outcome stamped with the current time
    pub fn update(
        &mut self,
        night: &Night,
        target: Target,
        stage: Stage,
        failure: bool,
        marker: Option<Marker>,
    ) -> Result<usize> {
        let now = chrono::Utc::now().timestamp_millis();
        self.update_at(night, target, stage, failure, marker, now)
    }

    /// Record a stage outcome with an explicit timestamp (milliseconds)
    ///
    /// Returns the number of records written. For a single exposure the most
    /// recent record of the same stage and marker is overwritten only when
    /// the new timestamp is not older and the success flag differs; an
    /// identical repeat writes nothing and returns 0.
    pub fn update_at(
        &mut self,
        night: &Night,
        target: Target,
        stage: Stage,
        failure: bool,
        marker: Option<Marker>,
        timestamp_ms: i64,
    ) -> Result<usize> {
        let success = !failure;
        let row = StageRecord::new(stage, success, marker, timestamp_ms);

        let written = match target {
            Target::All => match self.status.get_mut(night) {
                Some(exposures) => {
                    for records in exposures.values_mut() {
                        records.push(row.clone());
                    }
                    exposures.len()
                }
                None => 0,
            },
            Target::Exposure(exposure) => {
                let records = self
                    .status
                    .entry(night.clone())
                    .or_default()
                    .entry(exposure)
                    .or_default();
                match records.iter().rposition(|r| r.same_slot(stage, marker)) {
                    None => {
                        records.push(row);
                        1
                    }
                    Some(i) => {
                        let old = &records[i];
                        if timestamp_ms >= old.timestamp_ms && success != old.success {
                            records[i] = row;
                            1
                        } else {
                            0
                        }
                    }
                }
            }
        };

        debug!(%night, ?target, %stage, success, written, "Status updated");
        self.persist()?;
        Ok(written)
    }

    /// Query the ledger; see [`Lookup`] for the result shapes
    pub fn find(
        &self,
        night: &Night,
        exposure: Option<Exposure>,
        stage: Option<Stage>,
    ) -> Result<Lookup<'_>> {
        let exposures = self
            .status
            .get(night)
            .ok_or_else(|| LedgerError::UnknownNight(night.clone()))?;

        let indices = |records: &[StageRecord], stage: Stage| -> Vec<usize> {
            records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.stage == stage)
                .map(|(i, _)| i)
                .collect()
        };

        Ok(match (exposure, stage) {
            (None, None) => Lookup::Night(exposures),
            (None, Some(stage)) => Lookup::StageIndices(
                exposures
                    .iter()
                    .map(|(e, records)| (*e, indices(records, stage)))
                    .collect(),
            ),
            (Some(e), None) => Lookup::Records(exposures.get(&e).map(Vec::as_slice).unwrap_or(&[])),
            (Some(e), Some(stage)) => Lookup::Indices(
                exposures
                    .get(&e)
                    .map(|records| indices(records, stage))
                    .unwrap_or_default(),
            ),
        })
    }

    /// The authoritative current record of `stage` for one exposure
    pub fn current(&self, night: &Night, exposure: Exposure, stage: Stage) -> Option<&StageRecord> {
        self.status
            .get(night)?
            .get(&exposure)?
            .iter()
            .rev()
            .find(|r| r.stage == stage)
    }

    /// Copy the current document to `.bak`, then atomically rewrite it
    fn persist(&self) -> Result<()> {
        let backup = with_suffix(&self.path, ".bak");
        debug!("Copying {} to {}", self.path.display(), backup.display());
        match fs::copy(&self.path, &backup) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Nothing to back up at {}", self.path.display());
            }
            Err(e) => return Err(e.into()),
        }
        self.write_document()
    }

    fn write_document(&self) -> Result<()> {
        let directory = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mode = match fs::metadata(&self.path) {
            Ok(metadata) => metadata.permissions().mode() & 0o7777,
            Err(e) if e.kind() == ErrorKind::NotFound => DOCUMENT_MODE,
            Err(e) => return Err(e.into()),
        };
        let mut tmp = NamedTempFile::new_in(directory)?;
        serde_json::to_writer(&mut tmp, &self.status)?;
        tmp.flush()?;
        // Temporary files are created 0600
        tmp.as_file().set_permissions(fs::Permissions::from_mode(mode))?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
