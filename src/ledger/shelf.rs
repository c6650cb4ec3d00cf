use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};

use super::error::Result;
use super::record::{Marker, Stage, Target};
use super::store::StatusLedger;
use crate::night::Night;

/// Year-partitioned ledgers for one status directory
///
/// Each year's document is loaded the first time a night from that year is
/// touched and kept open for the life of the process.
#[derive(Debug)]
pub struct StatusShelf {
    directory: PathBuf,
    ledgers: HashMap<i32, StatusLedger>,
}

impl StatusShelf {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
            ledgers: HashMap::new(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The ledger holding `night`, opening it on first use
    pub fn ledger_for(&mut self, night: &Night) -> Result<&mut StatusLedger> {
        let year = night.year();
        let ledger = match self.ledgers.entry(year) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(StatusLedger::open(&self.directory, year)?),
        };
        Ok(ledger)
    }

    pub fn update(
        &mut self,
        night: &Night,
        target: Target,
        stage: Stage,
        failure: bool,
        marker: Option<Marker>,
    ) -> Result<usize> {
        self.ledger_for(night)?
            .update(night, target, stage, failure, marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::night::Exposure;
    use tempfile::TempDir;

    #[test]
    fn test_routes_by_year() {
        let temp_dir = TempDir::new().unwrap();
        let mut shelf = StatusShelf::new(temp_dir.path());

        let late: Night = "20231231".parse().unwrap();
        let early: Night = "20240101".parse().unwrap();
        shelf
            .update(&late, Exposure::new(1).into(), Stage::Rsync, false, None)
            .unwrap();
        shelf
            .update(&early, Exposure::new(2).into(), Stage::Rsync, false, None)
            .unwrap();

        assert!(StatusLedger::document_path(temp_dir.path(), 2023).exists());
        assert!(StatusLedger::document_path(temp_dir.path(), 2024).exists());
        assert!(shelf.ledger_for(&late).unwrap().find(&early, None, None).is_err());
    }
}
