/// Durable status ledger for per-exposure transfer progress
///
/// The ledger records, for every night and exposure, an append-only list of
/// stage outcomes (`rsync`, `checksum`, `backup`, `pipeline`). It is the
/// only state shared between daemon restarts and between the daemon and
/// independent tooling that reports checksum or ingestion results.
///
/// ## Storage
///
/// One compact JSON document per calendar year
/// (`transfer_status_<YEAR>.json`), read by a static dashboard. Before every
/// rewrite the previous generation is copied to `<file>.bak`; a document
/// that fails to parse is moved to `<file>.bad` and the ledger restarts
/// empty.
///
/// ## Usage
///
/// ```rust,ignore
/// use nightrelay::ledger::{StatusLedger, Stage, Target};
///
/// let mut ledger = StatusLedger::open("status", 2023)?;
/// ledger.update(&night, Target::Exposure(exposure), Stage::Rsync, false, None)?;
/// let current = ledger.current(&night, exposure, Stage::Rsync);
/// ```

pub mod error;
pub mod record;
pub mod shelf;
pub mod store;

pub use error::{LedgerError, Result};
pub use record::{Marker, Stage, StageRecord, Target};
pub use shelf::StatusShelf;
pub use store::{ExposureMap, Lookup, StatusLedger};
