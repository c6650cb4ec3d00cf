//! Adapters around the external tools the daemon drives
//!
//! Transfers, listings and tape writes are all delegated to `ssh`, `rsync`,
//! `hsi` and `htar`. The [`Remote`] and [`Archiver`] traits are the seams
//! used by the pipeline and scheduler so tests can substitute local fakes.

pub mod archive;
pub mod command;
pub mod remote;
pub mod rsync;

pub use archive::{Archiver, HpssArchiver};
pub use command::{CommandLine, CommandOutput, Result, ToolError};
pub use remote::{PipelinePhase, Remote, ShellRemote};
pub use rsync::{ChangeSet, Direction, SyncOutcome, SyncRequest};
