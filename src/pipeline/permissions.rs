//! Permission locking for exposure trees
//!
//! Transferred data is kept read-only: directories setgid and group
//! readable, files readable by user and group only. Every operation walks
//! the whole tree, tolerates entries vanishing mid-walk and is a no-op on a
//! missing root.

use std::fs::{self, Permissions};
use std::io::{self, ErrorKind};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::tools::{CommandLine, CommandOutput, ToolError};

pub const DIR_MODE: u32 = 0o2750;
pub const FILE_MODE: u32 = 0o0440;
const USER_WRITE: u32 = 0o0200;

/// Target modes for directories and files; `None` leaves that kind alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub directories: Option<u32>,
    pub files: Option<u32>,
}

impl Access {
    /// Read-only tree
    pub const LOCKED: Access = Access {
        directories: Some(DIR_MODE),
        files: Some(FILE_MODE),
    };

    /// User-writable tree, used around a resync
    pub const UNLOCKED: Access = Access {
        directories: Some(DIR_MODE | USER_WRITE),
        files: Some(FILE_MODE | USER_WRITE),
    };

    /// Directories lose user write before archiving; files stay as they are
    pub const ARCHIVED: Access = Access {
        directories: Some(DIR_MODE & !USER_WRITE),
        files: None,
    };
}

/// Apply `access` to `root` and everything below it; returns entries changed
pub fn apply(root: &Path, access: Access) -> io::Result<usize> {
    if !root.exists() {
        debug!(root = %root.display(), "Nothing to change");
        return Ok(0);
    }

    let mut changed = 0;
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.io_error().is_some_and(|io| io.kind() == ErrorKind::NotFound) => continue,
            Err(e) => return Err(e.into()),
        };
        let mode = if entry.file_type().is_dir() {
            access.directories
        } else if entry.file_type().is_file() {
            access.files
        } else {
            None
        };
        let Some(mode) = mode else {
            continue;
        };

        match fs::set_permissions(entry.path(), Permissions::from_mode(mode)) {
            Ok(()) => changed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    debug!(root = %root.display(), changed, "Permissions applied");
    Ok(changed)
}

pub fn lock(root: &Path) -> io::Result<usize> {
    apply(root, Access::LOCKED)
}

pub fn unlock(root: &Path) -> io::Result<usize> {
    apply(root, Access::UNLOCKED)
}

pub fn strip_write(root: &Path) -> io::Result<usize> {
    apply(root, Access::ARCHIVED)
}

/// Run the site permission-fixup tool on `directory`
pub async fn fixup(tool: &str, directory: &Path) -> Result<CommandOutput, ToolError> {
    CommandLine::new(tool)
        .arg(directory.to_string_lossy())
        .output()
        .await
}
