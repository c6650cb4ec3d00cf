use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{MirrorError, Result};

/// Single-instance guard; the file is removed when the guard drops
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claim `path`, failing if it names a live process
    ///
    /// A stale file left by a crashed run is replaced.
    pub fn acquire<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        match fs::read_to_string(&path) {
            Ok(text) => {
                if let Ok(pid) = text.trim().parse::<u32>() {
                    if process_alive(pid) {
                        return Err(MirrorError::AlreadyRunning(pid));
                    }
                }
                debug!("Removing stale pid file {}", path.display());
                fs::remove_file(&path)?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, std::process::id().to_string())?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}
