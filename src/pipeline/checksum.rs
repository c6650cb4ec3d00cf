//! SHA-256 manifest verification
//!
//! A manifest uses the `sha256sum` text format: `<hex digest>  <file name>`
//! per line. Every other file in the exposure directory must be listed and
//! match; listed files must be present.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, error};
use walkdir::WalkDir;

use crate::error::{ChecksumIssue, TransferError};

/// Outcome of verifying one exposure directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumReport {
    pub manifest_missing: bool,
    /// Present on disk, absent from the manifest
    pub unlisted: Vec<String>,
    /// Listed in the manifest, absent on disk
    pub missing: Vec<String>,
    pub mismatched: Vec<String>,
    pub verified: usize,
}

impl ChecksumReport {
    /// Total number of problems across every class
    pub fn errors(&self) -> usize {
        usize::from(self.manifest_missing)
            + self.unlisted.len()
            + self.missing.len()
            + self.mismatched.len()
    }

    pub fn is_ok(&self) -> bool {
        self.errors() == 0
    }

    pub fn issues(&self) -> Vec<ChecksumIssue> {
        let mut issues = Vec::with_capacity(self.errors());
        if self.manifest_missing {
            issues.push(ChecksumIssue::MissingManifest);
        }
        issues.extend(self.missing.iter().cloned().map(ChecksumIssue::MissingFile));
        issues.extend(self.unlisted.iter().cloned().map(ChecksumIssue::UnlistedFile));
        issues.extend(self.mismatched.iter().cloned().map(ChecksumIssue::DigestMismatch));
        issues
    }

    /// One line per issue, for alert messages
    pub fn summary(&self) -> String {
        self.issues()
            .into_iter()
            .map(|issue| TransferError::from(issue).to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Parse `sha256sum` output into file name → digest
pub fn parse_manifest(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (digest, rest) = line.trim_end_matches('\r').split_once(' ')?;
            // "<digest>  <name>" in text mode, "<digest> *<name>" in binary mode
            let name = rest
                .strip_prefix(' ')
                .or_else(|| rest.strip_prefix('*'))
                .unwrap_or(rest);
            if digest.is_empty() || name.is_empty() {
                return None;
            }
            Some((name.to_string(), digest.to_ascii_lowercase()))
        })
        .collect()
}

pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify `directory` against the manifest named `manifest_name` inside it
///
/// A directory that does not exist yields an empty, successful report; this
/// only happens when a shadow run never materialized the staging tree.
pub fn verify(directory: &Path, manifest_name: &str) -> io::Result<ChecksumReport> {
    let mut report = ChecksumReport::default();
    if !directory.is_dir() {
        debug!(directory = %directory.display(), "Nothing to verify");
        return Ok(report);
    }

    let manifest_path = directory.join(manifest_name);
    let mut manifest = match fs::read_to_string(&manifest_path) {
        Ok(text) => parse_manifest(&text),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            report.manifest_missing = true;
            return Ok(report);
        }
        Err(e) => return Err(e),
    };

    let entries = WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in entries {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == manifest_name {
            continue;
        }

        let actual = sha256_file(entry.path())?;
        match manifest.remove(&name) {
            None => {
                error!("{} does not appear in {}!", name, manifest_path.display());
                report.unlisted.push(name);
            }
            Some(expected) if expected == actual => {
                debug!("{} is valid.", name);
                report.verified += 1;
            }
            Some(_) => {
                error!("Checksum mismatch for {} in {}!", name, manifest_path.display());
                report.mismatched.push(name);
            }
        }
    }

    if !manifest.is_empty() {
        error!(
            "{} lists {} file(s) that are not present!",
            manifest_path.display(),
            manifest.len()
        );
        report.missing.extend(manifest.into_keys());
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn digest_of(content: &[u8]) -> String {
        format!("{:x}", Sha256::digest(content))
    }

    fn write_exposure(dir: &Path, files: &[(&str, &[u8])], listed: &[(&str, &[u8])]) {
        for (name, content) in files {
            fs::write(dir.join(name), content).unwrap();
        }
        let manifest: String = listed
            .iter()
            .map(|(name, content)| format!("{}  {}\n", digest_of(content), name))
            .collect();
        fs::write(dir.join("checksum-00000127.sha256sum"), manifest).unwrap();
    }

    #[test]
    fn test_parse_manifest() {
        let m = parse_manifest("ABC123  desi-00000127.fits.fz\ndef456 *guide-00000127.fits.fz\n\n");
        assert_eq!(m.len(), 2);
        assert_eq!(m["desi-00000127.fits.fz"], "abc123");
        assert_eq!(m["guide-00000127.fits.fz"], "def456");
    }

    #[test]
    fn test_manifest_names_keep_spaces() {
        let m = parse_manifest("abc123  night log 20231031.txt\ndef456 * starts with space\n");
        assert_eq!(m["night log 20231031.txt"], "abc123");
        assert_eq!(m[" starts with space"], "def456");
    }

    #[test]
    fn test_sha256_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty");
        fs::write(&path, b"").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_all_valid() {
        let temp_dir = TempDir::new().unwrap();
        let files: &[(&str, &[u8])] = &[("a.fits", b"a"), ("b.fits", b"b"), ("c.json", b"c")];
        write_exposure(temp_dir.path(), files, files);

        let report = verify(temp_dir.path(), "checksum-00000127.sha256sum").unwrap();
        assert!(report.is_ok());
        assert_eq!(report.verified, 3);
    }

    #[test]
    fn test_error_classes_compose() {
        let temp_dir = TempDir::new().unwrap();
        // one unlisted (d), one missing (x), one mismatch (b)
        write_exposure(
            temp_dir.path(),
            &[("a.fits", b"a"), ("b.fits", b"b"), ("d.fits", b"d")],
            &[("a.fits", b"a"), ("b.fits", b"not b"), ("x.fits", b"x")],
        );

        let report = verify(temp_dir.path(), "checksum-00000127.sha256sum").unwrap();
        assert_eq!(report.unlisted, vec!["d.fits"]);
        assert_eq!(report.missing, vec!["x.fits"]);
        assert_eq!(report.mismatched, vec!["b.fits"]);
        assert_eq!(report.errors(), 3);
        assert_eq!(report.verified, 1);
        assert_eq!(
            report.issues(),
            vec![
                ChecksumIssue::MissingFile("x.fits".to_string()),
                ChecksumIssue::UnlistedFile("d.fits".to_string()),
                ChecksumIssue::DigestMismatch("b.fits".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_manifest_is_failure() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.fits"), b"a").unwrap();

        let report = verify(temp_dir.path(), "checksum-00000127.sha256sum").unwrap();
        assert!(report.manifest_missing);
        assert!(!report.is_ok());
        assert_eq!(report.issues(), vec![ChecksumIssue::MissingManifest]);
    }

    #[test]
    fn test_missing_directory_is_success() {
        let temp_dir = TempDir::new().unwrap();
        let report = verify(&temp_dir.path().join("never"), "checksum-00000127.sha256sum").unwrap();
        assert!(report.is_ok());
        assert_eq!(report.verified, 0);
    }
}
