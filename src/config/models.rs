use crate::humanize::Interval;
use crate::night::{Exposure, Night, expand_template};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    /// Monitored trees, keyed by section name
    #[serde(default)]
    pub directories: BTreeMap<String, DirectoryConfig>,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub nightlog: NightlogConfig,
}

/// Daemon loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonConfig {
    /// Pause between transfer passes
    #[serde(default = "default_sleep")]
    pub sleep: Interval,
    /// UTC hour after which the catch-up pass runs
    #[serde(default = "default_catchup_hour")]
    pub catchup_hour: u32,
    /// UTC hour after which the archival trigger runs
    #[serde(default = "default_backup_hour")]
    pub backup_hour: u32,
    /// Candidate scratch directories; the first one that exists is used
    #[serde(default = "default_scratch")]
    pub scratch: Vec<PathBuf>,
    /// Optional JSON-lines file receiving critical alerts
    pub alert_log: Option<PathBuf>,
    /// Sentinel file requesting graceful shutdown
    pub kill_file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            sleep: default_sleep(),
            catchup_hour: default_catchup_hour(),
            backup_hour: default_backup_hour(),
            scratch: default_scratch(),
            alert_log: None,
            kill_file: None,
        }
    }
}

fn default_sleep() -> Interval {
    Interval::from_mins(10)
}

fn default_catchup_hour() -> u32 {
    14 // 07:00 MST
}

fn default_backup_hour() -> u32 {
    20 // 12:00 MST plus a margin
}

fn default_scratch() -> Vec<PathBuf> {
    vec![std::env::temp_dir()]
}

impl DaemonConfig {
    /// First scratch candidate that exists on disk
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch
            .iter()
            .map(PathBuf::as_path)
            .find(|candidate| candidate.is_dir())
    }
}

/// Remote acquisition host access
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    #[serde(default = "default_ssh")]
    pub ssh: String,
    #[serde(default = "default_rsync")]
    pub rsync: String,
    /// ssh host alias of the acquisition site
    #[serde(default = "default_host")]
    pub host: String,
    /// Remote file present while checksums are being computed
    #[serde(default = "default_checksum_lock")]
    pub checksum_lock: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ssh: default_ssh(),
            rsync: default_rsync(),
            host: default_host(),
            checksum_lock: default_checksum_lock(),
        }
    }
}

fn default_ssh() -> String {
    "/bin/ssh".to_string()
}

fn default_rsync() -> String {
    "/bin/rsync".to_string()
}

fn default_host() -> String {
    "dts".to_string()
}

fn default_checksum_lock() -> String {
    "/data/dts/exposures/lost+found/checksum-running".to_string()
}

/// Tape archive configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Member listing tool
    #[serde(default = "default_hsi")]
    pub hsi: String,
    /// Member writing tool
    #[serde(default = "default_htar")]
    pub htar: String,
    /// Availability endpoint returning `{"status": "active"}`
    pub status_url: Option<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hsi: default_hsi(),
            htar: default_htar(),
            status_url: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_hsi() -> String {
    "hsi".to_string()
}

fn default_htar() -> String {
    "htar".to_string()
}

/// Downstream processing trigger
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Host to run the trigger on via ssh; local when unset
    pub host: Option<String>,
    #[serde(default = "default_pipeline_command")]
    pub command: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: None,
            command: default_pipeline_command(),
        }
    }
}

fn default_pipeline_command() -> String {
    "desi_night".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PermissionsConfig {
    /// Tool granting broader group/world access to a directory
    pub fixup_tool: Option<String>,
}

/// One monitored tree
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectoryConfig {
    /// Remote source root on the acquisition host
    pub source: String,
    /// Local staging root
    pub staging: PathBuf,
    /// Local destination root
    pub destination: PathBuf,
    /// Tape archive directory
    pub archive: String,
    /// Manifest filename template
    #[serde(default = "default_checksum_file")]
    pub checksum_file: String,
    /// Files that must exist before downstream processing is triggered
    #[serde(default)]
    pub expected_files: Vec<String>,
    /// Status ledger directory; defaults to `<staging>/../status`
    pub status: Option<PathBuf>,
    /// Run the permission-fixup tool on promoted nights
    #[serde(default)]
    pub permission_fixup: bool,
}

fn default_checksum_file() -> String {
    "checksum-{exposure}.sha256sum".to_string()
}

impl DirectoryConfig {
    pub fn status_dir(&self) -> PathBuf {
        match &self.status {
            Some(dir) => dir.clone(),
            None => self
                .staging
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("status"),
        }
    }

    pub fn source_night(&self, night: &Night) -> String {
        format!("{}/{}", self.source.trim_end_matches('/'), night)
    }

    pub fn source_exposure(&self, night: &Night, exposure: &Exposure) -> String {
        format!("{}/{}", self.source_night(night), exposure)
    }

    pub fn staging_night(&self, night: &Night) -> PathBuf {
        self.staging.join(night.as_str())
    }

    pub fn staging_exposure(&self, night: &Night, exposure: &Exposure) -> PathBuf {
        self.staging_night(night).join(exposure.to_string())
    }

    pub fn destination_night(&self, night: &Night) -> PathBuf {
        self.destination.join(night.as_str())
    }

    pub fn destination_exposure(&self, night: &Night, exposure: &Exposure) -> PathBuf {
        self.destination_night(night).join(exposure.to_string())
    }

    pub fn checksum_file_name(&self, night: &Night, exposure: &Exposure) -> String {
        expand_template(&self.checksum_file, night, exposure)
    }

    pub fn expected_file_names(&self, night: &Night, exposure: &Exposure) -> Vec<String> {
        self.expected_files
            .iter()
            .map(|template| expand_template(template, night, exposure))
            .collect()
    }

    /// Flattened archive path used in cache and member names
    pub fn archive_stem(&self) -> String {
        self.archive.replace('/', "_")
    }

    /// Archive member holding one night's data
    pub fn archive_member(&self, night: &Night) -> String {
        format!("{}_{}.tar", self.archive_stem(), night)
    }

    /// Scratch file caching the archive member listing
    pub fn archive_listing_name(&self) -> String {
        format!("{}.txt", self.archive_stem())
    }

    /// Flattened destination path used in catch-up marker names
    pub fn destination_stem(&self) -> String {
        self.destination.to_string_lossy().replace('/', "_")
    }
}

/// Bulk mirror configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MirrorConfig {
    /// rsync source root (e.g. `rsync://host/module`)
    #[serde(default)]
    pub source: String,
    pub destination: Option<PathBuf>,
    #[serde(default = "default_mirror_rsync")]
    pub rsync: String,
    /// Maximum concurrent rsync processes
    #[serde(default = "default_processes")]
    pub processes: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Interval,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    pub password_file: Option<PathBuf>,
    /// Niceness applied to non-priority directories
    #[serde(default = "default_niceness")]
    pub niceness: i32,
    /// Directories run at normal scheduling priority
    #[serde(default)]
    pub priority: Vec<String>,
    /// Directories only mirrored with `--static`
    #[serde(default, rename = "static")]
    pub static_dirs: Vec<String>,
    /// Directories mirrored on every run
    #[serde(default)]
    pub dynamic: Vec<String>,
    /// Extra rsync arguments per directory
    #[serde(default)]
    pub extra_args: BTreeMap<String, Vec<String>>,
    /// Endpoint answering 200 once the upstream daily transfer is done
    pub status_url: Option<String>,
    /// Pause between upstream status checks
    #[serde(default = "default_mirror_wait")]
    pub wait: Interval,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            source: String::new(),
            destination: None,
            rsync: default_mirror_rsync(),
            processes: default_processes(),
            poll_interval: default_poll_interval(),
            log_dir: default_log_dir(),
            password_file: None,
            niceness: default_niceness(),
            priority: Vec::new(),
            static_dirs: Vec::new(),
            dynamic: Vec::new(),
            extra_args: BTreeMap::new(),
            status_url: None,
            wait: default_mirror_wait(),
        }
    }
}

fn default_mirror_rsync() -> String {
    "/usr/bin/rsync".to_string()
}

fn default_processes() -> usize {
    8
}

fn default_poll_interval() -> Interval {
    Interval::from_secs(5)
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_niceness() -> i32 {
    19
}

fn default_mirror_wait() -> Interval {
    Interval::from_mins(15)
}

/// Two-way nightlog synchronization
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NightlogConfig {
    /// Nightlog root on the acquisition host
    #[serde(default = "default_nightlog_remote")]
    pub remote: String,
    /// Local nightlog root
    #[serde(default = "default_nightlog_local")]
    pub local: PathBuf,
    #[serde(default = "default_nightlog_sleep")]
    pub sleep: Interval,
    /// Accumulated errors tolerated before the loop gives up
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,
    #[serde(default = "default_true")]
    pub permission_fixup: bool,
}

impl Default for NightlogConfig {
    fn default() -> Self {
        Self {
            remote: default_nightlog_remote(),
            local: default_nightlog_local(),
            sleep: default_nightlog_sleep(),
            max_errors: default_max_errors(),
            permission_fixup: true,
        }
    }
}

fn default_nightlog_remote() -> String {
    "/software/www2/html/nightlogs".to_string()
}

fn default_nightlog_local() -> PathBuf {
    PathBuf::from("/global/cfs/cdirs/desi/survey/ops/nightlog")
}

fn default_nightlog_sleep() -> Interval {
    Interval::from_mins(5)
}

fn default_max_errors() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectro() -> DirectoryConfig {
        DirectoryConfig {
            source: "/data/dts/exposures/raw/".to_string(),
            staging: PathBuf::from("/desi/spectro/staging/raw"),
            destination: PathBuf::from("/desi/spectro/data"),
            archive: "desi/spectro/data".to_string(),
            checksum_file: default_checksum_file(),
            expected_files: vec!["desi-{exposure}.fits.fz".to_string()],
            status: None,
            permission_fixup: false,
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.daemon.sleep, Interval::from_mins(10));
        assert_eq!(config.daemon.catchup_hour, 14);
        assert_eq!(config.daemon.backup_hour, 20);
        assert!(config.archive.enabled);
        assert_eq!(config.mirror.processes, 8);
        assert_eq!(config.nightlog.sleep, Interval::from_mins(5));
        assert_eq!(config.nightlog.max_errors, 10);
        assert!(config.directories.is_empty());
    }

    #[test]
    fn test_directory_paths() {
        let d = spectro();
        let night: Night = "20231031".parse().unwrap();
        let exposure = Exposure::new(127);

        assert_eq!(d.source_exposure(&night, &exposure), "/data/dts/exposures/raw/20231031/00000127");
        assert_eq!(
            d.staging_exposure(&night, &exposure),
            PathBuf::from("/desi/spectro/staging/raw/20231031/00000127")
        );
        assert_eq!(
            d.destination_night(&night),
            PathBuf::from("/desi/spectro/data/20231031")
        );
        assert_eq!(d.status_dir(), PathBuf::from("/desi/spectro/staging/status"));
        assert_eq!(d.checksum_file_name(&night, &exposure), "checksum-00000127.sha256sum");
        assert_eq!(d.expected_file_names(&night, &exposure), vec!["desi-00000127.fits.fz"]);
    }

    #[test]
    fn test_archive_names() {
        let d = spectro();
        let night: Night = "20190703".parse().unwrap();
        assert_eq!(d.archive_member(&night), "desi_spectro_data_20190703.tar");
        assert_eq!(d.archive_listing_name(), "desi_spectro_data.txt");
        assert_eq!(d.destination_stem(), "_desi_spectro_data");
    }
}
