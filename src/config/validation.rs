use super::models::{Config, DirectoryConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} must be an hour between 0 and 23, got {value}")]
    InvalidHour { field: String, value: u32 },

    #[error("{field} must be a positive interval")]
    ZeroInterval { field: String },

    #[error("No scratch directory candidates configured")]
    NoScratchCandidates,

    #[error("Directory '{directory}' has an empty '{field}'")]
    EmptyField { directory: String, field: String },

    #[error("Directory '{directory}' template '{template}' does not contain {{exposure}}")]
    MissingExposurePlaceholder { directory: String, template: String },

    #[error("Directory '{directory}' uses the same path for staging and destination")]
    StagingIsDestination { directory: String },

    #[error("No directories configured (at least one [directories.<name>] section is required)")]
    NoDirectoriesConfigured,

    #[error("Mirror process count must be positive")]
    InvalidMirrorProcesses,

    #[error("Mirror priority directory '{0}' is not in the static or dynamic lists")]
    UnknownPriorityDirectory(String),
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_daemon(config)?;
    for (name, directory) in &config.directories {
        validate_directory(name, directory)?;
    }
    validate_mirror(config)?;
    validate_nightlog(config)?;
    Ok(())
}

/// The transfer daemon needs at least one monitored tree
pub fn require_directories(config: &Config) -> Result<(), ValidationError> {
    if config.directories.is_empty() {
        return Err(ValidationError::NoDirectoriesConfigured);
    }
    Ok(())
}

fn validate_daemon(config: &Config) -> Result<(), ValidationError> {
    let daemon = &config.daemon;
    for (field, value) in [
        ("daemon.catchup_hour", daemon.catchup_hour),
        ("daemon.backup_hour", daemon.backup_hour),
    ] {
        if value > 23 {
            return Err(ValidationError::InvalidHour {
                field: field.to_string(),
                value,
            });
        }
    }

    if daemon.sleep.is_zero() {
        return Err(ValidationError::ZeroInterval {
            field: "daemon.sleep".to_string(),
        });
    }

    if daemon.scratch.is_empty() {
        return Err(ValidationError::NoScratchCandidates);
    }

    Ok(())
}

fn validate_directory(name: &str, directory: &DirectoryConfig) -> Result<(), ValidationError> {
    let empty = |field: &str| ValidationError::EmptyField {
        directory: name.to_string(),
        field: field.to_string(),
    };

    if directory.source.trim().is_empty() {
        return Err(empty("source"));
    }
    if directory.staging.as_os_str().is_empty() {
        return Err(empty("staging"));
    }
    if directory.destination.as_os_str().is_empty() {
        return Err(empty("destination"));
    }
    if directory.archive.trim().is_empty() {
        return Err(empty("archive"));
    }
    if directory.staging == directory.destination {
        return Err(ValidationError::StagingIsDestination {
            directory: name.to_string(),
        });
    }

    // Without the exposure id every exposure would share one file name
    let templates = std::iter::once(&directory.checksum_file).chain(&directory.expected_files);
    for template in templates {
        if !template.contains("{exposure}") {
            return Err(ValidationError::MissingExposurePlaceholder {
                directory: name.to_string(),
                template: template.clone(),
            });
        }
    }

    Ok(())
}

fn validate_mirror(config: &Config) -> Result<(), ValidationError> {
    let mirror = &config.mirror;
    if mirror.processes == 0 {
        return Err(ValidationError::InvalidMirrorProcesses);
    }
    if mirror.poll_interval.is_zero() {
        return Err(ValidationError::ZeroInterval {
            field: "mirror.poll_interval".to_string(),
        });
    }
    for dir in &mirror.priority {
        if !mirror.dynamic.contains(dir) && !mirror.static_dirs.contains(dir) {
            return Err(ValidationError::UnknownPriorityDirectory(dir.clone()));
        }
    }
    Ok(())
}

fn validate_nightlog(config: &Config) -> Result<(), ValidationError> {
    if config.nightlog.sleep.is_zero() {
        return Err(ValidationError::ZeroInterval {
            field: "nightlog.sleep".to_string(),
        });
    }
    Ok(())
}
