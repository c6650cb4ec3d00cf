use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "NIGHTRELAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/nightrelay.toml";
const ENV_PREFIX: &str = "NIGHTRELAY";
const ENV_SEPARATOR: &str = "__";
const KILL_FILE_NAME: &str = "stop_nightrelay";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_with_environment(config_path)
}

/// Load from an explicit path, still applying `.env` and environment overrides
pub fn load_with_environment(config_path: PathBuf) -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let mut config = load_from_sources(config_path)?;
    load_environment(&mut config);
    Ok(config)
}

/// Fill settings that conventionally come from the process environment
fn load_environment(config: &mut Config) {
    if config.daemon.kill_file.is_none() {
        if let Ok(home) = env::var("HOME") {
            config.daemon.kill_file = Some(PathBuf::from(home).join(KILL_FILE_NAME));
        }
    }

    // The rsync daemon password never lives in the TOML file
    if config.mirror.password_file.is_none() {
        if let Ok(password_file) = env::var("MIRROR_PASSWORD_FILE") {
            config.mirror.password_file = Some(PathBuf::from(password_file));
        }
    }
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // NIGHTRELAY__DAEMON__CATCHUP_HOUR -> daemon.catchup_hour
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
