// Configuration loading and parsing (ballot.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use ballot_core::ParticipantId;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Identity allowed to run phase transitions and register voters.
    pub authority: ParticipantId,
    pub ws_port: u16,
    /// Capacity of the command channel feeding the app loop.
    pub channel_capacity: usize,
    pub db_path: String,
}

// ---------------------------------------------------------------------------
// ballot.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire ballot.toml file.
#[derive(Debug, Clone, Deserialize)]
struct BallotFile {
    ballot: BallotSection,
    server: ServerSection,
    database: DatabaseSection,
}

#[derive(Debug, Clone, Deserialize)]
struct BallotSection {
    authority: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerSection {
    port: u16,
    #[serde(default = "default_channel_capacity")]
    channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

fn default_channel_capacity() -> usize {
    64
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/ballot.toml` relative to the
/// given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = config_path(base_dir);
    let text = read_file(&path)?;
    let file: BallotFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let config = Config {
        authority: ParticipantId::new(file.ballot.authority.trim()),
        ws_port: file.server.port,
        channel_capacity: file.server.channel_capacity,
        db_path: file.database.path,
    };

    validate(&config)?;

    Ok(config)
}

/// Seed `config/ballot.toml` from `defaults/ballot.toml` when it is missing.
///
/// Returns the path written, or `None` when a config file already exists.
/// An existing file is never overwritten.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = config_path(base_dir);
    if target.is_file() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join(CONFIG_FILE_NAME);
    let defaults = std::fs::read(&source).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!(
            "{} is missing and {} could not be read: {e}",
            target.display(),
            source.display()
        ),
    })?;

    if let Some(config_dir) = target.parent() {
        std::fs::create_dir_all(config_dir).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to create {}: {e}", config_dir.display()),
        })?;
    }

    // create_new: a config written concurrently by another process wins.
    let mut dest = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
    {
        Ok(dest) => dest,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
        Err(e) => {
            return Err(ConfigError::DefaultsCopyError {
                message: format!("failed to create {}: {e}", target.display()),
            })
        }
    };
    std::io::Write::write_all(&mut dest, &defaults).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to write {}: {e}", target.display()),
    })?;

    Ok(Some(target))
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Seeds the config from `defaults/` first if it is missing.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_file(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const CONFIG_FILE_NAME: &str = "ballot.toml";

fn config_path(base_dir: &Path) -> PathBuf {
    base_dir.join("config").join(CONFIG_FILE_NAME)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.authority.as_str().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "ballot.authority".into(),
            message: "must not be empty".into(),
        });
    }

    if config.ws_port == 0 {
        return Err(ConfigError::ValidationError {
            field: "server.port".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.channel_capacity == 0 {
        return Err(ConfigError::ValidationError {
            field: "server.channel_capacity".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
