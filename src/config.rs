//! Two-tier configuration
//!
//! Flags live in two places: the per-user [`GlobalConfig`] file and the
//! database manifest. [`Flags`] answers lookups by checking the database
//! value first, then the global value, then a caller-supplied default.
//!
//! The global file also records which database `quicksave` opens by default.
//! Its location is `$QUICKSAVE_CONFIG` when set, otherwise `config.json` in
//! the platform configuration directory.

use crate::error::{QuicksaveError, Result};
use crate::utils;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Infer the file-key from the absolute path on save/revert/status
pub const INFERENCE_PATH: &str = "inference.path";
/// Infer the file-key from the basename on save/revert/status
pub const INFERENCE_NAME: &str = "inference.name";
/// Skip recording path/basename aliases unless the matching inference is on
pub const INFERENCE_NORECORD: &str = "inference.norecord";
/// Stash the current content before reverting
pub const REVERT_STASH: &str = "revert.stash";
/// Move deleted keys to `~trash` instead of destroying them
pub const DELETE_TRASH: &str = "delete.trash";

/// Environment variable overriding the global config location
pub const CONFIG_ENV: &str = "QUICKSAVE_CONFIG";

/// Parse a boolean flag value
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Per-user configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Database opened when none is given explicitly
    pub database: Option<PathBuf>,
    /// Global flag values
    #[serde(default)]
    pub flags: BTreeMap<String, String>,
    /// Where this config is saved; in-memory only when `None`
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl GlobalConfig {
    /// Default location of the global config file
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        let dirs = ProjectDirs::from("", "", "quicksave").ok_or_else(|| {
            QuicksaveError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "unable to determine platform config directory",
            ))
        })?;
        Ok(dirs.config_dir().join("config.json"))
    }

    /// Load the config at `path`; a missing file yields an empty config
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str::<GlobalConfig>(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No global config at {:?}, using defaults", path);
                GlobalConfig::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Load the config from [`GlobalConfig::default_path`]
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_path()?)
    }

    /// Write the config back to where it was loaded from
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        utils::atomic_write(path, json.as_bytes())?;
        debug!("Saved global config to {:?}", path);
        Ok(())
    }

    /// Where this config is saved
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Flag lookup across both tiers
#[derive(Debug, Clone, Copy)]
pub struct Flags<'a> {
    database: &'a BTreeMap<String, String>,
    global: &'a BTreeMap<String, String>,
}

impl<'a> Flags<'a> {
    /// Combine database and global flag maps
    pub fn new(database: &'a BTreeMap<String, String>, global: &'a BTreeMap<String, String>) -> Self {
        Self { database, global }
    }

    /// Raw value: database, then global, then `default`
    pub fn check(&self, name: &str, default: &str) -> String {
        self.database
            .get(name)
            .or_else(|| self.global.get(name))
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Boolean value; unparsable values fall back to `default`
    pub fn enabled(&self, name: &str, default: bool) -> bool {
        let Some(raw) = self.database.get(name).or_else(|| self.global.get(name)) else {
            return default;
        };
        parse_flag(raw).unwrap_or_else(|| {
            warn!("Ignoring unrecognized value {:?} for flag {}", raw, name);
            default
        })
    }
}
