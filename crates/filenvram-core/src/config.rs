//! Store configuration.
//!
//! # File Format
//!
//! ```json
//! {
//!   "filePath": "/Extra/nvram.plist",
//!   "readOnly": false,
//!   "enableLogging": true,
//!   "deviceSerial": "C02ABCDEFGH1"
//! }
//! ```
//!
//! Every field is optional. A missing config file yields the defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default location of the backing file.
pub const DEFAULT_FILE_PATH: &str = "/Extra/nvram.plist";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NvramConfig {
    /// Backing file. `None` disables persistence until a path is set
    /// through the control namespace.
    pub file_path: Option<PathBuf>,

    /// Never write the backing file.
    pub read_only: bool,

    /// Initial state of the verbose logging flag.
    pub enable_logging: bool,

    /// Platform serial number used to derive the MLB identifier.
    pub device_serial: Option<String>,
}

impl Default for NvramConfig {
    fn default() -> Self {
        Self {
            file_path: Some(PathBuf::from(DEFAULT_FILE_PATH)),
            read_only: false,
            enable_logging: false,
            device_serial: None,
        }
    }
}

/// Load configuration from a JSON file.
///
/// Returns the defaults if the file doesn't exist; errors only if it exists
/// but can't be read or parsed.
pub fn load_config(path: &Path) -> Result<NvramConfig, ConfigError> {
    if !path.exists() {
        return Ok(NvramConfig::default());
    }

    let contents = fs::read_to_string(path)?;
    let config: NvramConfig = serde_json::from_str(&contents)?;

    Ok(config)
}
