//! Control channel.
//!
//! Some keys are commands rather than data:
//!
//! - `IONVRAM-DELETE-PROPERTY` = "<key>" removes `<key>`.
//! - `IONVRAM-SYNCNOW-PROPERTY` = "<anything>" asks for a persistence pass,
//!   subject to the sync eligibility policy. Always reports success.
//! - `IONVRAM-FORCESYNCNOW-PROPERTY` = "<anything>" asks for a pass that
//!   skips the redundant-write suppression.
//! - Any key in the [`CONTROL_NAMESPACE`] reconfigures the store:
//!   `NVRAMFile` (backing file path), `GenerateMLB` / `GenerateROM`
//!   (synthesize platform identifiers), `EnableLogging` (verbose logs).
//!   Unknown local keys are accepted and ignored.
//!
//! None of these keys is ever stored or persisted.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::NvramError;
use crate::host::Platform;
use crate::logging::LoggingFlag;
use crate::namespace;
use crate::store::ValueStore;
use crate::sync::{SyncEngine, SyncTrigger};
use crate::value::Value;

/// Namespace whose keys configure the store.
pub const CONTROL_NAMESPACE: &str = "D8F0CCF5-580E-4334-87B6-9FBBB831271D";

pub const DELETE_PROPERTY_KEY: &str = "IONVRAM-DELETE-PROPERTY";
pub const SYNC_NOW_KEY: &str = "IONVRAM-SYNCNOW-PROPERTY";
pub const FORCE_SYNC_NOW_KEY: &str = "IONVRAM-FORCESYNCNOW-PROPERTY";

pub const SET_FILE_PATH: &str = "NVRAMFile";
pub const GENERATE_MLB: &str = "GenerateMLB";
pub const GENERATE_ROM: &str = "GenerateROM";
pub const ENABLE_LOGGING: &str = "EnableLogging";

/// Main logic board serial.
pub const MLB_KEY: &str = "4D1EDE05-38C7-4A6A-9CC6-4BCCA8B38C14:MLB";
/// Platform ROM (primary NIC address).
pub const ROM_KEY: &str = "4D1EDE05-38C7-4A6A-9CC6-4BCCA8B38C14:ROM";

const MLB_SUFFIX_LEN: usize = 5;
const MLB_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ROM_LEN: usize = 6;

/// Where a write to a key goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Data,
    Delete,
    SyncNow,
    ForceSyncNow,
    /// Local key inside the control namespace.
    Control(&'a str),
}

pub fn classify(key: &str) -> Route<'_> {
    match key {
        DELETE_PROPERTY_KEY => Route::Delete,
        SYNC_NOW_KEY => Route::SyncNow,
        FORCE_SYNC_NOW_KEY => Route::ForceSyncNow,
        _ => match namespace::decode(key) {
            (Some(CONTROL_NAMESPACE), local) => Route::Control(local),
            _ => Route::Data,
        },
    }
}

/// Whether `key` is a command key that must never be persisted.
pub fn is_reserved(key: &str) -> bool {
    classify(key) != Route::Data
}

/// Interprets command keys and forwards data keys to the store.
pub struct ControlChannel {
    store: Arc<ValueStore>,
    sync: Arc<SyncEngine>,
    platform: Arc<dyn Platform>,
    logging: Arc<LoggingFlag>,
}

impl ControlChannel {
    pub fn new(
        store: Arc<ValueStore>,
        sync: Arc<SyncEngine>,
        platform: Arc<dyn Platform>,
        logging: Arc<LoggingFlag>,
    ) -> Self {
        Self {
            store,
            sync,
            platform,
            logging,
        }
    }

    /// Handle a client write.
    pub fn write(&self, key: &str, value: Value) -> Result<(), NvramError> {
        if self.logging.enabled() {
            log::info!("setProperty({key}, ({}) {:?}) called", value.kind(), value);
        }

        match classify(key) {
            Route::Data => {
                if value.is_dictionary() {
                    return Err(NvramError::malformed(key, "scalar value"));
                }
                self.store.set(key, value)?;
                self.sync.request(SyncTrigger::Mutation);
            }
            Route::Delete => {
                let target = value
                    .as_str()
                    .ok_or_else(|| NvramError::malformed(key, "string"))?;
                self.remove(target)?;
            }
            route @ (Route::SyncNow | Route::ForceSyncNow) => {
                if value.as_str().is_none() {
                    return Err(NvramError::malformed(key, "string"));
                }
                let trigger = if route == Route::SyncNow {
                    SyncTrigger::SyncNow
                } else {
                    SyncTrigger::ForceSyncNow
                };
                // Best effort: the caller is told it worked either way.
                self.sync.request(trigger);
            }
            Route::Control(local) => {
                self.store.authorize(key)?;
                if self.apply(key, local, &value)? {
                    self.sync.request(SyncTrigger::Mutation);
                }
            }
        }
        Ok(())
    }

    /// Handle a client removal. Command keys hold no data, so removing
    /// one is a successful no-op.
    pub fn remove(&self, key: &str) -> Result<(), NvramError> {
        if self.logging.enabled() {
            log::info!("removeProperty({key}) called");
        }

        match classify(key) {
            Route::Data => {
                self.store.remove(key)?;
                self.sync.request(SyncTrigger::Mutation);
            }
            _ => {
                self.store.authorize(key)?;
                log::debug!("removeProperty({key}) ignored: command key");
            }
        }
        Ok(())
    }

    /// Apply an entry coming from a snapshot (platform tree or backing
    /// file). No privilege check and no persistence request; command keys
    /// are applied, sentinels are dropped.
    pub fn restore(&self, key: &str, value: Value) {
        match classify(key) {
            Route::Data if value.is_dictionary() => {
                log::warn!("Skipping nested dictionary at {key}");
            }
            Route::Data => self.store.insert(key, value),
            Route::Control(local) => {
                if let Err(e) = self.apply(key, local, &value) {
                    log::warn!("Ignoring control entry from snapshot: {e}");
                }
            }
            Route::Delete | Route::SyncNow | Route::ForceSyncNow => {
                log::debug!("Dropping sentinel {key} from snapshot");
            }
        }
    }

    /// Execute a control-namespace command. Returns whether store data
    /// changed as a result.
    fn apply(&self, key: &str, local: &str, value: &Value) -> Result<bool, NvramError> {
        log::debug!("Handling key {local}");

        match local {
            SET_FILE_PATH => {
                let path = path_from_value(value)
                    .ok_or_else(|| NvramError::malformed(key, "string or bytes"))?;
                self.sync.set_path(Some(path));
                Ok(false)
            }
            GENERATE_MLB => match value {
                Value::Boolean(true) => Ok(self.generate_mlb()),
                Value::Boolean(false) => Ok(false),
                _ => Err(NvramError::malformed(key, "boolean")),
            },
            GENERATE_ROM => match value {
                Value::Boolean(true) => Ok(self.generate_rom()),
                Value::Boolean(false) => Ok(false),
                _ => Err(NvramError::malformed(key, "boolean")),
            },
            ENABLE_LOGGING => {
                let enabled = value
                    .as_bool()
                    .ok_or_else(|| NvramError::malformed(key, "boolean"))?;
                self.logging.set(enabled);
                Ok(false)
            }
            other => {
                log::debug!("Ignoring unknown control key {other}");
                Ok(false)
            }
        }
    }

    /// Serial number followed by five random alphanumerics, NUL-terminated.
    fn generate_mlb(&self) -> bool {
        if self.store.contains(MLB_KEY) {
            return false;
        }
        let Some(serial) = self.platform.device_serial() else {
            log::warn!("Cannot generate MLB: platform has no serial number");
            return false;
        };

        let mut bytes = serial.into_bytes();
        bytes.extend(
            self.platform
                .random_bytes(MLB_SUFFIX_LEN)
                .iter()
                .map(|b| MLB_ALPHABET[*b as usize % MLB_ALPHABET.len()]),
        );
        bytes.push(0);

        self.store.insert_if_absent(MLB_KEY, Value::Bytes(bytes))
    }

    fn generate_rom(&self) -> bool {
        if self.store.contains(ROM_KEY) {
            return false;
        }
        log::debug!("Generating ROM");
        let bytes = self.platform.random_bytes(ROM_LEN);
        self.store.insert_if_absent(ROM_KEY, Value::Bytes(bytes))
    }
}

/// Accept a path as a string or as NUL-terminated bytes.
fn path_from_value(value: &Value) -> Option<PathBuf> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Bytes(bytes) => {
            let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        }
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }
    Some(PathBuf::from(text))
}
