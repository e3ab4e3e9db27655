//! In-memory variable store.
//!
//! `ValueStore` is the single source of truth while the process runs. All
//! mutations take the same lock as [`ValueStore::snapshot`], so a snapshot
//! never observes half of a mutation; the lock is held only long enough to
//! copy entries, and serialization happens outside of it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::NvramError;
use crate::event_bus::{EventBus, NvramEvent};
use crate::host::Privilege;
use crate::value::Value;

/// Keys whose raw byte payloads are stored as strings.
const LEGACY_STRING_KEYS: &[&str] = &["boot-args", "boot-script"];

/// Key prefixes that need [`CSR_ENTITLEMENT`] on top of admin rights.
const PROTECTED_PREFIXES: &[&str] = &["csr-data", "csr-active-config"];

/// Entitlement required to change System Integrity Protection variables.
pub const CSR_ENTITLEMENT: &str = "com.apple.private.iokit.nvram-csr";

/// Flat key -> value table guarded by a privilege check.
pub struct ValueStore {
    entries: Mutex<BTreeMap<String, Value>>,
    privilege: Arc<dyn Privilege>,
    events: Arc<EventBus>,
}

impl ValueStore {
    pub fn new(privilege: Arc<dyn Privilege>, events: Arc<EventBus>) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            privilege,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check that the caller may mutate `key`.
    pub fn authorize(&self, key: &str) -> Result<(), NvramError> {
        if !self.privilege.check_admin_privilege() {
            return Err(NvramError::denied(key));
        }
        if PROTECTED_PREFIXES.iter().any(|p| key.starts_with(p))
            && !self.privilege.has_entitlement(CSR_ENTITLEMENT)
        {
            log::info!("set({key}) refused: missing {CSR_ENTITLEMENT}");
            return Err(NvramError::denied(key));
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Replace the value at `key`.
    ///
    /// Fails with `PermissionDenied` without touching the store when the
    /// privilege check fails.
    pub fn set(&self, key: &str, value: Value) -> Result<(), NvramError> {
        self.authorize(key)?;
        self.insert(key, value);
        Ok(())
    }

    /// Remove `key`. Removing a missing key succeeds.
    pub fn remove(&self, key: &str) -> Result<(), NvramError> {
        self.authorize(key)?;
        let removed = self.lock().remove(key).is_some();
        if removed {
            self.events.emit(NvramEvent::Removed {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Insert without a privilege check. Used when restoring from a
    /// snapshot and for values the store generates itself.
    pub(crate) fn insert(&self, key: &str, value: Value) {
        let value = coerce_legacy(key, value);
        let value_kind = value.kind();
        self.lock().insert(key.to_string(), value);
        self.events.emit(NvramEvent::Set {
            key: key.to_string(),
            value_kind: value_kind.to_string(),
        });
    }

    /// Insert only if `key` is absent. Returns whether a value was stored.
    pub(crate) fn insert_if_absent(&self, key: &str, value: Value) -> bool {
        {
            let mut entries = self.lock();
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(key.to_string(), coerce_legacy(key, value.clone()));
        }
        self.events.emit(NvramEvent::Set {
            key: key.to_string(),
            value_kind: value.kind().to_string(),
        });
        true
    }

    /// Point-in-time copy of all entries, ordered by key.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Legacy boot variables arrive as NUL-terminated byte strings; keep them
/// as text so the bootloader can read them back.
fn coerce_legacy(key: &str, value: Value) -> Value {
    match value {
        Value::Bytes(bytes) if LEGACY_STRING_KEYS.contains(&key) => {
            log::debug!("Found legacy key {key}");
            let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
            Value::String(String::from_utf8_lossy(&bytes[..end]).into_owned())
        }
        other => other,
    }
}
