//! NvramService - the store as seen by its clients.
//!
//! Ties the pieces together and is the only type most hosts need:
//!
//! ```text
//!                 ┌──────────────────────────┐
//!   get/set/...   │       NvramService       │
//!  ─────────────▶ ├──────────────────────────┤
//!                 │  ControlChannel          │── command keys
//!                 │    └─ ValueStore         │── data keys
//!                 │  SyncEngine              │
//!                 │    └─ gate thread ──────────▶ backing file
//!                 │  EventBus                │
//!                 └──────────────────────────┘
//! ```
//!
//! Host capabilities are injected through the builder; anything left unset
//! falls back to the process defaults ([`StdFileSystem`], [`AllowAll`],
//! [`SystemPlatform`]).
//!
//! # Lifecycle
//!
//! 1. Build the service.
//! 2. Optionally [`seed_from_tree`](NvramService::seed_from_tree).
//! 3. Call [`load`](NvramService::load) once. It waits for the platform to
//!    report the volume as writable, then reads the backing file unless the
//!    store was already seeded. Persistence requests made before this are
//!    skipped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::NvramConfig;
use crate::control::ControlChannel;
use crate::error::NvramError;
use crate::event_bus::{EventBus, NvramEvent};
use crate::host::{AllowAll, FileSystem, Platform, Privilege, StdFileSystem, SystemPlatform};
use crate::import::{import_tree, TreeSource};
use crate::logging::LoggingFlag;
use crate::namespace;
use crate::store::ValueStore;
use crate::sync::{
    LoadOutcome, PowerState, SyncDecision, SyncEngine, SyncEngineConfig, SyncState, SyncTrigger,
};
use crate::value::Value;

/// Configuration for building an NvramService.
#[derive(Default)]
pub struct NvramServiceBuilder {
    config: Option<NvramConfig>,
    file_system: Option<Arc<dyn FileSystem>>,
    privilege: Option<Arc<dyn Privilege>>,
    platform: Option<Arc<dyn Platform>>,
    event_bus: Option<Arc<EventBus>>,
}

impl NvramServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: NvramConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn privilege(mut self, privilege: Arc<dyn Privilege>) -> Self {
        self.privilege = Some(privilege);
        self
    }

    /// Use a custom platform. Overrides `device_serial` from the config.
    pub fn platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Use an existing EventBus (for testing or custom configurations).
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn build(self) -> NvramService {
        let config = self.config.unwrap_or_default();
        let event_bus = self.event_bus.unwrap_or_else(|| Arc::new(EventBus::new()));
        let file_system = self
            .file_system
            .unwrap_or_else(|| Arc::new(StdFileSystem));
        let privilege = self.privilege.unwrap_or_else(|| Arc::new(AllowAll));
        let platform = self
            .platform
            .unwrap_or_else(|| Arc::new(SystemPlatform::new(config.device_serial.clone())));

        let logging = Arc::new(LoggingFlag::new(config.enable_logging));
        let store = Arc::new(ValueStore::new(privilege, Arc::clone(&event_bus)));
        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            file_system,
            Arc::clone(&platform),
            Arc::clone(&event_bus),
            SyncEngineConfig {
                path: config.file_path,
                read_only: config.read_only,
            },
        ));
        let control = ControlChannel::new(
            Arc::clone(&store),
            Arc::clone(&sync),
            platform,
            Arc::clone(&logging),
        );

        NvramService {
            event_bus,
            store,
            inner: Arc::new(Inner {
                sync,
                control,
                logging,
                seeded: AtomicBool::new(false),
                loaded: AtomicBool::new(false),
            }),
        }
    }
}

struct Inner {
    sync: Arc<SyncEngine>,
    control: ControlChannel,
    logging: Arc<LoggingFlag>,
    seeded: AtomicBool,
    loaded: AtomicBool,
}

/// File-backed NVRAM store.
///
/// Cloning is cheap and every clone shares the same store. The sync worker
/// stops when the last clone is dropped; a pending write may or may not
/// complete, call [`flush`](Self::flush) first to be sure.
#[derive(Clone)]
pub struct NvramService {
    /// Store and persistence events.
    pub event_bus: Arc<EventBus>,
    /// The underlying flat store. Writes through it bypass command handling
    /// and persistence; use the service methods instead.
    pub store: Arc<ValueStore>,
    inner: Arc<Inner>,
}

impl NvramService {
    pub fn builder() -> NvramServiceBuilder {
        NvramServiceBuilder::new()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if self.inner.logging.enabled() {
            log::info!("getProperty({key}) called");
        }
        self.store.get(key)
    }

    /// Look up `local` inside `namespace`.
    pub fn get_in(&self, namespace: &str, local: &str) -> Option<Value> {
        self.get(&namespace::encode(Some(namespace), local))
    }

    /// Set a value, or execute a command key.
    pub fn set(&self, key: &str, value: Value) -> Result<(), NvramError> {
        self.inner.control.write(key, value)
    }

    /// Set `local` inside `namespace`.
    pub fn set_in(&self, namespace: &str, local: &str, value: Value) -> Result<(), NvramError> {
        let key = namespace::try_encode(Some(namespace), local)?;
        self.set(&key, value)
    }

    pub fn remove(&self, key: &str) -> Result<(), NvramError> {
        self.inner.control.remove(key)
    }

    /// Apply every entry in order. Later entries are applied even when an
    /// earlier one fails; the first failure is returned.
    pub fn set_many(
        &self,
        entries: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<(), NvramError> {
        let mut first_error = None;
        for (key, value) in entries {
            if let Err(e) = self.set(&key, value) {
                log::debug!("set_many: {key} failed: {e}");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Ask for a persistence pass, subject to the eligibility rules.
    pub fn sync_now(&self) -> SyncDecision {
        self.inner.sync.request(SyncTrigger::SyncNow)
    }

    /// Ask for a persistence pass that skips redundant-write suppression.
    pub fn force_sync(&self) -> SyncDecision {
        self.inner.sync.request(SyncTrigger::ForceSyncNow)
    }

    /// Wait for queued persistence passes to finish.
    pub fn flush(&self) {
        self.inner.sync.flush();
    }

    /// Wait for the platform, then restore the backing file.
    ///
    /// Only the first call does anything.
    pub fn load(&self) -> LoadOutcome {
        if self.inner.loaded.swap(true, Ordering::SeqCst) {
            return LoadOutcome::AlreadyLoaded;
        }

        self.inner.sync.wait_until_ready();

        if self.inner.seeded.load(Ordering::SeqCst) {
            log::info!("Store seeded from platform tree, not reading backing file");
            return LoadOutcome::AlreadySeeded;
        }

        let control = &self.inner.control;
        self.inner.sync.load(|key, value| control.restore(&key, value))
    }

    /// Populate the store from a platform tree. A later [`load`](Self::load)
    /// then leaves the backing file alone.
    pub fn seed_from_tree<T: TreeSource>(&self, tree: &T, root: &T::Node) -> usize {
        let entries = import_tree(tree, root);
        let count = entries.len();
        for (key, value) in entries {
            self.inner.control.restore(&key, value);
        }
        self.inner.seeded.store(true, Ordering::SeqCst);
        log::info!("Seeded {count} entries from platform tree");
        count
    }

    pub fn set_power_state(&self, state: PowerState) {
        self.inner.sync.set_power_state(state);
    }

    pub fn sync_state(&self) -> SyncState {
        self.inner.sync.state()
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.inner.sync.path()
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.sync.is_read_only()
    }

    pub fn logging_enabled(&self) -> bool {
        self.inner.logging.enabled()
    }

    /// All entries, ordered by key.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.store.snapshot()
    }

    /// The document that would be persisted right now.
    pub fn render_document(&self) -> String {
        self.inner.sync.render()
    }

    /// Write the current store to `path` immediately.
    pub fn export_to(&self, path: &Path) -> Result<(), NvramError> {
        self.inner.sync.export_to(path)?;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NvramEvent> {
        self.event_bus.subscribe()
    }
}

impl Default for NvramService {
    fn default() -> Self {
        Self::builder().build()
    }
}
