//! Persistence of the store to its backing file.
//!
//! The [`SyncEngine`] decides whether a persistence request should run and,
//! if so, hands it to a single worker thread (the command gate). The worker
//! takes a snapshot of the store, nests it by namespace, encodes the
//! document and replaces the backing file. Requests are processed in
//! arrival order and never overlap; callers never wait for the write.
//!
//! A request runs only when all of the following hold:
//!
//! 1. a backing file path is configured,
//! 2. the engine is not read-only,
//! 3. the platform reports the volume as write-safe,
//! 4. for explicit sync-now requests only: the request is not the fourth
//!    in a row (every fourth sync-now check is suppressed to throttle
//!    redundant writes).
//!
//! Mutations and forced requests skip rule 4 and leave the counter
//! untouched, so a change to the store always reaches the file when rules
//! 1-3 allow it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::control;
use crate::document::{decode_document, encode_document};
use crate::event_bus::{EventBus, NvramEvent};
use crate::host::{FileSystem, Platform};
use crate::namespace;
use crate::store::ValueStore;
use crate::value::{Dictionary, Value};

/// Delay between write-safety polls while loading.
pub const WRITE_SAFE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Every n-th sync-now eligibility check is suppressed.
const SUPPRESS_EVERY: u64 = 4;

/// What asked for a persistence pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// A set or remove changed the store.
    Mutation,
    /// Explicit sync-now request.
    SyncNow,
    /// Explicit request that bypasses suppression.
    ForceSyncNow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The store has not been loaded yet.
    NotReady,
    NoBackingFile,
    ReadOnly,
    NotWriteSafe,
    /// Throttled by the every-fourth-sync-now rule.
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    Scheduled,
    Skipped(SkipReason),
}

impl SyncDecision {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, SyncDecision::Scheduled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    Ready,
}

/// Host power transitions relevant to persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Sleep, shutdown or restart is imminent; stop writing.
    Off,
    /// The volume is usable again.
    On,
}

/// Result of reading the backing file at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// `entries` flat keys were restored.
    Loaded { entries: usize },
    /// The store was already seeded from the platform tree.
    AlreadySeeded,
    /// `load` was called before.
    AlreadyLoaded,
    /// No backing file (missing path, missing file or empty file).
    NoFile,
    /// The file could not be read or parsed; the store starts empty.
    Failed { reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct SyncEngineConfig {
    pub path: Option<PathBuf>,
    pub read_only: bool,
}

enum GateCommand {
    Persist,
    /// Acknowledged once every command queued before it has run.
    Barrier(Sender<()>),
    Shutdown,
}

/// State shared with the worker thread.
struct Persister {
    store: Arc<ValueStore>,
    fs: Arc<dyn FileSystem>,
    events: Arc<EventBus>,
    path: RwLock<Option<PathBuf>>,
}

impl Persister {
    fn path(&self) -> Option<PathBuf> {
        self.path.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// One persistence pass. Failures are logged and reported as events;
    /// the in-memory store stays authoritative.
    fn persist(&self) {
        let Some(path) = self.path() else {
            log::debug!("Backing file unset, dropping queued sync");
            return;
        };

        let snapshot = self.store.snapshot();
        let entries = snapshot.len();
        let document = encode_document(&nest(snapshot));

        log::debug!("Writing NVRAM to {}", path.display());
        match self.fs.write_file(&path, document.as_bytes()) {
            Ok(()) => {
                self.events.emit(NvramEvent::Persisted { path, entries });
            }
            Err(e) => {
                log::error!("Failed to write {}: {e}", path.display());
                self.events.emit(NvramEvent::PersistFailed {
                    path,
                    error: e.to_string(),
                });
            }
        }
    }
}

fn run_gate(persister: Arc<Persister>, commands: Receiver<GateCommand>) {
    for command in commands {
        match command {
            GateCommand::Persist => persister.persist(),
            GateCommand::Barrier(ack) => {
                let _ = ack.send(());
            }
            GateCommand::Shutdown => break,
        }
    }
    log::debug!("Sync gate stopped");
}

pub struct SyncEngine {
    persister: Arc<Persister>,
    platform: Arc<dyn Platform>,
    read_only: bool,
    ready: AtomicBool,
    safe_to_sync: AtomicBool,
    checks: AtomicU64,
    gate: Mutex<Option<Sender<GateCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<ValueStore>,
        fs: Arc<dyn FileSystem>,
        platform: Arc<dyn Platform>,
        events: Arc<EventBus>,
        config: SyncEngineConfig,
    ) -> Self {
        let persister = Arc::new(Persister {
            store,
            fs,
            events,
            path: RwLock::new(config.path),
        });

        let (tx, rx) = mpsc::channel();
        let worker = {
            let persister = Arc::clone(&persister);
            thread::spawn(move || run_gate(persister, rx))
        };

        Self {
            persister,
            platform,
            read_only: config.read_only,
            ready: AtomicBool::new(false),
            safe_to_sync: AtomicBool::new(false),
            checks: AtomicU64::new(0),
            gate: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn state(&self) -> SyncState {
        if self.ready.load(Ordering::SeqCst) {
            SyncState::Ready
        } else {
            SyncState::Uninitialized
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.persister.path()
    }

    /// Change the backing file. Takes effect for the next persistence pass.
    pub fn set_path(&self, path: Option<PathBuf>) {
        *self
            .persister
            .path
            .write()
            .unwrap_or_else(|e| e.into_inner()) = path.clone();

        match path {
            Some(path) => {
                log::info!("Backing file set to {}", path.display());
                self.persister.events.emit(NvramEvent::PathChanged { path });
            }
            None => log::info!("Backing file cleared"),
        }
    }

    pub fn set_power_state(&self, state: PowerState) {
        log::debug!("Power state changed to {state:?}");
        self.safe_to_sync
            .store(state == PowerState::On, Ordering::SeqCst);
    }

    /// Evaluate the eligibility rules and, if they pass, queue a
    /// persistence pass.
    pub fn request(&self, trigger: SyncTrigger) -> SyncDecision {
        let decision = match self.check(trigger) {
            Ok(()) => {
                if self.send(GateCommand::Persist) {
                    SyncDecision::Scheduled
                } else {
                    SyncDecision::Skipped(SkipReason::NotReady)
                }
            }
            Err(reason) => SyncDecision::Skipped(reason),
        };
        log::debug!("Sync request ({trigger:?}): {decision:?}");
        decision
    }

    fn check(&self, trigger: SyncTrigger) -> Result<(), SkipReason> {
        let count = match trigger {
            SyncTrigger::SyncNow => Some(self.checks.fetch_add(1, Ordering::SeqCst) + 1),
            SyncTrigger::Mutation | SyncTrigger::ForceSyncNow => None,
        };

        if !self.ready.load(Ordering::SeqCst) {
            return Err(SkipReason::NotReady);
        }
        if self.persister.path().is_none() {
            return Err(SkipReason::NoBackingFile);
        }
        if self.read_only {
            return Err(SkipReason::ReadOnly);
        }
        if !self.safe_to_sync.load(Ordering::SeqCst) || !self.platform.is_write_safe() {
            return Err(SkipReason::NotWriteSafe);
        }
        if count.is_some_and(|n| n % SUPPRESS_EVERY == 0) {
            return Err(SkipReason::Suppressed);
        }
        Ok(())
    }

    fn send(&self, command: GateCommand) -> bool {
        match self.gate.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }

    /// Block until every pass queued so far has finished.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.send(GateCommand::Barrier(ack_tx)) {
            let _ = ack_rx.recv();
        }
    }

    /// Block until the platform reports the volume as write-safe, then
    /// allow syncing and mark the engine ready.
    pub fn wait_until_ready(&self) {
        let mut waited = false;
        while !self.platform.is_write_safe() {
            if !waited {
                log::info!("Waiting for the backing volume to become writable");
                waited = true;
            }
            thread::sleep(WRITE_SAFE_POLL_INTERVAL);
        }
        self.safe_to_sync.store(true, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Read the backing file and hand every flattened entry to `restore`.
    pub fn load(&self, mut restore: impl FnMut(String, Value)) -> LoadOutcome {
        let Some(path) = self.path() else {
            log::info!("No backing file configured, starting empty");
            return LoadOutcome::NoFile;
        };

        let bytes = match self.persister.fs.read_file(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("{} does not exist, starting empty", path.display());
                return LoadOutcome::NoFile;
            }
            Err(e) => {
                log::warn!("Unable to read {}: {e}", path.display());
                return LoadOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if bytes.is_empty() {
            log::info!("{} is empty, starting empty", path.display());
            return LoadOutcome::NoFile;
        }

        let root = match decode_document(&bytes) {
            Ok(root) => root,
            Err(e) => {
                log::warn!("Unable to parse {}: {e}", path.display());
                return LoadOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let entries = flatten(root);
        let count = entries.len();
        for (key, value) in entries {
            restore(key, value);
        }

        log::info!("Loaded {count} entries from {}", path.display());
        self.persister
            .events
            .emit(NvramEvent::Loaded { entries: count });
        LoadOutcome::Loaded { entries: count }
    }

    /// Encode the current store as it would be persisted.
    pub fn render(&self) -> String {
        encode_document(&nest(self.persister.store.snapshot()))
    }

    /// Write the current store to `path` right away, bypassing the
    /// eligibility rules and the gate.
    pub fn export_to(&self, path: &Path) -> std::io::Result<()> {
        self.persister.fs.write_file(path, self.render().as_bytes())
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if let Some(tx) = self.gate.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = tx.send(GateCommand::Shutdown);
        }
        if let Some(worker) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = worker.join();
        }
    }
}

/// Group flat entries by namespace for persistence.
///
/// Global keys stay at the root; namespaced keys go into one dictionary per
/// namespace, in first-seen order. Command keys are dropped. When a global
/// key has the same name as a namespace, the namespace wins.
pub fn nest(entries: impl IntoIterator<Item = (String, Value)>) -> Dictionary {
    let mut slots: Vec<(String, Slot)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (key, value) in entries {
        if control::is_reserved(&key) {
            continue;
        }
        if value.is_dictionary() {
            log::warn!("Skipping nested dictionary at {key}");
            continue;
        }

        let (ns, local) = namespace::decode(&key);
        let name = ns.unwrap_or(local);
        let Some(&i) = index.get(name) else {
            let slot = match ns {
                Some(_) => Slot::Namespace(vec![(local.to_string(), value)]),
                None => Slot::Global(value),
            };
            index.insert(name.to_string(), slots.len());
            slots.push((name.to_string(), slot));
            continue;
        };

        let slot = &mut slots[i].1;
        match (ns, slot) {
            (Some(_), Slot::Namespace(dict)) => dict.push((local.to_string(), value)),
            (Some(ns), slot) => {
                log::warn!("Namespace {ns} shadows a global key of the same name");
                *slot = Slot::Namespace(vec![(local.to_string(), value)]);
            }
            (None, Slot::Namespace(_)) => {
                log::warn!("Global key {local} shadowed by a namespace of the same name");
            }
            (None, slot) => *slot = Slot::Global(value),
        }
    }

    slots
        .into_iter()
        .map(|(name, slot)| match slot {
            Slot::Global(value) => (name, value),
            Slot::Namespace(dict) => (name, Value::Dictionary(dict.into_iter().collect())),
        })
        .collect()
}

/// Root-level entry while nesting.
enum Slot {
    Global(Value),
    Namespace(Vec<(String, Value)>),
}

/// Inverse of [`nest`]: turn a persisted root dictionary into flat entries.
///
/// Dictionaries nested deeper than one level are joined with the separator.
pub fn flatten(root: Dictionary) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    for (key, value) in root {
        match value {
            Value::Dictionary(dict) => flatten_into(&key, dict, &mut out),
            other => out.push((key, other)),
        }
    }
    out
}

fn flatten_into(prefix: &str, dict: Dictionary, out: &mut Vec<(String, Value)>) {
    for (local, value) in dict {
        match value {
            Value::Dictionary(inner) => {
                flatten_into(&namespace::join_segment(Some(prefix), &local), inner, out)
            }
            other => out.push((namespace::encode(Some(prefix), &local), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::HEADER;
    use crate::host::{AllowAll, MemoryFileSystem, SystemPlatform};

    const PATH: &str = "/Extra/nvram.plist";

    struct Fixture {
        store: Arc<ValueStore>,
        fs: Arc<MemoryFileSystem>,
        platform: Arc<SystemPlatform>,
        engine: SyncEngine,
    }

    fn fixture_with(fs: MemoryFileSystem, config: SyncEngineConfig) -> Fixture {
        let events = Arc::new(EventBus::new());
        let store = Arc::new(ValueStore::new(Arc::new(AllowAll), Arc::clone(&events)));
        let fs = Arc::new(fs);
        let platform = Arc::new(SystemPlatform::default());
        let engine = SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&fs) as Arc<dyn FileSystem>,
            Arc::clone(&platform) as Arc<dyn Platform>,
            events,
            config,
        );
        Fixture {
            store,
            fs,
            platform,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            MemoryFileSystem::new(),
            SyncEngineConfig {
                path: Some(PathBuf::from(PATH)),
                read_only: false,
            },
        )
    }

    fn ready_fixture() -> Fixture {
        let f = fixture();
        f.engine.wait_until_ready();
        f
    }

    mod eligibility {
        use super::*;

        #[test]
        fn not_ready_before_load() {
            let f = fixture();
            assert_eq!(f.engine.state(), SyncState::Uninitialized);
            assert_eq!(
                f.engine.request(SyncTrigger::SyncNow),
                SyncDecision::Skipped(SkipReason::NotReady)
            );
        }

        #[test]
        fn every_fourth_request_is_suppressed() {
            let f = ready_fixture();
            let decisions: Vec<_> = (0..8)
                .map(|_| f.engine.request(SyncTrigger::SyncNow))
                .collect();
            f.engine.flush();

            assert_eq!(decisions[3], SyncDecision::Skipped(SkipReason::Suppressed));
            assert_eq!(decisions[7], SyncDecision::Skipped(SkipReason::Suppressed));
            assert_eq!(decisions.iter().filter(|d| d.is_scheduled()).count(), 6);
            assert_eq!(f.fs.write_count(), 6);
        }

        #[test]
        fn forced_requests_are_not_counted() {
            let f = ready_fixture();
            for _ in 0..3 {
                assert!(f.engine.request(SyncTrigger::SyncNow).is_scheduled());
            }
            assert!(f.engine.request(SyncTrigger::ForceSyncNow).is_scheduled());
            assert_eq!(
                f.engine.request(SyncTrigger::SyncNow),
                SyncDecision::Skipped(SkipReason::Suppressed)
            );
        }

        #[test]
        fn mutations_are_never_suppressed() {
            let f = ready_fixture();
            for _ in 0..8 {
                assert!(f.engine.request(SyncTrigger::Mutation).is_scheduled());
            }
            f.engine.flush();
            assert_eq!(f.fs.write_count(), 8);
        }

        #[test]
        fn mutations_do_not_advance_sync_now_counter() {
            let f = ready_fixture();
            for _ in 0..3 {
                f.engine.request(SyncTrigger::Mutation);
            }
            for _ in 0..3 {
                assert!(f.engine.request(SyncTrigger::SyncNow).is_scheduled());
            }
            assert_eq!(
                f.engine.request(SyncTrigger::SyncNow),
                SyncDecision::Skipped(SkipReason::Suppressed)
            );
        }

        #[test]
        fn read_only_never_writes() {
            let f = fixture_with(
                MemoryFileSystem::new(),
                SyncEngineConfig {
                    path: Some(PathBuf::from(PATH)),
                    read_only: true,
                },
            );
            f.engine.wait_until_ready();
            assert_eq!(
                f.engine.request(SyncTrigger::ForceSyncNow),
                SyncDecision::Skipped(SkipReason::ReadOnly)
            );
            f.engine.flush();
            assert_eq!(f.fs.write_count(), 0);
        }

        #[test]
        fn no_backing_file() {
            let f = fixture_with(MemoryFileSystem::new(), SyncEngineConfig::default());
            f.engine.wait_until_ready();
            assert_eq!(
                f.engine.request(SyncTrigger::ForceSyncNow),
                SyncDecision::Skipped(SkipReason::NoBackingFile)
            );
        }

        #[test]
        fn power_off_blocks_writes() {
            let f = ready_fixture();
            f.engine.set_power_state(PowerState::Off);
            assert_eq!(
                f.engine.request(SyncTrigger::ForceSyncNow),
                SyncDecision::Skipped(SkipReason::NotWriteSafe)
            );
            f.engine.set_power_state(PowerState::On);
            assert!(f.engine.request(SyncTrigger::ForceSyncNow).is_scheduled());
        }

        #[test]
        fn platform_not_write_safe_blocks_writes() {
            let f = ready_fixture();
            f.platform.set_write_safe(false);
            assert_eq!(
                f.engine.request(SyncTrigger::ForceSyncNow),
                SyncDecision::Skipped(SkipReason::NotWriteSafe)
            );
        }
    }

    mod persistence {
        use super::*;

        #[test]
        fn persists_nested_document() {
            let f = ready_fixture();
            f.store.insert("boot-args", Value::from("-v"));
            f.store.insert("GUID:key", Value::from(1));

            f.engine.request(SyncTrigger::SyncNow);
            f.engine.flush();

            let written = String::from_utf8(f.fs.contents(Path::new(PATH)).unwrap()).unwrap();
            assert!(written.starts_with(HEADER));
            assert!(written.contains("<key>GUID</key><dict><key>key</key><integer>1</integer></dict>"));
            assert!(written.contains("<key>boot-args</key><string>-v</string>"));
        }

        #[test]
        fn write_failure_leaves_store_intact() {
            let f = ready_fixture();
            f.fs.set_fail_writes(true);
            f.store.insert("foo", Value::from(1));

            assert!(f.engine.request(SyncTrigger::SyncNow).is_scheduled());
            f.engine.flush();

            assert_eq!(f.fs.write_count(), 0);
            assert_eq!(f.store.get("foo"), Some(Value::from(1)));
        }

        #[test]
        fn path_change_applies_to_next_pass() {
            let f = ready_fixture();
            f.engine.set_path(Some(PathBuf::from("/other.plist")));
            f.engine.request(SyncTrigger::SyncNow);
            f.engine.flush();

            assert!(f.fs.contents(Path::new("/other.plist")).is_some());
            assert!(f.fs.contents(Path::new(PATH)).is_none());
        }

        #[test]
        fn export_bypasses_rules() {
            let f = fixture();
            f.store.insert("foo", Value::from(true));
            f.engine.export_to(Path::new("/export.plist")).unwrap();
            assert_eq!(f.fs.write_count(), 1);
        }
    }

    mod loading {
        use super::*;

        fn load_into(f: &Fixture) -> LoadOutcome {
            let store = Arc::clone(&f.store);
            f.engine.load(move |k, v| store.insert(&k, v))
        }

        #[test]
        fn missing_file() {
            let f = ready_fixture();
            assert_eq!(load_into(&f), LoadOutcome::NoFile);
            assert!(f.store.is_empty());
        }

        #[test]
        fn empty_file() {
            let f = fixture_with(
                MemoryFileSystem::new().with_file(PATH, ""),
                SyncEngineConfig {
                    path: Some(PathBuf::from(PATH)),
                    read_only: false,
                },
            );
            assert_eq!(load_into(&f), LoadOutcome::NoFile);
        }

        #[test]
        fn parse_failure_starts_empty() {
            let f = fixture_with(
                MemoryFileSystem::new().with_file(PATH, "<plist><dict><key>NVRAM"),
                SyncEngineConfig {
                    path: Some(PathBuf::from(PATH)),
                    read_only: false,
                },
            );
            assert!(matches!(load_into(&f), LoadOutcome::Failed { .. }));
            assert!(f.store.is_empty());
        }

        #[test]
        fn loads_written_document() {
            let f = ready_fixture();
            f.store.insert("boot-args", Value::from("-v"));
            f.store.insert("GUID:a", Value::from(vec![1u8, 2]));
            f.engine.export_to(Path::new(PATH)).unwrap();

            let reloaded = fixture_with(
                MemoryFileSystem::new().with_file(PATH, f.fs.contents(Path::new(PATH)).unwrap()),
                SyncEngineConfig {
                    path: Some(PathBuf::from(PATH)),
                    read_only: false,
                },
            );
            assert_eq!(load_into(&reloaded), LoadOutcome::Loaded { entries: 2 });
            assert_eq!(reloaded.store.snapshot(), f.store.snapshot());
        }
    }

    mod nesting {
        use super::*;

        fn entries(pairs: &[(&str, Value)]) -> Vec<(String, Value)> {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect()
        }

        #[test]
        fn groups_by_first_separator() {
            let root = nest(entries(&[
                ("A:x", Value::from(1)),
                ("g", Value::from(2)),
                ("A:y:z", Value::from(3)),
            ]));

            let a = match root.get("A") {
                Some(Value::Dictionary(d)) => d.clone(),
                other => panic!("unexpected: {other:?}"),
            };
            assert_eq!(a.get("x"), Some(&Value::from(1)));
            assert_eq!(a.get("y:z"), Some(&Value::from(3)));
            assert_eq!(root.get("g"), Some(&Value::from(2)));
        }

        #[test]
        fn drops_command_keys() {
            let root = nest(entries(&[
                (control::SYNC_NOW_KEY, Value::from("1")),
                (
                    "D8F0CCF5-580E-4334-87B6-9FBBB831271D:NVRAMFile",
                    Value::from("/x"),
                ),
            ]));
            assert!(root.is_empty());
        }

        #[test]
        fn namespace_wins_over_global() {
            let root = nest(entries(&[
                ("A", Value::from(1)),
                ("A:x", Value::from(2)),
            ]));
            assert!(matches!(root.get("A"), Some(Value::Dictionary(_))));

            let root = nest(entries(&[
                ("A:x", Value::from(2)),
                ("A", Value::from(1)),
            ]));
            assert!(matches!(root.get("A"), Some(Value::Dictionary(_))));
        }

        #[test]
        fn large_namespace_keeps_order() {
            let flat: Vec<_> = (0..20_000)
                .map(|i| (format!("{}:k{i}", i % 2), Value::from(i)))
                .collect();
            let root = nest(flat);

            assert_eq!(root.len(), 2);
            let Some(Value::Dictionary(odd)) = root.get("1") else {
                panic!("expected dictionary");
            };
            assert_eq!(odd.len(), 10_000);
            let keys: Vec<_> = odd.iter().take(3).map(|(k, _)| k).collect();
            assert_eq!(keys, vec!["k1", "k3", "k5"]);
            assert_eq!(odd.get("k19999"), Some(&Value::from(19_999)));
        }

        #[test]
        fn flatten_joins_deeper_levels() {
            let mut inner = Dictionary::new();
            inner.insert("leaf", Value::from(true));
            let mut ns = Dictionary::new();
            ns.insert("x", Value::from(1));
            ns.insert("child", Value::Dictionary(inner));
            let mut root = Dictionary::new();
            root.insert("g", Value::from("v"));
            root.insert("A", Value::Dictionary(ns));

            assert_eq!(
                flatten(root),
                entries(&[
                    ("g", Value::from("v")),
                    ("A:x", Value::from(1)),
                    ("A:child:leaf", Value::from(true)),
                ])
            );
        }

        #[test]
        fn flatten_of_nest_is_identity_for_flat_keys() {
            let input = entries(&[
                ("A:x", Value::from(1)),
                ("A:y:z", Value::from(3)),
                ("g", Value::from(vec![0u8])),
            ]);
            let mut output = flatten(nest(input.clone()));
            output.sort_by(|a, b| a.0.cmp(&b.0));
            assert_eq!(output, input);
        }
    }
}
