//! Store event broadcasting.
//!
//! Mutations and persistence outcomes are published on an [`EventBus`] so a
//! host can observe the store without polling it. Publishing never blocks
//! and never fails: with no subscribers the event is dropped.
//!
//! # Example
//!
//! ```rust
//! use filenvram_core::event_bus::{EventBus, NvramEvent};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.emit(NvramEvent::Removed { key: "boot-args".to_string() });
//! assert!(matches!(rx.try_recv(), Ok(NvramEvent::Removed { .. })));
//! ```

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::broadcast;

/// Default channel capacity for the event bus.
/// Slow subscribers beyond this many pending events start lagging.
const DEFAULT_CAPACITY: usize = 1024;

/// Something that happened to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NvramEvent {
    /// A value of type `value_kind` was stored under `key`.
    Set {
        key: String,
        #[serde(rename = "valueKind")]
        value_kind: String,
    },
    /// `key` was removed.
    Removed { key: String },
    /// A snapshot of `entries` flat keys was written to `path`.
    Persisted { path: PathBuf, entries: usize },
    /// Writing the snapshot to `path` failed.
    PersistFailed { path: PathBuf, error: String },
    /// `entries` flat keys were restored at startup.
    Loaded { entries: usize },
    /// The backing file location changed.
    PathChanged { path: PathBuf },
}

impl NvramEvent {
    /// Short event type identifier (e.g. `nvram:set`).
    pub fn event_type(&self) -> &'static str {
        match self {
            NvramEvent::Set { .. } => "nvram:set",
            NvramEvent::Removed { .. } => "nvram:removed",
            NvramEvent::Persisted { .. } => "nvram:persisted",
            NvramEvent::PersistFailed { .. } => "nvram:persist-failed",
            NvramEvent::Loaded { .. } => "nvram:loaded",
            NvramEvent::PathChanged { .. } => "nvram:path-changed",
        }
    }
}

/// Broadcast channel for [`NvramEvent`]s.
pub struct EventBus {
    sender: broadcast::Sender<NvramEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns the number of subscribers that received it.
    pub fn emit(&self, event: NvramEvent) -> usize {
        log::trace!("{}: {:?}", event.event_type(), event);
        self.sender.send(event).unwrap_or(0)
    }

    /// Receive all future events. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<NvramEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
