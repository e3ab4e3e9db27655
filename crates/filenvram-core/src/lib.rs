//! # filenvram-core
//!
//! File-backed NVRAM emulation for hosts without persistent firmware
//! variable storage.
//!
//! Variables live in memory and are mirrored to a property-list file
//! whenever they change. The crate is host-agnostic: filesystem access,
//! privilege checks and platform readiness are injected through the traits
//! in [`host`].
//!
//! ## Key Concepts
//!
//! - **Flat key**: `namespace:local` or a bare global key
//! - **Control namespace**: keys that reconfigure the store instead of
//!   holding data
//! - **Sync**: a serialized, best-effort write of the whole store to the
//!   backing file

pub mod config;
pub mod control;
pub mod document;
pub mod error;
pub mod event_bus;
pub mod host;
pub mod import;
pub mod logging;
pub mod namespace;
pub mod service;
pub mod store;
pub mod sync;
pub mod value;

// Re-export commonly used types
pub use config::NvramConfig;
pub use error::NvramError;
pub use event_bus::{EventBus, NvramEvent};
pub use import::{TreeNode, TreeSource};
pub use service::NvramService;
pub use sync::{LoadOutcome, PowerState, SyncDecision};
pub use value::{Dictionary, Value};
