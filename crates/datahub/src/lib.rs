//! The data hub core: a broker that receives telemetry samples from
//! producer apps, routes them through configurable observation stages, and
//! delivers them to consumer apps or named destinations.
//!
//! The engine is single-threaded; every mutation goes through
//! [`DataHub`]. The configuration loader lives in the `datahub-config`
//! crate and drives the administrative surface exposed here.

// Buffer backups on non-volatile storage.
pub mod backup;
// The named-destination registry.
pub mod destination;
mod error;
// JSON member extraction for observations.
pub mod extraction;
// The push-handler table.
pub mod handler;
mod hub;
mod io;
// The observation filter/buffer/transform pipeline.
pub mod obs;
// Resource path grammar.
pub mod path;
// Per-resource data-flow state.
pub mod resource;
// The path-addressed entry arena.
pub mod tree;

pub use backup::BackupStore;
pub use destination::{
    DestinationCallback, DestinationEvent, DestinationRef, DESTINATION_CAPACITY,
};
pub use error::{Error, Result};
pub use handler::{Callback, HandlerRef};
pub use hub::DataHub;
pub use io::IoSession;
pub use obs::Transform;
pub use tree::{EntryId, EntryKind};

#[cfg(test)]
mod hub_test;
