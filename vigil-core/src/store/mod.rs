//! Remote datastore layer
//!
//! All writes are idempotent upserts against a PostgREST-style interface;
//! the exporter can recompute any aggregate at any time without inflating
//! rows. `client` speaks the wire protocol, `rows` defines the table
//! shapes, `sync` implements the batched high-level operations.

pub mod client;
pub mod rows;
pub mod sync;

pub use client::Datastore;
pub use rows::{
    DailyMetricRow, EventCounts, EventRow, FacilityRow, ProjectRow, ProjectTelemetryRow,
};
pub use sync::{SyncLayer, SyncStats};
