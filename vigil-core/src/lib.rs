//! # vigil-core
//!
//! Core library for vigil - a local telemetry exporter and health-gated
//! lifecycle controller for an agent-operated facility.
//!
//! The exporter tails the agents' append-only event log and per-session
//! usage files, derives per-project and facility-wide aggregates, and keeps
//! a remote datastore current through idempotent upserts. The companion
//! open/close commands gate the facility's public state behind an
//! end-to-end health check of the pipeline.
//!
//! ## Architecture
//!
//! - **Inputs (read-only):** event log, model stats, stats cache, session
//!   files — all owned by the agents.
//! - **Derivation:** parsing, per-slug aggregation, sliding-window agent
//!   activity classification.
//! - **Outputs:** idempotent rows in the remote datastore; the exporter can
//!   recompute any aggregate at any time.

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use store::{Datastore, SyncLayer};

// Public modules
pub mod config;
pub mod daemon;
pub mod error;
pub mod events;
pub mod logging;
pub mod procs;
pub mod service;
pub mod sessions;
pub mod slugs;
pub mod stats;
pub mod store;
pub mod tail;
pub mod visibility;
