//! steamgraph-core library.
//!
//! Stores `(appid, reviewer)` review facts in `SQLite` and maintains the
//! shared-reviewer pair graph derived from them, one checkpointed reviewer
//! at a time.
//!
//! # Conventions
//!
//! - **Errors**: `thiserror` enums at store boundaries, `anyhow::Result` for
//!   orchestration code.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod lock;
pub mod model;
