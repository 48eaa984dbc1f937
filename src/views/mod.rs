//! The view fan-out write path.
//!
//! [`CascadeWriter`] is the entry point: constructed per insert, it binds
//! every dependent view of the target table, derives the select/insert
//! context pair, and drives the prefix/write/suffix phases across all views
//! with per-view accounting and error capture. [`QueryViewsLog`] collects
//! one telemetry record per view per insert.

mod runner;
mod telemetry;
mod writer;

pub use telemetry::{QueryViewsLog, ViewLogEntry, ViewRuntimeStats, ViewStatus, ViewType};
pub use writer::CascadeWriter;
