//! # flightrec-store
//!
//! Durable side of the flightrec telemetry pipeline.
//!
//! - **[`log::EventLog`]**: append-only JSONL event log — the system of
//!   record. One self-contained JSON object per line; the file only grows.
//! - **[`blob::BlobStore`]**: content-addressed file storage for oversized
//!   payload fields externalized off the hot path.
//! - **[`indexer::Indexer`]**: projects log events into queryable SQLite
//!   tables, idempotent per event id, with resumable byte-offset catch-up.
//! - **[`queries`] / [`api::QueryApi`]**: read-only operations over the
//!   projections.
//!
//! The event log is the sole source of truth. Every derived table can be
//! rebuilt by resetting the bookmark and replaying from offset 0.

#![deny(unsafe_code)]

pub mod api;
pub mod blob;
pub mod errors;
pub mod indexer;
pub mod log;
pub mod projections;
pub mod queries;
pub mod sqlite;

pub use api::QueryApi;
pub use blob::BlobStore;
pub use errors::{Result, StoreError};
pub use indexer::{CatchUpReport, Indexer};
pub use log::EventLog;
pub use sqlite::connection::{open_memory_pool, open_pool, ConnectionPool};
