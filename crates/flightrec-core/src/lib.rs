//! # flightrec-core
//!
//! Shared vocabulary for the flightrec telemetry pipeline.
//!
//! This crate provides the types every other flightrec crate depends on:
//!
//! - **Events**: [`event::TelemetryEvent`] — the canonical, immutable record
//!   appended to the JSONL log; [`event::EventKind`] — the closed set of
//!   lifecycle kinds; [`event::BlobRef`] — reference to an externalized payload.
//! - **Settings**: [`settings::TelemetrySettings`] with layered loading
//!   (compiled defaults → JSON file → `FLIGHTREC_*` env overrides) and
//!   [`settings::CaptureMode`] governing what producer payloads are retained.
//! - **Errors**: [`errors::SettingsError`] via `thiserror`.
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `flightrec-store` and
//! `flightrec-collector`.

#![deny(unsafe_code)]

pub mod errors;
pub mod event;
pub mod settings;

pub use errors::SettingsError;
pub use event::{BlobKind, BlobRef, ErrorInfo, EventKind, EventSource, TelemetryEvent};
pub use settings::{CaptureMode, CaptureSettings, TelemetrySettings};
