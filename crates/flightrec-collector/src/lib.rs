//! # flightrec-collector
//!
//! Producer side of the flightrec telemetry pipeline.
//!
//! - **[`collector::Collector`]**: one fail-soft method per agent lifecycle
//!   point; producers never see a telemetry error.
//! - **[`diagnostics::DiagnosticBus`]**: broadcast channel for async
//!   diagnostic messages (usage snapshots, per-call model accounting).
//! - **[`capture`]** / **[`extract`]**: payload capture policy and
//!   best-effort file/command extraction from tool arguments.
//! - **[`arena::RunArena`]**: in-flight per-run counters that backfill
//!   aggregates the producer did not supply.
//! - **[`pipeline::TelemetryPipeline`]**: wires the collector to the
//!   durable store and spawns the bus worker.

#![deny(unsafe_code)]

pub mod arena;
pub mod capture;
pub mod collector;
pub mod context;
pub mod diagnostics;
pub mod extract;
pub mod pipeline;

pub use arena::RunArena;
pub use collector::Collector;
pub use context::HookContext;
pub use diagnostics::DiagnosticBus;
pub use pipeline::{queries_or_unavailable, TelemetryPipeline};
