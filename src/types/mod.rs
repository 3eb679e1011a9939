//! Shared data structures for the fleet health pipeline.
//!
//! - `telemetry`: raw input records (§3.1)
//! - `features`: per-miner derived feature vectors (§3.2)
//! - `baseline`: persisted per-miner EWMA state (§3.3)
//! - `event`: the Problem Event lifecycle entity (§3.5)
//! - `health`: the per-miner health summary (§3.6)
//! - `outbox`: notification/ticket records (§3.7)
//! - `ml`: model registry rows (§3.8)

pub mod baseline;
pub mod event;
pub mod features;
pub mod health;
pub mod ml;
pub mod outbox;
pub mod telemetry;

pub use baseline::*;
pub use event::*;
pub use features::*;
pub use health::*;
pub use ml::*;
pub use outbox::*;
pub use telemetry::*;
