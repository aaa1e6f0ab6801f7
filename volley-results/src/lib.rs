//! Result aggregation and remote mirroring for Volley
//!
//! [`ResultsCollector`] attaches to trackers through sink factories and keeps
//! per-target, all-target and per-invocation [`AggregatedResults`]. When a
//! [`Mirror`] is configured every update is also pushed to a peer registry.

pub mod aggregate;
pub mod collector;
pub mod error;
pub mod mirror;

pub use aggregate::{AggregatedResults, SharedAggregate};
pub use collector::{InvocationResults, ResultsCollector, TargetsResults};
pub use error::MirrorError;
pub use mirror::Mirror;
