//! Invocation engine for Volley
//!
//! Validated [`TargetSpec`]s are registered as [`Tracker`]s, driven through
//! rounds of concurrent replica calls by the dispatch loop, and every
//! [`InvocationResult`] is published to the tracker's sinks or result queue.

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod executor;
pub mod registry;
pub mod result;
pub mod status;
pub mod target;
pub mod tracker;

pub use dispatch::{call_id, Dispatcher};
pub use engine::Engine;
pub use error::{EngineError, ValidationError};
pub use executor::{CallExecutor, CALL_ID_HEADER, REQUEST_ID_PARAM};
pub use registry::TrackerRegistry;
pub use result::InvocationResult;
pub use status::{RunEvent, RunState, Status};
pub use target::{parse_payload_size, validate, BodyStream, Resolved, TargetSpec};
pub use tracker::{QueueSettings, RequestBody, ResultSink, SinkFactory, Tracker};
