// src/engine/mod.rs

//! Running pipelines.
//!
//! - [`registry`] names tasks and routes input to them.
//! - [`task`] owns the spawned stages of one pipeline and its terminal error.
//! - [`source`] is the producer-side handle batches enter through.
//! - [`cache`] keeps the latest result per output and group.
//! - [`notify`] is where alert transitions leave the engine.

pub mod cache;
pub mod notify;
pub mod registry;
pub mod source;
pub mod task;

pub use cache::ResultCache;
pub use notify::{AlertEvent, AlertHandler, AlertLevel, LogAlertHandler};
pub use registry::TaskRegistry;
pub use source::SourceHandle;
pub use task::{RunningTask, TaskState, TerminalError};
