// src/pipeline/mod.rs

//! Compiled pipelines.
//!
//! - [`compiler`] checks a [`crate::blueprint::Blueprint`] and orders it
//!   into a [`PipelinePlan`].
//! - [`plan`] turns a plan into stages connected by bounded queues.
//! - [`runner`] is the async loop each stage runs in.
//! - [`stages`] holds the synchronous operator state machines.

pub mod compiler;
pub mod message;
pub mod metrics;
pub mod plan;
pub mod runner;
pub mod stages;

pub use compiler::compile;
pub use message::{Envelope, Message, Outlet, Watermarks};
pub use metrics::{StageCounters, StageStats};
pub use plan::{CompiledPipeline, PipelinePlan, SourceInlet, StageContext, StageSpec};
pub use runner::Stage;
