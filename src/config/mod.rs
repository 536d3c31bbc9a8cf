// src/config/mod.rs

//! Pipeline file loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a pipeline file from disk (`loader.rs`).
//! - Turn the raw file into an [`EngineConfig`] plus a checked
//!   [`crate::blueprint::Blueprint`] (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_str};
pub use model::{EngineConfig, PipelineFile, RawNode, RawNodeKind, RawPipelineFile};
