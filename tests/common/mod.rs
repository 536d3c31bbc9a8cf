#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use batchflow::clock::LogicalClock;
use batchflow::config::EngineConfig;
use batchflow::engine::{AlertHandler, LogAlertHandler, TaskRegistry};

pub use batchflow_test_utils::builders;
pub use batchflow_test_utils::recording::RecordingAlertHandler;
pub use batchflow_test_utils::{init_tracing, with_timeout};

/// Path of a file under `tests/data`.
pub fn data_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn registry(clock: &LogicalClock) -> TaskRegistry {
    TaskRegistry::new(clock.clone(), EngineConfig::default(), Arc::new(LogAlertHandler))
}

pub fn registry_with_alerts(clock: &LogicalClock, alerts: Arc<dyn AlertHandler>) -> TaskRegistry {
    TaskRegistry::new(clock.clone(), EngineConfig::default(), alerts)
}
