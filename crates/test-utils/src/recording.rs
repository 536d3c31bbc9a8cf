use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use batchflow::engine::{AlertEvent, AlertHandler, AlertLevel};

/// Alert handler that records every delivered notification.
///
/// Clones share the same record, so a test can keep one clone and hand
/// another to the registry.
#[derive(Debug, Clone, Default)]
pub struct RecordingAlertHandler {
    delivered: Arc<Mutex<Vec<AlertEvent>>>,
    fail: bool,
}

impl RecordingAlertHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler that records and then reports a delivery failure.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<AlertEvent> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn levels(&self) -> Vec<AlertLevel> {
        self.events().iter().map(|e| e.level).collect()
    }
}

impl AlertHandler for RecordingAlertHandler {
    fn deliver<'a>(
        &'a self,
        event: &'a AlertEvent,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.delivered.lock().unwrap().push(event.clone());
            if self.fail {
                anyhow::bail!("notification endpoint unavailable");
            }
            Ok(())
        })
    }
}
