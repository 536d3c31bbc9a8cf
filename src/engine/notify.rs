// src/engine/notify.rs

//! Alert delivery abstraction.
//!
//! Alert stages hand every permitted state transition to an `AlertHandler`
//! instead of talking to a transport directly. Production uses
//! [`LogAlertHandler`]; tests plug in a recorder.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tracing::{info, warn};

use crate::model::{Tags, Timestamp, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Ok,
    Alerting,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Ok => f.write_str("OK"),
            AlertLevel::Alerting => f.write_str("ALERTING"),
        }
    }
}

/// One state transition of one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub task: String,
    pub node: String,
    pub name: String,
    pub tags: Tags,
    pub previous: AlertLevel,
    pub level: AlertLevel,
    /// Timestamp of the row that caused the transition.
    pub time: Timestamp,
    /// Logical time at which the transition was observed.
    pub observed_at: Timestamp,
    pub fields: BTreeMap<String, Value>,
    /// Notification target configured on the node, if any.
    pub target: Option<String>,
}

/// Receives alert notifications.
pub trait AlertHandler: Send + Sync {
    fn deliver<'a>(
        &'a self,
        event: &'a AlertEvent,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

/// Writes every notification to the log as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertHandler;

impl AlertHandler for LogAlertHandler {
    fn deliver<'a>(
        &'a self,
        event: &'a AlertEvent,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let payload = serde_json::to_string(event)?;
            match event.level {
                AlertLevel::Alerting => warn!(
                    task = %event.task,
                    node = %event.node,
                    level = %event.level,
                    %payload,
                    "alert raised"
                ),
                AlertLevel::Ok => info!(
                    task = %event.task,
                    node = %event.node,
                    level = %event.level,
                    %payload,
                    "alert recovered"
                ),
            }
            Ok(())
        })
    }
}
