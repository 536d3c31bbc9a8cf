// src/pipeline/message.rs

//! What travels over the bounded queues between stages.

use tokio::sync::mpsc;
use tracing::debug;

use crate::model::{Batch, Timestamp};

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Batch(Batch),
    /// No further data with time earlier than this will arrive on the port.
    Barrier(Timestamp),
    /// The upstream on this port has finished.
    Close,
}

/// A message tagged with the receiving stage's input port.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub port: usize,
    pub message: Message,
}

/// Sending half of one edge.
#[derive(Debug, Clone)]
pub struct Outlet {
    target: String,
    port: usize,
    tx: mpsc::Sender<Envelope>,
}

impl Outlet {
    pub fn new(target: impl Into<String>, port: usize, tx: mpsc::Sender<Envelope>) -> Self {
        Self {
            target: target.into(),
            port,
            tx,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Send with backpressure. Returns `false` if the downstream stage has
    /// already gone away; its own error (if any) is reported by the task.
    pub async fn send(&self, message: Message) -> bool {
        let envelope = Envelope {
            port: self.port,
            message,
        };
        if self.tx.send(envelope).await.is_err() {
            debug!(target_stage = %self.target, port = self.port, "downstream stage is gone");
            return false;
        }
        true
    }
}

/// Combined low watermark over a stage's input ports.
///
/// Each open port contributes the latest barrier it delivered; closed ports
/// no longer hold the watermark back.
#[derive(Debug, Clone)]
pub struct Watermarks {
    ports: Vec<Option<Timestamp>>,
    open: Vec<bool>,
    emitted: Option<Timestamp>,
}

impl Watermarks {
    pub fn new(ports: usize) -> Self {
        Self {
            ports: vec![None; ports],
            open: vec![true; ports],
            emitted: None,
        }
    }

    /// Record a barrier; returns the new combined watermark if it advanced.
    pub fn observe(&mut self, port: usize, t: Timestamp) -> Option<Timestamp> {
        let slot = &mut self.ports[port];
        if slot.is_none_or(|prev| t > prev) {
            *slot = Some(t);
        }
        self.advance()
    }

    /// Mark a port closed; returns the new combined watermark if it advanced.
    pub fn close(&mut self, port: usize) -> Option<Timestamp> {
        self.open[port] = false;
        self.advance()
    }

    pub fn all_closed(&self) -> bool {
        self.open.iter().all(|open| !open)
    }

    pub fn is_open(&self, port: usize) -> bool {
        self.open[port]
    }

    fn combined(&self) -> Option<Timestamp> {
        let mut min: Option<Timestamp> = None;
        for (mark, open) in self.ports.iter().zip(self.open.iter()) {
            if !open {
                continue;
            }
            let mark = (*mark)?;
            min = Some(min.map_or(mark, |m| m.min(mark)));
        }
        // Once every port is closed, the highest mark seen stands.
        if min.is_none() {
            return self.ports.iter().flatten().max().copied();
        }
        min
    }

    fn advance(&mut self) -> Option<Timestamp> {
        let next = self.combined()?;
        if self.emitted.is_none_or(|prev| next > prev) {
            self.emitted = Some(next);
            return Some(next);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: i64) -> Timestamp {
        Timestamp::from_secs(s)
    }

    #[test]
    fn single_port_advances_monotonically() {
        let mut marks = Watermarks::new(1);
        assert_eq!(marks.observe(0, ts(10)), Some(ts(10)));
        assert_eq!(marks.observe(0, ts(5)), None);
        assert_eq!(marks.observe(0, ts(10)), None);
        assert_eq!(marks.observe(0, ts(20)), Some(ts(20)));
    }

    #[test]
    fn combined_mark_is_the_minimum_of_open_ports() {
        let mut marks = Watermarks::new(2);
        assert_eq!(marks.observe(0, ts(20)), None);
        assert_eq!(marks.observe(1, ts(10)), Some(ts(10)));
        assert_eq!(marks.observe(1, ts(30)), Some(ts(20)));
    }

    #[test]
    fn closing_a_lagging_port_releases_the_mark() {
        let mut marks = Watermarks::new(2);
        marks.observe(0, ts(20));
        assert_eq!(marks.close(1), Some(ts(20)));
        assert!(!marks.all_closed());
        assert_eq!(marks.close(0), None);
        assert!(marks.all_closed());
    }

    #[tokio::test]
    async fn outlet_reports_dropped_receiver() {
        let (tx, rx) = mpsc::channel(1);
        let outlet = Outlet::new("down", 0, tx);
        drop(rx);
        assert!(!outlet.send(Message::Close).await);
    }
}
