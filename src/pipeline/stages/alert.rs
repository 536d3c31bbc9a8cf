// src/pipeline/stages/alert.rs

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::blueprint::{AlertNode, Flapping};
use crate::clock::LogicalClock;
use crate::engine::notify::{AlertEvent, AlertLevel};
use crate::errors::StageFault;
use crate::expr::Expression;
use crate::model::{Batch, GroupKey, Row, Value};
use crate::pipeline::metrics::StageCounters;

use super::Emitted;

/// Flapping detector for one group: a bounded history of levels and the
/// current flapping flag.
#[derive(Debug, Clone)]
pub struct FlapDetector {
    history: VecDeque<AlertLevel>,
    capacity: usize,
    thresholds: Flapping,
    flapping: bool,
}

impl FlapDetector {
    pub fn new(thresholds: Flapping, capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            thresholds,
            flapping: false,
        }
    }

    pub fn is_flapping(&self) -> bool {
        self.flapping
    }

    /// Percentage of consecutive evaluations in the history whose level
    /// differs from the previous one.
    pub fn change_rate(&self) -> f64 {
        if self.history.len() < 2 {
            return 0.0;
        }
        let changes = self
            .history
            .iter()
            .zip(self.history.iter().skip(1))
            .filter(|(a, b)| a != b)
            .count();
        changes as f64 / (self.history.len() - 1) as f64 * 100.0
    }

    /// Record one evaluation and update the flapping flag: it turns on when
    /// the rate reaches `high` and off again once it decays to `low`.
    pub fn record(&mut self, level: AlertLevel) -> bool {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(level);

        let rate = self.change_rate();
        if self.flapping && rate <= self.thresholds.low {
            self.flapping = false;
        } else if !self.flapping && rate >= self.thresholds.high {
            self.flapping = true;
        }
        self.flapping
    }
}

#[derive(Debug)]
struct GroupState {
    level: AlertLevel,
    flap: Option<FlapDetector>,
}

/// Evaluates a predicate on every row and tracks OK/ALERTING per group.
///
/// Each level change yields one notification unless the group is flapping,
/// in which case it is counted as suppressed. Batches pass through
/// unchanged.
#[derive(Debug)]
pub struct AlertOp {
    task: String,
    node: String,
    predicate: Expression,
    flapping: Option<Flapping>,
    history: usize,
    post: Option<String>,
    states: HashMap<GroupKey, GroupState>,
    clock: LogicalClock,
    counters: Arc<StageCounters>,
}

impl AlertOp {
    pub fn new(
        task: &str,
        node: &str,
        spec: &AlertNode,
        default_history: usize,
        clock: LogicalClock,
        counters: Arc<StageCounters>,
    ) -> Self {
        Self {
            task: task.to_string(),
            node: node.to_string(),
            predicate: spec.predicate.clone(),
            flapping: spec.flapping,
            history: spec.history.unwrap_or(default_history),
            post: spec.post.clone(),
            states: HashMap::new(),
            clock,
            counters,
        }
    }

    pub fn level_of(&self, key: &GroupKey) -> Option<AlertLevel> {
        self.states.get(key).map(|s| s.level)
    }

    pub fn on_batch(&mut self, batch: Batch) -> Result<Emitted, StageFault> {
        let key = batch.group_key();
        let mut alerts = Vec::new();

        for row in &batch.rows {
            let level = match self.predicate.eval_row(&batch, row)? {
                Value::Bool(true) => AlertLevel::Alerting,
                Value::Bool(false) => AlertLevel::Ok,
                other => return Err(StageFault::NonBoolean(other.to_string())),
            };
            if let Some(event) = self.evaluate(&key, &batch, row, level) {
                alerts.push(event);
            }
        }

        Ok(Emitted {
            batches: vec![batch],
            alerts,
        })
    }

    fn evaluate(
        &mut self,
        key: &GroupKey,
        batch: &Batch,
        row: &Row,
        level: AlertLevel,
    ) -> Option<AlertEvent> {
        let flapping_cfg = self.flapping;
        let capacity = self.history;
        let state = self.states.entry(key.clone()).or_insert_with(|| GroupState {
            level: AlertLevel::Ok,
            flap: flapping_cfg.map(|t| FlapDetector::new(t, capacity)),
        });

        let flapping = match state.flap.as_mut() {
            Some(detector) => detector.record(level),
            None => false,
        };

        if level == state.level {
            return None;
        }
        let previous = state.level;
        state.level = level;

        if flapping {
            debug!(group = %key, %previous, %level, "suppressing transition while flapping");
            self.counters.record_alert_suppressed();
            return None;
        }

        self.counters.record_alert_sent();
        let fields: BTreeMap<String, Value> = batch
            .columns
            .iter()
            .cloned()
            .zip(row.values.iter().cloned())
            .collect();

        Some(AlertEvent {
            task: self.task.clone(),
            node: self.node.clone(),
            name: key.name.clone(),
            tags: key.tags.clone(),
            previous,
            level,
            time: row.time,
            observed_at: self.clock.now(),
            fields,
            target: self.post.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Tags, Timestamp};

    fn batch(values: &[f64]) -> Batch {
        let rows = values
            .iter()
            .enumerate()
            .map(|(i, v)| Row::new(Timestamp::from_secs(i as i64), vec![Value::Float(*v)]))
            .collect();
        Batch::new("cpu", Tags::new(), vec!["p10".into()]).with_rows(rows)
    }

    fn op(flapping: Option<(f64, f64)>, counters: Arc<StageCounters>) -> AlertOp {
        let mut spec = AlertNode::when(Expression::parse("p10 < 30").unwrap());
        if let Some((low, high)) = flapping {
            spec = spec.with_flapping(low, high);
        }
        AlertOp::new("t", "alert", &spec, 21, LogicalClock::epoch(), counters)
    }

    #[test]
    fn notifies_on_each_transition() {
        let counters = Arc::new(StageCounters::new());
        let mut alert = op(None, counters.clone());
        let out = alert.on_batch(batch(&[50.0, 10.0, 12.0, 40.0])).unwrap();

        let levels: Vec<_> = out.alerts.iter().map(|a| (a.previous, a.level)).collect();
        assert_eq!(
            levels,
            vec![
                (AlertLevel::Ok, AlertLevel::Alerting),
                (AlertLevel::Alerting, AlertLevel::Ok)
            ]
        );
        assert_eq!(out.alerts[0].time, Timestamp::from_secs(1));
        assert_eq!(out.alerts[0].fields["p10"], Value::Float(10.0));
        assert_eq!(out.batches.len(), 1);
        assert_eq!(counters.snapshot().alerts_sent, 2);
    }

    #[test]
    fn detector_rate_counts_changes_between_neighbours() {
        let mut d = FlapDetector::new(Flapping { low: 25.0, high: 50.0 }, 5);
        d.record(AlertLevel::Ok);
        assert_eq!(d.change_rate(), 0.0);
        d.record(AlertLevel::Alerting);
        assert_eq!(d.change_rate(), 100.0);
        d.record(AlertLevel::Alerting);
        assert_eq!(d.change_rate(), 50.0);
        assert!(d.is_flapping());
    }

    #[test]
    fn flapping_suppresses_until_rate_decays() {
        let counters = Arc::new(StageCounters::new());
        let mut alert = op(Some((25.0, 50.0)), counters.clone());

        // Oscillate: alert, ok, alert, ok, ...
        let oscillating: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 10.0 } else { 50.0 }).collect();
        let out = alert.on_batch(batch(&oscillating)).unwrap();
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(counters.snapshot().alerts_suppressed, 9);

        // Stay OK long enough for the history to settle.
        let calm = vec![50.0; 25];
        assert!(alert.on_batch(batch(&calm)).unwrap().alerts.is_empty());

        let out = alert.on_batch(batch(&[10.0])).unwrap();
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.alerts[0].level, AlertLevel::Alerting);
    }

    #[test]
    fn detector_stays_flapping_inside_the_band() {
        use AlertLevel::{Alerting as A, Ok as O};
        let mut d = FlapDetector::new(Flapping { low: 25.0, high: 50.0 }, 11);
        for level in [A, O, A, O, A, O, O, O, O, O, O, O] {
            d.record(level);
        }
        assert_eq!(d.change_rate(), 40.0);
        assert!(d.is_flapping());

        assert!(d.record(A));
        assert_eq!(d.change_rate(), 40.0);
        assert!(d.record(A));
        assert_eq!(d.change_rate(), 30.0);
        assert!(!d.record(A));
        assert_eq!(d.change_rate(), 20.0);
    }

    #[test]
    fn transitions_inside_the_band_stay_suppressed() {
        let counters = Arc::new(StageCounters::new());
        let spec = AlertNode::when(Expression::parse("p10 < 30").unwrap()).with_flapping(25.0, 50.0);
        let mut alert = AlertOp::new("t", "a", &spec, 11, LogicalClock::epoch(), counters.clone());

        let out = alert.on_batch(batch(&[10.0, 50.0, 10.0, 50.0, 10.0, 50.0])).unwrap();
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(counters.snapshot().alerts_suppressed, 5);

        // Change rate falls to 40%: below `high`, still above `low`.
        assert!(alert.on_batch(batch(&[50.0; 6])).unwrap().alerts.is_empty());
        assert!(alert.on_batch(batch(&[10.0])).unwrap().alerts.is_empty());
        assert_eq!(counters.snapshot().alerts_suppressed, 6);

        // 30%, then 20%: flapping ends without a transition.
        assert!(alert.on_batch(batch(&[10.0, 10.0])).unwrap().alerts.is_empty());

        let out = alert.on_batch(batch(&[50.0])).unwrap();
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(
            (out.alerts[0].previous, out.alerts[0].level),
            (AlertLevel::Alerting, AlertLevel::Ok)
        );
        let stats = counters.snapshot();
        assert_eq!((stats.alerts_sent, stats.alerts_suppressed), (2, 6));
    }

    #[test]
    fn non_boolean_predicate_is_a_fault() {
        let spec = AlertNode::when(Expression::parse("p10 + 1").unwrap());
        let mut alert = AlertOp::new(
            "t",
            "a",
            &spec,
            21,
            LogicalClock::epoch(),
            Arc::new(StageCounters::new()),
        );
        assert!(matches!(alert.on_batch(batch(&[1.0])), Err(StageFault::NonBoolean(_))));
    }
}
