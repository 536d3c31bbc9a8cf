// tests/alert_flapping.rs

mod common;
use crate::common::builders::{BatchBuilder, secs};
use crate::common::{RecordingAlertHandler, init_tracing, registry_with_alerts, with_timeout};

use std::sync::Arc;

use batchflow::blueprint::{
    AlertNode, Blueprint, BlueprintBuilder, GroupBy, MapFn, MapReduceNode, NodeKind, ReduceFn,
    SourceNode,
};
use batchflow::clock::LogicalClock;
use batchflow::engine::AlertLevel;
use batchflow::errors::{EngineError, StageFault};
use batchflow::expr::{ExprError, Expression};
use batchflow::model::{Batch, Timestamp, Value};
use batchflow::replay::{Replay, ReplayMode};

fn alert_blueprint(name: &str, flapping: Option<(f64, f64)>) -> Blueprint {
    let mut alert = AlertNode::when(Expression::parse("p10 < 30").unwrap());
    if let Some((low, high)) = flapping {
        alert = alert.with_flapping(low, high);
    }
    BlueprintBuilder::new(name)
        .source("cpu", SourceNode::measurement("cpu"))
        .alert("alert", "cpu", alert)
        .cache("latest", "alert", None)
        .build()
}

/// One row per second starting at `start`, with the given `p10` values.
fn p10(start: i64, values: &[f64]) -> Batch {
    let mut b = BatchBuilder::new("cpu").tag("host", "serverA").columns(&["p10"]);
    for (i, v) in values.iter().enumerate() {
        b = b.row(start + i as i64, vec![Value::Float(*v)]);
    }
    b.build()
}

fn oscillating(n: usize) -> Vec<f64> {
    (0..n).map(|i| if i % 2 == 0 { 10.0 } else { 50.0 }).collect()
}

#[tokio::test]
async fn flapping_signal_is_silenced_until_it_settles() {
    init_tracing();
    let clock = LogicalClock::epoch();
    let recorder = RecordingAlertHandler::new();
    let registry = registry_with_alerts(&clock, Arc::new(recorder.clone()));
    let task = registry
        .start_task(alert_blueprint("flappy", Some((25.0, 50.0))))
        .unwrap();

    let batches = vec![p10(0, &oscillating(10)), p10(10, &[50.0; 25]), p10(35, &[10.0])];
    let done = Replay::new(clock.clone(), ReplayMode::Driven).replay_batches(batches, &task);
    with_timeout(done).await.unwrap().unwrap();
    with_timeout(task.wait()).await.unwrap();

    assert_eq!(recorder.levels(), vec![AlertLevel::Alerting, AlertLevel::Alerting]);
    let events = recorder.events();
    assert_eq!(events[0].tags["host"], "serverA");
    assert_eq!(events[1].fields["p10"], Value::Float(10.0));

    let (_, stats) = task
        .stats()
        .into_iter()
        .find(|(id, _)| id == "alert")
        .unwrap();
    assert_eq!(stats.alerts_sent, 2);
    assert_eq!(stats.alerts_suppressed, 9);
}

#[tokio::test]
async fn without_flapping_every_transition_notifies() {
    init_tracing();
    let clock = LogicalClock::epoch();
    let recorder = RecordingAlertHandler::new();
    let registry = registry_with_alerts(&clock, Arc::new(recorder.clone()));
    let task = registry.start_task(alert_blueprint("plain", None)).unwrap();

    let done = Replay::new(clock.clone(), ReplayMode::Driven)
        .replay_batches(vec![p10(0, &oscillating(6))], &task);
    with_timeout(done).await.unwrap().unwrap();
    with_timeout(task.wait()).await.unwrap();

    assert_eq!(recorder.events().len(), 6);
}

#[tokio::test]
async fn delivery_failures_do_not_fail_the_task() {
    init_tracing();
    let clock = LogicalClock::epoch();
    let recorder = RecordingAlertHandler::failing();
    let registry = registry_with_alerts(&clock, Arc::new(recorder.clone()));
    let task = registry.start_task(alert_blueprint("unreachable", None)).unwrap();

    let done = Replay::new(clock.clone(), ReplayMode::Driven)
        .replay_batches(vec![p10(0, &[10.0, 50.0])], &task);
    with_timeout(done).await.unwrap().unwrap();

    assert!(with_timeout(task.wait()).await.is_ok());
    assert_eq!(recorder.events().len(), 2);
    assert!(task.output("latest").is_ok());
}

#[tokio::test]
async fn stage_error_becomes_the_terminal_error_and_keeps_cached_output() {
    init_tracing();
    let clock = LogicalClock::epoch();
    let registry = registry_with_alerts(&clock, Arc::new(RecordingAlertHandler::new()));
    let blueprint = BlueprintBuilder::new("broken")
        .source("cpu", SourceNode::measurement("cpu"))
        .cache("raw", "cpu", None)
        .alert("alert", "cpu", AlertNode::when(Expression::parse("p10 < 30").unwrap()))
        .build();
    let task = registry.start_task(blueprint).unwrap();

    let without_p10 = BatchBuilder::new("cpu")
        .columns(&["idle"])
        .row(1, vec![Value::Float(3.0)])
        .build();
    let done = Replay::new(clock.clone(), ReplayMode::Driven)
        .replay_batches(vec![p10(0, &[50.0]), without_p10], &task);
    with_timeout(done).await.unwrap().unwrap();

    let err = with_timeout(task.wait()).await.unwrap_err();
    match err.as_ref() {
        EngineError::Stage { stage, source } => {
            assert_eq!(stage, "alert");
            assert_eq!(
                source,
                &StageFault::Expr(ExprError::UnknownIdent("p10".to_string()))
            );
        }
        other => panic!("expected a stage error, got {other:?}"),
    }

    // The sibling cache drained and still serves the last batch it saw.
    let raw = task.output("raw").unwrap();
    assert_eq!(raw.series.len(), 2);
}

/// One row per second in `range` for `host`, valued by `value(t)`.
fn idle(host: &str, range: std::ops::Range<i64>, value: impl Fn(i64) -> f64) -> Batch {
    let mut b = BatchBuilder::new("cpu").tag("host", host).columns(&["value"]);
    for t in range {
        b = b.row(t, vec![Value::Float(value(t))]);
    }
    b.build()
}

#[tokio::test]
async fn windowed_percentile_of_one_host_drives_the_alert() {
    init_tracing();
    let clock = LogicalClock::epoch();
    let recorder = RecordingAlertHandler::new();
    let registry = registry_with_alerts(&clock, Arc::new(recorder.clone()));

    let p10 = MapReduceNode {
        map: MapFn::Identity,
        reduce: ReduceFn::Percentile(10.0),
        field: Some("value".into()),
        alias: Some("p10".into()),
    };
    let blueprint = BlueprintBuilder::new("batching_alert")
        .source(
            "cpu",
            SourceNode::measurement("cpu")
                .with_filter(Expression::parse("host = 'serverA'").unwrap())
                .with_period(secs(10), GroupBy::default().with_bucket(secs(2))),
        )
        .node("p10", NodeKind::MapReduce(p10), &["cpu"])
        .alert("alert", "p10", AlertNode::when(Expression::parse("p10 < 30").unwrap()))
        .cache("latest", "alert", None)
        .build();
    let task = registry.start_task(blueprint).unwrap();

    // serverB is filtered out; it would alert from its first bucket on.
    let batches = vec![
        idle("serverA", 0..10, |t| 40.0 + t as f64),
        idle("serverB", 0..10, |_| 10.0),
        idle("serverA", 10..20, |t| t as f64 - 5.0),
        idle("serverB", 10..20, |_| 10.0),
        idle("serverA", 20..21, |_| 50.0),
    ];
    let done = Replay::new(clock.clone(), ReplayMode::Driven).replay_batches(batches, &task);
    with_timeout(done).await.unwrap().unwrap();
    with_timeout(task.wait()).await.unwrap();

    let events = recorder.events();
    assert_eq!(recorder.levels(), vec![AlertLevel::Alerting]);
    assert_eq!(events[0].time, Timestamp::from_secs(11));
    assert_eq!(events[0].fields["p10"], Value::Float(5.0));

    let json = task.output("latest").unwrap().to_json().unwrap();
    assert_eq!(
        json,
        concat!(
            r#"{"series":[{"name":"cpu","tags":{"host":"serverA"},"columns":["time","p10"],"#,
            r#""values":[["1970-01-01T00:00:19Z",13.0]]}]}"#
        )
    );
}
