// src/replay/live.rs

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

use crate::clock::LogicalClock;
use crate::engine::SourceHandle;
use crate::model::Timestamp;

/// Drive `clock` from wall-clock time and send a barrier to `source` every
/// `tick`, until the source's input is closed.
///
/// Batches are routed separately (e.g. from stdin); this only keeps windows
/// closing while data arrives in real time.
pub fn spawn_live(clock: LogicalClock, source: SourceHandle, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = Timestamp::wall_clock();
            clock.set(now);
            if source.barrier(clock.now()).await.is_err() {
                debug!(task = %source.task(), "input closed; live driver exiting");
                break;
            }
        }
    })
}
