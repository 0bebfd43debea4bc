// SPDX-License-Identifier: GPL-2.0
//
// coregov: governor metrics
//
// Cumulative counters and the latest per-tick observations, published by the
// governor after every tick and served as JSON by the control API.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// Governor state after the last tick.
    pub state: String,
    /// Last polled load average, hundredths of runnable threads.
    pub avg_runnable: u64,
    /// Load-implied target core count from the last tick.
    pub required_cores: u64,
    pub online_cores: u64,
    pub ticks: u64,
    pub up_transitions: u64,
    pub down_transitions: u64,
    /// Ticks skipped because the governor lock was contended.
    pub skipped_busy: u64,
    /// Ticks skipped inside a resync backoff window.
    pub skipped_backoff: u64,
    pub resync_pauses: u64,
    pub failed_transitions: u64,
    pub suspended: bool,
}

impl Metrics {
    pub fn format<W: Write>(&self, w: &mut W) -> Result<()> {
        let now = Local::now();
        writeln!(w, "┌─ coregov {} ─", now.format("%H:%M:%S"))?;
        writeln!(
            w,
            "│ {}  avg {:>3}.{:02}  req {}  online {}",
            self.state,
            self.avg_runnable / 100,
            self.avg_runnable % 100,
            self.required_cores,
            self.online_cores
        )?;
        writeln!(
            w,
            "│ ticks {:>6}  up {:>4}  down {:>4}  busy {:>4}  backoff {:>4}",
            self.ticks, self.up_transitions, self.down_transitions, self.skipped_busy,
            self.skipped_backoff
        )?;
        if self.resync_pauses > 0 || self.failed_transitions > 0 {
            writeln!(
                w,
                "│ resync {:>4}  failed {:>4}",
                self.resync_pauses, self.failed_transitions
            )?;
        }
        if self.suspended {
            writeln!(w, "│ suspended")?;
        }
        writeln!(w, "└─")?;
        Ok(())
    }
}

/// Shared snapshot storage between the governor thread and the control API.
pub struct StatusStore {
    metrics: RwLock<Option<Arc<Metrics>>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(None),
        }
    }

    pub fn publish(&self, metrics: Metrics) {
        if let Ok(mut m) = self.metrics.write() {
            *m = Some(Arc::new(metrics));
        }
    }

    pub fn latest(&self) -> Option<Arc<Metrics>> {
        self.metrics.read().ok().and_then(|m| m.as_ref().map(Arc::clone))
    }
}

/// Print the latest snapshot every `intv` until shutdown.
pub fn monitor(store: Arc<StatusStore>, intv: Duration, shutdown: Arc<AtomicBool>) -> Result<()> {
    while !shutdown.load(Ordering::Relaxed) {
        if let Some(m) = store.latest() {
            m.format(&mut std::io::stdout())?;
        }
        std::thread::sleep(intv);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_includes_counters() {
        let m = Metrics {
            state: "idle".into(),
            avg_runnable: 234,
            required_cores: 2,
            online_cores: 3,
            ticks: 41,
            up_transitions: 5,
            down_transitions: 3,
            ..Default::default()
        };
        let mut out = Vec::new();
        m.format(&mut out).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert!(s.contains("avg   2.34"));
        assert!(s.contains("up    5"));
    }

    #[test]
    fn store_publishes_latest() {
        let store = StatusStore::new();
        assert!(store.latest().is_none());
        store.publish(Metrics {
            ticks: 1,
            ..Default::default()
        });
        store.publish(Metrics {
            ticks: 2,
            ..Default::default()
        });
        assert_eq!(store.latest().unwrap().ticks, 2);
    }
}
