// SPDX-License-Identifier: GPL-2.0
//
// coregov: runnable-count feeder
//
// In-kernel deployments report per-core runnable deltas straight into the
// LoadTracker. As a userspace daemon the same signal is derived from
// /proc/stat's procs_running, sampled on a short period. The system-wide
// count lands on one slot; the averaging sums all slots, so the resulting
// system average is identical.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use log::debug;

use crate::load_avg::LoadTracker;

const FEED_PERIOD_MS: u64 = 25;

/// Parse the procs_running line out of /proc/stat contents.
fn parse_procs_running(stat: &str) -> Option<u64> {
    stat.lines()
        .find(|line| line.starts_with("procs_running"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}

pub struct RunqueueFeeder {
    handle: Option<JoinHandle<()>>,
}

impl RunqueueFeeder {
    pub fn spawn(tracker: Arc<LoadTracker>, shutdown: Arc<AtomicBool>) -> Result<Self> {
        let handle = std::thread::Builder::new()
            .name("coregov-rq".into())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    match fs::read_to_string("/proc/stat") {
                        Ok(stat) => {
                            if let Some(running) = parse_procs_running(&stat) {
                                // The feeder itself is running; don't count it.
                                tracker.set_runnable(0, running.saturating_sub(1));
                            }
                        }
                        Err(e) => debug!("reading /proc/stat: {}", e),
                    }
                    std::thread::sleep(Duration::from_millis(FEED_PERIOD_MS));
                }
            })
            .context("spawning runqueue feeder thread")?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
