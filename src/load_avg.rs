// SPDX-License-Identifier: GPL-2.0
//
// coregov: runnable-thread load averaging
//
// Keeps a time-weighted integral of each core's runnable count and turns it
// into one system-wide "average runnable threads" figure per poll. Reporters
// only ever touch their own core's slot, so scheduling-hot callers never
// contend with each other; the poll walks the slots one lock at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::platform::Clock;

#[derive(Default)]
struct CoreSlot {
    runnable: u64,
    last_update_ns: u64,
    prod_sum: u64,
}

impl CoreSlot {
    /// Fold the contribution of the current runnable count up to `now_ns`
    /// into the integral. The count and its timestamp always move together.
    fn fold(&mut self, now_ns: u64) {
        let span = now_ns.saturating_sub(self.last_update_ns);
        self.prod_sum += self.runnable * span;
        self.last_update_ns = now_ns;
    }
}

pub struct LoadTracker {
    slots: Vec<Mutex<CoreSlot>>,
    last_poll_ns: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl LoadTracker {
    pub fn new(nr_cores: usize, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ns();
        let slots = (0..nr_cores)
            .map(|_| {
                Mutex::new(CoreSlot {
                    runnable: 0,
                    last_update_ns: now,
                    prod_sum: 0,
                })
            })
            .collect();
        Self {
            slots,
            last_poll_ns: AtomicU64::new(now),
            clock,
        }
    }

    /// Inbound signal from the scheduler collaborator: a core's runnable
    /// count changed. `runnable` is the count before the change; the flag
    /// says which way it moved.
    //
    // No caller in this daemon: the /proc/stat feeder reports absolute
    // counts through set_runnable. This stays as the entry point for a
    // collaborator that reports per-core deltas.
    #[allow(dead_code)]
    pub fn report_runnable_delta(&self, core: usize, runnable: u64, increasing: bool) {
        let new_count = if increasing {
            runnable + 1
        } else {
            runnable.saturating_sub(1)
        };
        self.set_runnable(core, new_count);
    }

    /// Record an absolute runnable count for a core, folding the previous
    /// count's time-weighted contribution first.
    pub fn set_runnable(&self, core: usize, runnable: u64) {
        let Some(slot) = self.slots.get(core) else {
            debug!("runnable report for unknown core {}", core);
            return;
        };
        let mut slot = slot.lock().unwrap();
        slot.fold(self.clock.now_ns());
        slot.runnable = runnable;
    }

    /// Drain every core's integral and return the system-wide average
    /// runnable count since the previous poll, scaled by 100.
    ///
    /// Must not be called concurrently with itself; only the governor tick
    /// calls it. Returns 0 when no time has elapsed since the last poll.
    pub fn poll_average(&self) -> u64 {
        let now = self.clock.now_ns();
        let prev = self.last_poll_ns.load(Ordering::Relaxed);
        let elapsed = now.saturating_sub(prev);
        if elapsed == 0 {
            return 0;
        }
        self.last_poll_ns.store(now, Ordering::Relaxed);

        let mut total: u64 = 0;
        for slot in &self.slots {
            let mut slot = slot.lock().unwrap();
            slot.fold(now);
            total += slot.prod_sum;
            slot.prod_sum = 0;
        }

        total * 100 / elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::FakeClock;

    fn tracker(nr: usize) -> (Arc<FakeClock>, LoadTracker) {
        let clock = Arc::new(FakeClock::new());
        let tracker = LoadTracker::new(nr, clock.clone());
        (clock, tracker)
    }

    #[test]
    fn idle_system_averages_zero() {
        let (clock, t) = tracker(4);
        clock.advance_ms(100);
        assert_eq!(t.poll_average(), 0);
    }

    #[test]
    fn zero_elapsed_returns_zero() {
        let (clock, t) = tracker(2);
        t.set_runnable(0, 5);
        clock.advance_ms(100);
        assert_eq!(t.poll_average(), 500);
        // Same instant again: divide-by-zero guard.
        assert_eq!(t.poll_average(), 0);
    }

    #[test]
    fn constant_load_yields_exact_average() {
        let (clock, t) = tracker(1);
        t.set_runnable(0, 2);
        clock.advance_ms(100);
        // Two runnable threads for the whole window: avg x100 == 200.
        assert_eq!(t.poll_average(), 200);
    }

    #[test]
    fn poll_drains_the_integral() {
        let (clock, t) = tracker(1);
        t.set_runnable(0, 3);
        clock.advance_ms(50);
        let first = t.poll_average();
        assert_eq!(first, 300);
        // The integral was consumed; a fresh window with the same count
        // reflects only that window, not a residue.
        clock.advance_ms(50);
        assert_eq!(t.poll_average(), 300);
    }

    #[test]
    fn delta_reporting_tracks_count() {
        let (clock, t) = tracker(1);
        // 0 -> 1 runnable.
        t.report_runnable_delta(0, 0, true);
        clock.advance_ms(40);
        // 1 -> 2 runnable.
        t.report_runnable_delta(0, 1, true);
        clock.advance_ms(60);
        // 40ms of 1 + 60ms of 2 over 100ms = 1.6 avg.
        assert_eq!(t.poll_average(), 160);
    }

    #[test]
    fn decrease_never_underflows() {
        let (clock, t) = tracker(1);
        t.report_runnable_delta(0, 0, false);
        clock.advance_ms(10);
        assert_eq!(t.poll_average(), 0);
    }

    #[test]
    fn cores_sum_into_one_average() {
        let (clock, t) = tracker(2);
        t.set_runnable(0, 1);
        t.set_runnable(1, 1);
        clock.advance_ms(100);
        assert_eq!(t.poll_average(), 200);
    }

    #[test]
    fn unknown_core_is_ignored() {
        let (clock, t) = tracker(1);
        t.set_runnable(9, 50);
        clock.advance_ms(10);
        assert_eq!(t.poll_average(), 0);
    }

    #[test]
    fn average_is_never_negative_typed() {
        // u64 everywhere; this documents the monotone-timestamp contract.
        let (clock, t) = tracker(1);
        t.set_runnable(0, 1);
        clock.advance_ns(1);
        let avg = t.poll_average();
        assert!(avg <= 100);
    }
}
