// SPDX-License-Identifier: GPL-2.0
//
// coregov: hotplug actuator
//
// Picks the victim/beneficiary core for a scaling decision and performs the
// transition. Keeps its own per-core bookkeeping (CoreRecord) and refuses to
// act when that bookkeeping disagrees with the platform's actual state; a
// disagreement arms a backoff and forces a resync before the next decision.

use log::{info, warn};

use crate::platform::CpuPlatform;

#[derive(Debug, Clone, Copy)]
pub struct CoreRecord {
    pub online: bool,
    pub online_since_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuationOutcome {
    /// A core changed state.
    Transitioned(usize),
    /// Bookkeeping disagreed with the platform; backoff armed.
    ResyncPause,
    /// The platform refused the transition; retried on a later tick.
    Failed,
    /// Nothing eligible to act on.
    NoCandidate,
}

pub struct HotplugActuator {
    records: Vec<CoreRecord>,
    backoff_ms: u64,
    paused_until_ms: Option<u64>,
    needs_resync: bool,
}

impl HotplugActuator {
    pub fn new(nr_cores: usize, backoff_ms: u64) -> Self {
        Self {
            records: vec![
                CoreRecord {
                    online: true,
                    online_since_ms: 0,
                };
                nr_cores
            ],
            backoff_ms,
            paused_until_ms: None,
            // Records start optimistic; the first tick resyncs them from
            // the platform before any decision acts.
            needs_resync: true,
        }
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    pub fn in_backoff(&self, now_ms: u64) -> bool {
        match self.paused_until_ms {
            Some(deadline) => now_ms < deadline,
            None => false,
        }
    }

    #[allow(dead_code)]
    pub fn record(&self, core: usize) -> Option<&CoreRecord> {
        self.records.get(core)
    }

    /// Re-prime every record from the platform's actual online state.
    pub fn resync(&mut self, platform: &dyn CpuPlatform, now_ms: u64) {
        for (core, rec) in self.records.iter_mut().enumerate() {
            let online = platform.core_online(core);
            if online && !rec.online {
                rec.online_since_ms = now_ms;
            }
            rec.online = online;
        }
        self.needs_resync = false;
        self.paused_until_ms = None;
    }

    /// Slowest actually-online core by reported clock rate. Ties break
    /// toward the higher index; the boot core is never eligible.
    fn slowest_core(&self, platform: &dyn CpuPlatform) -> Option<usize> {
        let mut victim = None;
        let mut slow_rate = u64::MAX;
        for core in 1..self.records.len() {
            if !platform.core_online(core) {
                continue;
            }
            let rate = platform.clock_rate_khz(core);
            if rate <= slow_rate {
                victim = Some(core);
                slow_rate = rate;
            }
        }
        victim
    }

    fn first_offline_core(&self, platform: &dyn CpuPlatform) -> Option<usize> {
        (0..self.records.len()).find(|&core| !platform.core_online(core))
    }

    fn pause(&mut self, now_ms: u64) -> ActuationOutcome {
        self.paused_until_ms = Some(now_ms + self.backoff_ms);
        self.needs_resync = true;
        warn!("core state out of sync, pausing hotplug for {} ms", self.backoff_ms);
        ActuationOutcome::ResyncPause
    }

    pub fn scale_down(&mut self, platform: &dyn CpuPlatform, now_ms: u64) -> ActuationOutcome {
        let Some(core) = self.slowest_core(platform) else {
            return ActuationOutcome::NoCandidate;
        };
        let believed = self.records[core].online;
        let actual = platform.core_online(core);
        if believed && actual {
            match platform.set_core_online(core, false) {
                Ok(()) => {
                    let on_time = now_ms.saturating_sub(self.records[core].online_since_ms);
                    self.records[core].online = false;
                    info!("core {} offline after {} ms", core, on_time);
                    ActuationOutcome::Transitioned(core)
                }
                Err(e) => {
                    warn!("failed to offline core {}: {}", core, e);
                    ActuationOutcome::Failed
                }
            }
        } else if believed != actual {
            self.pause(now_ms)
        } else {
            ActuationOutcome::NoCandidate
        }
    }

    pub fn scale_up(&mut self, platform: &dyn CpuPlatform, now_ms: u64) -> ActuationOutcome {
        let Some(core) = self.first_offline_core(platform) else {
            return ActuationOutcome::NoCandidate;
        };
        let believed = self.records[core].online;
        let actual = platform.core_online(core);
        if !believed && !actual {
            match platform.set_core_online(core, true) {
                Ok(()) => {
                    self.records[core].online = true;
                    self.records[core].online_since_ms = now_ms;
                    info!("core {} online", core);
                    ActuationOutcome::Transitioned(core)
                }
                Err(e) => {
                    warn!("failed to online core {}: {}", core, e);
                    ActuationOutcome::Failed
                }
            }
        } else if believed != actual {
            self.pause(now_ms)
        } else {
            ActuationOutcome::NoCandidate
        }
    }

    /// Suspend path: force every non-boot core offline, bypassing the
    /// decision engine.
    pub fn force_non_boot_offline(&mut self, platform: &dyn CpuPlatform) {
        for core in 1..self.records.len() {
            if platform.core_online(core) {
                if let Err(e) = platform.set_core_online(core, false) {
                    warn!("suspend: failed to offline core {}: {}", core, e);
                    continue;
                }
            }
            self.records[core].online = false;
        }
    }

    /// Resume path: bring cores 1..limit online immediately and stamp them.
    pub fn force_online_up_to(&mut self, platform: &dyn CpuPlatform, limit: usize, now_ms: u64) {
        for core in 1..limit.min(self.records.len()) {
            if !platform.core_online(core) {
                if let Err(e) = platform.set_core_online(core, true) {
                    warn!("resume: failed to online core {}: {}", core, e);
                    continue;
                }
            }
            self.records[core].online = true;
            self.records[core].online_since_ms = now_ms;
        }
    }
}
