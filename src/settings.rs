// SPDX-License-Identifier: GPL-2.0
//
// coregov: live-tunable attributes
//
// The process-lifetime configuration surface. Reads are lock-free so the
// tick path never blocks on an attribute update from the control API.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::thresholds::PowerProfile;

pub const DEFAULT_SAMPLE_MS: u64 = 100;
pub const DEFAULT_BACKOFF_MS: u64 = 10_000;
pub const DEFAULT_HYSTERESIS: u64 = 4;
/// Initial delay after resume before the periodic tick restarts.
pub const RESUME_KICK_MS: u64 = 10;

pub struct Settings {
    enabled: AtomicBool,
    powersave_active: AtomicBool,
    /// Pass-through toggle for the charging collaborator; the governor only
    /// stores and exposes it.
    fast_charge: AtomicBool,
    sample_ms: AtomicU64,
    nr_run_hysteresis: AtomicU64,
    min_cores: AtomicUsize,
    max_cores: AtomicUsize,
    /// Possible core slots on this system; core bounds never exceed it.
    nr_possible: usize,
}

impl Settings {
    pub fn new(min_cores: usize, max_cores: usize, nr_possible: usize) -> Self {
        let max_cores = max_cores.clamp(1, nr_possible.max(1));
        Self {
            enabled: AtomicBool::new(true),
            powersave_active: AtomicBool::new(false),
            fast_charge: AtomicBool::new(false),
            sample_ms: AtomicU64::new(DEFAULT_SAMPLE_MS),
            nr_run_hysteresis: AtomicU64::new(DEFAULT_HYSTERESIS),
            min_cores: AtomicUsize::new(min_cores.clamp(1, max_cores)),
            max_cores: AtomicUsize::new(max_cores),
            nr_possible: nr_possible.max(1),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, v: bool) {
        self.enabled.store(v, Ordering::Relaxed);
    }

    pub fn profile(&self) -> PowerProfile {
        if self.powersave_active.load(Ordering::Relaxed) {
            PowerProfile::PowerSaving
        } else {
            PowerProfile::Normal
        }
    }

    pub fn set_powersave_active(&self, v: bool) {
        self.powersave_active.store(v, Ordering::Relaxed);
    }

    pub fn fast_charge(&self) -> bool {
        self.fast_charge.load(Ordering::Relaxed)
    }

    pub fn set_fast_charge(&self, v: bool) {
        self.fast_charge.store(v, Ordering::Relaxed);
    }

    pub fn sample_ms(&self) -> u64 {
        self.sample_ms.load(Ordering::Relaxed)
    }

    pub fn set_sample_ms(&self, v: u64) {
        self.sample_ms.store(v.max(1), Ordering::Relaxed);
    }

    pub fn hysteresis(&self) -> u64 {
        self.nr_run_hysteresis.load(Ordering::Relaxed)
    }

    pub fn set_hysteresis(&self, v: u64) {
        self.nr_run_hysteresis.store(v, Ordering::Relaxed);
    }

    pub fn min_cores(&self) -> usize {
        self.min_cores.load(Ordering::Relaxed)
    }

    pub fn max_cores(&self) -> usize {
        self.max_cores.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> AttrSnapshot {
        AttrSnapshot {
            enabled: Some(self.enabled()),
            powersave_active: Some(self.powersave_active.load(Ordering::Relaxed)),
            fast_charge: Some(self.fast_charge()),
            sample_ms: Some(self.sample_ms()),
            nr_run_hysteresis: Some(self.hysteresis()),
            min_cpus: Some(self.min_cores()),
            max_cpus: Some(self.max_cores()),
        }
    }

    pub fn set_max_cores(&self, v: usize) {
        let v = v.clamp(1, self.nr_possible);
        self.max_cores.store(v, Ordering::Relaxed);
        if self.min_cores() > v {
            self.min_cores.store(v, Ordering::Relaxed);
        }
    }

    pub fn set_min_cores(&self, v: usize) {
        self.min_cores.store(v.clamp(1, self.max_cores()), Ordering::Relaxed);
    }

    /// Apply the writable fields of a partial update. `enabled` is not
    /// applied here: `Governor::set_enabled` owns that flag and stores it
    /// only when the transition is actually accepted.
    pub fn apply(&self, attrs: &AttrSnapshot) {
        if let Some(v) = attrs.powersave_active {
            self.set_powersave_active(v);
        }
        if let Some(v) = attrs.fast_charge {
            self.set_fast_charge(v);
        }
        if let Some(v) = attrs.sample_ms {
            self.set_sample_ms(v);
        }
        if let Some(v) = attrs.nr_run_hysteresis {
            self.set_hysteresis(v);
        }
        if let Some(v) = attrs.max_cpus {
            self.set_max_cores(v);
        }
        if let Some(v) = attrs.min_cpus {
            self.set_min_cores(v);
        }
    }
}

/// JSON view of the attribute surface; absent fields are untouched on write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttrSnapshot {
    pub enabled: Option<bool>,
    pub powersave_active: Option<bool>,
    pub fast_charge: Option<bool>,
    pub sample_ms: Option<u64>,
    pub nr_run_hysteresis: Option<u64>,
    pub min_cpus: Option<usize>,
    pub max_cpus: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_update_touches_only_named_attrs() {
        let s = Settings::new(1, 4, 4);
        let update: AttrSnapshot =
            serde_json::from_str(r#"{"powersave_active": true, "sample_ms": 250}"#).unwrap();
        s.apply(&update);
        assert_eq!(s.profile(), PowerProfile::PowerSaving);
        assert_eq!(s.sample_ms(), 250);
        assert!(s.enabled());
        assert_eq!(s.hysteresis(), DEFAULT_HYSTERESIS);
    }

    #[test]
    fn apply_never_touches_enabled() {
        let s = Settings::new(1, 4, 4);
        s.set_enabled(false);
        let update: AttrSnapshot =
            serde_json::from_str(r#"{"enabled": true, "sample_ms": 50}"#).unwrap();
        s.apply(&update);
        // The governor decides whether an enable sticks; a bare apply
        // must not flip the stored flag behind its back.
        assert!(!s.enabled());
        assert_eq!(s.sample_ms(), 50);
    }

    #[test]
    fn core_bounds_clamp_to_possible_cores() {
        let s = Settings::new(1, 4, 4);
        let update: AttrSnapshot =
            serde_json::from_str(r#"{"min_cpus": 3, "max_cpus": 16}"#).unwrap();
        s.apply(&update);
        // max first, then min, both held inside [1, possible].
        assert_eq!(s.max_cores(), 4);
        assert_eq!(s.min_cores(), 3);
    }

    #[test]
    fn min_never_exceeds_max() {
        let s = Settings::new(1, 4, 4);
        s.set_min_cores(4);
        s.set_max_cores(2);
        assert_eq!(s.max_cores(), 2);
        assert_eq!(s.min_cores(), 2);
    }

    #[test]
    fn sample_period_floor_is_one_ms() {
        let s = Settings::new(1, 4, 4);
        s.set_sample_ms(0);
        assert_eq!(s.sample_ms(), 1);
    }
}
