// SPDX-License-Identifier: GPL-2.0
//
// coregov: threshold policy tables
//
// Pure data plus the required-cores lookup. All load figures are in
// hundredths of average runnable threads, matching LoadTracker::poll_average.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerProfile {
    Normal,
    PowerSaving,
}

/// Per-online-core-count row: load thresholds a tick must meet and the
/// minimum time the condition must have held before a transition fires.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdRow {
    pub up_load: u64,
    pub down_load: u64,
    pub up_dwell_ms: u64,
    pub down_dwell_ms: u64,
}

const fn row(up_load: u64, down_load: u64, up_dwell_ms: u64, down_dwell_ms: u64) -> ThresholdRow {
    ThresholdRow {
        up_load,
        down_load,
        up_dwell_ms,
        down_dwell_ms,
    }
}

// Indexed by online core count (row 0 == one core online). The first row
// cannot scale down and the last row cannot scale up.
const NORMAL_ROWS: [ThresholdRow; 4] = [
    row(12, 0, 140, 0),
    row(20, 7, 140, 190),
    row(25, 10, 140, 190),
    row(u64::MAX, 18, 0, 190),
];

const POWERSAVING_ROWS: [ThresholdRow; 2] = [
    row(12, 0, 140, 0),
    row(u64::MAX, 7, 0, 190),
];

// Required-cores boundaries: smallest n whose boundary the average fits
// under is the load-implied target. The boundaries started life as
// fixed-point eighths (7, 9, 10) and halves (5), rescaled once to
// hundredths.
const NORMAL_TARGETS: [u64; 4] = [87, 112, 125, u64::MAX];
const POWERSAVING_TARGETS: [u64; 2] = [250, u64::MAX];

// Fixed-point shift the boundary tables were first expressed in; the
// hysteresis margin inherits its integer truncation.
const NORMAL_FSHIFT: u32 = 3;
const POWERSAVING_FSHIFT: u32 = 1;

impl PowerProfile {
    pub fn rows(self) -> &'static [ThresholdRow] {
        match self {
            PowerProfile::Normal => &NORMAL_ROWS,
            PowerProfile::PowerSaving => &POWERSAVING_ROWS,
        }
    }

    /// Row for the given online-core count, clamped into the table. The
    /// PowerSaving table is shorter, so online counts above its range
    /// (reachable right after a live profile switch) share the terminal
    /// row until the governor scales back down.
    pub fn row_for(self, online: usize) -> &'static ThresholdRow {
        let rows = self.rows();
        let idx = online.clamp(1, rows.len()) - 1;
        &rows[idx]
    }

    fn targets(self) -> &'static [u64] {
        match self {
            PowerProfile::Normal => &NORMAL_TARGETS,
            PowerProfile::PowerSaving => &POWERSAVING_TARGETS,
        }
    }

    /// Largest core count this profile will ever ask for.
    pub fn max_target(self) -> usize {
        self.targets().len()
    }

    /// Load margin added to a boundary when hysteresis applies.
    fn hysteresis_margin(self, hysteresis: u64) -> u64 {
        if hysteresis == 0 {
            return 0;
        }
        let fshift = match self {
            PowerProfile::Normal => NORMAL_FSHIFT,
            PowerProfile::PowerSaving => POWERSAVING_FSHIFT,
        };
        (((1u64 << fshift) / hysteresis) * 100) >> fshift
    }
}

/// Monotone required-cores lookup with one tick of hysteresis memory.
pub struct RequiredCores {
    prev_target: usize,
}

impl RequiredCores {
    pub fn new() -> Self {
        Self { prev_target: 0 }
    }

    /// Smallest core count whose boundary threshold holds the average.
    ///
    /// A candidate boundary is nudged upward by the hysteresis margin when
    /// the previous target did not exceed it, so load sitting right at a
    /// boundary keeps its last answer instead of flapping.
    pub fn update(&mut self, avg: u64, profile: PowerProfile, hysteresis: u64) -> usize {
        let targets = profile.targets();
        let margin = profile.hysteresis_margin(hysteresis);

        let mut target = targets.len();
        for (i, &boundary) in targets.iter().enumerate() {
            let candidate = i + 1;
            let boundary = if self.prev_target <= candidate {
                boundary.saturating_add(margin)
            } else {
                boundary
            };
            if avg <= boundary {
                target = candidate;
                break;
            }
        }
        self.prev_target = target;
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HYST: u64 = 4;

    #[test]
    fn low_load_wants_one_core() {
        let mut req = RequiredCores::new();
        assert_eq!(req.update(0, PowerProfile::Normal, HYST), 1);
        assert_eq!(req.update(50, PowerProfile::Normal, HYST), 1);
    }

    #[test]
    fn targets_are_monotone_in_load() {
        let mut prev = 0;
        for avg in [0u64, 90, 115, 130, 400] {
            let mut req = RequiredCores::new();
            let t = req.update(avg, PowerProfile::Normal, HYST);
            assert!(t >= prev, "target fell from {} to {} at avg {}", prev, t, avg);
            prev = t;
        }
    }

    #[test]
    fn heavy_load_saturates_at_table_end() {
        let mut req = RequiredCores::new();
        assert_eq!(req.update(u64::MAX - 1, PowerProfile::Normal, HYST), 4);
        assert_eq!(req.update(u64::MAX - 1, PowerProfile::PowerSaving, HYST), 2);
    }

    #[test]
    fn powersaving_caps_target_at_two() {
        assert_eq!(PowerProfile::PowerSaving.max_target(), 2);
        let mut req = RequiredCores::new();
        assert_eq!(req.update(300, PowerProfile::PowerSaving, HYST), 2);
    }

    #[test]
    fn boundary_band_is_sticky() {
        // Margin for Normal at hysteresis 4 is 25 hundredths: climbing past
        // the first boundary (87) needs > 112, but once the target is 2 a
        // value just above 87 keeps it there.
        let mut req = RequiredCores::new();
        assert_eq!(req.update(100, PowerProfile::Normal, HYST), 1);
        assert_eq!(req.update(120, PowerProfile::Normal, HYST), 2);
        // At a previous target of 2 the first boundary is unnudged, so 88
        // still does not collapse back to 1.
        assert_eq!(req.update(88, PowerProfile::Normal, HYST), 2);
        assert_eq!(req.update(87, PowerProfile::Normal, HYST), 1);
    }

    #[test]
    fn zero_hysteresis_means_no_margin() {
        let mut req = RequiredCores::new();
        assert_eq!(req.update(88, PowerProfile::Normal, 0), 2);
    }

    #[test]
    fn row_lookup_clamps() {
        let first = PowerProfile::Normal.row_for(0);
        assert_eq!(first.up_load, 12);
        let last = PowerProfile::Normal.row_for(99);
        assert_eq!(last.down_load, 18);
    }

    #[test]
    fn edge_rows_forbid_impossible_moves() {
        assert_eq!(PowerProfile::Normal.row_for(1).down_load, 0);
        assert_eq!(PowerProfile::Normal.row_for(4).up_load, u64::MAX);
        assert_eq!(PowerProfile::PowerSaving.row_for(2).up_load, u64::MAX);
    }

    #[test]
    fn powersaving_clamps_excess_online_counts() {
        // Four cores online right after a switch into PowerSaving: the
        // terminal row still applies, so down-scaling keeps qualifying.
        let row = PowerProfile::PowerSaving.row_for(4);
        assert_eq!(row.up_load, u64::MAX);
        assert_eq!(row.down_load, 7);
        assert_eq!(row.down_dwell_ms, 190);
    }
}
