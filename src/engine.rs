// SPDX-License-Identifier: GPL-2.0
//
// coregov: hotplug decision engine
//
// One decision per tick: bring a core up, take a core down, or nothing.
// The engine is pure state-machine logic; it sees the polled load average
// and the current online count and never touches the platform itself.

use serde::Serialize;

use crate::thresholds::{PowerProfile, RequiredCores};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernorState {
    Disabled,
    Idle,
    ScalingDown,
    ScalingUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Everything a single decision depends on, gathered by the governor tick.
pub struct TickInput {
    pub now_ms: u64,
    /// Decisions are suppressed until this much time has passed since
    /// process start, so the averaging service has some history.
    pub warmup_ms: u64,
    /// System load average, hundredths of runnable threads.
    pub avg: u64,
    pub online: usize,
    pub min_cores: usize,
    pub max_cores: usize,
    pub profile: PowerProfile,
    pub hysteresis: u64,
}

pub struct DecisionEngine {
    state: GovernorState,
    required: RequiredCores,
    /// Time the current qualifying streak has held, in ms. Grows only while
    /// consecutive ticks keep requesting the same direction.
    total_qualifying_ms: u64,
    streak: Option<Direction>,
    last_decision_ms: u64,
    primed: bool,
    last_required: usize,
}

impl DecisionEngine {
    pub fn new() -> Self {
        Self {
            state: GovernorState::Idle,
            required: RequiredCores::new(),
            total_qualifying_ms: 0,
            streak: None,
            last_decision_ms: 0,
            primed: false,
            last_required: 0,
        }
    }

    pub fn state(&self) -> GovernorState {
        self.state
    }

    pub fn last_required(&self) -> usize {
        self.last_required
    }

    /// Explicit policy switch. While disabled no decisions are made and no
    /// engine quantity changes; clearing returns to Idle with a fresh dwell.
    pub fn set_disabled(&mut self, disabled: bool) {
        if disabled {
            self.state = GovernorState::Disabled;
        } else if self.state == GovernorState::Disabled {
            self.state = GovernorState::Idle;
            self.total_qualifying_ms = 0;
            self.streak = None;
            self.primed = false;
        }
    }

    pub fn decide(&mut self, input: &TickInput) -> GovernorState {
        if self.state == GovernorState::Disabled {
            return GovernorState::Disabled;
        }

        if input.now_ms <= input.warmup_ms {
            self.state = GovernorState::Idle;
            return GovernorState::Idle;
        }

        let elapsed = if self.primed {
            input.now_ms.saturating_sub(self.last_decision_ms)
        } else {
            self.primed = true;
            0
        };
        self.last_decision_ms = input.now_ms;
        self.total_qualifying_ms += elapsed;

        let required = self
            .required
            .update(input.avg, input.profile, input.hysteresis);
        self.last_required = required;

        let min_cores = input.min_cores.max(1);
        let row = input.profile.row_for(input.online);

        let mut next = GovernorState::Idle;
        if input.online == 0 {
            // One core is always online; treat an impossible observation
            // as idle and drop the streak.
            self.total_qualifying_ms = 0;
            self.streak = None;
        } else {
            let direction = if input.online < input.max_cores && input.avg >= row.up_load {
                Some(Direction::Up)
            } else if input.online > min_cores && input.avg <= row.down_load {
                Some(Direction::Down)
            } else {
                None
            };

            if direction != self.streak {
                self.total_qualifying_ms = 0;
                self.streak = direction;
            }

            match direction {
                Some(Direction::Up) => {
                    if self.total_qualifying_ms >= row.up_dwell_ms && input.online < required {
                        next = GovernorState::ScalingUp;
                    }
                }
                Some(Direction::Down) => {
                    if self.total_qualifying_ms >= row.down_dwell_ms && input.online > required {
                        next = GovernorState::ScalingDown;
                    }
                }
                None => {
                    // No qualifying streak.
                    self.total_qualifying_ms = 0;
                }
            }
        }

        if next != GovernorState::Idle {
            // Dwell consumed by the transition.
            self.total_qualifying_ms = 0;
            self.streak = None;
        }

        self.state = next;
        next
    }
}
