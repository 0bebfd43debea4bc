// SPDX-License-Identifier: GPL-2.0
//
// coregov: platform collaborators
//
// Everything the governor needs from the outside world lives behind the
// traits in this module: a monotonic clock, and the kernel's CPU hotplug
// and cpufreq surfaces under /sys/devices/system/cpu.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("core {0} does not exist")]
    NoSuchCore(usize),
    #[error("hotplug transition failed: {0}")]
    Transition(#[from] std::io::Error),
}

/// Monotonic time source. The governor never reads wall-clock time; all
/// timestamps are nanoseconds since process start.
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;

    fn now_ms(&self) -> u64 {
        self.now_ns() / 1_000_000
    }
}

pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// Core-lifecycle and frequency collaborator.
///
/// `set_core_online` is the only mutating operation and is only ever called
/// from the governor tick or suspend/resume, both under the governor lock.
pub trait CpuPlatform: Send + Sync {
    /// Number of possible core slots, fixed for the process lifetime.
    fn nr_cores(&self) -> usize;

    /// Actual OS-level online state of a core.
    fn core_online(&self, core: usize) -> bool;

    fn set_core_online(&self, core: usize, online: bool) -> Result<(), PlatformError>;

    /// Current clock rate in kHz, 0 when the core is out of range or the
    /// rate cannot be read.
    fn clock_rate_khz(&self, core: usize) -> u64;

    fn online_count(&self) -> usize {
        (0..self.nr_cores()).filter(|&c| self.core_online(c)).count()
    }
}

/// Production implementation backed by sysfs.
pub struct SysfsPlatform {
    root: PathBuf,
    nr_cores: usize,
}

impl SysfsPlatform {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from("/sys/devices/system/cpu"))
    }

    /// Construction never fails. A missing cpufreq interface surfaces as a
    /// zero clock rate; the governor probes for that at init and stays
    /// disabled, keeping the control surface up so the condition is
    /// observable.
    pub fn with_root(root: PathBuf) -> Self {
        let nr_cores = Self::count_cores(&root).unwrap_or_else(num_cpus::get);
        Self { root, nr_cores }
    }

    fn count_cores(root: &PathBuf) -> Option<usize> {
        let entries = fs::read_dir(root).ok()?;
        let count = entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                name.starts_with("cpu") && name[3..].parse::<usize>().is_ok()
            })
            .count();
        if count > 0 {
            Some(count)
        } else {
            None
        }
    }

    fn online_path(&self, core: usize) -> PathBuf {
        self.root.join(format!("cpu{}/online", core))
    }
}

impl CpuPlatform for SysfsPlatform {
    fn nr_cores(&self) -> usize {
        self.nr_cores
    }

    fn core_online(&self, core: usize) -> bool {
        if core >= self.nr_cores {
            return false;
        }
        // The boot core has no online attribute; it is always online.
        match fs::read_to_string(self.online_path(core)) {
            Ok(s) => s.trim() == "1",
            Err(_) => core == 0,
        }
    }

    fn set_core_online(&self, core: usize, online: bool) -> Result<(), PlatformError> {
        if core == 0 || core >= self.nr_cores {
            return Err(PlatformError::NoSuchCore(core));
        }
        let value = if online { "1" } else { "0" };
        fs::write(self.online_path(core), value)?;
        debug!("core {} set {}", core, if online { "online" } else { "offline" });
        Ok(())
    }

    fn clock_rate_khz(&self, core: usize) -> u64 {
        if core >= self.nr_cores {
            return 0;
        }
        let path = self.root.join(format!("cpu{}/cpufreq/scaling_cur_freq", core));
        fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0)
    }
}
