// SPDX-License-Identifier: GPL-2.0
//
// coregov: adaptive CPU core-count governor
//
// Userspace port of a multi-core auto-hotplug policy: sample the runnable
// thread count on a fixed period, smooth it into a time-weighted average and
// bring cores online/offline one at a time to track demand.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

mod actuator;
mod control_api;
mod engine;
mod governor;
mod lifecycle;
mod load_avg;
mod platform;
mod rq_feed;
mod settings;
mod stats;
mod thresholds;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use crate::control_api::ApiContext;
use crate::governor::Governor;
use crate::lifecycle::LifecycleController;
use crate::load_avg::LoadTracker;
use crate::platform::{Clock, CpuPlatform, MonotonicClock, SysfsPlatform};
use crate::rq_feed::RunqueueFeeder;
use crate::settings::{Settings, DEFAULT_BACKOFF_MS, DEFAULT_HYSTERESIS, DEFAULT_SAMPLE_MS};
use crate::stats::StatusStore;

const GOVERNOR_NAME: &str = "coregov";

#[derive(Debug, Clone, clap::Parser)]
#[command(
    name = "coregov",
    version,
    disable_version_flag = true,
    about = "Adaptive core-count governor: onlines and offlines CPU cores to track load."
)]
struct Opts {
    /// Sampling period for the governor tick in milliseconds.
    #[clap(short = 's', long, default_value_t = DEFAULT_SAMPLE_MS)]
    sample_ms: u64,

    /// Minimum number of cores kept online.
    #[clap(long, default_value = "1")]
    min_cpus: usize,

    /// Maximum number of cores brought online. 0 indicates all cores.
    #[clap(long, default_value = "0")]
    max_cpus: usize,

    /// Start in the power-saving profile (tighter thresholds, fewer cores).
    #[clap(long, action = clap::ArgAction::SetTrue)]
    powersave: bool,

    /// Hysteresis divisor applied to threshold boundaries near the previous
    /// target. Larger values give a narrower sticky band.
    #[clap(long, default_value_t = DEFAULT_HYSTERESIS)]
    hysteresis: u64,

    /// Pause after an online/offline state mismatch before the governor
    /// resyncs and resumes deciding, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_BACKOFF_MS)]
    backoff_ms: u64,

    /// Core the tick thread is pinned to.
    #[clap(long, default_value = "0")]
    coordinator_cpu: usize,

    /// Port for the local control API.
    #[clap(long, default_value = "9878")]
    api_port: u16,

    /// Disable the control API entirely.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    no_api: bool,

    /// Enable stats monitoring with the specified interval in seconds.
    #[clap(long)]
    stats: Option<f64>,

    /// Enable verbose output.
    #[clap(short = 'v', long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    /// Print version and exit.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    version: bool,
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    if opts.version {
        println!("{} {}", GOVERNOR_NAME, env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let loglevel = if opts.verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };

    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_offset_to_local()
        .expect("Failed to set local time offset")
        .set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        loglevel,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    let platform: Arc<dyn CpuPlatform> = Arc::new(SysfsPlatform::new());
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());

    let nr_possible = platform.nr_cores();
    let max_cpus = if opts.max_cpus == 0 {
        nr_possible
    } else {
        opts.max_cpus
    };
    let settings = Arc::new(Settings::new(opts.min_cpus, max_cpus, nr_possible));
    settings.set_sample_ms(opts.sample_ms);
    settings.set_hysteresis(opts.hysteresis);
    settings.set_powersave_active(opts.powersave);

    info!(
        "{} starting: {} cores, {}..={} online, {}ms period",
        GOVERNOR_NAME,
        nr_possible,
        settings.min_cores(),
        settings.max_cores(),
        settings.sample_ms()
    );

    let load = Arc::new(LoadTracker::new(nr_possible, clock.clone()));
    let status = Arc::new(StatusStore::new());
    let gov = Arc::new(Governor::new(
        platform.clone(),
        clock.clone(),
        settings.clone(),
        load.clone(),
        status.clone(),
        opts.backoff_ms,
    ));

    // With no clock source the governor is permanently disabled; still serve
    // the control API so the condition is observable, but run no ticks.
    let lifecycle = if gov.startup_failed() {
        warn!("governor disabled at startup, periodic task not scheduled");
        None
    } else {
        Some(LifecycleController::spawn(
            gov.clone(),
            settings.clone(),
            shutdown.clone(),
            opts.coordinator_cpu,
        )?)
    };

    let feeder = if lifecycle.is_some() {
        Some(RunqueueFeeder::spawn(load, shutdown.clone())?)
    } else {
        None
    };

    let api_thread = if opts.no_api {
        None
    } else {
        // Without a tick thread the commands go nowhere; the API ignores the
        // resulting send errors.
        let tx = match &lifecycle {
            Some(ctl) => ctl.sender(),
            None => crossbeam::channel::unbounded().0,
        };
        let ctx = Arc::new(ApiContext {
            settings: settings.clone(),
            governor: gov.clone(),
            status: status.clone(),
            lifecycle_tx: tx,
        });
        Some(control_api::start(opts.api_port, ctx, shutdown.clone())?)
    };

    let stats_thread = opts.stats.map(|intv| {
        let store = status.clone();
        let shutdown_copy = shutdown.clone();
        std::thread::spawn(move || {
            let stats_interval = Duration::from_secs_f64(intv);
            match stats::monitor(store, stats_interval, shutdown_copy) {
                Ok(_) => {}
                Err(e) => {
                    log::warn!("stats monitor thread finished because of an error {}", e)
                }
            }
        })
    });

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }
    info!("shutting down");

    if let Some(ctl) = lifecycle {
        ctl.shutdown();
    }
    if let Some(feeder) = feeder {
        feeder.join();
    }
    if let Some(jh) = stats_thread {
        let _ = jh.join();
    }
    if let Some(jh) = api_thread {
        let _ = jh.join();
    }

    Ok(())
}
