// SPDX-License-Identifier: GPL-2.0
//
// coregov: periodic tick scheduling
//
// One coordinator thread runs the governor tick on a fixed period, pinned to
// the boot core. Suspend parks the loop (cancelling the pending tick) until
// resume; shutdown joins the thread so no tick runs after teardown begins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use log::{info, warn};

use crate::governor::{Governor, TickFlow};
use crate::settings::{Settings, RESUME_KICK_MS};

#[derive(Debug, Clone, Copy)]
pub enum Command {
    Suspend,
    Resume,
    Shutdown,
}

pub struct LifecycleController {
    tx: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl LifecycleController {
    /// Spawn the coordinator loop. The first tick fires one sample period
    /// after start.
    pub fn spawn(
        gov: Arc<Governor>,
        settings: Arc<Settings>,
        shutdown: Arc<AtomicBool>,
        coordinator_core: usize,
    ) -> Result<Self> {
        let (tx, rx) = channel::unbounded::<Command>();

        let handle = std::thread::Builder::new()
            .name("coregov-tick".into())
            .spawn(move || {
                if let Err(e) = pin_current_thread_to_core(coordinator_core) {
                    warn!("failed to pin tick thread to core {}: {}", coordinator_core, e);
                }

                let mut delay = settings.sample_ms();
                loop {
                    match rx.recv_timeout(Duration::from_millis(delay)) {
                        Err(RecvTimeoutError::Timeout) => {
                            if shutdown.load(Ordering::Relaxed) {
                                break;
                            }
                            if gov.tick() == TickFlow::Stop {
                                break;
                            }
                            delay = settings.sample_ms();
                        }
                        Ok(Command::Suspend) => {
                            gov.notify_suspend();
                            // Park until resume; the pending tick is gone
                            // and nothing runs while suspended.
                            match wait_for_resume(&rx) {
                                Some(()) => {
                                    gov.notify_resume();
                                    delay = RESUME_KICK_MS;
                                }
                                None => break,
                            }
                        }
                        Ok(Command::Resume) => {
                            gov.notify_resume();
                            delay = RESUME_KICK_MS;
                        }
                        Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("tick loop stopped");
            })
            .context("spawning tick thread")?;

        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> Sender<Command> {
        self.tx.clone()
    }

    /// Synchronous teardown: no tick runs once this returns.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn wait_for_resume(rx: &channel::Receiver<Command>) -> Option<()> {
    loop {
        match rx.recv() {
            Ok(Command::Resume) => return Some(()),
            Ok(Command::Suspend) => continue,
            Ok(Command::Shutdown) | Err(_) => return None,
        }
    }
}

/// Pin the calling thread to one core so tick timing is not perturbed by
/// migrations.
fn pin_current_thread_to_core(core: usize) -> std::io::Result<()> {
    unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut cpuset);
        libc::CPU_SET(core, &mut cpuset);
        let rc = libc::sched_setaffinity(
            0,
            std::mem::size_of::<libc::cpu_set_t>(),
            &cpuset as *const libc::cpu_set_t,
        );
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_avg::LoadTracker;
    use crate::platform::testing::{FakeClock, FakePlatform};
    use crate::stats::StatusStore;

    fn rig() -> (Arc<Governor>, Arc<Settings>, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new());
        let platform = Arc::new(FakePlatform::new(4, 1));
        let settings = Arc::new(Settings::new(1, 4, 4));
        settings.set_sample_ms(5);
        let load = Arc::new(LoadTracker::new(4, clock.clone()));
        let gov = Arc::new(Governor::new(
            platform,
            clock.clone(),
            settings.clone(),
            load,
            Arc::new(StatusStore::new()),
            10_000,
        ));
        (gov, settings, clock)
    }

    #[test]
    fn shutdown_joins_the_loop() {
        let (gov, settings, _clock) = rig();
        let shutdown = Arc::new(AtomicBool::new(false));
        let ctl = LifecycleController::spawn(gov, settings, shutdown, 0).unwrap();
        ctl.shutdown();
    }

    #[test]
    fn suspend_parks_until_resume() {
        let (gov, settings, clock) = rig();
        let shutdown = Arc::new(AtomicBool::new(false));
        let ctl = LifecycleController::spawn(gov.clone(), settings, shutdown, 0).unwrap();

        ctl.sender().send(Command::Suspend).unwrap();
        // Give the loop a moment to process the command.
        for _ in 0..100 {
            if gov.suspended() {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(gov.suspended());
        clock.advance_ms(50);

        ctl.sender().send(Command::Resume).unwrap();
        for _ in 0..100 {
            if !gov.suspended() {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(!gov.suspended());
        ctl.shutdown();
    }
}
