//! Drives one sender/sniffer run around an optional fault-injection action.
//!
//! Sequence of a run:
//! 1. generate the traffic pattern and start the worker on a blocking thread;
//! 2. wait (bounded) for the worker's ready signal;
//! 3. settle, then run the fault action; on failure stop the worker early,
//!    join it and hand back the action's error;
//! 4. with `stop_after`, poll until the worker finishes or the window
//!    elapses, then stop it early;
//! 5. always join the worker;
//! 6. examine the captured flow unless the DUT is a virtual switch.
//!
//! Cancellation is cooperative only: the worker thread is never killed, the
//! coordinator sets the token and waits for it to exit.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{FaultAction, IoContext, IoDriver, IoError, TrafficDirection};
use crate::config::IoConfig;
use crate::device::DutHost;
use crate::record::TestResults;

/// Timing knobs of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Pause between the ready signal and the fault action.
    pub settle_delay: Duration,
    /// Poll interval while waiting out `stop_after`.
    pub poll_interval: Duration,
    /// Upper bound on the ready-wait.
    pub startup_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&IoConfig::default())
    }
}

impl From<&IoConfig> for CoordinatorSettings {
    fn from(cfg: &IoConfig) -> Self {
        Self {
            settle_delay: Duration::from_millis(cfg.settle_delay_ms),
            poll_interval: Duration::from_millis(cfg.drain_poll_interval_ms),
            startup_timeout: Duration::from_millis(cfg.startup_timeout_ms),
        }
    }
}

/// A finished run: the joined driver and how it ended.
#[derive(Debug)]
pub struct IoRun<D> {
    pub run_id: Uuid,
    pub driver: D,
    /// The capture was cut short after `stop_after` elapsed.
    pub stopped_early: bool,
    /// Flow examination ran (skipped on virtual DUTs).
    pub flow_examined: bool,
}

impl<D: IoDriver> IoRun<D> {
    pub fn test_results(&self) -> Option<&TestResults> {
        self.driver.test_results()
    }
}

type Worker<D> = JoinHandle<(D, anyhow::Result<()>)>;

#[derive(Debug, Clone, Default)]
pub struct Coordinator {
    settings: CoordinatorSettings,
}

impl Coordinator {
    pub fn new(settings: CoordinatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Run `driver` against `active`, injecting `action` once traffic flows.
    pub async fn run<D: IoDriver>(
        &self,
        driver: D,
        active: &DutHost,
        direction: TrafficDirection,
        action: Option<&mut dyn FaultAction>,
        stop_after: Option<Duration>,
    ) -> Result<IoRun<D>, IoError> {
        self.run_with_id(Uuid::new_v4(), driver, active, direction, action, stop_after)
            .await
    }

    /// Like [`Coordinator::run`], under the caller's `run_id` (the one the
    /// driver was set up with).
    pub async fn run_with_id<D: IoDriver>(
        &self,
        run_id: Uuid,
        driver: D,
        active: &DutHost,
        direction: TrafficDirection,
        action: Option<&mut dyn FaultAction>,
        stop_after: Option<Duration>,
    ) -> Result<IoRun<D>, IoError> {
        let span = info_span!("io_run", %run_id, %direction, dut = %active.hostname());
        self.run_inner(run_id, driver, active, direction, action, stop_after)
            .instrument(span)
            .await
    }

    async fn run_inner<D: IoDriver>(
        &self,
        run_id: Uuid,
        mut driver: D,
        active: &DutHost,
        direction: TrafficDirection,
        action: Option<&mut dyn FaultAction>,
        stop_after: Option<Duration>,
    ) -> Result<IoRun<D>, IoError> {
        driver.generate_traffic(direction).map_err(IoError::Setup)?;

        let cancel = CancellationToken::new();
        let (ctx, mut ready_rx) = IoContext::new(cancel.clone());
        let worker: Worker<D> = tokio::task::spawn_blocking(move || {
            let outcome = driver.start_io_test(&ctx);
            (driver, outcome)
        });

        let ready = tokio::time::timeout(self.settings.startup_timeout, ready_rx.wait_for(|ready| *ready))
            .await
            .map(|signal| signal.is_ok());
        match ready {
            Ok(true) => info!("sender and sniffer running"),
            Ok(false) => {
                // Worker released the wait without ever reporting ready.
                let (_, outcome) = join(worker).await?;
                outcome.map_err(IoError::Capture)?;
                return Err(IoError::NotReady);
            }
            Err(_) => {
                warn!(timeout = ?self.settings.startup_timeout, "sender/sniffer never reported ready, stopping it");
                cancel.cancel();
                let _ = join(worker).await;
                return Err(IoError::StartupTimeout {
                    timeout: self.settings.startup_timeout,
                });
            }
        }

        if let Some(action) = action {
            info!(settle = ?self.settings.settle_delay, "ready to execute the fault action");
            tokio::time::sleep(self.settings.settle_delay).await;

            if let Err(err) = action.inject().await {
                error!(error = %err, "fault action failed, stopping IO early");
                cancel.cancel();
                let _ = join(worker).await;
                return Err(IoError::Action(err));
            }
            info!("fault action complete");
        }

        let mut stopped_early = false;
        if let Some(window) = stop_after {
            if !self.drain(&worker, window).await {
                info!(
                    stop_after = ?window,
                    "sender/sniffer still running, stopping the IO test early"
                );
                cancel.cancel();
                stopped_early = true;
            }
        }

        let (mut driver, outcome) = join(worker).await?;
        outcome.map_err(IoError::Capture)?;
        info!(stopped_early, "sender and sniffer joined");

        let flow_examined = if active.is_virtual() {
            info!("skipping flow examination on virtual DUT");
            false
        } else {
            driver.examine_flow().map_err(IoError::FlowExamination)?;
            true
        };

        Ok(IoRun {
            run_id,
            driver,
            stopped_early,
            flow_examined,
        })
    }

    /// Wait up to `window` for the worker to finish on its own.
    async fn drain<D>(&self, worker: &Worker<D>, window: Duration) -> bool {
        let deadline = Instant::now() + window;
        let mut ticker = tokio::time::interval(self.settings.poll_interval.max(Duration::from_millis(1)));
        loop {
            if worker.is_finished() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            ticker.tick().await;
        }
    }
}

async fn join<D>(worker: Worker<D>) -> Result<(D, anyhow::Result<()>), IoError> {
    worker
        .await
        .map_err(|e| IoError::WorkerPanicked(e.to_string()))
}
