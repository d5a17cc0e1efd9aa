//! Dual-ToR data-plane I/O: the sender/sniffer collaborator contract and the
//! coordinator that drives it around a fault-injection action.

pub mod coordinator;
pub mod sim;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::record::TestResults;

pub use coordinator::{Coordinator, CoordinatorSettings, IoRun};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to set up IO test: {0:#}")]
    Setup(anyhow::Error),

    #[error("sender/sniffer did not report ready within {timeout:?}")]
    StartupTimeout { timeout: Duration },

    #[error("sender/sniffer exited without reporting ready")]
    NotReady,

    #[error("fault-injection action failed: {0:#}")]
    Action(anyhow::Error),

    #[error("sender/sniffer failed: {0:#}")]
    Capture(anyhow::Error),

    #[error("sender/sniffer worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("flow examination failed: {0:#}")]
    FlowExamination(anyhow::Error),
}

/// Direction of the synthetic traffic through the dual-ToR pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficDirection {
    T1ToServer,
    ServerToT1,
    SocToT1,
    T1ToSoc,
    ServerToServer,
}

impl TrafficDirection {
    pub const ALL: [TrafficDirection; 5] = [
        TrafficDirection::T1ToServer,
        TrafficDirection::ServerToT1,
        TrafficDirection::SocToT1,
        TrafficDirection::T1ToSoc,
        TrafficDirection::ServerToServer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficDirection::T1ToServer => "t1_to_server",
            TrafficDirection::ServerToT1 => "server_to_t1",
            TrafficDirection::SocToT1 => "soc_to_t1",
            TrafficDirection::T1ToSoc => "t1_to_soc",
            TrafficDirection::ServerToServer => "server_to_server",
        }
    }
}

impl fmt::Display for TrafficDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown traffic direction {0:?}")]
pub struct UnknownDirection(String);

impl FromStr for TrafficDirection {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        TrafficDirection::ALL
            .into_iter()
            .find(|d| d.as_str() == normalized)
            .ok_or_else(|| UnknownDirection(s.to_string()))
    }
}

/// How the servers are cabled to the ToR pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CableType {
    #[default]
    ActiveStandby,
    ActiveActive,
}

impl fmt::Display for CableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CableType::ActiveStandby => f.write_str("active-standby"),
            CableType::ActiveActive => f.write_str("active-active"),
        }
    }
}

/// Which downstream endpoints the traffic is addressed to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Destination {
    /// Randomly selected server addresses.
    #[default]
    Random,
    /// The server behind this VLAN member port of the active ToR.
    VlanPort(String),
    /// Servers behind these mux ports (server-to-server traffic).
    MuxPorts(Vec<String>),
}

/// Everything an IO driver is bound to at construction.
#[derive(Debug, Clone)]
pub struct IoSetup {
    pub run_id: Uuid,
    pub active: String,
    pub peer: String,
    pub direction: TrafficDirection,
    pub cable_type: CableType,
    pub destination: Destination,
    pub send_interval: Duration,
    pub random_dst: Option<bool>,
}

/// Shared state between the coordinator and the sender/sniffer worker.
///
/// The worker owns the context. Dropping it without calling
/// [`IoContext::mark_ready`] releases the coordinator's ready-wait, so a
/// worker that dies during startup never leaves the coordinator blocked.
#[derive(Debug)]
pub struct IoContext {
    ready: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl IoContext {
    pub fn new(cancel: CancellationToken) -> (Self, watch::Receiver<bool>) {
        let (ready, ready_rx) = watch::channel(false);
        (Self { ready, cancel }, ready_rx)
    }

    /// Report that sender and sniffer are both producing traffic.
    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    /// Set once the coordinator wants the capture to end early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Packet generator and sniffer for one IO test.
///
/// `start_io_test` runs on a blocking worker thread. It must call
/// [`IoContext::mark_ready`] once traffic is flowing and return promptly
/// after [`IoContext::is_cancelled`] turns true.
pub trait IoDriver: Send + 'static {
    fn generate_traffic(&mut self, direction: TrafficDirection) -> anyhow::Result<()>;

    fn start_io_test(&mut self, ctx: &IoContext) -> anyhow::Result<()>;

    /// Reconcile captured packets into per-endpoint delivery records.
    fn examine_flow(&mut self) -> anyhow::Result<()>;

    fn test_results(&self) -> Option<&TestResults>;
}

/// Builds a driver for one run.
pub trait IoDriverFactory: Send + Sync {
    type Driver: IoDriver;

    fn create(&self, setup: &IoSetup) -> anyhow::Result<Self::Driver>;
}

/// Fault injected while traffic is flowing (link down, mux toggle, ...).
#[async_trait::async_trait]
pub trait FaultAction: Send {
    async fn inject(&mut self) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl<F> FaultAction for F
where
    F: FnMut() -> anyhow::Result<()> + Send,
{
    async fn inject(&mut self) -> anyhow::Result<()> {
        (self)()
    }
}
