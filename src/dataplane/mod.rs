//! Caller-facing helpers: run one traffic direction around a fault action and
//! optionally verify the outcome.
//!
//! Each direction has its own send-interval default and its own set of
//! verification knobs; see [`DirectionProfile`].

use std::time::Duration;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::device::{peer_of, DeviceError, DutHost};
use crate::io::{
    CableType, Coordinator, CoordinatorSettings, Destination, FaultAction, IoDriver, IoDriverFactory, IoError,
    IoSetup, TrafficDirection,
};
use crate::record::TestResults;
use crate::verify::{validate_traffic_results, AllowedDuplication, Thresholds, VerifyError};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Verify(#[from] VerifyError),
}

/// Which verification options a direction honours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionProfile {
    /// `allow_disruption_before_traffic` is passed through.
    pub leading_loss_option: bool,
    /// `allowed_duplication` and the duplication merge are passed through.
    pub duplication_options: bool,
    /// On a virtual DUT the helper returns without a report.
    pub skip_verify_on_virtual: bool,
}

impl DirectionProfile {
    pub fn of(direction: TrafficDirection) -> Self {
        match direction {
            TrafficDirection::T1ToServer => Self {
                leading_loss_option: true,
                duplication_options: true,
                skip_verify_on_virtual: false,
            },
            TrafficDirection::T1ToSoc => Self {
                leading_loss_option: false,
                duplication_options: true,
                skip_verify_on_virtual: true,
            },
            TrafficDirection::ServerToT1 | TrafficDirection::SocToT1 | TrafficDirection::ServerToServer => Self {
                leading_loss_option: false,
                duplication_options: false,
                skip_verify_on_virtual: true,
            },
        }
    }

    /// Thresholds for this direction, after the delay promotion rule.
    pub fn thresholds(&self, opts: &IoTestOptions) -> Thresholds {
        let mut thresholds = Thresholds::new(opts.allowed_disruption, opts.delay);
        if self.leading_loss_option {
            thresholds = thresholds.allow_disruption_before_traffic(opts.allow_disruption_before_traffic);
        }
        if self.duplication_options {
            thresholds = thresholds
                .with_allowed_duplication(opts.allowed_duplication)
                .merge_duplications_into_disruptions(opts.merge_duplications_into_disruptions);
        }
        thresholds.promoted()
    }
}

/// Options of one IO test.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IoTestOptions {
    /// VLAN member port of the active ToR selecting the target server;
    /// `None` sends to random servers.
    pub tor_vlan_port: Option<String>,
    /// Max acceptable outage in seconds.
    pub delay: f64,
    pub allowed_disruption: u32,
    /// Classify the results and fail on any violation.
    pub verify: bool,
    /// Overrides the direction's default send interval.
    pub send_interval: Option<Duration>,
    /// Stop the capture this long after the action, if still running.
    pub stop_after: Option<Duration>,
    pub allow_disruption_before_traffic: bool,
    pub allowed_duplication: Option<AllowedDuplication>,
    pub merge_duplications_into_disruptions: bool,
    /// Server-to-T1 only: send to a randomly chosen destination.
    pub random_dst: Option<bool>,
}

/// Dual-ToR testbed plus the driver factory used for every run.
#[derive(Debug)]
pub struct DataPlaneHarness<F> {
    factory: F,
    duthosts: Vec<DutHost>,
    cable_type: CableType,
    config: HarnessConfig,
    coordinator: Coordinator,
}

impl<F: IoDriverFactory> DataPlaneHarness<F> {
    pub fn new(factory: F, duthosts: Vec<DutHost>, config: HarnessConfig) -> Self {
        let coordinator = Coordinator::new(CoordinatorSettings::from(&config.io));
        Self {
            factory,
            duthosts,
            cable_type: CableType::default(),
            config,
            coordinator,
        }
    }

    pub fn with_cable_type(mut self, cable_type: CableType) -> Self {
        self.cable_type = cable_type;
        self
    }

    pub fn duthosts(&self) -> &[DutHost] {
        &self.duthosts
    }

    /// Traffic from the T1 router down to the servers.
    pub async fn send_t1_to_server_with_action(
        &self,
        active: &DutHost,
        opts: &IoTestOptions,
        action: Option<&mut dyn FaultAction>,
    ) -> Result<Option<TestResults>, HarnessError> {
        let destination = vlan_destination(opts);
        self.run_direction(TrafficDirection::T1ToServer, active, destination, None, opts, action)
            .await
    }

    /// Traffic from the servers up to the T1 router. The only direction
    /// that honours `random_dst`.
    pub async fn send_server_to_t1_with_action(
        &self,
        active: &DutHost,
        opts: &IoTestOptions,
        action: Option<&mut dyn FaultAction>,
    ) -> Result<Option<TestResults>, HarnessError> {
        let destination = vlan_destination(opts);
        self.run_direction(
            TrafficDirection::ServerToT1,
            active,
            destination,
            opts.random_dst,
            opts,
            action,
        )
        .await
    }

    /// Traffic from the NiC SoCs up to the T1 router.
    pub async fn send_soc_to_t1_with_action(
        &self,
        active: &DutHost,
        opts: &IoTestOptions,
        action: Option<&mut dyn FaultAction>,
    ) -> Result<Option<TestResults>, HarnessError> {
        let destination = vlan_destination(opts);
        self.run_direction(TrafficDirection::SocToT1, active, destination, None, opts, action)
            .await
    }

    /// Traffic from the T1 router down to the NiC SoCs.
    pub async fn send_t1_to_soc_with_action(
        &self,
        active: &DutHost,
        opts: &IoTestOptions,
        action: Option<&mut dyn FaultAction>,
    ) -> Result<Option<TestResults>, HarnessError> {
        let destination = vlan_destination(opts);
        self.run_direction(TrafficDirection::T1ToSoc, active, destination, None, opts, action)
            .await
    }

    /// Traffic between servers behind `test_mux_ports`.
    pub async fn send_server_to_server_with_action(
        &self,
        active: &DutHost,
        test_mux_ports: Vec<String>,
        opts: &IoTestOptions,
        action: Option<&mut dyn FaultAction>,
    ) -> Result<Option<TestResults>, HarnessError> {
        self.run_direction(
            TrafficDirection::ServerToServer,
            active,
            Destination::MuxPorts(test_mux_ports),
            None,
            opts,
            action,
        )
        .await
    }

    async fn run_direction(
        &self,
        direction: TrafficDirection,
        active: &DutHost,
        destination: Destination,
        random_dst: Option<bool>,
        opts: &IoTestOptions,
        action: Option<&mut dyn FaultAction>,
    ) -> Result<Option<TestResults>, HarnessError> {
        let peer = peer_of(&self.duthosts, active)?;
        let setup = IoSetup {
            run_id: Uuid::new_v4(),
            active: active.hostname().to_string(),
            peer: peer.hostname().to_string(),
            direction,
            cable_type: self.cable_type,
            destination,
            send_interval: opts
                .send_interval
                .unwrap_or_else(|| self.config.send_interval_ms.for_direction(direction)),
            random_dst,
        };
        info!(
            %direction,
            active = %setup.active,
            peer = %setup.peer,
            cable_type = %setup.cable_type,
            send_interval = ?setup.send_interval,
            "starting IO test"
        );

        let driver = self.factory.create(&setup).map_err(IoError::Setup)?;
        let run = self
            .coordinator
            .run_with_id(setup.run_id, driver, active, direction, action, opts.stop_after)
            .await?;

        let profile = DirectionProfile::of(direction);
        if profile.skip_verify_on_virtual && active.is_virtual() {
            info!(%direction, "skipping verify on virtual DUT");
            return Ok(None);
        }

        let thresholds = profile.thresholds(opts);
        verify_and_report(&run.driver, opts.verify, &thresholds)
    }
}

fn vlan_destination(opts: &IoTestOptions) -> Destination {
    match &opts.tor_vlan_port {
        Some(port) => Destination::VlanPort(port.clone()),
        None => Destination::Random,
    }
}

/// Verify (when asked) and hand back the driver's results.
pub fn verify_and_report<D: IoDriver>(
    driver: &D,
    verify: bool,
    thresholds: &Thresholds,
) -> Result<Option<TestResults>, HarnessError> {
    if verify {
        validate_traffic_results(driver.test_results(), thresholds)?;
    }
    Ok(driver.test_results().cloned())
}
