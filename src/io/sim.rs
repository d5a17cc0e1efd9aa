//! In-process sender/sniffer with a scripted impairment plan.
//!
//! Sends `packets` sequence ids to every endpoint at the configured send
//! interval and "captures" them according to an [`ImpairmentPlan`]: ids in a
//! loss window never arrive, ids in the duplicate list arrive extra times.
//! Capture timestamps are derived from the sequence id, so the resulting
//! delivery records are reproducible while pacing stays real-time and the
//! run honours early stop.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use anyhow::{bail, Result};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Destination, IoContext, IoDriver, IoDriverFactory, IoSetup, TrafficDirection};
use crate::flow::{self, Observation};
use crate::record::{Endpoint, TestResults};

/// Scripted faults applied to every endpoint's stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpairmentPlan {
    /// Sequence ids that are lost.
    pub loss: Vec<RangeInclusive<u64>>,
    /// `(sequence id, extra copies)` pairs.
    pub duplicates: Vec<(u64, u32)>,
    /// Fail before reporting ready.
    pub fail_on_start: bool,
}

impl ImpairmentPlan {
    fn is_lost(&self, id: u64) -> bool {
        self.loss.iter().any(|window| window.contains(&id))
    }

    fn extra_copies(&self, id: u64) -> u32 {
        self.duplicates
            .iter()
            .filter(|(dup_id, _)| *dup_id == id)
            .fold(0u32, |total, (_, copies)| total.saturating_add(*copies))
    }
}

#[derive(Debug, Default)]
struct Capture {
    sent: u64,
    observations: Vec<Observation>,
}

#[derive(Debug)]
pub struct SimulatedIo {
    setup: IoSetup,
    servers: Vec<Endpoint>,
    packets: u64,
    plan: ImpairmentPlan,
    endpoints: Vec<Endpoint>,
    captures: BTreeMap<Endpoint, Capture>,
    results: Option<TestResults>,
}

impl SimulatedIo {
    pub fn new(setup: IoSetup, servers: Vec<Endpoint>, packets: u64, plan: ImpairmentPlan) -> Self {
        Self {
            setup,
            servers,
            packets,
            plan,
            endpoints: Vec::new(),
            captures: BTreeMap::new(),
            results: None,
        }
    }

    /// Total packets handed to the wire across all endpoints.
    pub fn sent_total(&self) -> u64 {
        self.captures.values().map(|c| c.sent).sum()
    }
}

impl IoDriver for SimulatedIo {
    fn generate_traffic(&mut self, direction: TrafficDirection) -> Result<()> {
        if self.packets == 0 {
            bail!("traffic pattern for {} has no packets", direction);
        }
        self.endpoints = match (&self.setup.destination, direction) {
            (Destination::MuxPorts(ports), _) => ports.iter().map(|p| Endpoint::from(p.as_str())).collect(),
            (Destination::VlanPort(port), TrafficDirection::T1ToServer | TrafficDirection::T1ToSoc) => {
                let index = self.servers.len().saturating_sub(1).min(port_index(port));
                self.servers.get(index).cloned().into_iter().collect()
            }
            (Destination::Random, _) if self.setup.random_dst == Some(true) => {
                self.servers.choose(&mut rand::thread_rng()).cloned().into_iter().collect()
            }
            _ => self.servers.clone(),
        };
        if self.endpoints.is_empty() {
            bail!("no destination endpoints for {} traffic", direction);
        }
        info!(
            %direction,
            endpoints = self.endpoints.len(),
            packets = self.packets,
            "generated traffic pattern"
        );
        Ok(())
    }

    fn start_io_test(&mut self, ctx: &IoContext) -> Result<()> {
        if self.plan.fail_on_start {
            bail!("sniffer failed to open capture on {}", self.setup.active);
        }
        ctx.mark_ready();

        'send: for id in 0..self.packets {
            for endpoint in &self.endpoints {
                if ctx.is_cancelled() {
                    debug!(id, "stop requested, ending capture");
                    break 'send;
                }
                let capture = self.captures.entry(endpoint.clone()).or_default();
                capture.sent += 1;
                if self.plan.is_lost(id) {
                    continue;
                }
                let sent_at = id as f64 * self.setup.send_interval.as_secs_f64();
                capture.observations.push(Observation::new(id, sent_at));
                let extra = self.plan.extra_copies(id);
                for copy in 1..=extra {
                    let offset = self.setup.send_interval.as_secs_f64() * f64::from(copy) / (f64::from(extra) + 1.0);
                    capture.observations.push(Observation::new(id, sent_at + offset));
                }
            }
            std::thread::sleep(self.setup.send_interval);
        }

        info!(sent = self.sent_total(), "sender finished");
        Ok(())
    }

    fn examine_flow(&mut self) -> Result<()> {
        let mut results = TestResults::new();
        for (endpoint, capture) in &self.captures {
            results.insert(endpoint.clone(), flow::examine(capture.sent, &capture.observations));
        }
        debug!(endpoints = results.len(), "flow examined");
        self.results = Some(results);
        Ok(())
    }

    fn test_results(&self) -> Option<&TestResults> {
        self.results.as_ref()
    }
}

/// Trailing number of a port name, e.g. `Ethernet8` -> 8 / 4 = 2.
fn port_index(port: &str) -> usize {
    let digits: String = port
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse::<usize>().map(|n| n / 4).unwrap_or(0)
}

/// Builds [`SimulatedIo`] drivers sharing one server list and plan.
#[derive(Debug, Clone)]
pub struct SimulatedFactory {
    pub servers: Vec<Endpoint>,
    pub packets: u64,
    pub plan: ImpairmentPlan,
}

impl SimulatedFactory {
    pub fn new(servers: Vec<Endpoint>, packets: u64) -> Self {
        Self {
            servers,
            packets,
            plan: ImpairmentPlan::default(),
        }
    }

    pub fn with_plan(mut self, plan: ImpairmentPlan) -> Self {
        self.plan = plan;
        self
    }
}

impl IoDriverFactory for SimulatedFactory {
    type Driver = SimulatedIo;

    fn create(&self, setup: &IoSetup) -> Result<SimulatedIo> {
        Ok(SimulatedIo::new(
            setup.clone(),
            self.servers.clone(),
            self.packets,
            self.plan.clone(),
        ))
    }
}
