//! End-to-end runs of the per-direction helpers against the simulator.

use std::time::Duration;

use dualtor_io::config::HarnessConfig;
use dualtor_io::dataplane::{DataPlaneHarness, HarnessError, IoTestOptions};
use dualtor_io::device::{DeviceError, DutHost};
use dualtor_io::io::sim::{ImpairmentPlan, SimulatedFactory};
use dualtor_io::io::{FaultAction, IoError};
use dualtor_io::record::Endpoint;
use dualtor_io::verify::VerifyError;

fn fast_config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.io.settle_delay_ms = 0;
    config.io.drain_poll_interval_ms = 1;
    config.io.startup_timeout_ms = 5_000;
    config
}

fn servers() -> Vec<Endpoint> {
    vec!["192.168.0.2".into(), "192.168.0.3".into()]
}

fn tor_pair(asic_type: &str) -> Vec<DutHost> {
    vec![DutHost::new("upper-tor", asic_type), DutHost::new("lower-tor", asic_type)]
}

fn harness(packets: u64, plan: ImpairmentPlan, asic_type: &str) -> DataPlaneHarness<SimulatedFactory> {
    let factory = SimulatedFactory::new(servers(), packets).with_plan(plan);
    DataPlaneHarness::new(factory, tor_pair(asic_type), fast_config())
}

fn fast_opts() -> IoTestOptions {
    IoTestOptions {
        send_interval: Some(Duration::from_millis(1)),
        ..Default::default()
    }
}

/// Loss, one duplicated packet, more loss: a switchover seen as two outages.
fn split_outage() -> ImpairmentPlan {
    ImpairmentPlan {
        loss: vec![20..=24, 26..=29],
        duplicates: vec![(25, 1)],
        fail_on_start: false,
    }
}

#[tokio::test]
async fn test_clean_run_passes_verification() {
    let harness = harness(50, ImpairmentPlan::default(), "broadcom");
    let active = harness.duthosts()[0].clone();
    let opts = IoTestOptions {
        verify: true,
        ..fast_opts()
    };

    let results = harness
        .send_t1_to_server_with_action(&active, &opts, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(results.len(), 2);
    for record in results.values() {
        assert_eq!(record.sent_packets, 50);
        assert_eq!(record.received_packets, 50);
        assert!(record.disruptions.is_empty());
    }
}

#[tokio::test]
async fn test_split_outage_fails_unless_merged() {
    let harness = harness(60, split_outage(), "broadcom");
    let active = harness.duthosts()[0].clone();

    let unmerged = IoTestOptions {
        verify: true,
        delay: 1.0,
        ..fast_opts()
    };
    let err = harness
        .send_t1_to_server_with_action(&active, &unmerged, None)
        .await
        .unwrap_err();
    match err {
        HarnessError::Verify(VerifyError::Failed { report, .. }) => {
            assert_eq!(report.failures.len(), 2);
            assert!(report.failures.iter().all(|f| f.contains("was disrupted 2 times")));
        }
        other => panic!("unexpected error: {other}"),
    }

    let merged = IoTestOptions {
        merge_duplications_into_disruptions: true,
        ..unmerged
    };
    let results = harness
        .send_t1_to_server_with_action(&active, &merged, None)
        .await
        .unwrap()
        .unwrap();
    // The caller's records are left as captured.
    assert!(results.values().all(|r| r.disruptions.len() == 2));
}

#[tokio::test]
async fn test_fault_action_runs_once_traffic_flows() {
    let harness = harness(30, ImpairmentPlan::default(), "broadcom");
    let active = harness.duthosts()[0].clone();
    let mut injected = 0u32;
    let mut action = || {
        injected += 1;
        Ok::<(), anyhow::Error>(())
    };

    harness
        .send_server_to_t1_with_action(&active, &fast_opts(), Some(&mut action as &mut dyn FaultAction))
        .await
        .unwrap();
    assert_eq!(injected, 1);
}

#[tokio::test]
async fn test_failed_action_surfaces_as_io_error() {
    let harness = harness(5_000, ImpairmentPlan::default(), "broadcom");
    let active = harness.duthosts()[0].clone();
    let mut action = || -> anyhow::Result<()> { anyhow::bail!("mux toggle rejected") };

    let err = harness
        .send_soc_to_t1_with_action(&active, &fast_opts(), Some(&mut action as &mut dyn FaultAction))
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Io(IoError::Action(_))));
    assert!(err.to_string().contains("mux toggle rejected"));
}

#[tokio::test]
async fn test_stop_after_cuts_the_capture_short() {
    let harness = harness(100_000, ImpairmentPlan::default(), "broadcom");
    let active = harness.duthosts()[0].clone();
    let opts = IoTestOptions {
        stop_after: Some(Duration::from_millis(30)),
        ..fast_opts()
    };

    let results = harness
        .send_t1_to_soc_with_action(&active, &opts, None)
        .await
        .unwrap()
        .unwrap();
    for record in results.values() {
        assert!(record.sent_packets < 100_000);
        assert_eq!(record.disruption_after_traffic, 0);
    }
}

#[tokio::test]
async fn test_server_to_server_uses_mux_ports_as_endpoints() {
    let harness = harness(20, ImpairmentPlan::default(), "broadcom");
    let active = harness.duthosts()[1].clone();
    let ports = vec!["Ethernet4".to_string(), "Ethernet8".to_string()];

    let results = harness
        .send_server_to_server_with_action(&active, ports, &fast_opts(), None)
        .await
        .unwrap()
        .unwrap();
    let endpoints: Vec<&str> = results.keys().map(Endpoint::as_str).collect();
    assert_eq!(endpoints, vec!["Ethernet4", "Ethernet8"]);
}

#[tokio::test]
async fn test_virtual_dut_skips_verification() {
    let harness = harness(20, split_outage(), "vs");
    let active = harness.duthosts()[0].clone();
    let opts = IoTestOptions {
        verify: true,
        ..fast_opts()
    };

    let results = harness
        .send_server_to_t1_with_action(&active, &opts, None)
        .await
        .unwrap();
    assert!(results.is_none());
}

#[tokio::test]
async fn test_t1_to_server_on_virtual_dut_still_verifies() {
    let harness = harness(20, ImpairmentPlan::default(), "vs");
    let active = harness.duthosts()[0].clone();
    let opts = IoTestOptions {
        verify: true,
        ..fast_opts()
    };

    let err = harness
        .send_t1_to_server_with_action(&active, &opts, None)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Verify(VerifyError::NoResults)));

    let results = harness
        .send_t1_to_server_with_action(&active, &fast_opts(), None)
        .await
        .unwrap();
    assert!(results.is_none());
}

#[tokio::test]
async fn test_sniffer_start_failure_is_reported() {
    let plan = ImpairmentPlan {
        fail_on_start: true,
        ..Default::default()
    };
    let harness = harness(20, plan, "broadcom");
    let active = harness.duthosts()[0].clone();

    let err = harness
        .send_t1_to_server_with_action(&active, &fast_opts(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Io(IoError::Capture(_))));
}

#[tokio::test]
async fn test_single_dut_testbed_is_rejected() {
    let factory = SimulatedFactory::new(servers(), 10);
    let lonely = DutHost::new("upper-tor", "broadcom");
    let harness = DataPlaneHarness::new(factory, vec![lonely.clone()], fast_config());

    let err = harness
        .send_t1_to_server_with_action(&lonely, &fast_opts(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Device(DeviceError::IncompletePair { found: 1 })
    ));
}
