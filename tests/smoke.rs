//! Smoke tests -- verify the binary runs and each subcommand does its job.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("dualtor-io").unwrap();
    cmd.env("DUALTOR_IO_CONFIG", "/nonexistent/dualtor-io.toml");
    cmd
}

fn results_file(json: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

const CLEAN: &str = r#"{
    "192.168.0.2": {
        "sent_packets": 1000,
        "received_packets": 1000,
        "disruptions": [],
        "duplications": [],
        "disruption_before_traffic": false,
        "disruption_after_traffic": false
    }
}"#;

const ONE_OUTAGE: &str = r#"{
    "192.168.0.2": {
        "sent_packets": 1000,
        "received_packets": 990,
        "disruptions": [
            {"start_id": 100, "end_id": 111, "start_time": 10.0, "end_time": 11.1}
        ],
        "duplications": [],
        "disruption_before_traffic": 0,
        "disruption_after_traffic": 0
    }
}"#;

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("dual-ToR"));
}

#[test]
fn test_cli_version() {
    cli()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dualtor-io"));
}

#[test]
fn test_verify_clean_results_pass() {
    let file = results_file(CLEAN);
    cli()
        .args(["verify", "--results"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Verdict: PASS"));
}

#[test]
fn test_verify_outage_fails_without_allowance() {
    let file = results_file(ONE_OUTAGE);
    cli()
        .args(["verify", "--results"])
        .arg(file.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("Verdict: FAIL"))
        .stdout(predicate::str::contains(
            "Traffic to server 192.168.0.2 was disrupted 1 times. Allowed number of disruptions: 0",
        ));
}

#[test]
fn test_verify_outage_within_delay_passes() {
    let file = results_file(ONE_OUTAGE);
    cli()
        .args(["verify", "--delay", "2", "--json", "--results"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"failures\": []"));
}

#[test]
fn test_verify_rejects_bad_duplication_bounds() {
    let file = results_file(CLEAN);
    cli()
        .args(["verify", "--allowed-duplication", "two", "--results"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid allowed duplication"));
}

#[test]
fn test_verify_missing_file_is_an_error() {
    cli()
        .args(["verify", "--results", "/nonexistent/results.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read results file"));
}

#[test]
fn test_simulate_clean_run_reports_every_server() {
    cli()
        .args([
            "simulate",
            "--packets",
            "30",
            "--send-interval-ms",
            "1",
            "--settle-ms",
            "0",
            "--verify",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("192.168.0.2"))
        .stdout(predicate::str::contains("192.168.0.3"));
}

#[test]
fn test_simulate_loss_fails_verification() {
    cli()
        .args([
            "simulate",
            "--packets",
            "40",
            "--send-interval-ms",
            "1",
            "--settle-ms",
            "0",
            "--loss",
            "10..14",
            "--verify",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("was disrupted 1 times"));
}

#[test]
fn test_simulate_virtual_dut_skips_upstream_verify() {
    cli()
        .args([
            "simulate",
            "--direction",
            "server-to-t1",
            "--asic-type",
            "vs",
            "--packets",
            "20",
            "--send-interval-ms",
            "1",
            "--settle-ms",
            "0",
            "--loss",
            "5..8",
            "--verify",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("verification skipped"));
}

#[test]
fn test_simulate_rejects_oversized_duplicate_burst() {
    cli()
        .args(["simulate", "--duplicate", "1:4294967295"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at most 1000 extra copies"));
}

#[test]
fn test_show_config_prints_defaults() {
    cli()
        .arg("show-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("settle_delay_ms = 15000"))
        .stdout(predicate::str::contains("t1_to_server = 100"));
}

#[test]
fn test_save_capture_without_log_dir_is_skipped() {
    let capture = results_file("pcap");
    cli()
        .args(["save-capture", "--test-name", "test_mux_toggle[upper]", "--capture"])
        .arg(capture.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No capture saved"));
}
