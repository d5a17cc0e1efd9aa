use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use dualtor_io::config::{HarnessConfig, LogFormat, LoggingConfig};
use dualtor_io::dataplane::{DataPlaneHarness, IoTestOptions};
use dualtor_io::device::DutHost;
use dualtor_io::io::sim::{ImpairmentPlan, SimulatedFactory};
use dualtor_io::io::{FaultAction, TrafficDirection};
use dualtor_io::record::{Endpoint, TestResults};
use dualtor_io::verify::{self, AllowedDuplication, EndpointSummary, Thresholds, VerifyReport};

#[derive(Parser)]
#[command(
    name = "dualtor-io",
    about = "Data-plane I/O harness for dual-ToR testbeds",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (overrides DUALTOR_IO_CONFIG and the system path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a saved test-results JSON file against thresholds
    Verify {
        /// Results file: endpoint -> delivery record
        #[arg(long)]
        results: PathBuf,

        /// Max acceptable outage in seconds
        #[arg(long, default_value = "0")]
        delay: f64,

        /// Number of disruptions tolerated per endpoint
        #[arg(long, default_value = "0")]
        allowed_disruption: u32,

        /// Duplication bounds: N sequences, or N,M for sequences and burst
        #[arg(long)]
        allowed_duplication: Option<AllowedDuplication>,

        /// Tolerate packets lost before traffic reached the endpoint
        #[arg(long)]
        allow_disruption_before_traffic: bool,

        /// Fold duplications adjacent to disruptions into the disruption
        #[arg(long)]
        merge_duplications: bool,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Run one traffic direction against the in-process simulator
    Simulate {
        /// Traffic direction, e.g. t1-to-server
        #[arg(long, default_value = "t1-to-server")]
        direction: TrafficDirection,

        /// Packets sent to each endpoint
        #[arg(long, default_value = "200")]
        packets: u64,

        /// Send interval; defaults to the direction's configured interval
        #[arg(long)]
        send_interval_ms: Option<u64>,

        /// Lost sequence ids, e.g. 40..55 (repeatable)
        #[arg(long, value_parser = parse_loss)]
        loss: Vec<RangeInclusive<u64>>,

        /// Duplicated sequence id and extra copies, e.g. 70:2 (repeatable)
        #[arg(long, value_parser = parse_duplicate)]
        duplicate: Vec<(u64, u32)>,

        /// Stop the capture this long after the fault action
        #[arg(long)]
        stop_after_ms: Option<u64>,

        /// Settle delay before the fault action; defaults to the config value
        #[arg(long)]
        settle_ms: Option<u64>,

        /// Server endpoints (comma separated)
        #[arg(long, value_delimiter = ',', default_value = "192.168.0.2,192.168.0.3")]
        servers: Vec<String>,

        /// Server-to-T1 only: send to one randomly chosen destination
        #[arg(long)]
        random_dst: bool,

        /// ASIC type reported by the active DUT ("vs" is virtual)
        #[arg(long, default_value = "broadcom")]
        asic_type: String,

        /// Classify the results after the run
        #[arg(long)]
        verify: bool,

        /// Max acceptable outage in seconds
        #[arg(long, default_value = "0")]
        delay: f64,

        /// Number of disruptions tolerated per endpoint
        #[arg(long, default_value = "0")]
        allowed_disruption: u32,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Copy the sniffer's packet capture next to a test log
    SaveCapture {
        /// Test name used to build the capture file name
        #[arg(long)]
        test_name: String,

        /// Test log file; the capture lands in its directory
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Capture file; defaults to the configured capture path
        #[arg(long)]
        capture: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

/// Upper bound on `--duplicate` copies; every copy is held in memory.
const MAX_DUPLICATE_COPIES: u32 = 1_000;

fn parse_loss(s: &str) -> Result<RangeInclusive<u64>, String> {
    let (start, end) = s
        .split_once("..")
        .ok_or_else(|| format!("expected START..END, got {:?}", s))?;
    let start: u64 = start.trim().parse().map_err(|e| format!("bad start {:?}: {}", start, e))?;
    let end: u64 = end.trim().parse().map_err(|e| format!("bad end {:?}: {}", end, e))?;
    if end < start {
        return Err(format!("empty loss window {}", s));
    }
    Ok(start..=end)
}

fn parse_duplicate(s: &str) -> Result<(u64, u32), String> {
    let (id, copies) = s
        .split_once(':')
        .ok_or_else(|| format!("expected ID:COPIES, got {:?}", s))?;
    let id = id.trim().parse().map_err(|e| format!("bad id {:?}: {}", id, e))?;
    let copies: u32 = copies
        .trim()
        .parse()
        .map_err(|e| format!("bad copy count {:?}: {}", copies, e))?;
    if copies > MAX_DUPLICATE_COPIES {
        return Err(format!("at most {} extra copies per packet, got {}", MAX_DUPLICATE_COPIES, copies));
    }
    Ok((id, copies))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::load_or_default(),
    };
    init_tracing(&config.logging);

    match cli.command {
        Commands::Verify {
            results,
            delay,
            allowed_disruption,
            allowed_duplication,
            allow_disruption_before_traffic,
            merge_duplications,
            json,
        } => {
            tracing::info!(path = %results.display(), "Verifying traffic results");
            let content = std::fs::read_to_string(&results)
                .with_context(|| format!("failed to read results file: {}", results.display()))?;
            let test_results: TestResults = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse results file: {}", results.display()))?;

            let thresholds = Thresholds::new(allowed_disruption, delay)
                .with_allowed_duplication(allowed_duplication)
                .allow_disruption_before_traffic(allow_disruption_before_traffic)
                .merge_duplications_into_disruptions(merge_duplications)
                .promoted();
            let report = verify::evaluate(&test_results, &thresholds)?;
            print_report(&report, json)?;
            if !report.is_ok() {
                bail!("traffic verification failed with {} violation(s)", report.failures.len());
            }
        }
        Commands::Simulate {
            direction,
            packets,
            send_interval_ms,
            loss,
            duplicate,
            stop_after_ms,
            settle_ms,
            servers,
            random_dst,
            asic_type,
            verify,
            delay,
            allowed_disruption,
            json,
        } => {
            let mut config = config;
            if let Some(ms) = settle_ms {
                config.io.settle_delay_ms = ms;
            }
            let servers: Vec<Endpoint> = servers.iter().map(|s| Endpoint::from(s.as_str())).collect();
            let plan = ImpairmentPlan {
                loss,
                duplicates: duplicate,
                fail_on_start: false,
            };
            let factory = SimulatedFactory::new(servers.clone(), packets).with_plan(plan);
            let duthosts = vec![
                DutHost::new("upper-tor", asic_type.as_str()),
                DutHost::new("lower-tor", asic_type.as_str()),
            ];
            let harness = DataPlaneHarness::new(factory, duthosts.clone(), config);

            let opts = IoTestOptions {
                delay,
                allowed_disruption,
                verify,
                send_interval: send_interval_ms.map(Duration::from_millis),
                stop_after: stop_after_ms.map(Duration::from_millis),
                random_dst: random_dst.then_some(true),
                ..Default::default()
            };

            let active = &duthosts[0];
            let mut action = || {
                tracing::info!(dut = %active.hostname(), "Fault action injected");
                Ok::<(), anyhow::Error>(())
            };
            let action: Option<&mut dyn FaultAction> = Some(&mut action);

            tracing::info!(%direction, packets, "Starting simulated IO test");
            let results = match direction {
                TrafficDirection::T1ToServer => harness.send_t1_to_server_with_action(active, &opts, action).await?,
                TrafficDirection::ServerToT1 => harness.send_server_to_t1_with_action(active, &opts, action).await?,
                TrafficDirection::SocToT1 => harness.send_soc_to_t1_with_action(active, &opts, action).await?,
                TrafficDirection::T1ToSoc => harness.send_t1_to_soc_with_action(active, &opts, action).await?,
                TrafficDirection::ServerToServer => {
                    let mux_ports = servers.iter().map(|s| s.to_string()).collect();
                    harness
                        .send_server_to_server_with_action(active, mux_ports, &opts, action)
                        .await?
                }
            };

            match results {
                Some(results) if json => println!("{}", serde_json::to_string_pretty(&results)?),
                Some(results) => {
                    let summaries = results
                        .iter()
                        .map(|(endpoint, record)| (endpoint.clone(), EndpointSummary::from_record(record)))
                        .collect::<Vec<_>>();
                    print_summaries(summaries.iter().map(|(e, s)| (e, s)));
                }
                None => println!("No results (verification skipped on virtual DUT)"),
            }
        }
        Commands::SaveCapture {
            test_name,
            log_file,
            capture,
        } => {
            let capture = capture.unwrap_or_else(|| config.evidence.capture_path.clone());
            match dualtor_io::evidence::save_capture(&capture, log_file.as_deref(), &test_name)? {
                Some(dst) => println!("Capture saved to {}", dst.display()),
                None => println!("No capture saved"),
            }
        }
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn print_report(report: &VerifyReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    print_summaries(report.summaries.iter());
    if report.is_ok() {
        println!("\nVerdict: PASS");
    } else {
        println!("\nVerdict: FAIL");
        for failure in &report.failures {
            println!(" - {}", failure);
        }
    }
    println!();
    Ok(())
}

fn print_summaries<'a>(summaries: impl Iterator<Item = (&'a Endpoint, &'a EndpointSummary)>) {
    println!("\n=== Traffic Summary ===");
    println!(
        "{:<20} | {:>8} | {:>6} | {:>11} | {:>12} | {:>9}",
        "Endpoint", "Received", "Diff", "Disruptions", "Longest (s)", "Dup Seqs"
    );
    println!("{:-<20}-|-{:->8}-|-{:->6}-|-{:->11}-|-{:->12}-|-{:->9}", "", "", "", "", "", "");
    for (endpoint, s) in summaries {
        println!(
            "{:<20} | {:>8} | {:>6} | {:>11} | {:>12.3} | {:>9}",
            endpoint.as_str(),
            s.received_packets,
            s.received_packet_diff,
            s.total_disruptions,
            s.longest_disruption,
            s.total_duplications
        );
    }
}
