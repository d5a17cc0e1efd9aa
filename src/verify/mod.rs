//! Traffic result classification: merge, summarise, and judge delivery
//! records against caller thresholds.
//!
//! [`evaluate`] is pure and never stops at the first problem: every rule is
//! checked for every endpoint and all violations land in one report, so a
//! multi-server run is diagnosable from a single failure message.

pub mod merge;
pub mod summary;
pub mod thresholds;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::record::{DeliveryRecord, Endpoint, TestResults};

pub use merge::merge_duplications;
pub use summary::{count_bursts, exceeds_total_budget, EndpointSummary};
pub use thresholds::{AllowedDuplication, DuplicationBounds, Thresholds};

#[derive(Debug, Error)]
pub enum ThresholdError {
    #[error("invalid allowed duplication {0:?}: expected N or N,M")]
    InvalidDuplication(String),

    #[error("invalid delay {0}: must be a finite, non-negative number of seconds")]
    InvalidDelay(f64),
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("no traffic test results found")]
    NoResults,

    #[error(transparent)]
    Thresholds(#[from] ThresholdError),

    #[error("traffic verification failed:{block}")]
    Failed { block: String, report: VerifyReport },
}

/// Outcome of one verification pass.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub summaries: BTreeMap<Endpoint, EndpointSummary>,
    pub failures: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// All failure messages as one block, one line each, behind a newline.
    pub fn failure_block(&self) -> String {
        let mut block = String::new();
        for failure in &self.failures {
            block.push('\n');
            block.push_str(failure);
        }
        block
    }
}

/// Classify every endpoint's record against `thresholds`.
///
/// Records are only read; the merge pass works on a private copy.
pub fn evaluate(results: &TestResults, thresholds: &Thresholds) -> Result<VerifyReport, ThresholdError> {
    thresholds.validate()?;
    let bounds = thresholds.duplication_bounds();

    let mut summaries = BTreeMap::new();
    let mut failures = Vec::new();

    for (endpoint, record) in results {
        let merged;
        let record = if thresholds.merge_duplications_into_disruptions && !record.disruptions.is_empty() {
            merged = with_merged_disruptions(endpoint, record);
            &merged
        } else {
            record
        };

        let summary = EndpointSummary::from_record(record);
        info!(
            endpoint = %endpoint,
            "server summary:\n{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );

        check_endpoint(endpoint, record, &summary, thresholds, bounds, &mut failures);
        summaries.insert(endpoint.clone(), summary);
    }

    Ok(VerifyReport {
        summaries,
        failures,
        generated_at: Utc::now(),
    })
}

/// Run [`evaluate`] and turn any rule violation into a single error.
pub fn validate_traffic_results(
    results: Option<&TestResults>,
    thresholds: &Thresholds,
) -> Result<VerifyReport, VerifyError> {
    let results = results.ok_or(VerifyError::NoResults)?;
    let report = evaluate(results, thresholds)?;
    if report.is_ok() {
        Ok(report)
    } else {
        Err(VerifyError::Failed {
            block: report.failure_block(),
            report,
        })
    }
}

fn with_merged_disruptions(endpoint: &Endpoint, record: &DeliveryRecord) -> DeliveryRecord {
    debug!(endpoint = %endpoint, disruptions = ?record.disruptions, "disruptions before merge");
    debug!(endpoint = %endpoint, duplications = ?record.duplications, "duplications before merge");

    let mut working = record.clone();
    working.disruptions = merge_duplications(&record.disruptions, &record.duplications);

    debug!(endpoint = %endpoint, disruptions = ?working.disruptions, "disruptions after merge");
    working
}

fn check_endpoint(
    endpoint: &Endpoint,
    record: &DeliveryRecord,
    summary: &EndpointSummary,
    thresholds: &Thresholds,
    bounds: DuplicationBounds,
    failures: &mut Vec<String>,
) {
    let allowed = thresholds.allowed_disruption;
    let delay = thresholds.delay;

    if summary.received_packets == 0 {
        failures.push(format!(
            "Test failed to capture any meaningful received packets for server {}",
            endpoint
        ));
    }

    if summary.total_disruptions > allowed as usize {
        failures.push(format!(
            "Traffic to server {} was disrupted {} times. Allowed number of disruptions: {}",
            endpoint, summary.total_disruptions, allowed
        ));
    }

    if summary.longest_disruption > delay && exceeds_total_budget(&record.disruptions, allowed, delay) {
        failures.push(format!(
            "Traffic on server {} was disrupted for {:?}s. Maximum allowed disruption: {:?}s",
            endpoint, summary.longest_disruption, delay
        ));
    }

    if summary.total_duplications > bounds.sequences as usize {
        failures.push(format!(
            "Traffic to server {} was duplicated {} times. Allowed number of duplications: {}",
            endpoint, summary.total_duplications, bounds.sequences
        ));
    }

    if summary.largest_duplication_count > bounds.burst {
        let packet_id = summary
            .largest_duplication_packet_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        failures.push(format!(
            "Traffic on server {} with packet id {} has {} duplications. Allowed max number of duplication count: {}",
            endpoint, packet_id, summary.largest_duplication_count, bounds.burst
        ));
    }

    if summary.longest_duplication > delay
        && exceeds_total_budget(record.duplications.iter().map(|d| &d.interval), allowed, delay)
    {
        failures.push(format!(
            "Traffic on server {} was duplicated for {:?}s. Maximum allowed duplication: {:?}s",
            endpoint, summary.longest_duplication, delay
        ));
    }

    if !thresholds.allow_disruption_before_traffic && summary.disruption_before_traffic > 0 {
        failures.push(format!(
            "Traffic on server {} was disrupted prior to test start, missing {} packets from the start of the packet flow",
            endpoint, summary.disruption_before_traffic
        ));
    }

    if summary.disruption_after_traffic > 0 {
        failures.push(format!(
            "Traffic on server {} was disrupted after test end, missing {} packets from the end of the packet flow",
            endpoint, summary.disruption_after_traffic
        ));
    }
}
