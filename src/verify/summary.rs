//! Aggregate statistics over one endpoint's delivery record.

use serde::Serialize;
use tracing::debug;

use crate::record::{DeliveryRecord, Duplication, Interval};

/// Per-endpoint statistics the pass/fail rules are evaluated against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointSummary {
    pub received_packets: u64,
    pub received_packet_diff: i64,
    pub total_disruptions: usize,
    pub longest_disruption: f64,
    pub total_duplications: usize,
    pub longest_duplication: f64,
    pub largest_duplication_count: u32,
    pub largest_duplication_packet_id: Option<u64>,
    pub disruption_before_traffic: u64,
    pub disruption_after_traffic: u64,
}

impl EndpointSummary {
    pub fn from_record(record: &DeliveryRecord) -> Self {
        let (largest_duplication_count, largest_duplication_packet_id) =
            largest_duplication(&record.duplications);

        Self {
            received_packets: record.received_packets,
            received_packet_diff: record.received_packets as i64 - record.sent_packets as i64,
            total_disruptions: record.disruptions.len(),
            longest_disruption: longest(record.disruptions.iter()),
            total_duplications: count_bursts(&record.duplications),
            longest_duplication: longest(record.duplications.iter().map(|d| &d.interval)),
            largest_duplication_count,
            largest_duplication_packet_id,
            disruption_before_traffic: record.disruption_before_traffic,
            disruption_after_traffic: record.disruption_after_traffic,
        }
    }
}

fn longest<'a>(intervals: impl Iterator<Item = &'a Interval>) -> f64 {
    intervals.map(Interval::duration).fold(0.0, f64::max)
}

/// Largest copy count and the first packet id that reached it.
fn largest_duplication(duplications: &[Duplication]) -> (u32, Option<u64>) {
    let mut largest = 0;
    let mut packet_id = None;
    for dup in duplications {
        if dup.duplication_count > largest {
            largest = dup.duplication_count;
            packet_id = Some(dup.interval.start_id);
        }
    }
    (largest, packet_id)
}

/// Number of duplication bursts.
///
/// A burst is a maximal run of adjacent entries whose `start_id`s climb by
/// exactly one per entry, so ids `[70, 71, 90]` form two bursts.
pub fn count_bursts(duplications: &[Duplication]) -> usize {
    let mut bursts = 0;
    let mut previous_key = None;
    for (index, dup) in duplications.iter().enumerate() {
        let key = index as i128 - i128::from(dup.interval.start_id);
        if previous_key != Some(key) {
            bursts += 1;
            previous_key = Some(key);
        }
    }
    bursts
}

/// Whether the summed length of `intervals` exceeds `allowed_disruption * delay`.
///
/// One long window is tolerated on its own; it only counts as a failure
/// once the cumulative outage is over the total budget.
pub fn exceeds_total_budget<'a>(
    intervals: impl IntoIterator<Item = &'a Interval>,
    allowed_disruption: u32,
    delay: f64,
) -> bool {
    let total: f64 = intervals.into_iter().map(Interval::duration).sum();
    let budget = f64::from(allowed_disruption) * delay;
    debug!(
        total_disruption_length = total,
        total_allowed_disruption_length = budget,
        "cumulative window length"
    );
    total > budget
}
