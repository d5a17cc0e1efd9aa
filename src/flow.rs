//! Post-capture flow reconstruction.
//!
//! Turns what the sniffer saw for one endpoint (sequence ids with capture
//! timestamps, in arrival order) into a [`DeliveryRecord`]. Sequence ids run
//! from `0` to `sent_packets - 1`.

use std::collections::BTreeMap;

use tracing::debug;

use crate::record::{DeliveryRecord, Duplication, Interval};

/// One captured packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub id: u64,
    /// Capture time in seconds.
    pub time: f64,
}

impl Observation {
    pub fn new(id: u64, time: f64) -> Self {
        Self { id, time }
    }
}

#[derive(Debug, Clone, Copy)]
struct Arrivals {
    first: f64,
    last: f64,
    copies: u32,
}

/// Rebuild the delivery record of one endpoint.
///
/// - A gap between two received ids becomes a disruption bounded by the
///   last id before and the first id after the gap.
/// - An id captured `n > 1` times becomes a duplication with count `n - 1`
///   spanning its first and last capture.
/// - Ids missing before the first received one, or after the last one, are
///   counted as leading and trailing loss rather than disruptions.
/// - Ids outside `0..sent_packets` are ignored.
pub fn examine(sent_packets: u64, observations: &[Observation]) -> DeliveryRecord {
    let mut arrivals: BTreeMap<u64, Arrivals> = BTreeMap::new();
    let mut foreign = 0usize;

    for obs in observations {
        if obs.id >= sent_packets {
            foreign += 1;
            continue;
        }
        arrivals
            .entry(obs.id)
            .and_modify(|a| {
                a.first = a.first.min(obs.time);
                a.last = a.last.max(obs.time);
                a.copies += 1;
            })
            .or_insert(Arrivals {
                first: obs.time,
                last: obs.time,
                copies: 1,
            });
    }
    if foreign > 0 {
        debug!(foreign, "ignored packets with unknown sequence ids");
    }

    let mut record = DeliveryRecord {
        sent_packets,
        received_packets: arrivals.len() as u64,
        ..Default::default()
    };

    let (Some((&first_id, _)), Some((&last_id, _))) =
        (arrivals.first_key_value(), arrivals.last_key_value())
    else {
        return record;
    };
    record.disruption_before_traffic = first_id;
    record.disruption_after_traffic = sent_packets - 1 - last_id;

    let mut previous: Option<(u64, Arrivals)> = None;
    for (&id, &seen) in &arrivals {
        if let Some((prev_id, prev)) = previous {
            if id > prev_id + 1 {
                record
                    .disruptions
                    .push(Interval::new(prev_id, id, prev.first, seen.first));
            }
        }
        if seen.copies > 1 {
            record.duplications.push(Duplication::new(
                Interval::new(id, id, seen.first, seen.last),
                seen.copies - 1,
            ));
        }
        previous = Some((id, seen));
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(ids: &[u64]) -> Vec<Observation> {
        ids.iter()
            .map(|&id| Observation::new(id, id as f64 * 0.1))
            .collect()
    }

    #[test]
    fn test_clean_stream() {
        let ids: Vec<u64> = (0..10).collect();
        let record = examine(10, &stream(&ids));
        assert_eq!(record.received_packets, 10);
        assert!(record.disruptions.is_empty());
        assert!(record.duplications.is_empty());
        assert_eq!(record.disruption_before_traffic, 0);
        assert_eq!(record.disruption_after_traffic, 0);
    }

    #[test]
    fn test_gap_becomes_bounded_disruption() {
        let record = examine(10, &stream(&[0, 1, 2, 6, 7, 8, 9]));
        assert_eq!(record.received_packets, 7);
        assert_eq!(record.disruptions.len(), 1);
        let d = record.disruptions[0];
        assert_eq!((d.start_id, d.end_id), (2, 6));
        assert!((d.duration() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_repeats_become_duplications() {
        let mut obs = stream(&[0, 1, 2, 3, 4]);
        obs.push(Observation::new(3, 0.35));
        obs.push(Observation::new(3, 0.38));
        let record = examine(5, &obs);
        assert_eq!(record.received_packets, 5);
        assert_eq!(record.duplications.len(), 1);
        assert_eq!(record.duplications[0].duplication_count, 2);
        let dup = record.duplications[0].interval;
        assert!((dup.start_time - 0.3).abs() < 1e-9);
        assert!((dup.end_time - 0.38).abs() < 1e-9);
    }

    #[test]
    fn test_edge_loss_is_counted_not_disrupted() {
        let record = examine(10, &stream(&[3, 4, 5, 6]));
        assert_eq!(record.disruption_before_traffic, 3);
        assert_eq!(record.disruption_after_traffic, 3);
        assert!(record.disruptions.is_empty());
    }

    #[test]
    fn test_nothing_received() {
        let record = examine(10, &stream(&[42]));
        assert_eq!(record.received_packets, 0);
        assert_eq!(record.sent_packets, 10);
        assert!(record.disruptions.is_empty());
    }

    #[test]
    fn test_reordered_capture_is_sorted_by_id() {
        let obs = vec![
            Observation::new(1, 0.1),
            Observation::new(0, 0.12),
            Observation::new(4, 0.4),
            Observation::new(2, 0.2),
        ];
        let record = examine(5, &obs);
        assert_eq!(record.disruptions.len(), 1);
        assert_eq!(record.disruptions[0].start_id, 2);
        assert_eq!(record.disruptions[0].end_id, 4);
        assert_eq!(record.disruption_after_traffic, 0);
    }
}
