//! Folding duplication windows into neighbouring disruptions.
//!
//! On a link-down event the DUT may flood the VLAN between the failure and
//! the switchover, so a few duplicated packets arrive in the middle of what
//! is really one outage. Flow examination counts those duplicates as
//! deliveries and reports the outage as several disruptions; this pass
//! reassembles them.

use crate::record::{Duplication, Interval};

#[derive(Debug, Clone, Copy)]
struct Slot {
    interval: Interval,
    /// Present while every window folded into this slot was a duplication.
    duplication_count: Option<u32>,
}

/// Merge `duplications` into `disruptions` and return the pure disruptions.
///
/// Windows are visited in `start_time` order. A window joins the last
/// accumulated one when its `start_id` is at most one past that window's
/// `end_id`; otherwise it opens a new one. Absorbing a disruption turns a
/// duplication slot into a disruption, never the other way round. Slots made
/// only of duplications are dropped from the output.
pub fn merge_duplications(disruptions: &[Interval], duplications: &[Duplication]) -> Vec<Interval> {
    let mut windows: Vec<Slot> = disruptions
        .iter()
        .map(|interval| Slot {
            interval: *interval,
            duplication_count: None,
        })
        .chain(duplications.iter().map(|dup| Slot {
            interval: dup.interval,
            duplication_count: Some(dup.duplication_count),
        }))
        .collect();
    windows.sort_by(|a, b| a.interval.start_time.total_cmp(&b.interval.start_time));

    let mut merged: Vec<Slot> = Vec::with_capacity(windows.len());
    for window in windows {
        match merged.last_mut() {
            Some(last) if window.interval.start_id <= last.interval.end_id.saturating_add(1) => {
                if last.interval.end_id < window.interval.end_id {
                    last.interval.end_id = window.interval.end_id;
                    last.interval.end_time = window.interval.end_time;
                }
                if last.duplication_count.is_some() && window.duplication_count.is_none() {
                    last.duplication_count = None;
                }
            }
            _ => merged.push(window),
        }
    }

    merged
        .into_iter()
        .filter(|slot| slot.duplication_count.is_none())
        .map(|slot| slot.interval)
        .collect()
}
