//! Per-endpoint delivery records produced by a traffic capture.
//!
//! A [`DeliveryRecord`] is the raw outcome of one I/O run towards one
//! destination endpoint: how many packets went out, how many came back, and
//! the loss/duplication windows reconstructed from the captured sequence ids.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Deserializer, Serialize};

/// All delivery records of one run, keyed by destination endpoint.
///
/// Iteration order is the natural endpoint order (see [`Endpoint`]).
pub type TestResults = BTreeMap<Endpoint, DeliveryRecord>;

/// A window bounded by two sequence ids and their capture timestamps.
///
/// For a disruption the bounds are the last packet seen before the outage
/// and the first packet seen after it; times are seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start_id: u64,
    pub end_id: u64,
    pub start_time: f64,
    pub end_time: f64,
}

impl Interval {
    pub fn new(start_id: u64, end_id: u64, start_time: f64, end_time: f64) -> Self {
        Self {
            start_id,
            end_id,
            start_time,
            end_time,
        }
    }

    /// Length of the window in seconds.
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// A sequence id (or run) observed more often than it was sent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Duplication {
    #[serde(flatten)]
    pub interval: Interval,
    /// Excess copies observed, always >= 1.
    pub duplication_count: u32,
}

impl Duplication {
    pub fn new(interval: Interval, duplication_count: u32) -> Self {
        Self {
            interval,
            duplication_count,
        }
    }
}

/// Delivery summary for one destination endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub sent_packets: u64,
    pub received_packets: u64,
    #[serde(default)]
    pub disruptions: Vec<Interval>,
    #[serde(default)]
    pub duplications: Vec<Duplication>,
    /// Packets missing before the first matched packet (0 = none).
    #[serde(default, deserialize_with = "count_or_flag")]
    pub disruption_before_traffic: u64,
    /// Packets missing after the last matched packet (0 = none).
    #[serde(default, deserialize_with = "count_or_flag")]
    pub disruption_after_traffic: u64,
}

/// Capture tools report leading/trailing loss either as a flag or a count.
fn count_or_flag<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Flag(bool),
        Count(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Flag(flag) => u64::from(flag),
        Raw::Count(count) => count,
    })
}

/// Destination endpoint identifier (usually a server IP address).
///
/// Ordered "naturally": addresses compare as addresses, everything else
/// compares with embedded digit runs treated as numbers, so `server2` sorts
/// before `server10` and `10.0.0.9` before `10.0.0.10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Endpoint {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.parse::<IpAddr>(), other.0.parse::<IpAddr>()) {
            (Ok(a), Ok(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => natural_cmp(&self.0, &other.0),
        }
    }
}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut left, mut right) = (a, b);
    loop {
        match (left.chars().next(), right.chars().next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let (x_digits, x_rest) = split_digits(left);
                let (y_digits, y_rest) = split_digits(right);
                let x_trimmed = x_digits.trim_start_matches('0');
                let y_trimmed = y_digits.trim_start_matches('0');
                let ord = x_trimmed
                    .len()
                    .cmp(&y_trimmed.len())
                    .then_with(|| x_trimmed.cmp(y_trimmed));
                if ord != Ordering::Equal {
                    return ord;
                }
                left = x_rest;
                right = y_rest;
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                left = &left[x.len_utf8()..];
                right = &right[y.len_utf8()..];
            }
        }
    }
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    s.split_at(end)
}
