//! Pass/fail thresholds for traffic verification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ThresholdError;

/// Burst size tolerated when only a sequence bound is given.
pub const DEFAULT_DUPLICATION_BURST: u32 = 2;

/// Caller-supplied duplication tolerance.
///
/// A bare count bounds the number of duplication bursts; a pair bounds the
/// number of bursts and the largest copy count of any single packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AllowedDuplication {
    Sequences(u32),
    Bounds(u32, u32),
}

impl FromStr for AllowedDuplication {
    type Err = ThresholdError;

    /// Accepts `"3"` or `"3,4"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ThresholdError::InvalidDuplication(s.to_string());
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [sequences] => sequences
                .parse()
                .map(AllowedDuplication::Sequences)
                .map_err(|_| invalid()),
            [sequences, burst] => {
                let sequences = sequences.parse().map_err(|_| invalid())?;
                let burst = burst.parse().map_err(|_| invalid())?;
                Ok(AllowedDuplication::Bounds(sequences, burst))
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for AllowedDuplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowedDuplication::Sequences(n) => write!(f, "{}", n),
            AllowedDuplication::Bounds(n, burst) => write!(f, "{},{}", n, burst),
        }
    }
}

/// Resolved duplication limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicationBounds {
    /// Max number of duplication bursts.
    pub sequences: u32,
    /// Max copy count of any single packet.
    pub burst: u32,
}

/// Threshold configuration for one verification pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Max number of disruption windows.
    pub allowed_disruption: u32,
    /// Max length in seconds of any single disruption/duplication window.
    pub delay: f64,
    /// `None` inherits `(allowed_disruption, 2)`.
    #[serde(default)]
    pub allowed_duplication: Option<AllowedDuplication>,
    #[serde(default)]
    pub allow_disruption_before_traffic: bool,
    #[serde(default)]
    pub merge_duplications_into_disruptions: bool,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::new(0, 0.0)
    }
}

impl Thresholds {
    pub fn new(allowed_disruption: u32, delay: f64) -> Self {
        Self {
            allowed_disruption,
            delay,
            allowed_duplication: None,
            allow_disruption_before_traffic: false,
            merge_duplications_into_disruptions: false,
        }
    }

    pub fn with_allowed_duplication(mut self, allowed: Option<AllowedDuplication>) -> Self {
        self.allowed_duplication = allowed;
        self
    }

    pub fn allow_disruption_before_traffic(mut self, allow: bool) -> Self {
        self.allow_disruption_before_traffic = allow;
        self
    }

    pub fn merge_duplications_into_disruptions(mut self, merge: bool) -> Self {
        self.merge_duplications_into_disruptions = merge;
        self
    }

    /// A nonzero delay with no disruption count tolerates one disruption.
    pub fn promoted(mut self) -> Self {
        if self.delay != 0.0 && self.allowed_disruption == 0 {
            self.allowed_disruption = 1;
        }
        self
    }

    /// Cumulative outage time tolerated across all windows of one list.
    pub fn total_budget(&self) -> f64 {
        f64::from(self.allowed_disruption) * self.delay
    }

    pub fn duplication_bounds(&self) -> DuplicationBounds {
        match self.allowed_duplication {
            None => DuplicationBounds {
                sequences: self.allowed_disruption,
                burst: DEFAULT_DUPLICATION_BURST,
            },
            Some(AllowedDuplication::Sequences(sequences)) => DuplicationBounds {
                sequences,
                burst: DEFAULT_DUPLICATION_BURST,
            },
            Some(AllowedDuplication::Bounds(sequences, burst)) => {
                DuplicationBounds { sequences, burst }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ThresholdError> {
        if !self.delay.is_finite() || self.delay < 0.0 {
            return Err(ThresholdError::InvalidDelay(self.delay));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_duplication_inherits_disruption_count() {
        let inherited = Thresholds::new(3, 1.0);
        let explicit = Thresholds::new(3, 1.0)
            .with_allowed_duplication(Some(AllowedDuplication::Bounds(3, 2)));
        assert_eq!(inherited.duplication_bounds(), explicit.duplication_bounds());
        assert_eq!(
            inherited.duplication_bounds(),
            DuplicationBounds { sequences: 3, burst: 2 }
        );
    }

    #[test]
    fn test_bare_count_keeps_default_burst() {
        let t = Thresholds::new(0, 0.0).with_allowed_duplication(Some(AllowedDuplication::Sequences(5)));
        assert_eq!(t.duplication_bounds(), DuplicationBounds { sequences: 5, burst: 2 });
    }

    #[test]
    fn test_delay_promotes_disruption_count() {
        assert_eq!(Thresholds::new(0, 5.0).promoted(), Thresholds::new(1, 5.0));
        assert_eq!(Thresholds::new(3, 5.0).promoted().allowed_disruption, 3);
        assert_eq!(Thresholds::new(0, 0.0).promoted().allowed_disruption, 0);
    }

    #[test]
    fn test_parse_allowed_duplication() {
        assert_eq!("4".parse::<AllowedDuplication>().unwrap(), AllowedDuplication::Sequences(4));
        assert_eq!(
            "4, 3".parse::<AllowedDuplication>().unwrap(),
            AllowedDuplication::Bounds(4, 3)
        );
        assert!(matches!(
            "1,2,3".parse::<AllowedDuplication>(),
            Err(ThresholdError::InvalidDuplication(_))
        ));
        assert!("many".parse::<AllowedDuplication>().is_err());
    }

    #[test]
    fn test_allowed_duplication_from_json_shapes() {
        let count: AllowedDuplication = serde_json::from_str("2").unwrap();
        let pair: AllowedDuplication = serde_json::from_str("[2, 6]").unwrap();
        assert_eq!(count, AllowedDuplication::Sequences(2));
        assert_eq!(pair, AllowedDuplication::Bounds(2, 6));
        assert!(serde_json::from_str::<AllowedDuplication>("\"two\"").is_err());
    }

    #[test]
    fn test_negative_delay_rejected() {
        assert!(Thresholds::new(1, -1.0).validate().is_err());
        assert!(Thresholds::new(1, f64::NAN).validate().is_err());
        assert!(Thresholds::new(1, 0.5).validate().is_ok());
    }
}
