//! Scoring: PERT expected values and severity-weighted scores.
//!
//! Pure functions, no state. Outputs here are unrounded; callers round
//! with `round_currency` at the display edge.

use crate::error::{ReserveError, ReserveResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Qualitative impact tier shared by risks and opportunities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ReserveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|sev| sev.as_str() == s)
            .ok_or_else(|| ReserveError::validation("severity", format!("unknown severity '{s}'")))
    }
}

/// Fixed multiplier per severity tier.
pub fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Low => 0.5,
        Severity::Medium => 1.0,
        Severity::High => 1.5,
        Severity::Critical => 2.0,
    }
}

/// Three-point estimate of a cost impact or benefit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub min: f64,
    pub most_likely: f64,
    pub max: f64,
}

impl Estimate {
    pub fn new(min: f64, most_likely: f64, max: f64) -> Self {
        Self {
            min,
            most_likely,
            max,
        }
    }

    /// `0 <= min <= most_likely <= max`, all finite.
    pub fn is_ordered(&self) -> bool {
        [self.min, self.most_likely, self.max]
            .iter()
            .all(|v| v.is_finite())
            && 0.0 <= self.min
            && self.min <= self.most_likely
            && self.most_likely <= self.max
    }

    /// Input-side check. `field` names the triple in the error.
    pub fn validate(&self, field: &'static str) -> ReserveResult<()> {
        if self.is_ordered() {
            Ok(())
        } else {
            Err(ReserveError::validation(
                field,
                format!(
                    "expected 0 <= min <= most likely <= max, got ({}, {}, {})",
                    self.min, self.most_likely, self.max
                ),
            ))
        }
    }

    pub fn expected_value(&self) -> f64 {
        expected_value(self.min, self.most_likely, self.max)
    }
}

/// PERT expected value `(min + 4*most_likely + max) / 6`.
///
/// Returns 0 when the ordering `min <= most_likely <= max` does not hold.
pub fn expected_value(min: f64, most_likely: f64, max: f64) -> f64 {
    if !(min <= most_likely && most_likely <= max) {
        return 0.0;
    }
    (min + 4.0 * most_likely + max) / 6.0
}

/// Severity-weighted, probability-scaled expected value.
///
/// `probability` is a percentage in 0..=100.
pub fn score(estimate: &Estimate, probability: f64, severity: Severity) -> f64 {
    severity_weight(severity) * (probability / 100.0) * estimate.expected_value()
}

/// Probability must be a percentage.
pub fn validate_probability(probability: f64) -> ReserveResult<()> {
    if probability.is_finite() && (0.0..=100.0).contains(&probability) {
        Ok(())
    } else {
        Err(ReserveError::validation(
            "probability",
            format!("must be between 0 and 100, got {probability}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::round_currency;

    #[test]
    fn pert_matches_worked_example() {
        let est = Estimate::new(10_000.0, 20_000.0, 50_000.0);
        assert_eq!(round_currency(est.expected_value()), 23_333.33);
        let s = score(&est, 40.0, Severity::High);
        assert_eq!(round_currency(s), 14_000.00);
    }

    #[test]
    fn inverted_triple_scores_zero() {
        assert_eq!(expected_value(10.0, 5.0, 20.0), 0.0);
        assert_eq!(expected_value(10.0, 30.0, 20.0), 0.0);
        let est = Estimate::new(5.0, 1.0, 9.0);
        assert_eq!(score(&est, 100.0, Severity::Critical), 0.0);
    }

    #[test]
    fn expected_value_non_decreasing_in_each_point() {
        let grid = [0.0, 1.0, 250.0, 1_000.0, 7_500.5, 10_000.0];
        for &min in &grid {
            for &ml in grid.iter().filter(|&&v| v >= min) {
                for &max in grid.iter().filter(|&&v| v >= ml) {
                    let base = expected_value(min, ml, max);
                    let bump = 0.5;
                    if min + bump <= ml {
                        assert!(expected_value(min + bump, ml, max) >= base);
                    }
                    if ml + bump <= max {
                        assert!(expected_value(min, ml + bump, max) >= base);
                    }
                    assert!(expected_value(min, ml, max + bump) >= base);
                }
            }
        }
    }

    #[test]
    fn score_is_linear_in_weight_and_probability() {
        let est = Estimate::new(1_000.0, 2_000.0, 6_000.0);
        let ev = est.expected_value();
        for sev in Severity::ALL {
            let full = score(&est, 100.0, sev);
            assert!((full - severity_weight(sev) * ev).abs() < 1e-9);
            let half = score(&est, 50.0, sev);
            assert!((full - 2.0 * half).abs() < 1e-9);
        }
        let low = score(&est, 30.0, Severity::Low);
        let crit = score(&est, 30.0, Severity::Critical);
        assert!((crit - 4.0 * low).abs() < 1e-9);
    }

    #[test]
    fn validates_triples_and_probability() {
        assert!(Estimate::new(0.0, 0.0, 0.0).validate("cost_impact").is_ok());
        assert!(Estimate::new(-1.0, 0.0, 1.0).validate("cost_impact").is_err());
        assert!(Estimate::new(3.0, 2.0, 5.0).validate("cost_impact").is_err());
        assert!(Estimate::new(1.0, 2.0, f64::NAN).validate("cost_impact").is_err());
        assert!(validate_probability(0.0).is_ok());
        assert!(validate_probability(100.0).is_ok());
        assert!(validate_probability(100.5).is_err());
        assert!(validate_probability(-0.1).is_err());
    }

    #[test]
    fn severity_round_trips_through_text() {
        for sev in Severity::ALL {
            assert_eq!(sev.as_str().parse::<Severity>().unwrap(), sev);
        }
        assert!("Severe".parse::<Severity>().is_err());
    }
}
