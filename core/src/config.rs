//! Management-reserve policy configuration.
//!
//! Loaded from `{data_dir}/reserve/mr_policy.json`. `ReserveConfig::default()`
//! carries the same values hard-coded for tests and for callers without a
//! data directory. Severity weights are deliberately absent: they are a
//! fixed lookup in `scoring`.

use crate::reserve::CalculationMethod;
use serde::{Deserialize, Serialize};

/// One step of a tiered percentage: applies when total cost is strictly
/// above `above_total_cost`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentageTier {
    pub above_total_cost: f64,
    pub percentage: f64,
}

/// Percentage schedule keyed on program total cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieredPercentage {
    /// Checked in order; the first tier whose threshold is exceeded wins.
    pub tiers: Vec<PercentageTier>,
    pub fallback_percentage: f64,
}

impl TieredPercentage {
    pub fn percentage_for(&self, total_cost: f64) -> f64 {
        self.tiers
            .iter()
            .find(|t| total_cost > t.above_total_cost)
            .map(|t| t.percentage)
            .unwrap_or(self.fallback_percentage)
    }

    fn validate(&self, name: &str) -> anyhow::Result<()> {
        let ordered = self
            .tiers
            .windows(2)
            .all(|w| w[0].above_total_cost > w[1].above_total_cost);
        if !ordered {
            anyhow::bail!("{name}: tiers must be listed from the highest threshold down");
        }
        let in_range = |p: f64| (0.0..=100.0).contains(&p);
        if !self.tiers.iter().all(|t| in_range(t.percentage)) || !in_range(self.fallback_percentage)
        {
            anyhow::bail!("{name}: percentages must be within 0..=100");
        }
        Ok(())
    }
}

/// Utilization status bands, as percentages of the adjusted amount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilizationBands {
    pub moderate_at: f64,
    pub high_at: f64,
    pub critical_at: f64,
    /// Utilization above this is logged as a warning.
    pub alert_above: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveConfig {
    pub standard: TieredPercentage,
    pub risk_based: TieredPercentage,
    pub custom_default_percentage: f64,
    pub utilization_bands: UtilizationBands,
}

impl Default for ReserveConfig {
    fn default() -> Self {
        Self {
            standard: TieredPercentage {
                tiers: vec![
                    PercentageTier { above_total_cost: 1_000_000.0, percentage: 10.0 },
                    PercentageTier { above_total_cost: 500_000.0, percentage: 12.0 },
                ],
                fallback_percentage: 15.0,
            },
            risk_based: TieredPercentage {
                tiers: vec![
                    PercentageTier { above_total_cost: 1_000_000.0, percentage: 8.0 },
                    PercentageTier { above_total_cost: 500_000.0, percentage: 10.0 },
                ],
                fallback_percentage: 12.0,
            },
            custom_default_percentage: 10.0,
            utilization_bands: UtilizationBands {
                moderate_at: 50.0,
                high_at: 75.0,
                critical_at: 90.0,
                alert_above: 80.0,
            },
        }
    }
}

impl ReserveConfig {
    /// Load the policy file under `data_dir`.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/reserve/mr_policy.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        Self::from_json(&content).map_err(|e| anyhow::anyhow!("Invalid {path}: {e}"))
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let config: ReserveConfig = serde_json::from_str(content)?;
        config.standard.validate("standard")?;
        config.risk_based.validate("risk_based")?;
        let b = &config.utilization_bands;
        if !(b.moderate_at <= b.high_at && b.high_at <= b.critical_at) {
            anyhow::bail!("utilization_bands must be ascending");
        }
        Ok(config)
    }

    /// Reserve percentage for a method. `custom` is only read for
    /// `CalculationMethod::Custom`.
    pub fn percentage_for(
        &self,
        method: CalculationMethod,
        total_cost: f64,
        custom: Option<f64>,
    ) -> f64 {
        match method {
            CalculationMethod::Standard => self.standard.percentage_for(total_cost),
            CalculationMethod::RiskBased => self.risk_based.percentage_for(total_cost),
            CalculationMethod::Custom => custom
                .filter(|p| *p > 0.0)
                .unwrap_or(self.custom_default_percentage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_tiers_follow_total_cost() {
        let cfg = ReserveConfig::default();
        assert_eq!(cfg.standard.percentage_for(2_000_000.0), 10.0);
        assert_eq!(cfg.standard.percentage_for(1_000_000.0), 12.0);
        assert_eq!(cfg.standard.percentage_for(750_000.0), 12.0);
        assert_eq!(cfg.standard.percentage_for(500_000.0), 15.0);
        assert_eq!(cfg.standard.percentage_for(0.0), 15.0);
    }

    #[test]
    fn method_percentages() {
        let cfg = ReserveConfig::default();
        assert_eq!(cfg.percentage_for(CalculationMethod::RiskBased, 600_000.0, None), 10.0);
        assert_eq!(cfg.percentage_for(CalculationMethod::Custom, 600_000.0, Some(7.5)), 7.5);
        assert_eq!(cfg.percentage_for(CalculationMethod::Custom, 600_000.0, None), 10.0);
        assert_eq!(cfg.percentage_for(CalculationMethod::Custom, 600_000.0, Some(0.0)), 10.0);
    }

    #[test]
    fn shipped_policy_file_matches_defaults() {
        let json = include_str!("../../data/reserve/mr_policy.json");
        let cfg = ReserveConfig::from_json(json).unwrap();
        assert_eq!(cfg, ReserveConfig::default());
    }

    #[test]
    fn rejects_unordered_tiers() {
        let mut cfg = ReserveConfig::default();
        cfg.standard.tiers.reverse();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(ReserveConfig::from_json(&json).is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = ReserveConfig::load("/definitely/not/here").unwrap_err();
        assert!(err.to_string().contains("mr_policy.json"));
    }
}
