//! R&O-driven management-reserve calculator.
//!
//! Read-only and advisory: proposes an MR figure as the standard
//! percentage of total cost plus a severity-weighted adjustment per active
//! risk. Persisting the proposal is a separate `adjust` on the ledger.

use crate::{
    config::ReserveConfig,
    disposition::Disposition,
    register::Risk,
    scoring::{self, Severity},
    types::{round_currency, BudgetVersionId, EntityId},
};
use serde::{Deserialize, Serialize};

/// One risk's contribution, for audit display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoBreakdownLine {
    pub risk_id: EntityId,
    pub title: String,
    pub probability: f64,
    pub cost_impact_most_likely: f64,
    pub severity: Severity,
    pub severity_weight: f64,
    pub expected_value: f64,
    pub weighted_impact: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoDrivenMr {
    pub budget_version_id: BudgetVersionId,
    pub total_cost: f64,
    pub base_percentage: f64,
    pub base_mr: f64,
    pub risk_adjustment: f64,
    /// `base_mr + risk_adjustment`.
    pub amount: f64,
    /// `amount / total_cost * 100`.
    pub percentage: f64,
    pub breakdown: Vec<RoBreakdownLine>,
}

/// Risks that feed the adjustment: still Identified, with a non-zero
/// probability and most-likely cost.
pub fn is_active(risk: &Risk) -> bool {
    risk.disposition == Disposition::Identified
        && risk.probability > 0.0
        && risk.cost_impact.most_likely > 0.0
}

fn weighted_impact(risk: &Risk) -> f64 {
    (risk.probability / 100.0)
        * risk.cost_impact.most_likely
        * scoring::severity_weight(risk.severity)
}

pub fn calculate(
    budget_version_id: &str,
    total_cost: f64,
    risks: &[Risk],
    config: &ReserveConfig,
) -> RoDrivenMr {
    let base_percentage = config.standard.percentage_for(total_cost);
    let base_mr = base_percentage / 100.0 * total_cost;

    let active: Vec<&Risk> = risks.iter().filter(|r| is_active(r)).collect();
    // Sum unrounded; only the reported figures are rounded.
    let risk_adjustment: f64 = active.iter().map(|r| weighted_impact(r)).sum();
    let amount = base_mr + risk_adjustment;
    let percentage = if total_cost > 0.0 {
        amount / total_cost * 100.0
    } else {
        0.0
    };

    let breakdown = active
        .iter()
        .map(|r| RoBreakdownLine {
            risk_id: r.id.clone(),
            title: r.title.clone(),
            probability: r.probability,
            cost_impact_most_likely: r.cost_impact.most_likely,
            severity: r.severity,
            severity_weight: scoring::severity_weight(r.severity),
            expected_value: round_currency(r.expected_value()),
            weighted_impact: round_currency(weighted_impact(r)),
        })
        .collect();

    log::debug!(
        "budget version {budget_version_id}: R&O MR {amount:.2} over {} active risks",
        active.len()
    );
    RoDrivenMr {
        budget_version_id: budget_version_id.to_string(),
        total_cost,
        base_percentage,
        base_mr: round_currency(base_mr),
        risk_adjustment: round_currency(risk_adjustment),
        amount: round_currency(amount),
        percentage: round_currency(percentage),
        breakdown,
    }
}
