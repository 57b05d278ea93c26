//! Risk & opportunity register entities.
//!
//! Derived figures (expected value, score) are never stored; they are
//! recomputed from the triple, probability and severity on read.

use crate::{
    disposition::{Disposition, Dispositioned, EntityKind},
    error::{ReserveError, ReserveResult},
    scoring::{self, Estimate, Severity},
    types::{new_id, round_currency, EntityId, ProgramId, Timestamp},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    pub id: EntityId,
    pub program_id: ProgramId,
    pub title: String,
    pub description: Option<String>,
    pub category_id: Option<EntityId>,
    pub cost_impact: Estimate,
    pub probability: f64,
    pub severity: Severity,
    pub disposition: Disposition,
    pub disposition_date: Option<Timestamp>,
    pub disposition_reason: Option<String>,
    pub owner: Option<String>,
    pub mitigation_strategy: Option<String>,
    /// Set once on materialization; only a utilization reversal clears it.
    pub materialized_at: Option<Timestamp>,
    pub mr_utilized_amount: f64,
    pub mr_utilization_date: Option<Timestamp>,
    pub mr_utilization_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Input for a new risk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDraft {
    pub program_id: ProgramId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<EntityId>,
    pub cost_impact: Estimate,
    pub probability: f64,
    pub severity: Severity,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub mitigation_strategy: Option<String>,
}

/// Edit of non-disposition fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<EntityId>,
    pub cost_impact: Option<Estimate>,
    pub probability: Option<f64>,
    pub severity: Option<Severity>,
    pub owner: Option<String>,
    pub mitigation_strategy: Option<String>,
}

impl Risk {
    pub fn new(draft: RiskDraft, now: Timestamp) -> ReserveResult<Self> {
        validate_title(&draft.title)?;
        draft.cost_impact.validate("cost_impact")?;
        scoring::validate_probability(draft.probability)?;
        Ok(Self {
            id: new_id(),
            program_id: draft.program_id,
            title: draft.title.trim().to_string(),
            description: draft.description,
            category_id: draft.category_id,
            cost_impact: draft.cost_impact,
            probability: draft.probability,
            severity: draft.severity,
            disposition: Disposition::Identified,
            disposition_date: None,
            disposition_reason: None,
            owner: draft.owner,
            mitigation_strategy: draft.mitigation_strategy,
            materialized_at: None,
            mr_utilized_amount: 0.0,
            mr_utilization_date: None,
            mr_utilization_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply an edit. Validation runs against the merged result, so a
    /// failing patch leaves `self` untouched.
    pub fn apply_patch(&mut self, patch: RiskPatch, now: Timestamp) -> ReserveResult<()> {
        let mut next = self.clone();
        if let Some(title) = patch.title {
            validate_title(&title)?;
            next.title = title.trim().to_string();
        }
        if let Some(est) = patch.cost_impact {
            next.cost_impact = est;
        }
        if let Some(p) = patch.probability {
            next.probability = p;
        }
        if let Some(sev) = patch.severity {
            next.severity = sev;
        }
        if patch.description.is_some() {
            next.description = patch.description;
        }
        if patch.category_id.is_some() {
            next.category_id = patch.category_id;
        }
        if patch.owner.is_some() {
            next.owner = patch.owner;
        }
        if patch.mitigation_strategy.is_some() {
            next.mitigation_strategy = patch.mitigation_strategy;
        }
        next.cost_impact.validate("cost_impact")?;
        scoring::validate_probability(next.probability)?;
        next.updated_at = now;
        *self = next;
        Ok(())
    }

    pub fn expected_value(&self) -> f64 {
        self.cost_impact.expected_value()
    }

    pub fn risk_score(&self) -> f64 {
        scoring::score(&self.cost_impact, self.probability, self.severity)
    }

    pub fn is_materialized(&self) -> bool {
        self.materialized_at.is_some()
    }
}

impl Dispositioned for Risk {
    const KIND: EntityKind = EntityKind::Risk;

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn disposition(&self) -> Disposition {
        self.disposition
    }

    fn record_disposition(
        &mut self,
        state: Disposition,
        date: Timestamp,
        reason: String,
        now: Timestamp,
    ) {
        self.disposition = state;
        self.disposition_date = Some(date);
        self.disposition_reason = Some(reason);
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: EntityId,
    pub program_id: ProgramId,
    pub title: String,
    pub description: Option<String>,
    pub category_id: Option<EntityId>,
    pub benefit: Estimate,
    pub probability: f64,
    pub benefit_severity: Severity,
    pub disposition: Disposition,
    pub disposition_date: Option<Timestamp>,
    pub disposition_reason: Option<String>,
    pub owner: Option<String>,
    pub realization_strategy: Option<String>,
    pub actual_benefit: Option<f64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityDraft {
    pub program_id: ProgramId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<EntityId>,
    pub benefit: Estimate,
    pub probability: f64,
    pub benefit_severity: Severity,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub realization_strategy: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpportunityPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<EntityId>,
    pub benefit: Option<Estimate>,
    pub probability: Option<f64>,
    pub benefit_severity: Option<Severity>,
    pub owner: Option<String>,
    pub realization_strategy: Option<String>,
}

impl Opportunity {
    pub fn new(draft: OpportunityDraft, now: Timestamp) -> ReserveResult<Self> {
        validate_title(&draft.title)?;
        draft.benefit.validate("benefit")?;
        scoring::validate_probability(draft.probability)?;
        Ok(Self {
            id: new_id(),
            program_id: draft.program_id,
            title: draft.title.trim().to_string(),
            description: draft.description,
            category_id: draft.category_id,
            benefit: draft.benefit,
            probability: draft.probability,
            benefit_severity: draft.benefit_severity,
            disposition: Disposition::Identified,
            disposition_date: None,
            disposition_reason: None,
            owner: draft.owner,
            realization_strategy: draft.realization_strategy,
            actual_benefit: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply_patch(&mut self, patch: OpportunityPatch, now: Timestamp) -> ReserveResult<()> {
        let mut next = self.clone();
        if let Some(title) = patch.title {
            validate_title(&title)?;
            next.title = title.trim().to_string();
        }
        if let Some(est) = patch.benefit {
            next.benefit = est;
        }
        if let Some(p) = patch.probability {
            next.probability = p;
        }
        if let Some(sev) = patch.benefit_severity {
            next.benefit_severity = sev;
        }
        if patch.description.is_some() {
            next.description = patch.description;
        }
        if patch.category_id.is_some() {
            next.category_id = patch.category_id;
        }
        if patch.owner.is_some() {
            next.owner = patch.owner;
        }
        if patch.realization_strategy.is_some() {
            next.realization_strategy = patch.realization_strategy;
        }
        next.benefit.validate("benefit")?;
        scoring::validate_probability(next.probability)?;
        next.updated_at = now;
        *self = next;
        Ok(())
    }

    /// Record the benefit actually captured. Only meaningful once realized.
    pub fn record_actual_benefit(&mut self, amount: f64, now: Timestamp) -> ReserveResult<()> {
        if self.disposition != Disposition::Realized {
            return Err(ReserveError::InvalidState(format!(
                "opportunity {} is {}, actual benefit needs Realized",
                self.id, self.disposition
            )));
        }
        if !amount.is_finite() || amount < 0.0 {
            return Err(ReserveError::validation(
                "actual_benefit",
                format!("must be a non-negative amount, got {amount}"),
            ));
        }
        self.actual_benefit = Some(round_currency(amount));
        self.updated_at = now;
        Ok(())
    }

    pub fn expected_benefit(&self) -> f64 {
        self.benefit.expected_value()
    }

    pub fn opportunity_score(&self) -> f64 {
        scoring::score(&self.benefit, self.probability, self.benefit_severity)
    }
}

impl Dispositioned for Opportunity {
    const KIND: EntityKind = EntityKind::Opportunity;

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn disposition(&self) -> Disposition {
        self.disposition
    }

    fn record_disposition(
        &mut self,
        state: Disposition,
        date: Timestamp,
        reason: String,
        now: Timestamp,
    ) {
        self.disposition = state;
        self.disposition_date = Some(date);
        self.disposition_reason = Some(reason);
        self.updated_at = now;
    }
}

/// Append-only, attributed note on a risk or opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryNote {
    pub id: EntityId,
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub body: String,
    pub author: Option<String>,
    pub created_at: Timestamp,
}

impl EntryNote {
    pub fn new(
        kind: EntityKind,
        entity_id: &str,
        body: &str,
        author: Option<String>,
        now: Timestamp,
    ) -> ReserveResult<Self> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ReserveError::validation("note", "note text is empty"));
        }
        Ok(Self {
            id: new_id(),
            entity_id: entity_id.to_string(),
            kind,
            body: body.to_string(),
            author,
            created_at: now,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCategory {
    pub id: EntityId,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub is_system: bool,
}

/// One scored row of a register listing, rounded for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub id: EntityId,
    pub kind: EntityKind,
    pub title: String,
    pub disposition: Disposition,
    pub severity: Severity,
    pub probability: f64,
    pub expected_value: f64,
    pub score: f64,
}

impl From<&Risk> for ScoredEntry {
    fn from(r: &Risk) -> Self {
        Self {
            id: r.id.clone(),
            kind: EntityKind::Risk,
            title: r.title.clone(),
            disposition: r.disposition,
            severity: r.severity,
            probability: r.probability,
            expected_value: round_currency(r.expected_value()),
            score: round_currency(r.risk_score()),
        }
    }
}

impl From<&Opportunity> for ScoredEntry {
    fn from(o: &Opportunity) -> Self {
        Self {
            id: o.id.clone(),
            kind: EntityKind::Opportunity,
            title: o.title.clone(),
            disposition: o.disposition,
            severity: o.benefit_severity,
            probability: o.probability,
            expected_value: round_currency(o.expected_benefit()),
            score: round_currency(o.opportunity_score()),
        }
    }
}

fn validate_title(title: &str) -> ReserveResult<()> {
    if title.trim().is_empty() {
        Err(ReserveError::validation("title", "title is empty"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 2, 10, 8, 30, 0).unwrap()
    }

    fn draft() -> RiskDraft {
        RiskDraft {
            program_id: "prog-1".into(),
            title: "  Supplier slip ".into(),
            description: None,
            category_id: None,
            cost_impact: Estimate::new(10_000.0, 20_000.0, 50_000.0),
            probability: 40.0,
            severity: Severity::High,
            owner: Some("pm".into()),
            mitigation_strategy: None,
        }
    }

    #[test]
    fn new_risk_starts_identified_and_unmaterialized() {
        let risk = Risk::new(draft(), now()).unwrap();
        assert_eq!(risk.disposition, Disposition::Identified);
        assert_eq!(risk.title, "Supplier slip");
        assert!(!risk.is_materialized());
        assert_eq!(risk.mr_utilized_amount, 0.0);
        assert_eq!(round_currency(risk.risk_score()), 14_000.00);
    }

    #[test]
    fn new_risk_rejects_bad_input() {
        let mut d = draft();
        d.cost_impact = Estimate::new(30_000.0, 20_000.0, 50_000.0);
        assert!(matches!(
            Risk::new(d, now()),
            Err(ReserveError::Validation { field: "cost_impact", .. })
        ));

        let mut d = draft();
        d.probability = 140.0;
        assert!(matches!(
            Risk::new(d, now()),
            Err(ReserveError::Validation { field: "probability", .. })
        ));

        let mut d = draft();
        d.title = "   ".into();
        assert!(Risk::new(d, now()).is_err());
    }

    #[test]
    fn failed_patch_leaves_risk_untouched() {
        let mut risk = Risk::new(draft(), now()).unwrap();
        let before = risk.clone();
        let patch = RiskPatch {
            title: Some("Renamed".into()),
            cost_impact: Some(Estimate::new(5.0, 1.0, 9.0)),
            ..Default::default()
        };
        assert!(risk.apply_patch(patch, now()).is_err());
        assert_eq!(risk, before);
    }

    #[test]
    fn patch_never_touches_disposition() {
        let mut risk = Risk::new(draft(), now()).unwrap();
        let patch = RiskPatch {
            severity: Some(Severity::Critical),
            probability: Some(10.0),
            ..Default::default()
        };
        risk.apply_patch(patch, now()).unwrap();
        assert_eq!(risk.severity, Severity::Critical);
        assert_eq!(risk.disposition, Disposition::Identified);
    }

    #[test]
    fn actual_benefit_requires_realized() {
        let mut opp = Opportunity::new(
            OpportunityDraft {
                program_id: "prog-1".into(),
                title: "Bulk discount".into(),
                description: None,
                category_id: None,
                benefit: Estimate::new(1_000.0, 2_000.0, 3_000.0),
                probability: 50.0,
                benefit_severity: Severity::Medium,
                owner: None,
                realization_strategy: None,
            },
            now(),
        )
        .unwrap();
        assert!(matches!(
            opp.record_actual_benefit(1_500.0, now()),
            Err(ReserveError::InvalidState(_))
        ));
        opp.record_disposition(Disposition::Realized, now(), "signed".into(), now());
        opp.record_actual_benefit(1_500.004, now()).unwrap();
        assert_eq!(opp.actual_benefit, Some(1_500.0));
        assert_eq!(round_currency(opp.opportunity_score()), 1_000.0);
    }

    #[test]
    fn empty_note_rejected() {
        assert!(EntryNote::new(EntityKind::Risk, "r1", "  ", None, now()).is_err());
        let note = EntryNote::new(EntityKind::Risk, "r1", "called vendor", Some("ana".into()), now())
            .unwrap();
        assert_eq!(note.body, "called vendor");
    }
}
