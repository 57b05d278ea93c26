//! The reserve desk: inbound operations for request handlers.
//!
//! Every method runs its whole read-validate-write sequence inside one
//! `ReserveStore::atomically` call, so a failed operation leaves no
//! partial effect. The desk emits no notifications; callers decide what
//! to announce from the returned values.

use crate::{
    clock::{Clock, SystemClock},
    config::ReserveConfig,
    disposition::{self, Disposition, EntityKind},
    error::{ReserveError, ReserveResult},
    materialize::{self, Materialization, UtilizationReversal},
    port::{BudgetVersion, NotePort, OpportunityPort, ProgramPort, ReservePort, RiskPort},
    register::{
        EntryNote, Opportunity, OpportunityDraft, OpportunityPatch, Risk, RiskCategory, RiskDraft,
        RiskPatch, ScoredEntry,
    },
    reserve::{CalculationMethod, LedgerEntry, ManagementReserve, MrLedger, UtilizationStatus},
    ro_calculator::{self, RoDrivenMr},
    store::ReserveStore,
    types::Timestamp,
};
use serde::{Deserialize, Serialize};

/// Result of a disposition change: the entity in its new state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispositionedEntity {
    Risk(Risk),
    Opportunity(Opportunity),
}

impl DispositionedEntity {
    pub fn disposition(&self) -> Disposition {
        match self {
            DispositionedEntity::Risk(r) => r.disposition,
            DispositionedEntity::Opportunity(o) => o.disposition,
        }
    }
}

/// Reserve record plus its derived utilization figures and history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveStatus {
    pub management_reserve: ManagementReserve,
    pub utilization_percentage: f64,
    pub status: UtilizationStatus,
    pub alert: bool,
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterSummary {
    pub program_id: String,
    pub risks: Vec<ScoredEntry>,
    pub opportunities: Vec<ScoredEntry>,
}

pub struct ReserveDesk {
    store: ReserveStore,
    config: ReserveConfig,
    clock: Box<dyn Clock>,
}

impl ReserveDesk {
    pub fn new(store: ReserveStore, config: ReserveConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Desk on the system clock.
    pub fn with_system_clock(store: ReserveStore, config: ReserveConfig) -> Self {
        Self::new(store, config, Box::new(SystemClock))
    }

    pub fn store(&self) -> &ReserveStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ReserveStore {
        &mut self.store
    }

    pub fn config(&self) -> &ReserveConfig {
        &self.config
    }

    // ── Programs ───────────────────────────────────────────────

    pub fn register_program(&mut self, program_id: &str, name: &str) -> ReserveResult<()> {
        self.store.atomically(|tx| tx.insert_program(program_id, name))
    }

    /// Record a budget version. A current version demotes the program's
    /// previous current one.
    pub fn add_budget_version(&mut self, version: BudgetVersion) -> ReserveResult<BudgetVersion> {
        self.store.atomically(|tx| {
            tx.insert_budget_version(&version)?;
            Ok(version)
        })
    }

    // ── Risks ──────────────────────────────────────────────────

    pub fn create_risk(&mut self, draft: RiskDraft) -> ReserveResult<Risk> {
        let now = self.clock.now();
        self.store.atomically(|tx| {
            tx.current_budget_version(&draft.program_id)?;
            let risk = Risk::new(draft, now)?;
            tx.insert_risk(&risk)?;
            log::info!("risk {} created: {}", risk.id, risk.title);
            Ok(risk)
        })
    }

    pub fn risk(&self, risk_id: &str) -> ReserveResult<Risk> {
        self.store.session().load_risk(risk_id)
    }

    pub fn update_risk(&mut self, risk_id: &str, patch: RiskPatch) -> ReserveResult<Risk> {
        let now = self.clock.now();
        self.store.atomically(|tx| {
            let mut risk = tx.load_risk(risk_id)?;
            risk.apply_patch(patch, now)?;
            tx.save_risk(&risk)?;
            Ok(risk)
        })
    }

    /// Delete a risk. Refused once any ledger entry references it: the
    /// utilization history is immutable.
    pub fn delete_risk(&mut self, risk_id: &str) -> ReserveResult<()> {
        self.store.atomically(|tx| {
            tx.load_risk(risk_id)?;
            let refs = tx.entries_for_risk(risk_id)?;
            if !refs.is_empty() {
                return Err(ReserveError::InvalidState(format!(
                    "risk {risk_id} is referenced by {} management reserve ledger entries",
                    refs.len()
                )));
            }
            tx.delete_risk(risk_id)?;
            log::info!("risk {risk_id} deleted");
            Ok(())
        })
    }

    pub fn add_risk_note(
        &mut self,
        risk_id: &str,
        body: &str,
        author: Option<String>,
    ) -> ReserveResult<EntryNote> {
        self.add_note(EntityKind::Risk, risk_id, body, author)
    }

    pub fn risk_categories(&self) -> ReserveResult<Vec<RiskCategory>> {
        self.store.session().categories()
    }

    // ── Opportunities ──────────────────────────────────────────

    pub fn create_opportunity(&mut self, draft: OpportunityDraft) -> ReserveResult<Opportunity> {
        let now = self.clock.now();
        self.store.atomically(|tx| {
            tx.current_budget_version(&draft.program_id)?;
            let opp = Opportunity::new(draft, now)?;
            tx.insert_opportunity(&opp)?;
            log::info!("opportunity {} created: {}", opp.id, opp.title);
            Ok(opp)
        })
    }

    pub fn opportunity(&self, opportunity_id: &str) -> ReserveResult<Opportunity> {
        self.store.session().load_opportunity(opportunity_id)
    }

    pub fn update_opportunity(
        &mut self,
        opportunity_id: &str,
        patch: OpportunityPatch,
    ) -> ReserveResult<Opportunity> {
        let now = self.clock.now();
        self.store.atomically(|tx| {
            let mut opp = tx.load_opportunity(opportunity_id)?;
            opp.apply_patch(patch, now)?;
            tx.save_opportunity(&opp)?;
            Ok(opp)
        })
    }

    pub fn delete_opportunity(&mut self, opportunity_id: &str) -> ReserveResult<()> {
        self.store.atomically(|tx| tx.delete_opportunity(opportunity_id))
    }

    pub fn record_actual_benefit(
        &mut self,
        opportunity_id: &str,
        amount: f64,
    ) -> ReserveResult<Opportunity> {
        let now = self.clock.now();
        self.store.atomically(|tx| {
            let mut opp = tx.load_opportunity(opportunity_id)?;
            opp.record_actual_benefit(amount, now)?;
            tx.save_opportunity(&opp)?;
            Ok(opp)
        })
    }

    pub fn add_opportunity_note(
        &mut self,
        opportunity_id: &str,
        body: &str,
        author: Option<String>,
    ) -> ReserveResult<EntryNote> {
        self.add_note(EntityKind::Opportunity, opportunity_id, body, author)
    }

    // ── Notes ──────────────────────────────────────────────────

    fn add_note(
        &mut self,
        kind: EntityKind,
        entity_id: &str,
        body: &str,
        author: Option<String>,
    ) -> ReserveResult<EntryNote> {
        let now = self.clock.now();
        self.store.atomically(|tx| {
            match kind {
                EntityKind::Risk => tx.load_risk(entity_id).map(|_| ())?,
                EntityKind::Opportunity => tx.load_opportunity(entity_id).map(|_| ())?,
            }
            let note = EntryNote::new(kind, entity_id, body, author, now)?;
            tx.insert_note(&note)?;
            Ok(note)
        })
    }

    pub fn notes(&self, kind: EntityKind, entity_id: &str) -> ReserveResult<Vec<EntryNote>> {
        self.store.session().notes_for(kind, entity_id)
    }

    // ── Disposition ────────────────────────────────────────────

    /// Move a risk or opportunity to `target`. Never touches the reserve.
    pub fn change_disposition(
        &mut self,
        entity_id: &str,
        kind: EntityKind,
        target: Disposition,
        reason: &str,
        date: Option<Timestamp>,
    ) -> ReserveResult<DispositionedEntity> {
        let now = self.clock.now();
        let result = self.store.atomically(|tx| match kind {
            EntityKind::Risk => {
                let mut risk = tx.load_risk(entity_id)?;
                disposition::transition(&mut risk, target, reason, date, now)?;
                tx.save_risk(&risk)?;
                Ok(DispositionedEntity::Risk(risk))
            }
            EntityKind::Opportunity => {
                let mut opp = tx.load_opportunity(entity_id)?;
                disposition::transition(&mut opp, target, reason, date, now)?;
                tx.save_opportunity(&opp)?;
                Ok(DispositionedEntity::Opportunity(opp))
            }
        });
        if let Err(e @ ReserveError::InvalidTransition { .. }) = &result {
            log::warn!("{kind} {entity_id}: {e}");
        }
        result
    }

    // ── Materialization ────────────────────────────────────────

    pub fn materialize_risk(
        &mut self,
        risk_id: &str,
        amount: f64,
        reason: &str,
    ) -> ReserveResult<Materialization> {
        let now = self.clock.now();
        let result = self
            .store
            .atomically(|tx| materialize::materialize(tx, risk_id, amount, reason, now))?;
        self.warn_if_over_alert(&result.management_reserve);
        Ok(result)
    }

    /// Reverse one utilization entry, returning its amount to the reserve
    /// and releasing the risk's MR bookkeeping. Disposition is unchanged.
    pub fn reverse_utilization(
        &mut self,
        entry_id: &str,
        reason: &str,
    ) -> ReserveResult<UtilizationReversal> {
        let now = self.clock.now();
        self.store
            .atomically(|tx| materialize::reverse_utilization(tx, entry_id, reason, now))
    }

    // ── Management reserve ─────────────────────────────────────

    /// Create the reserve for a budget version at setup time.
    ///
    /// Refused while the version already has an active reserve: that record
    /// is mutated in place from then on, through `adjust_reserve`,
    /// `resync_reserve` or `apply_ro_driven_mr`.
    pub fn establish_reserve(
        &mut self,
        budget_version_id: &str,
        method: CalculationMethod,
        custom_percentage: Option<f64>,
        justification: Option<String>,
    ) -> ReserveResult<ManagementReserve> {
        let now = self.clock.now();
        let config = &self.config;
        self.store.atomically(|tx| {
            let version = tx.budget_version(budget_version_id)?;
            match tx.active_reserve(&version.id) {
                Ok(existing) => {
                    return Err(ReserveError::InvalidState(format!(
                        "budget version {} already has reserve {} ({:.2} utilized); \
                         change its target with an adjustment or resync",
                        version.id, existing.id, existing.utilized_amount
                    )));
                }
                Err(ReserveError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
            let reserve = ManagementReserve::establish(
                &version.id,
                version.total_cost,
                method,
                custom_percentage,
                justification,
                config,
                now,
            )?;
            tx.insert_reserve(&reserve)?;
            log::info!(
                "budget version {}: reserve {} established at {:.2} ({}%, {})",
                version.id,
                reserve.id,
                reserve.baseline_amount,
                reserve.baseline_percentage,
                method
            );
            Ok(reserve)
        })
    }

    pub fn reserve_status(&self, budget_version_id: &str) -> ReserveResult<ReserveStatus> {
        let ledger = self.store.session().load_ledger(budget_version_id)?;
        Ok(self.status_of(ledger))
    }

    fn status_of(&self, ledger: MrLedger) -> ReserveStatus {
        let bands = &self.config.utilization_bands;
        let pct = ledger.reserve.utilization_percentage();
        ReserveStatus {
            utilization_percentage: pct,
            status: ledger.reserve.utilization_status(bands),
            alert: pct > bands.alert_above,
            management_reserve: ledger.reserve,
            entries: ledger.entries,
        }
    }

    pub fn adjust_reserve(
        &mut self,
        budget_version_id: &str,
        new_adjusted_amount: f64,
        reason: &str,
    ) -> ReserveResult<(ManagementReserve, LedgerEntry)> {
        let now = self.clock.now();
        self.store.atomically(|tx| {
            let mut ledger = tx.load_ledger(budget_version_id)?;
            let entry = ledger.adjust(new_adjusted_amount, reason, now)?;
            tx.commit_entry(&mut ledger, &entry)?;
            log::info!(
                "reserve {}: adjusted by {:.2} to {:.2}",
                ledger.reserve.id,
                entry.amount,
                ledger.reserve.adjusted_amount
            );
            Ok((ledger.reserve, entry))
        })
    }

    /// Re-target the reserve after a budget revision changed total cost.
    ///
    /// The record's own calculation method picks the new percentage; a
    /// Custom reserve keeps its current percentage.
    pub fn resync_reserve(
        &mut self,
        budget_version_id: &str,
        new_total_cost: f64,
        reason: &str,
    ) -> ReserveResult<ManagementReserve> {
        if !new_total_cost.is_finite() || new_total_cost < 0.0 {
            return Err(ReserveError::validation(
                "total_cost",
                format!("must be a non-negative amount, got {new_total_cost}"),
            ));
        }
        let now = self.clock.now();
        let config = &self.config;
        self.store.atomically(|tx| {
            tx.set_total_cost(budget_version_id, new_total_cost)?;
            let mut ledger = tx.load_ledger(budget_version_id)?;
            let method = ledger.reserve.calculation_method;
            let custom = Some(ledger.reserve.adjusted_percentage);
            let percentage = config.percentage_for(method, new_total_cost, custom);
            ledger.reserve.total_cost = new_total_cost;
            let entry = ledger.adjust(new_total_cost * percentage / 100.0, reason, now)?;
            tx.commit_entry(&mut ledger, &entry)?;
            Ok(ledger.reserve)
        })
    }

    /// Compute the R&O-driven proposal for a budget version. Read-only.
    pub fn calculate_ro_driven_mr(&self, budget_version_id: &str) -> ReserveResult<RoDrivenMr> {
        let session = self.store.session();
        let version = session.budget_version(budget_version_id)?;
        let risks = session.risks_for_program(&version.program_id)?;
        Ok(ro_calculator::calculate(
            &version.id,
            version.total_cost,
            &risks,
            &self.config,
        ))
    }

    /// Persist the R&O-driven proposal as an adjustment and mark the
    /// reserve Risk-Based.
    pub fn apply_ro_driven_mr(
        &mut self,
        budget_version_id: &str,
        reason: &str,
    ) -> ReserveResult<ManagementReserve> {
        let now = self.clock.now();
        let config = &self.config;
        self.store.atomically(|tx| {
            let version = tx.budget_version(budget_version_id)?;
            let risks = tx.risks_for_program(&version.program_id)?;
            let proposal = ro_calculator::calculate(&version.id, version.total_cost, &risks, config);
            let mut ledger = tx.load_ledger(budget_version_id)?;
            let entry = ledger.adjust(proposal.amount, reason, now)?;
            ledger.reserve.calculation_method = CalculationMethod::RiskBased;
            ledger.reserve.justification = Some(format!(
                "R&O-driven: base {:.2} + risk adjustment {:.2} over {} risks",
                proposal.base_mr,
                proposal.risk_adjustment,
                proposal.breakdown.len()
            ));
            tx.commit_entry(&mut ledger, &entry)?;
            Ok(ledger.reserve)
        })
    }

    // ── Reporting ──────────────────────────────────────────────

    pub fn register_summary(&self, program_id: &str) -> ReserveResult<RegisterSummary> {
        let session = self.store.session();
        let mut risks: Vec<ScoredEntry> = session
            .risks_for_program(program_id)?
            .iter()
            .map(ScoredEntry::from)
            .collect();
        let mut opportunities: Vec<ScoredEntry> = session
            .opportunities_for_program(program_id)?
            .iter()
            .map(ScoredEntry::from)
            .collect();
        risks.sort_by(|a, b| b.score.total_cmp(&a.score));
        opportunities.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(RegisterSummary {
            program_id: program_id.to_string(),
            risks,
            opportunities,
        })
    }

    fn warn_if_over_alert(&self, reserve: &ManagementReserve) {
        let pct = reserve.utilization_percentage();
        if pct > self.config.utilization_bands.alert_above {
            log::warn!(
                "reserve {}: {pct:.1}% utilized, {:.2} remaining",
                reserve.id,
                reserve.remaining_amount
            );
        }
    }
}
