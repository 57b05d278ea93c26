//! Narrow storage ports.
//!
//! Each component asks only for the port it needs. The store implements
//! every port on `StoreTx`, so a caller that wants several operations to
//! commit together hands the same transaction to all of them.

use crate::{
    disposition::EntityKind,
    error::ReserveResult,
    register::{EntryNote, Opportunity, Risk, RiskCategory},
    reserve::{LedgerEntry, ManagementReserve, MrLedger},
    types::{BudgetVersionId, ProgramId},
};
use serde::{Deserialize, Serialize};

/// Budget version as seen from the program collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetVersion {
    pub id: BudgetVersionId,
    pub program_id: ProgramId,
    pub label: String,
    pub total_cost: f64,
    pub is_current: bool,
}

pub trait ProgramPort {
    fn budget_version(&self, budget_version_id: &str) -> ReserveResult<BudgetVersion>;

    /// The budget version risks of `program_id` draw reserve from.
    fn current_budget_version(&self, program_id: &str) -> ReserveResult<BudgetVersion>;

    fn set_total_cost(&self, budget_version_id: &str, total_cost: f64) -> ReserveResult<()>;
}

pub trait RiskPort {
    fn load_risk(&self, risk_id: &str) -> ReserveResult<Risk>;
    fn insert_risk(&self, risk: &Risk) -> ReserveResult<()>;
    fn save_risk(&self, risk: &Risk) -> ReserveResult<()>;
    fn delete_risk(&self, risk_id: &str) -> ReserveResult<()>;
    fn risks_for_program(&self, program_id: &str) -> ReserveResult<Vec<Risk>>;
    fn categories(&self) -> ReserveResult<Vec<RiskCategory>>;
}

pub trait OpportunityPort {
    fn load_opportunity(&self, opportunity_id: &str) -> ReserveResult<Opportunity>;
    fn insert_opportunity(&self, opportunity: &Opportunity) -> ReserveResult<()>;
    fn save_opportunity(&self, opportunity: &Opportunity) -> ReserveResult<()>;
    fn delete_opportunity(&self, opportunity_id: &str) -> ReserveResult<()>;
    fn opportunities_for_program(&self, program_id: &str) -> ReserveResult<Vec<Opportunity>>;
}

pub trait NotePort {
    fn insert_note(&self, note: &EntryNote) -> ReserveResult<()>;
    fn notes_for(&self, kind: EntityKind, entity_id: &str) -> ReserveResult<Vec<EntryNote>>;
}

pub trait ReservePort {
    fn active_reserve(&self, budget_version_id: &str) -> ReserveResult<ManagementReserve>;
    fn insert_reserve(&self, reserve: &ManagementReserve) -> ReserveResult<()>;

    /// Write back a mutated reserve. Fails with `StaleReserve` if the row's
    /// version moved since `reserve` was read; bumps `reserve.version`.
    fn save_reserve(&self, reserve: &mut ManagementReserve) -> ReserveResult<()>;

    fn append_entry(&self, entry: &LedgerEntry) -> ReserveResult<()>;
    fn ledger_entries(&self, reserve_id: &str) -> ReserveResult<Vec<LedgerEntry>>;
    fn ledger_entry(&self, entry_id: &str) -> ReserveResult<LedgerEntry>;
    fn entries_for_risk(&self, risk_id: &str) -> ReserveResult<Vec<LedgerEntry>>;

    /// Load a reserve by id, active or not.
    fn reserve_by_id(&self, reserve_id: &str) -> ReserveResult<ManagementReserve>;

    fn load_ledger(&self, budget_version_id: &str) -> ReserveResult<MrLedger> {
        let reserve = self.active_reserve(budget_version_id)?;
        let entries = self.ledger_entries(&reserve.id)?;
        Ok(MrLedger::new(reserve, entries))
    }

    /// Persist a ledger mutation: the record and the entry it produced.
    fn commit_entry(&self, ledger: &mut MrLedger, entry: &LedgerEntry) -> ReserveResult<()> {
        self.save_reserve(&mut ledger.reserve)?;
        self.append_entry(entry)
    }
}
