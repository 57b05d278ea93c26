//! Materialization tests: disposition change and reserve debit as one unit.
//!
//! Tests cover: the happy path, double materialization, insufficient
//! reserve, rollback when a write fails mid-operation, and utilization
//! reversal.

use chrono::{TimeZone, Utc};
use reserve_core::{
    clock::FixedClock,
    config::ReserveConfig,
    desk::ReserveDesk,
    disposition::{Disposition, EntityKind},
    error::{ReserveError, ReserveResult},
    materialize,
    port::{BudgetVersion, ProgramPort, ReservePort, RiskPort},
    register::{Risk, RiskCategory, RiskDraft},
    reserve::{CalculationMethod, EntryType, LedgerEntry, ManagementReserve},
    scoring::{Estimate, Severity},
    store::StoreTx,
};

const PROGRAM: &str = "prog-radar";
const BUDGET: &str = "bv-radar-1";

/// Desk with one program, one current budget version and an active
/// Custom reserve of `percentage`% of `total_cost`.
fn build(total_cost: f64, percentage: f64) -> ReserveDesk {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = reserve_core::store::ReserveStore::in_memory().expect("open store");
    store.migrate().expect("migrate");
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
    let mut desk = ReserveDesk::new(store, ReserveConfig::default(), Box::new(clock));
    desk.register_program(PROGRAM, "Radar upgrade").unwrap();
    desk.add_budget_version(BudgetVersion {
        id: BUDGET.into(),
        program_id: PROGRAM.into(),
        label: "Baseline".into(),
        total_cost,
        is_current: true,
    })
    .unwrap();
    desk.establish_reserve(BUDGET, CalculationMethod::Custom, Some(percentage), None)
        .unwrap();
    desk
}

fn add_risk(desk: &mut ReserveDesk, title: &str) -> Risk {
    desk.create_risk(RiskDraft {
        program_id: PROGRAM.into(),
        title: title.into(),
        description: None,
        category_id: Some("cat-technical".into()),
        cost_impact: Estimate::new(10_000.0, 20_000.0, 50_000.0),
        probability: 40.0,
        severity: Severity::High,
        owner: Some("j.ortiz".into()),
        mitigation_strategy: None,
    })
    .unwrap()
}

/// Identified risk materializes: Realized, stamped, reserve debited.
#[test]
fn materialize_realizes_risk_and_debits_reserve() {
    let mut desk = build(1_000_000.0, 10.0);
    let risk = add_risk(&mut desk, "Supplier slips antenna delivery");

    let m = desk
        .materialize_risk(&risk.id, 5_000.0, "parts failure")
        .unwrap();

    assert_eq!(m.risk.disposition, Disposition::Realized);
    assert!(m.risk.materialized_at.is_some());
    assert_eq!(m.risk.mr_utilized_amount, 5_000.0);
    assert_eq!(m.risk.mr_utilization_reason.as_deref(), Some("parts failure"));
    assert_eq!(m.management_reserve.utilized_amount, 5_000.0);
    assert_eq!(m.management_reserve.remaining_amount, 95_000.0);
    assert_eq!(m.entry.entry_type, EntryType::Utilization);
    assert_eq!(m.entry.risk_id.as_deref(), Some(risk.id.as_str()));

    // Persisted, not just returned.
    let stored = desk.risk(&risk.id).unwrap();
    assert_eq!(stored.disposition, Disposition::Realized);
    let status = desk.reserve_status(BUDGET).unwrap();
    assert_eq!(status.management_reserve.utilized_amount, 5_000.0);
    assert_eq!(status.entries.len(), 1);
}

/// Realized only leads back to In Progress.
#[test]
fn realized_risk_cannot_move_to_mitigated() {
    let mut desk = build(1_000_000.0, 10.0);
    let risk = add_risk(&mut desk, "Radome cracks in thermal test");
    desk.materialize_risk(&risk.id, 5_000.0, "parts failure")
        .unwrap();

    let err = desk
        .change_disposition(&risk.id, EntityKind::Risk, Disposition::Mitigated, "retest passed", None)
        .unwrap_err();
    match err {
        ReserveError::InvalidTransition { from, to, valid, .. } => {
            assert_eq!(from, Disposition::Realized);
            assert_eq!(to, Disposition::Mitigated);
            assert_eq!(valid, vec![Disposition::InProgress]);
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
}

/// A second materialization is refused and does not debit again.
#[test]
fn double_materialization_is_refused_without_second_debit() {
    let mut desk = build(1_000_000.0, 10.0);
    let risk = add_risk(&mut desk, "Firmware rework");
    desk.materialize_risk(&risk.id, 30_000.0, "cost overrun")
        .unwrap();
    let after_first = desk.reserve_status(BUDGET).unwrap().management_reserve;

    let err = desk
        .materialize_risk(&risk.id, 30_000.0, "cost overrun")
        .unwrap_err();
    assert!(matches!(err, ReserveError::InvalidState(_)), "got {err:?}");

    let after_second = desk.reserve_status(BUDGET).unwrap().management_reserve;
    assert_eq!(after_first, after_second);
    assert_eq!(desk.store().ledger_entry_count(&after_first.id).unwrap(), 1);
}

/// Not enough reserve: risk keeps its disposition, reserve is untouched.
#[test]
fn insufficient_reserve_changes_nothing() {
    let mut desk = build(10_000.0, 10.0);
    let risk = add_risk(&mut desk, "Test range unavailable");
    desk.change_disposition(&risk.id, EntityKind::Risk, Disposition::InProgress, "working it", None)
        .unwrap();

    let err = desk
        .materialize_risk(&risk.id, 5_000.0, "reason")
        .unwrap_err();
    match err {
        ReserveError::InsufficientReserve { requested, remaining } => {
            assert_eq!(requested, 5_000.0);
            assert_eq!(remaining, 1_000.0);
        }
        other => panic!("expected InsufficientReserve, got {other:?}"),
    }

    let stored = desk.risk(&risk.id).unwrap();
    assert_eq!(stored.disposition, Disposition::InProgress);
    assert!(stored.materialized_at.is_none());
    let status = desk.reserve_status(BUDGET).unwrap();
    assert_eq!(status.management_reserve.utilized_amount, 0.0);
    assert_eq!(status.management_reserve.remaining_amount, 1_000.0);
    assert!(status.entries.is_empty());
}

#[test]
fn materialize_requires_amount_and_reason() {
    let mut desk = build(1_000_000.0, 10.0);
    let risk = add_risk(&mut desk, "Cable harness rework");

    assert!(matches!(
        desk.materialize_risk(&risk.id, 0.0, "overrun"),
        Err(ReserveError::Validation { field: "amount", .. })
    ));
    assert!(matches!(
        desk.materialize_risk(&risk.id, 100.0, "  "),
        Err(ReserveError::Validation { field: "reason", .. })
    ));
    assert_eq!(desk.risk(&risk.id).unwrap().disposition, Disposition::Identified);
}

#[test]
fn closed_risk_cannot_materialize() {
    let mut desk = build(1_000_000.0, 10.0);
    let risk = add_risk(&mut desk, "Obsolete part");
    desk.change_disposition(&risk.id, EntityKind::Risk, Disposition::Retired, "part requalified", None)
        .unwrap();

    let err = desk
        .materialize_risk(&risk.id, 1_000.0, "late find")
        .unwrap_err();
    assert!(matches!(err, ReserveError::InvalidState(_)), "got {err:?}");
}

/// Delegates to a real transaction but fails every risk save, so the
/// failure lands after the reserve and ledger writes.
struct FailingRiskSave<'a, 'c> {
    tx: &'a StoreTx<'c>,
}

impl RiskPort for FailingRiskSave<'_, '_> {
    fn load_risk(&self, risk_id: &str) -> ReserveResult<Risk> {
        self.tx.load_risk(risk_id)
    }
    fn insert_risk(&self, risk: &Risk) -> ReserveResult<()> {
        self.tx.insert_risk(risk)
    }
    fn save_risk(&self, _risk: &Risk) -> ReserveResult<()> {
        Err(ReserveError::InvalidState("disk full".into()))
    }
    fn delete_risk(&self, risk_id: &str) -> ReserveResult<()> {
        self.tx.delete_risk(risk_id)
    }
    fn risks_for_program(&self, program_id: &str) -> ReserveResult<Vec<Risk>> {
        self.tx.risks_for_program(program_id)
    }
    fn categories(&self) -> ReserveResult<Vec<RiskCategory>> {
        self.tx.categories()
    }
}

impl ReservePort for FailingRiskSave<'_, '_> {
    fn active_reserve(&self, budget_version_id: &str) -> ReserveResult<ManagementReserve> {
        self.tx.active_reserve(budget_version_id)
    }
    fn insert_reserve(&self, reserve: &ManagementReserve) -> ReserveResult<()> {
        self.tx.insert_reserve(reserve)
    }
    fn save_reserve(&self, reserve: &mut ManagementReserve) -> ReserveResult<()> {
        self.tx.save_reserve(reserve)
    }
    fn append_entry(&self, entry: &LedgerEntry) -> ReserveResult<()> {
        self.tx.append_entry(entry)
    }
    fn ledger_entries(&self, reserve_id: &str) -> ReserveResult<Vec<LedgerEntry>> {
        self.tx.ledger_entries(reserve_id)
    }
    fn ledger_entry(&self, entry_id: &str) -> ReserveResult<LedgerEntry> {
        self.tx.ledger_entry(entry_id)
    }
    fn entries_for_risk(&self, risk_id: &str) -> ReserveResult<Vec<LedgerEntry>> {
        self.tx.entries_for_risk(risk_id)
    }
    fn reserve_by_id(&self, reserve_id: &str) -> ReserveResult<ManagementReserve> {
        self.tx.reserve_by_id(reserve_id)
    }
}

impl ProgramPort for FailingRiskSave<'_, '_> {
    fn budget_version(&self, budget_version_id: &str) -> ReserveResult<BudgetVersion> {
        self.tx.budget_version(budget_version_id)
    }
    fn current_budget_version(&self, program_id: &str) -> ReserveResult<BudgetVersion> {
        self.tx.current_budget_version(program_id)
    }
    fn set_total_cost(&self, budget_version_id: &str, total_cost: f64) -> ReserveResult<()> {
        self.tx.set_total_cost(budget_version_id, total_cost)
    }
}

/// A write failing after the debit rolls the debit back too.
#[test]
fn failed_risk_write_rolls_back_the_debit() {
    let mut desk = build(1_000_000.0, 10.0);
    let risk = add_risk(&mut desk, "Integration lab flood");
    let before = desk.reserve_status(BUDGET).unwrap().management_reserve;
    let now = Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap();

    let err = desk
        .store_mut()
        .atomically(|tx| {
            materialize::materialize(
                &FailingRiskSave { tx },
                &risk.id,
                2_500.0,
                "water damage",
                now,
            )
        })
        .unwrap_err();
    assert!(matches!(err, ReserveError::InvalidState(_)));

    let after = desk.reserve_status(BUDGET).unwrap();
    assert_eq!(after.management_reserve, before);
    assert!(after.entries.is_empty());
    let stored = desk.risk(&risk.id).unwrap();
    assert_eq!(stored.disposition, Disposition::Identified);
    assert!(stored.materialized_at.is_none());
}

/// Reversal returns the amount and clears the MR bookkeeping, but the
/// disposition stays Realized until changed explicitly.
#[test]
fn reversal_releases_bookkeeping_and_keeps_disposition() {
    let mut desk = build(1_000_000.0, 10.0);
    let risk = add_risk(&mut desk, "Wrong connector ordered");
    let m = desk
        .materialize_risk(&risk.id, 12_000.0, "reorder")
        .unwrap();

    let r = desk
        .reverse_utilization(&m.entry.id, "vendor credited the order")
        .unwrap();

    assert_eq!(r.entry.entry_type, EntryType::Reallocation);
    assert_eq!(r.entry.amount, -12_000.0);
    assert_eq!(r.entry.reverses_entry_id.as_deref(), Some(m.entry.id.as_str()));
    assert_eq!(r.management_reserve.utilized_amount, 0.0);
    assert_eq!(r.management_reserve.remaining_amount, 100_000.0);
    assert_eq!(r.risk.disposition, Disposition::Realized);
    assert!(r.risk.materialized_at.is_none());
    assert_eq!(r.risk.mr_utilized_amount, 0.0);

    // Both entries stay in the history.
    assert_eq!(desk.reserve_status(BUDGET).unwrap().entries.len(), 2);

    // Explicit disposition reversal reopens the risk for materialization.
    desk.change_disposition(&risk.id, EntityKind::Risk, Disposition::InProgress, "credit received", None)
        .unwrap();
    let again = desk
        .materialize_risk(&risk.id, 4_000.0, "restocking fee")
        .unwrap();
    assert_eq!(again.management_reserve.utilized_amount, 4_000.0);
}

#[test]
fn reversal_cannot_repeat() {
    let mut desk = build(1_000_000.0, 10.0);
    let risk = add_risk(&mut desk, "Shipping damage");
    let m = desk
        .materialize_risk(&risk.id, 1_000.0, "replacement")
        .unwrap();
    desk.reverse_utilization(&m.entry.id, "insurer paid").unwrap();

    let err = desk
        .reverse_utilization(&m.entry.id, "insurer paid")
        .unwrap_err();
    assert!(matches!(err, ReserveError::InvalidState(_)), "got {err:?}");
    assert_eq!(
        desk.reserve_status(BUDGET).unwrap().management_reserve.utilized_amount,
        0.0
    );
}

/// A risk with ledger history cannot be deleted.
#[test]
fn materialized_risk_cannot_be_deleted() {
    let mut desk = build(1_000_000.0, 10.0);
    let risk = add_risk(&mut desk, "Late test article");
    desk.materialize_risk(&risk.id, 1_000.0, "expedite fee")
        .unwrap();

    let err = desk.delete_risk(&risk.id).unwrap_err();
    assert!(matches!(err, ReserveError::InvalidState(_)), "got {err:?}");
    assert_eq!(desk.store().risk_count(PROGRAM).unwrap(), 1);
}
