//! Two connections racing for the same reserve.
//!
//! Each thread opens its own connection to one file-backed database and
//! materializes a different risk against a reserve that can only cover
//! one of them. Exactly one must win; the other sees the first debit and
//! fails with InsufficientReserve.

use chrono::{TimeZone, Utc};
use reserve_core::{
    clock::FixedClock,
    config::ReserveConfig,
    desk::ReserveDesk,
    disposition::Disposition,
    error::ReserveError,
    port::BudgetVersion,
    register::RiskDraft,
    reserve::CalculationMethod,
    scoring::{Estimate, Severity},
    store::ReserveStore,
};
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;

const PROGRAM: &str = "prog-race";
const BUDGET: &str = "bv-race-1";

fn desk_on(path: &str) -> ReserveDesk {
    let store = ReserveStore::open(path).expect("open store");
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap());
    ReserveDesk::new(store, ReserveConfig::default(), Box::new(clock))
}

struct TempDb(PathBuf);

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut p = self.0.clone().into_os_string();
            p.push(suffix);
            let _ = std::fs::remove_file(p);
        }
    }
}

#[test]
fn concurrent_materializations_cannot_overdraw() {
    let _ = env_logger::builder().is_test(true).try_init();
    let db = TempDb(std::env::temp_dir().join(format!("reserve-race-{}.db", uuid::Uuid::new_v4())));
    let path = db.0.to_string_lossy().into_owned();

    let mut setup = desk_on(&path);
    setup.store().migrate().unwrap();
    setup.register_program(PROGRAM, "Race").unwrap();
    setup
        .add_budget_version(BudgetVersion {
            id: BUDGET.into(),
            program_id: PROGRAM.into(),
            label: "Baseline".into(),
            total_cost: 1_000.0,
            is_current: true,
        })
        .unwrap();
    let mr = setup
        .establish_reserve(BUDGET, CalculationMethod::Custom, Some(10.0), None)
        .unwrap();
    assert_eq!(mr.adjusted_amount, 100.0);

    let risk_ids: Vec<String> = ["Left wing", "Right wing"]
        .iter()
        .map(|title| {
            setup
                .create_risk(RiskDraft {
                    program_id: PROGRAM.into(),
                    title: (*title).into(),
                    description: None,
                    category_id: None,
                    cost_impact: Estimate::new(50.0, 60.0, 80.0),
                    probability: 50.0,
                    severity: Severity::Medium,
                    owner: None,
                    mitigation_strategy: None,
                })
                .unwrap()
                .id
        })
        .collect();

    let barrier = Arc::new(Barrier::new(risk_ids.len()));
    let handles: Vec<_> = risk_ids
        .iter()
        .cloned()
        .map(|risk_id| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut desk = desk_on(&path);
                barrier.wait();
                desk.materialize_risk(&risk_id, 60.0, "spar failure")
                    .map(|m| m.management_reserve.remaining_amount)
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("materialize thread panicked"))
        .collect();

    let wins: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
    assert_eq!(wins.len(), 1, "exactly one materialization wins: {results:?}");
    let loss = results
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("one materialization fails");
    assert!(
        matches!(loss, ReserveError::InsufficientReserve { .. }),
        "loser should see the winner's debit, got {loss:?}"
    );

    let status = setup.reserve_status(BUDGET).unwrap();
    assert_eq!(status.management_reserve.utilized_amount, 60.0);
    assert_eq!(status.management_reserve.remaining_amount, 40.0);
    assert_eq!(status.entries.len(), 1);

    let realized = risk_ids
        .iter()
        .filter(|id| setup.risk(id).unwrap().disposition == Disposition::Realized)
        .count();
    assert_eq!(realized, 1);
}
