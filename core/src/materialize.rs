//! Materialization: the one place a disposition change and a reserve
//! debit move together.
//!
//! Both functions must run inside a single store transaction
//! (`ReserveStore::atomically`). They mutate in memory first, then write
//! the reserve, the ledger entry and the risk.

use crate::{
    disposition::{self, Disposition},
    error::{ReserveError, ReserveResult},
    port::{ProgramPort, ReservePort, RiskPort},
    register::Risk,
    reserve::{LedgerEntry, ManagementReserve, MrLedger},
    types::{round_currency, Timestamp},
};
use serde::{Deserialize, Serialize};

/// Dispositions from which a risk may materialize.
pub const MATERIALIZABLE: [Disposition; 2] = [Disposition::Identified, Disposition::InProgress];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Materialization {
    pub risk: Risk,
    pub management_reserve: ManagementReserve,
    pub entry: LedgerEntry,
}

/// Realize `risk_id` and debit the reserve of its program's current
/// budget version by `amount`.
pub fn materialize<P>(
    port: &P,
    risk_id: &str,
    amount: f64,
    reason: &str,
    now: Timestamp,
) -> ReserveResult<Materialization>
where
    P: RiskPort + ReservePort + ProgramPort + ?Sized,
{
    let mut risk = port.load_risk(risk_id)?;
    if !MATERIALIZABLE.contains(&risk.disposition) {
        return Err(ReserveError::InvalidState(format!(
            "risk {risk_id} is {}; only Identified or In Progress risks can materialize",
            risk.disposition
        )));
    }
    if let Some(at) = risk.materialized_at {
        return Err(ReserveError::InvalidState(format!(
            "risk {risk_id} already materialized at {at}; reverse its utilization first"
        )));
    }
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ReserveError::validation(
            "amount",
            format!("must be greater than zero, got {amount}"),
        ));
    }
    if reason.trim().is_empty() {
        return Err(ReserveError::validation(
            "reason",
            "materialization requires a reason",
        ));
    }

    let version = port.current_budget_version(&risk.program_id)?;
    let mut ledger = port.load_ledger(&version.id)?;

    let entry = ledger.utilize(&risk.id, amount, reason, now).map_err(|e| {
        if let ReserveError::InsufficientReserve { requested, remaining } = &e {
            log::warn!(
                "risk {risk_id}: materialization of {requested:.2} refused, {remaining:.2} remaining"
            );
        }
        e
    })?;
    disposition::transition(&mut risk, Disposition::Realized, reason, Some(now), now)?;

    risk.materialized_at = Some(now);
    risk.mr_utilized_amount = round_currency(risk.mr_utilized_amount + entry.amount);
    risk.mr_utilization_date = Some(now);
    risk.mr_utilization_reason = Some(entry.reason.clone());

    port.commit_entry(&mut ledger, &entry)?;
    port.save_risk(&risk)?;

    log::info!(
        "risk {}: materialized, {:.2} drawn from reserve {} ({:.2} remaining)",
        risk.id,
        entry.amount,
        ledger.reserve.id,
        ledger.reserve.remaining_amount
    );
    Ok(Materialization {
        risk,
        management_reserve: ledger.reserve,
        entry,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationReversal {
    pub risk: Risk,
    pub management_reserve: ManagementReserve,
    pub entry: LedgerEntry,
}

/// Reverse one utilization entry and release the risk's MR bookkeeping.
///
/// The risk's disposition is left as is: moving it off Realized is a
/// separate disposition change with its own reason.
pub fn reverse_utilization<P>(
    port: &P,
    entry_id: &str,
    reason: &str,
    now: Timestamp,
) -> ReserveResult<UtilizationReversal>
where
    P: RiskPort + ReservePort + ?Sized,
{
    let original = port.ledger_entry(entry_id)?;
    let reserve = port.reserve_by_id(&original.reserve_id)?;
    let entries = port.ledger_entries(&reserve.id)?;
    let mut ledger = MrLedger::new(reserve, entries);

    let entry = ledger.reverse(entry_id, reason, now)?;
    let risk_id = original.risk_id.as_deref().ok_or_else(|| {
        ReserveError::InvalidState(format!("ledger entry {entry_id} has no risk"))
    })?;
    let mut risk = port.load_risk(risk_id)?;

    risk.mr_utilized_amount = round_currency((risk.mr_utilized_amount - original.amount).max(0.0));
    if ledger.open_utilizations(risk_id).next().is_none() {
        risk.materialized_at = None;
        risk.mr_utilization_date = None;
        risk.mr_utilization_reason = None;
        risk.mr_utilized_amount = 0.0;
    }
    risk.updated_at = now;

    port.commit_entry(&mut ledger, &entry)?;
    port.save_risk(&risk)?;

    log::info!(
        "risk {}: utilization {entry_id} reversed, {:.2} returned to reserve {}",
        risk.id,
        original.amount,
        ledger.reserve.id
    );
    Ok(UtilizationReversal {
        risk,
        management_reserve: ledger.reserve,
        entry,
    })
}
