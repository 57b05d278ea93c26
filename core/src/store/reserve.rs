//! Management reserve and ledger queries.

use super::{ReserveStore, StoreTx};
use crate::{
    error::{ReserveError, ReserveResult},
    port::ReservePort,
    reserve::{LedgerEntry, ManagementReserve},
};
use rusqlite::{params, OptionalExtension};

const RESERVE_COLUMNS: &str = "reserve_id, budget_version_id, total_cost,
    baseline_amount, baseline_percentage, adjusted_amount, adjusted_percentage,
    utilized_amount, remaining_amount, calculation_method, justification, notes,
    is_active, version, created_at, updated_at";

fn reserve_row_mapper(r: &rusqlite::Row<'_>) -> rusqlite::Result<ManagementReserve> {
    Ok(ManagementReserve {
        id: r.get(0)?,
        budget_version_id: r.get(1)?,
        total_cost: r.get(2)?,
        baseline_amount: r.get(3)?,
        baseline_percentage: r.get(4)?,
        adjusted_amount: r.get(5)?,
        adjusted_percentage: r.get(6)?,
        utilized_amount: r.get(7)?,
        remaining_amount: r.get(8)?,
        calculation_method: r.get(9)?,
        justification: r.get(10)?,
        notes: r.get(11)?,
        is_active: r.get::<_, i32>(12)? != 0,
        version: r.get(13)?,
        created_at: r.get(14)?,
        updated_at: r.get(15)?,
    })
}

const ENTRY_COLUMNS: &str =
    "entry_id, reserve_id, risk_id, entry_type, amount, reason, entry_date, reverses_entry_id";

fn entry_row_mapper(r: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: r.get(0)?,
        reserve_id: r.get(1)?,
        risk_id: r.get(2)?,
        entry_type: r.get(3)?,
        amount: r.get(4)?,
        reason: r.get(5)?,
        date: r.get(6)?,
        reverses_entry_id: r.get(7)?,
    })
}

impl StoreTx<'_> {
    fn query_entries(&self, filter: &str, key: &str) -> ReserveResult<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM mr_ledger_entry WHERE {filter}=?1 ORDER BY seq"
        ))?;
        let entries = stmt
            .query_map(params![key], entry_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

impl ReservePort for StoreTx<'_> {
    fn active_reserve(&self, budget_version_id: &str) -> ReserveResult<ManagementReserve> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {RESERVE_COLUMNS} FROM management_reserve
                     WHERE budget_version_id=?1 AND is_active=1"
                ),
                params![budget_version_id],
                reserve_row_mapper,
            )
            .optional()?
            .ok_or_else(|| {
                ReserveError::not_found("management reserve for budget version", budget_version_id)
            })
    }

    fn reserve_by_id(&self, reserve_id: &str) -> ReserveResult<ManagementReserve> {
        self.conn
            .query_row(
                &format!("SELECT {RESERVE_COLUMNS} FROM management_reserve WHERE reserve_id=?1"),
                params![reserve_id],
                reserve_row_mapper,
            )
            .optional()?
            .ok_or_else(|| ReserveError::not_found("management reserve", reserve_id))
    }

    fn insert_reserve(&self, m: &ManagementReserve) -> ReserveResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO management_reserve ({RESERVE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                m.id,
                m.budget_version_id,
                m.total_cost,
                m.baseline_amount,
                m.baseline_percentage,
                m.adjusted_amount,
                m.adjusted_percentage,
                m.utilized_amount,
                m.remaining_amount,
                m.calculation_method,
                m.justification,
                m.notes,
                if m.is_active { 1i32 } else { 0i32 },
                m.version,
                m.created_at,
                m.updated_at,
            ],
        )?;
        Ok(())
    }

    fn save_reserve(&self, m: &mut ManagementReserve) -> ReserveResult<()> {
        let changed = self.conn.execute(
            "UPDATE management_reserve SET total_cost=?3, adjusted_amount=?4,
                adjusted_percentage=?5, utilized_amount=?6, remaining_amount=?7,
                calculation_method=?8, justification=?9, notes=?10, is_active=?11,
                updated_at=?12, version=version+1
             WHERE reserve_id=?1 AND version=?2",
            params![
                m.id,
                m.version,
                m.total_cost,
                m.adjusted_amount,
                m.adjusted_percentage,
                m.utilized_amount,
                m.remaining_amount,
                m.calculation_method,
                m.justification,
                m.notes,
                if m.is_active { 1i32 } else { 0i32 },
                m.updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(ReserveError::StaleReserve {
                reserve_id: m.id.clone(),
            });
        }
        m.version += 1;
        Ok(())
    }

    fn append_entry(&self, e: &LedgerEntry) -> ReserveResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO mr_ledger_entry ({ENTRY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                e.id,
                e.reserve_id,
                e.risk_id,
                e.entry_type,
                e.amount,
                e.reason,
                e.date,
                e.reverses_entry_id,
            ],
        )?;
        log::debug!(
            "reserve {}: {} entry {} of {:.2}",
            e.reserve_id,
            e.entry_type.as_str(),
            e.id,
            e.amount
        );
        Ok(())
    }

    fn ledger_entries(&self, reserve_id: &str) -> ReserveResult<Vec<LedgerEntry>> {
        self.query_entries("reserve_id", reserve_id)
    }

    fn ledger_entry(&self, entry_id: &str) -> ReserveResult<LedgerEntry> {
        self.query_entries("entry_id", entry_id)?
            .into_iter()
            .next()
            .ok_or_else(|| ReserveError::not_found("ledger entry", entry_id))
    }

    fn entries_for_risk(&self, risk_id: &str) -> ReserveResult<Vec<LedgerEntry>> {
        self.query_entries("risk_id", risk_id)
    }
}

impl ReserveStore {
    // ── Reserve test helpers ─────────────────────────────────────────────────

    pub fn ledger_entry_count(&self, reserve_id: &str) -> ReserveResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM mr_ledger_entry WHERE reserve_id=?1",
            params![reserve_id],
            |r| r.get(0),
        )?)
    }

    pub fn reserve_count(&self, budget_version_id: &str) -> ReserveResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM management_reserve WHERE budget_version_id=?1",
            params![budget_version_id],
            |r| r.get(0),
        )?)
    }
}
