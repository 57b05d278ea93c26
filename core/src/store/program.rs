//! Program and budget-version collaborator records.

use super::{ReserveStore, StoreTx};
use crate::{
    error::{ReserveError, ReserveResult},
    port::{BudgetVersion, ProgramPort},
};
use rusqlite::{params, OptionalExtension};

fn budget_version_mapper(r: &rusqlite::Row<'_>) -> rusqlite::Result<BudgetVersion> {
    Ok(BudgetVersion {
        id: r.get(0)?,
        program_id: r.get(1)?,
        label: r.get(2)?,
        total_cost: r.get(3)?,
        is_current: r.get::<_, i32>(4)? != 0,
    })
}

impl StoreTx<'_> {
    pub fn insert_program(&self, program_id: &str, name: &str) -> ReserveResult<()> {
        self.conn.execute(
            "INSERT INTO program (program_id, name) VALUES (?1, ?2)",
            params![program_id, name],
        )?;
        Ok(())
    }

    /// Insert a budget version. A current version demotes the program's
    /// previous current one.
    pub fn insert_budget_version(&self, version: &BudgetVersion) -> ReserveResult<()> {
        if version.is_current {
            self.conn.execute(
                "UPDATE budget_version SET is_current=0 WHERE program_id=?1",
                params![version.program_id],
            )?;
        }
        self.conn.execute(
            "INSERT INTO budget_version (budget_version_id, program_id, label, total_cost, is_current)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                version.id,
                version.program_id,
                version.label,
                version.total_cost,
                if version.is_current { 1i32 } else { 0i32 },
            ],
        )?;
        Ok(())
    }
}

impl ProgramPort for StoreTx<'_> {
    fn budget_version(&self, budget_version_id: &str) -> ReserveResult<BudgetVersion> {
        self.conn
            .query_row(
                "SELECT budget_version_id, program_id, label, total_cost, is_current
                 FROM budget_version WHERE budget_version_id=?1",
                params![budget_version_id],
                budget_version_mapper,
            )
            .optional()?
            .ok_or_else(|| ReserveError::not_found("budget version", budget_version_id))
    }

    fn current_budget_version(&self, program_id: &str) -> ReserveResult<BudgetVersion> {
        self.conn
            .query_row(
                "SELECT budget_version_id, program_id, label, total_cost, is_current
                 FROM budget_version WHERE program_id=?1 AND is_current=1",
                params![program_id],
                budget_version_mapper,
            )
            .optional()?
            .ok_or_else(|| ReserveError::not_found("current budget version of program", program_id))
    }

    fn set_total_cost(&self, budget_version_id: &str, total_cost: f64) -> ReserveResult<()> {
        let changed = self.conn.execute(
            "UPDATE budget_version SET total_cost=?1 WHERE budget_version_id=?2",
            params![total_cost, budget_version_id],
        )?;
        if changed == 0 {
            return Err(ReserveError::not_found("budget version", budget_version_id));
        }
        Ok(())
    }
}

impl ReserveStore {
    // ── Program test helpers ─────────────────────────────────────────────────

    pub fn program_count(&self) -> ReserveResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM program", [], |r| r.get(0))?)
    }
}
