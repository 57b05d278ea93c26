//! Risk, opportunity, note and category queries.

use super::{ReserveStore, StoreTx};
use crate::{
    disposition::EntityKind,
    error::{ReserveError, ReserveResult},
    port::{NotePort, OpportunityPort, RiskPort},
    register::{EntryNote, Opportunity, Risk, RiskCategory},
    scoring::Estimate,
};
use rusqlite::{params, OptionalExtension};

const RISK_COLUMNS: &str = "risk_id, program_id, title, description, category_id,
    cost_impact_min, cost_impact_most_likely, cost_impact_max, probability, severity,
    disposition, disposition_date, disposition_reason, owner, mitigation_strategy,
    materialized_at, mr_utilized_amount, mr_utilization_date, mr_utilization_reason,
    created_at, updated_at";

fn risk_row_mapper(r: &rusqlite::Row<'_>) -> rusqlite::Result<Risk> {
    Ok(Risk {
        id: r.get(0)?,
        program_id: r.get(1)?,
        title: r.get(2)?,
        description: r.get(3)?,
        category_id: r.get(4)?,
        cost_impact: Estimate::new(r.get(5)?, r.get(6)?, r.get(7)?),
        probability: r.get(8)?,
        severity: r.get(9)?,
        disposition: r.get(10)?,
        disposition_date: r.get(11)?,
        disposition_reason: r.get(12)?,
        owner: r.get(13)?,
        mitigation_strategy: r.get(14)?,
        materialized_at: r.get(15)?,
        mr_utilized_amount: r.get(16)?,
        mr_utilization_date: r.get(17)?,
        mr_utilization_reason: r.get(18)?,
        created_at: r.get(19)?,
        updated_at: r.get(20)?,
    })
}

const OPPORTUNITY_COLUMNS: &str = "opportunity_id, program_id, title, description, category_id,
    benefit_min, benefit_most_likely, benefit_max, probability, benefit_severity,
    disposition, disposition_date, disposition_reason, owner, realization_strategy,
    actual_benefit, created_at, updated_at";

fn opportunity_row_mapper(r: &rusqlite::Row<'_>) -> rusqlite::Result<Opportunity> {
    Ok(Opportunity {
        id: r.get(0)?,
        program_id: r.get(1)?,
        title: r.get(2)?,
        description: r.get(3)?,
        category_id: r.get(4)?,
        benefit: Estimate::new(r.get(5)?, r.get(6)?, r.get(7)?),
        probability: r.get(8)?,
        benefit_severity: r.get(9)?,
        disposition: r.get(10)?,
        disposition_date: r.get(11)?,
        disposition_reason: r.get(12)?,
        owner: r.get(13)?,
        realization_strategy: r.get(14)?,
        actual_benefit: r.get(15)?,
        created_at: r.get(16)?,
        updated_at: r.get(17)?,
    })
}

impl RiskPort for StoreTx<'_> {
    fn load_risk(&self, risk_id: &str) -> ReserveResult<Risk> {
        self.conn
            .query_row(
                &format!("SELECT {RISK_COLUMNS} FROM risk WHERE risk_id=?1"),
                params![risk_id],
                risk_row_mapper,
            )
            .optional()?
            .ok_or_else(|| ReserveError::not_found("risk", risk_id))
    }

    fn insert_risk(&self, risk: &Risk) -> ReserveResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO risk ({RISK_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
            ),
            params![
                risk.id,
                risk.program_id,
                risk.title,
                risk.description,
                risk.category_id,
                risk.cost_impact.min,
                risk.cost_impact.most_likely,
                risk.cost_impact.max,
                risk.probability,
                risk.severity,
                risk.disposition,
                risk.disposition_date,
                risk.disposition_reason,
                risk.owner,
                risk.mitigation_strategy,
                risk.materialized_at,
                risk.mr_utilized_amount,
                risk.mr_utilization_date,
                risk.mr_utilization_reason,
                risk.created_at,
                risk.updated_at,
            ],
        )?;
        Ok(())
    }

    fn save_risk(&self, risk: &Risk) -> ReserveResult<()> {
        let changed = self.conn.execute(
            "UPDATE risk SET title=?2, description=?3, category_id=?4,
                cost_impact_min=?5, cost_impact_most_likely=?6, cost_impact_max=?7,
                probability=?8, severity=?9, disposition=?10, disposition_date=?11,
                disposition_reason=?12, owner=?13, mitigation_strategy=?14,
                materialized_at=?15, mr_utilized_amount=?16, mr_utilization_date=?17,
                mr_utilization_reason=?18, updated_at=?19
             WHERE risk_id=?1",
            params![
                risk.id,
                risk.title,
                risk.description,
                risk.category_id,
                risk.cost_impact.min,
                risk.cost_impact.most_likely,
                risk.cost_impact.max,
                risk.probability,
                risk.severity,
                risk.disposition,
                risk.disposition_date,
                risk.disposition_reason,
                risk.owner,
                risk.mitigation_strategy,
                risk.materialized_at,
                risk.mr_utilized_amount,
                risk.mr_utilization_date,
                risk.mr_utilization_reason,
                risk.updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(ReserveError::not_found("risk", risk.id.as_str()));
        }
        Ok(())
    }

    fn delete_risk(&self, risk_id: &str) -> ReserveResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM risk WHERE risk_id=?1", params![risk_id])?;
        if changed == 0 {
            return Err(ReserveError::not_found("risk", risk_id));
        }
        Ok(())
    }

    fn risks_for_program(&self, program_id: &str) -> ReserveResult<Vec<Risk>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RISK_COLUMNS} FROM risk WHERE program_id=?1 ORDER BY created_at, risk_id"
        ))?;
        let risks = stmt
            .query_map(params![program_id], risk_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(risks)
    }

    fn categories(&self) -> ReserveResult<Vec<RiskCategory>> {
        let mut stmt = self.conn.prepare(
            "SELECT category_id, code, name, description, is_active, is_system
             FROM risk_category ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(RiskCategory {
                    id: r.get(0)?,
                    code: r.get(1)?,
                    name: r.get(2)?,
                    description: r.get(3)?,
                    is_active: r.get::<_, i32>(4)? != 0,
                    is_system: r.get::<_, i32>(5)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl OpportunityPort for StoreTx<'_> {
    fn load_opportunity(&self, opportunity_id: &str) -> ReserveResult<Opportunity> {
        self.conn
            .query_row(
                &format!("SELECT {OPPORTUNITY_COLUMNS} FROM opportunity WHERE opportunity_id=?1"),
                params![opportunity_id],
                opportunity_row_mapper,
            )
            .optional()?
            .ok_or_else(|| ReserveError::not_found("opportunity", opportunity_id))
    }

    fn insert_opportunity(&self, o: &Opportunity) -> ReserveResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO opportunity ({OPPORTUNITY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16, ?17, ?18)"
            ),
            params![
                o.id,
                o.program_id,
                o.title,
                o.description,
                o.category_id,
                o.benefit.min,
                o.benefit.most_likely,
                o.benefit.max,
                o.probability,
                o.benefit_severity,
                o.disposition,
                o.disposition_date,
                o.disposition_reason,
                o.owner,
                o.realization_strategy,
                o.actual_benefit,
                o.created_at,
                o.updated_at,
            ],
        )?;
        Ok(())
    }

    fn save_opportunity(&self, o: &Opportunity) -> ReserveResult<()> {
        let changed = self.conn.execute(
            "UPDATE opportunity SET title=?2, description=?3, category_id=?4,
                benefit_min=?5, benefit_most_likely=?6, benefit_max=?7, probability=?8,
                benefit_severity=?9, disposition=?10, disposition_date=?11,
                disposition_reason=?12, owner=?13, realization_strategy=?14,
                actual_benefit=?15, updated_at=?16
             WHERE opportunity_id=?1",
            params![
                o.id,
                o.title,
                o.description,
                o.category_id,
                o.benefit.min,
                o.benefit.most_likely,
                o.benefit.max,
                o.probability,
                o.benefit_severity,
                o.disposition,
                o.disposition_date,
                o.disposition_reason,
                o.owner,
                o.realization_strategy,
                o.actual_benefit,
                o.updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(ReserveError::not_found("opportunity", o.id.as_str()));
        }
        Ok(())
    }

    fn delete_opportunity(&self, opportunity_id: &str) -> ReserveResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM opportunity WHERE opportunity_id=?1",
            params![opportunity_id],
        )?;
        if changed == 0 {
            return Err(ReserveError::not_found("opportunity", opportunity_id));
        }
        Ok(())
    }

    fn opportunities_for_program(&self, program_id: &str) -> ReserveResult<Vec<Opportunity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunity WHERE program_id=?1
             ORDER BY created_at, opportunity_id"
        ))?;
        let rows = stmt
            .query_map(params![program_id], opportunity_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn note_table(kind: EntityKind) -> (&'static str, &'static str) {
    match kind {
        EntityKind::Risk => ("risk_note", "risk_id"),
        EntityKind::Opportunity => ("opportunity_note", "opportunity_id"),
    }
}

impl NotePort for StoreTx<'_> {
    fn insert_note(&self, note: &EntryNote) -> ReserveResult<()> {
        let (table, owner_col) = note_table(note.kind);
        self.conn.execute(
            &format!(
                "INSERT INTO {table} (note_id, {owner_col}, body, author, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            ),
            params![note.id, note.entity_id, note.body, note.author, note.created_at],
        )?;
        Ok(())
    }

    fn notes_for(&self, kind: EntityKind, entity_id: &str) -> ReserveResult<Vec<EntryNote>> {
        let (table, owner_col) = note_table(kind);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT note_id, {owner_col}, body, author, created_at
             FROM {table} WHERE {owner_col}=?1
             ORDER BY created_at, rowid"
        ))?;
        let notes = stmt
            .query_map(params![entity_id], |r| {
                Ok(EntryNote {
                    id: r.get(0)?,
                    entity_id: r.get(1)?,
                    kind,
                    body: r.get(2)?,
                    author: r.get(3)?,
                    created_at: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }
}

impl ReserveStore {
    // ── Register test helpers ────────────────────────────────────────────────

    pub fn risk_count(&self, program_id: &str) -> ReserveResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM risk WHERE program_id=?1",
            params![program_id],
            |r| r.get(0),
        )?)
    }
}
