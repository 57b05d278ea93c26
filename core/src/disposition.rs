//! Disposition state machine for risks and opportunities.
//!
//! Each entity kind has one fixed, declarative transition table. A single
//! generic `is_valid_transition` answers every reachability question for
//! both kinds; `transition` applies a validated move to any entity that
//! implements `Dispositioned`.
//!
//! RULE: nothing in this module touches the management reserve. The only
//! place disposition and MR move together is `materialize`.

use crate::{
    error::{ReserveError, ReserveResult},
    types::Timestamp,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Risk,
    Opportunity,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Risk => "risk",
            EntityKind::Opportunity => "opportunity",
        }
    }

    pub fn table(self) -> TransitionTable {
        match self {
            EntityKind::Risk => RISK_TRANSITIONS,
            EntityKind::Opportunity => OPPORTUNITY_TRANSITIONS,
        }
    }

    /// Every disposition value this kind may hold.
    pub fn states(self) -> impl Iterator<Item = Disposition> {
        self.table().iter().map(|(state, _)| *state)
    }

    pub fn allows(self, state: Disposition) -> bool {
        self.states().any(|s| s == state)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ReserveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "risk" => Ok(EntityKind::Risk),
            "opportunity" => Ok(EntityKind::Opportunity),
            other => Err(ReserveError::validation(
                "kind",
                format!("unknown entity kind '{other}'"),
            )),
        }
    }
}

/// Lifecycle status. The union of both kinds' value sets; which values
/// a given entity may hold is decided by its kind's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Disposition {
    Identified,
    #[serde(rename = "In Progress")]
    InProgress,
    Mitigated,
    Realized,
    Retired,
    Transferred,
    Accepted,
    Deferred,
    Lost,
}

impl Disposition {
    pub const ALL: [Disposition; 9] = [
        Disposition::Identified,
        Disposition::InProgress,
        Disposition::Mitigated,
        Disposition::Realized,
        Disposition::Retired,
        Disposition::Transferred,
        Disposition::Accepted,
        Disposition::Deferred,
        Disposition::Lost,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Identified => "Identified",
            Disposition::InProgress => "In Progress",
            Disposition::Mitigated => "Mitigated",
            Disposition::Realized => "Realized",
            Disposition::Retired => "Retired",
            Disposition::Transferred => "Transferred",
            Disposition::Accepted => "Accepted",
            Disposition::Deferred => "Deferred",
            Disposition::Lost => "Lost",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Disposition {
    type Err = ReserveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Disposition::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| {
                ReserveError::validation("disposition", format!("unknown disposition '{s}'"))
            })
    }
}

/// Current state → states reachable in one step.
pub type TransitionTable = &'static [(Disposition, &'static [Disposition])];

use Disposition::*;

pub const RISK_TRANSITIONS: TransitionTable = &[
    (Identified, &[InProgress, Mitigated, Realized, Retired, Transferred, Accepted]),
    (InProgress, &[Mitigated, Realized, Retired, Transferred, Accepted, Identified]),
    (Mitigated, &[Retired, InProgress]),
    // Terminal except for reversal.
    (Realized, &[InProgress]),
    (Retired, &[InProgress, Mitigated, Realized, Transferred, Accepted]),
    (Transferred, &[Retired, InProgress]),
    (Accepted, &[Retired, InProgress]),
];

pub const OPPORTUNITY_TRANSITIONS: TransitionTable = &[
    (Identified, &[InProgress, Realized, Retired, Deferred]),
    (InProgress, &[Realized, Retired, Deferred, Lost, Identified]),
    (Realized, &[InProgress]),
    (Retired, &[InProgress, Realized, Deferred]),
    (Deferred, &[Identified, InProgress, Retired, Lost]),
    (Lost, &[Retired, InProgress]),
];

/// States reachable in one step from `from`. Empty if `from` is not a
/// state of this table.
pub fn next_states(table: TransitionTable, from: Disposition) -> &'static [Disposition] {
    table
        .iter()
        .find(|(state, _)| *state == from)
        .map(|(_, next)| *next)
        .unwrap_or(&[])
}

pub fn is_valid_transition(table: TransitionTable, from: Disposition, to: Disposition) -> bool {
    next_states(table, from).contains(&to)
}

/// An entity carrying a disposition: risks and opportunities.
pub trait Dispositioned {
    const KIND: EntityKind;

    fn entity_id(&self) -> &str;
    fn disposition(&self) -> Disposition;

    /// Overwrite disposition, date and reason; `now` stamps the record's
    /// last update. Only `transition` calls this.
    fn record_disposition(
        &mut self,
        state: Disposition,
        date: Timestamp,
        reason: String,
        now: Timestamp,
    );
}

/// Move `entity` to `target`.
///
/// A self-transition is accepted and only refreshes date and reason.
/// `date` defaults to `now` when absent.
pub fn transition<E: Dispositioned>(
    entity: &mut E,
    target: Disposition,
    reason: &str,
    date: Option<Timestamp>,
    now: Timestamp,
) -> ReserveResult<()> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ReserveError::validation(
            "reason",
            "a disposition change requires a reason",
        ));
    }

    let from = entity.disposition();
    let table = E::KIND.table();
    if target != from && !is_valid_transition(table, from, target) {
        return Err(ReserveError::InvalidTransition {
            kind: E::KIND,
            from,
            to: target,
            valid: next_states(table, from).to_vec(),
        });
    }

    entity.record_disposition(target, date.unwrap_or(now), reason.to_string(), now);
    log::info!(
        "{} {}: disposition {} -> {}",
        E::KIND,
        entity.entity_id(),
        from,
        target
    );
    Ok(())
}
