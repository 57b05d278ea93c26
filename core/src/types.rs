//! Shared primitive types used across the reserve core.

use chrono::{DateTime, Utc};

/// A stable, unique identifier for a risk, opportunity, note or ledger entry.
pub type EntityId = String;

/// Identifier of a program (owned by the program storage collaborator).
pub type ProgramId = String;

/// Identifier of a budget version. One active MR record exists per version.
pub type BudgetVersionId = String;

/// Wall-clock instant. All persisted dates are UTC.
pub type Timestamp = DateTime<Utc>;

/// Round a currency amount to cents, half away from zero.
///
/// Display and persistence only; aggregations keep the unrounded value.
/// Amounts like 1.005 sit just below the half-cent in binary, so they are
/// nudged by a tiny epsilon first.
pub fn round_currency(amount: f64) -> f64 {
    (amount * 100.0 + amount.signum() * CENT_EPSILON).round() / 100.0
}

const CENT_EPSILON: f64 = 1e-9;

/// Mint a fresh entity id.
pub fn new_id() -> EntityId {
    uuid::Uuid::new_v4().to_string()
}
