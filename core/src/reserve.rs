//! Management-reserve ledger.
//!
//! One `ManagementReserve` record per budget version plus its append-only
//! list of `LedgerEntry` rows. All arithmetic here is in-memory; callers
//! persist the mutated record and the returned entry inside one store
//! transaction.
//!
//! INVARIANTS (checked by `MrLedger::balance_holds`):
//!   - remaining_amount == adjusted_amount - utilized_amount
//!   - utilized_amount <= adjusted_amount
//!   - utilized_amount == sum of Utilization entries not yet reversed
//!
//! Entries are never deleted or edited. A reversal appends a signed
//! Reallocation entry that points back at the Utilization it undoes.

use crate::{
    config::{ReserveConfig, UtilizationBands},
    error::{ReserveError, ReserveResult},
    types::{new_id, round_currency, BudgetVersionId, EntityId, Timestamp},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalculationMethod {
    Standard,
    #[serde(rename = "Risk-Based")]
    RiskBased,
    Custom,
}

impl CalculationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            CalculationMethod::Standard => "Standard",
            CalculationMethod::RiskBased => "Risk-Based",
            CalculationMethod::Custom => "Custom",
        }
    }
}

impl fmt::Display for CalculationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalculationMethod {
    type Err = ReserveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Standard" => Ok(CalculationMethod::Standard),
            "Risk-Based" => Ok(CalculationMethod::RiskBased),
            "Custom" => Ok(CalculationMethod::Custom),
            other => Err(ReserveError::validation(
                "calculation_method",
                format!("unknown method '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// Debit against a risk. Amount > 0.
    Utilization,
    /// Change of the reserve target. Amount is the signed delta.
    Adjustment,
    /// Funds released back to the pool from a reversed utilization.
    /// Amount is the negated original.
    Reallocation,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::Utilization => "Utilization",
            EntryType::Adjustment => "Adjustment",
            EntryType::Reallocation => "Reallocation",
        }
    }
}

impl FromStr for EntryType {
    type Err = ReserveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Utilization" => Ok(EntryType::Utilization),
            "Adjustment" => Ok(EntryType::Adjustment),
            "Reallocation" => Ok(EntryType::Reallocation),
            other => Err(ReserveError::validation(
                "entry_type",
                format!("unknown ledger entry type '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntityId,
    pub reserve_id: EntityId,
    /// Set for Utilization and Reallocation entries.
    pub risk_id: Option<EntityId>,
    pub entry_type: EntryType,
    pub amount: f64,
    pub reason: String,
    pub date: Timestamp,
    /// The Utilization entry a Reallocation undoes.
    pub reverses_entry_id: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagementReserve {
    pub id: EntityId,
    pub budget_version_id: BudgetVersionId,
    /// Program cost the percentages are expressed against.
    pub total_cost: f64,
    pub baseline_amount: f64,
    pub baseline_percentage: f64,
    pub adjusted_amount: f64,
    pub adjusted_percentage: f64,
    pub utilized_amount: f64,
    pub remaining_amount: f64,
    pub calculation_method: CalculationMethod,
    pub justification: Option<String>,
    pub notes: Option<String>,
    pub is_active: bool,
    /// Optimistic concurrency token, bumped by the store on every write.
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UtilizationStatus {
    Low,
    Moderate,
    High,
    Critical,
}

impl ManagementReserve {
    /// Create the reserve for a budget version at setup time.
    pub fn establish(
        budget_version_id: &str,
        total_cost: f64,
        method: CalculationMethod,
        custom_percentage: Option<f64>,
        justification: Option<String>,
        config: &ReserveConfig,
        now: Timestamp,
    ) -> ReserveResult<Self> {
        if !total_cost.is_finite() || total_cost < 0.0 {
            return Err(ReserveError::validation(
                "total_cost",
                format!("must be a non-negative amount, got {total_cost}"),
            ));
        }
        if let Some(p) = custom_percentage {
            if !(0.0..=100.0).contains(&p) {
                return Err(ReserveError::validation(
                    "custom_percentage",
                    format!("must be between 0 and 100, got {p}"),
                ));
            }
        }
        let percentage = round_currency(config.percentage_for(method, total_cost, custom_percentage));
        let amount = if total_cost > 0.0 {
            round_currency(total_cost * percentage / 100.0)
        } else {
            0.0
        };
        Ok(Self {
            id: new_id(),
            budget_version_id: budget_version_id.to_string(),
            total_cost,
            baseline_amount: amount,
            baseline_percentage: percentage,
            adjusted_amount: amount,
            adjusted_percentage: percentage,
            utilized_amount: 0.0,
            remaining_amount: amount,
            calculation_method: method,
            justification,
            notes: None,
            is_active: true,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Utilized share of the adjusted amount, in percent.
    pub fn utilization_percentage(&self) -> f64 {
        if self.adjusted_amount > 0.0 {
            round_currency(self.utilized_amount / self.adjusted_amount * 100.0)
        } else {
            0.0
        }
    }

    pub fn utilization_status(&self, bands: &UtilizationBands) -> UtilizationStatus {
        let pct = self.utilization_percentage();
        if pct >= bands.critical_at {
            UtilizationStatus::Critical
        } else if pct >= bands.high_at {
            UtilizationStatus::High
        } else if pct >= bands.moderate_at {
            UtilizationStatus::Moderate
        } else {
            UtilizationStatus::Low
        }
    }

    pub fn percentage_of_cost(&self, amount: f64) -> f64 {
        if self.total_cost > 0.0 {
            round_currency(amount / self.total_cost * 100.0)
        } else {
            0.0
        }
    }

    fn set_utilized(&mut self, utilized: f64, now: Timestamp) {
        self.utilized_amount = round_currency(utilized);
        self.remaining_amount = round_currency(self.adjusted_amount - self.utilized_amount);
        self.updated_at = now;
    }
}

/// A reserve record together with its full entry history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MrLedger {
    pub reserve: ManagementReserve,
    pub entries: Vec<LedgerEntry>,
}

impl MrLedger {
    pub fn new(reserve: ManagementReserve, entries: Vec<LedgerEntry>) -> Self {
        Self { reserve, entries }
    }

    /// Debit the reserve on behalf of `risk_id`.
    ///
    /// On any error nothing is mutated.
    pub fn utilize(
        &mut self,
        risk_id: &str,
        amount: f64,
        reason: &str,
        now: Timestamp,
    ) -> ReserveResult<LedgerEntry> {
        let amount = validate_debit(amount)?;
        let reason = validate_reason(reason)?;
        if amount > self.reserve.remaining_amount {
            return Err(ReserveError::InsufficientReserve {
                requested: amount,
                remaining: self.reserve.remaining_amount,
            });
        }

        let entry = LedgerEntry {
            id: new_id(),
            reserve_id: self.reserve.id.clone(),
            risk_id: Some(risk_id.to_string()),
            entry_type: EntryType::Utilization,
            amount,
            reason,
            date: now,
            reverses_entry_id: None,
        };
        let utilized = self.reserve.utilized_amount + amount;
        self.reserve.set_utilized(utilized, now);
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Move the reserve target. Utilization is untouched, so the target
    /// cannot drop below what is already spent.
    pub fn adjust(
        &mut self,
        new_adjusted_amount: f64,
        reason: &str,
        now: Timestamp,
    ) -> ReserveResult<LedgerEntry> {
        if !new_adjusted_amount.is_finite() || new_adjusted_amount < 0.0 {
            return Err(ReserveError::validation(
                "adjusted_amount",
                format!("must be a non-negative amount, got {new_adjusted_amount}"),
            ));
        }
        let reason = validate_reason(reason)?;
        let target = round_currency(new_adjusted_amount);
        if target < self.reserve.utilized_amount {
            return Err(ReserveError::InvalidState(format!(
                "adjusted amount {target:.2} is below the {:.2} already utilized",
                self.reserve.utilized_amount
            )));
        }

        let entry = LedgerEntry {
            id: new_id(),
            reserve_id: self.reserve.id.clone(),
            risk_id: None,
            entry_type: EntryType::Adjustment,
            amount: round_currency(target - self.reserve.adjusted_amount),
            reason,
            date: now,
            reverses_entry_id: None,
        };
        self.reserve.adjusted_amount = target;
        self.reserve.adjusted_percentage = self.reserve.percentage_of_cost(target);
        let utilized = self.reserve.utilized_amount;
        self.reserve.set_utilized(utilized, now);
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Undo a Utilization entry with a compensating Reallocation.
    pub fn reverse(
        &mut self,
        entry_id: &str,
        reason: &str,
        now: Timestamp,
    ) -> ReserveResult<LedgerEntry> {
        let reason = validate_reason(reason)?;
        let original = self
            .entries
            .iter()
            .find(|e| e.id == entry_id)
            .cloned()
            .ok_or_else(|| ReserveError::not_found("ledger entry", entry_id))?;
        if original.entry_type != EntryType::Utilization {
            return Err(ReserveError::InvalidState(format!(
                "ledger entry {entry_id} is a {} entry, only utilizations can be reversed",
                original.entry_type.as_str()
            )));
        }
        if self.is_reversed(entry_id) {
            return Err(ReserveError::InvalidState(format!(
                "ledger entry {entry_id} is already reversed"
            )));
        }

        let entry = LedgerEntry {
            id: new_id(),
            reserve_id: self.reserve.id.clone(),
            risk_id: original.risk_id.clone(),
            entry_type: EntryType::Reallocation,
            amount: -original.amount,
            reason,
            date: now,
            reverses_entry_id: Some(original.id.clone()),
        };
        let utilized = (self.reserve.utilized_amount - original.amount).max(0.0);
        self.reserve.set_utilized(utilized, now);
        self.entries.push(entry.clone());
        Ok(entry)
    }

    pub fn is_reversed(&self, entry_id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.reverses_entry_id.as_deref() == Some(entry_id))
    }

    /// Utilization entries for `risk_id` that have not been reversed.
    pub fn open_utilizations<'a>(&'a self, risk_id: &'a str) -> impl Iterator<Item = &'a LedgerEntry> {
        self.entries.iter().filter(move |e| {
            e.entry_type == EntryType::Utilization
                && e.risk_id.as_deref() == Some(risk_id)
                && !self.is_reversed(&e.id)
        })
    }

    pub fn balance_holds(&self) -> bool {
        let r = &self.reserve;
        let open_total: f64 = self
            .entries
            .iter()
            .filter(|e| e.entry_type == EntryType::Utilization && !self.is_reversed(&e.id))
            .map(|e| e.amount)
            .sum();
        (r.remaining_amount + r.utilized_amount - r.adjusted_amount).abs() < 0.005
            && r.utilized_amount <= r.adjusted_amount + 0.005
            && (open_total - r.utilized_amount).abs() < 0.005
    }
}

fn validate_debit(amount: f64) -> ReserveResult<f64> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ReserveError::validation(
            "amount",
            format!("must be greater than zero, got {amount}"),
        ));
    }
    let rounded = round_currency(amount);
    if rounded <= 0.0 {
        return Err(ReserveError::validation(
            "amount",
            format!("{amount} rounds to zero cents"),
        ));
    }
    Ok(rounded)
}

fn validate_reason(reason: &str) -> ReserveResult<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        Err(ReserveError::validation("reason", "a ledger entry requires a reason"))
    } else {
        Ok(reason.to_string())
    }
}
