//! reserve-desk: JSON-lines front end for the risk & opportunity register
//! and its management reserve.
//!
//! Usage:
//!   reserve-desk --db reserve.db --data-dir ./data --ipc-mode
//!   reserve-desk --db reserve.db --status bv-2026-baseline
//!
//! In IPC mode every stdin line is one command object tagged by `type`;
//! every reply is one line, `{"ok": ...}` or `{"error": {...}}`.

use anyhow::Result;
use reserve_core::{
    config::ReserveConfig,
    desk::ReserveDesk,
    disposition::{Disposition, EntityKind},
    error::{ReserveError, ReserveResult},
    port::BudgetVersion,
    register::{OpportunityDraft, OpportunityPatch, RiskDraft, RiskPatch},
    reserve::CalculationMethod,
    store::ReserveStore,
    types::Timestamp,
};
use serde_json::{json, Value};
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    RegisterProgram {
        program_id: String,
        name: String,
    },
    AddBudgetVersion {
        version: BudgetVersion,
    },
    CreateRisk {
        draft: RiskDraft,
    },
    UpdateRisk {
        risk_id: String,
        patch: RiskPatch,
    },
    DeleteRisk {
        risk_id: String,
    },
    CreateOpportunity {
        draft: OpportunityDraft,
    },
    UpdateOpportunity {
        opportunity_id: String,
        patch: OpportunityPatch,
    },
    DeleteOpportunity {
        opportunity_id: String,
    },
    RecordActualBenefit {
        opportunity_id: String,
        amount: f64,
    },
    AddNote {
        kind: EntityKind,
        entity_id: String,
        body: String,
        #[serde(default)]
        author: Option<String>,
    },
    Notes {
        kind: EntityKind,
        entity_id: String,
    },
    Categories,
    ChangeDisposition {
        kind: EntityKind,
        entity_id: String,
        target: Disposition,
        reason: String,
        #[serde(default)]
        date: Option<Timestamp>,
    },
    MaterializeRisk {
        risk_id: String,
        amount: f64,
        reason: String,
    },
    ReverseUtilization {
        entry_id: String,
        reason: String,
    },
    EstablishReserve {
        budget_version_id: String,
        method: CalculationMethod,
        #[serde(default)]
        custom_percentage: Option<f64>,
        #[serde(default)]
        justification: Option<String>,
    },
    AdjustReserve {
        budget_version_id: String,
        amount: f64,
        reason: String,
    },
    ResyncReserve {
        budget_version_id: String,
        total_cost: f64,
        reason: String,
    },
    CalculateRoDrivenMr {
        budget_version_id: String,
    },
    ApplyRoDrivenMr {
        budget_version_id: String,
        reason: String,
    },
    ReserveStatus {
        budget_version_id: String,
    },
    RegisterSummary {
        program_id: String,
    },
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = flag_value(&args, "--db").unwrap_or("reserve.db");
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");

    let config = match ReserveConfig::load(data_dir) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("{e}; using built-in reserve policy");
            ReserveConfig::default()
        }
    };
    let store = ReserveStore::open(db)?;
    store.migrate()?;
    let mut desk = ReserveDesk::with_system_clock(store, config);

    if ipc_mode {
        run_ipc_loop(&mut desk)?;
    } else if let Some(budget_version_id) = flag_value(&args, "--status") {
        print_status(&desk, budget_version_id)?;
    } else {
        eprintln!("reserve-desk: pass --ipc-mode or --status <budget-version-id>");
    }
    Ok(())
}

fn run_ipc_loop(desk: &mut ReserveDesk) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = json!({ "error": { "code": "bad_command", "message": e.to_string() } });
                writeln!(stdout, "{err_json}")?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let reply = match handle_command(desk, cmd) {
            Ok(value) => json!({ "ok": value }),
            Err(e) => {
                if e.is_recoverable() {
                    log::info!("command refused: {e}");
                } else {
                    log::error!("command failed: {e}");
                }
                json!({ "error": { "code": e.code(), "message": e.to_string() } })
            }
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(desk: &mut ReserveDesk, cmd: IpcCommand) -> ReserveResult<Value> {
    let value = match cmd {
        IpcCommand::RegisterProgram { program_id, name } => {
            desk.register_program(&program_id, &name)?;
            json!({ "program_id": program_id })
        }
        IpcCommand::AddBudgetVersion { version } => to_value(desk.add_budget_version(version)?)?,
        IpcCommand::CreateRisk { draft } => to_value(desk.create_risk(draft)?)?,
        IpcCommand::UpdateRisk { risk_id, patch } => to_value(desk.update_risk(&risk_id, patch)?)?,
        IpcCommand::DeleteRisk { risk_id } => {
            desk.delete_risk(&risk_id)?;
            json!({ "deleted": risk_id })
        }
        IpcCommand::CreateOpportunity { draft } => to_value(desk.create_opportunity(draft)?)?,
        IpcCommand::UpdateOpportunity {
            opportunity_id,
            patch,
        } => to_value(desk.update_opportunity(&opportunity_id, patch)?)?,
        IpcCommand::DeleteOpportunity { opportunity_id } => {
            desk.delete_opportunity(&opportunity_id)?;
            json!({ "deleted": opportunity_id })
        }
        IpcCommand::RecordActualBenefit {
            opportunity_id,
            amount,
        } => to_value(desk.record_actual_benefit(&opportunity_id, amount)?)?,
        IpcCommand::AddNote {
            kind,
            entity_id,
            body,
            author,
        } => {
            let note = match kind {
                EntityKind::Risk => desk.add_risk_note(&entity_id, &body, author)?,
                EntityKind::Opportunity => desk.add_opportunity_note(&entity_id, &body, author)?,
            };
            to_value(note)?
        }
        IpcCommand::Notes { kind, entity_id } => to_value(desk.notes(kind, &entity_id)?)?,
        IpcCommand::Categories => to_value(desk.risk_categories()?)?,
        IpcCommand::ChangeDisposition {
            kind,
            entity_id,
            target,
            reason,
            date,
        } => to_value(desk.change_disposition(&entity_id, kind, target, &reason, date)?)?,
        IpcCommand::MaterializeRisk {
            risk_id,
            amount,
            reason,
        } => to_value(desk.materialize_risk(&risk_id, amount, &reason)?)?,
        IpcCommand::ReverseUtilization { entry_id, reason } => {
            to_value(desk.reverse_utilization(&entry_id, &reason)?)?
        }
        IpcCommand::EstablishReserve {
            budget_version_id,
            method,
            custom_percentage,
            justification,
        } => to_value(desk.establish_reserve(
            &budget_version_id,
            method,
            custom_percentage,
            justification,
        )?)?,
        IpcCommand::AdjustReserve {
            budget_version_id,
            amount,
            reason,
        } => {
            let (reserve, entry) = desk.adjust_reserve(&budget_version_id, amount, &reason)?;
            json!({ "management_reserve": to_value(reserve)?, "entry": to_value(entry)? })
        }
        IpcCommand::ResyncReserve {
            budget_version_id,
            total_cost,
            reason,
        } => to_value(desk.resync_reserve(&budget_version_id, total_cost, &reason)?)?,
        IpcCommand::CalculateRoDrivenMr { budget_version_id } => {
            to_value(desk.calculate_ro_driven_mr(&budget_version_id)?)?
        }
        IpcCommand::ApplyRoDrivenMr {
            budget_version_id,
            reason,
        } => to_value(desk.apply_ro_driven_mr(&budget_version_id, &reason)?)?,
        IpcCommand::ReserveStatus { budget_version_id } => {
            to_value(desk.reserve_status(&budget_version_id)?)?
        }
        IpcCommand::RegisterSummary { program_id } => {
            to_value(desk.register_summary(&program_id)?)?
        }
        IpcCommand::Quit => Value::Null,
    };
    Ok(value)
}

fn to_value<T: serde::Serialize>(value: T) -> ReserveResult<Value> {
    serde_json::to_value(value).map_err(ReserveError::from)
}

fn print_status(desk: &ReserveDesk, budget_version_id: &str) -> Result<()> {
    let status = desk.reserve_status(budget_version_id)?;
    let mr = &status.management_reserve;

    println!("=== MANAGEMENT RESERVE ===");
    println!("  budget version: {budget_version_id}");
    println!("  method:         {}", mr.calculation_method);
    println!("  total cost:     {:.2}", mr.total_cost);
    println!("  baseline:       {:.2} ({:.2}%)", mr.baseline_amount, mr.baseline_percentage);
    println!("  adjusted:       {:.2} ({:.2}%)", mr.adjusted_amount, mr.adjusted_percentage);
    println!("  utilized:       {:.2}", mr.utilized_amount);
    println!("  remaining:      {:.2}", mr.remaining_amount);
    println!(
        "  utilization:    {:.1}% ({:?}){}",
        status.utilization_percentage,
        status.status,
        if status.alert { "  ALERT" } else { "" }
    );

    println!();
    println!("=== LEDGER ===");
    if status.entries.is_empty() {
        println!("  (no entries)");
    }
    for e in &status.entries {
        println!(
            "  {} | {:<13} | {:>12.2} | {} | {}",
            e.date.format("%Y-%m-%d"),
            e.entry_type.as_str(),
            e.amount,
            e.risk_id.as_deref().unwrap_or("-"),
            e.reason
        );
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
