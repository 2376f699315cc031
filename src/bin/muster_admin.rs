//! muster_admin - crew roster and attendance reports

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use muster::{
    AttendanceCheckEvent, AttendanceRecorder, AttendanceReports, CheckRecord, CrewDirectory,
    CrewId, CrewIdentity, CrewRole, EquipmentState, MusterConfig, RecordId, SqliteAttendanceStore,
    Verification,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Attendance database (defaults to the configured db_path).
    #[arg(long)]
    db_path: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add or update a crew member.
    AddCrew {
        #[arg(long)]
        id: CrewId,
        #[arg(long)]
        name: String,
        /// officer, engineer or sailor
        #[arg(long, default_value = "sailor")]
        role: CrewRole,
        /// Officer PIN.
        #[arg(long)]
        pin: Option<String>,
    },
    /// List crew members.
    Crew,
    /// All checks, oldest first.
    Report {
        #[arg(long)]
        json: bool,
    },
    /// Crew whose latest check is absent, or who never checked in.
    Absentees,
    /// Show one check, or record a manual one with --crew-id.
    Check {
        /// Record id to show.
        #[arg(long, conflicts_with = "crew_id")]
        id: Option<i64>,
        /// Record a manual check for this crew member.
        #[arg(long)]
        crew_id: Option<CrewId>,
        #[arg(long, requires = "crew_id")]
        absent: bool,
        #[arg(long, requires = "crew_id", conflicts_with = "absent")]
        helmet: bool,
        #[arg(long, requires = "crew_id", conflicts_with = "absent")]
        vest: bool,
        #[arg(long, requires = "crew_id")]
        note: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let db_path = match args.db_path {
        Some(path) => path,
        None => MusterConfig::load()?.db_path,
    };
    let mut store = SqliteAttendanceStore::open(&db_path)?;

    match args.command {
        Command::AddCrew {
            id,
            name,
            role,
            pin,
        } => {
            if role == CrewRole::Officer && pin.is_none() {
                log::warn!("officer {} has no PIN and will never verify", id);
            }
            let mut identity = CrewIdentity::new(id, name, role);
            if let Some(pin) = pin {
                identity = identity.with_pin(pin);
            }
            store.add_crew(&identity)?;
            println!("crew {} saved ({}, {})", identity.id, identity.name, identity.role);
        }
        Command::Crew => {
            for member in store.crew()? {
                println!("{}\t{}\t{}", member.id, member.role, member.name);
            }
        }
        Command::Report { json } => {
            let checks = store.checks_with_members()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                println!("=== Attendance Report ===");
                for check in &checks {
                    println!("{}", format_check(check));
                }
                println!("=========================");
            }
        }
        Command::Absentees => {
            for member in store.absentees()? {
                println!("- {} ({})", member.name, member.id);
            }
        }
        Command::Check {
            id,
            crew_id,
            absent,
            helmet,
            vest,
            note,
        } => match (id, crew_id) {
            (Some(id), _) => {
                let check = store
                    .check_by_id(RecordId(id))?
                    .ok_or_else(|| anyhow!("check {} not found", id))?;
                println!("{}", format_check(&check));
            }
            (None, Some(crew_id)) => {
                if store.lookup(crew_id)?.is_none() {
                    return Err(anyhow!("crew {} not found", crew_id));
                }
                let event = if absent {
                    AttendanceCheckEvent::absent(crew_id, Utc::now(), note)
                } else {
                    AttendanceCheckEvent::new(
                        crew_id,
                        Utc::now(),
                        EquipmentState::new(helmet, vest),
                        Verification {
                            verified: false,
                            note,
                        },
                    )
                };
                let record_id = store.record(&event)?;
                println!("check {} recorded for crew {}", record_id, crew_id);
            }
            (None, None) => return Err(anyhow!("pass --id to show a check or --crew-id to record one")),
        },
    }
    Ok(())
}

fn format_check(check: &CheckRecord) -> String {
    let event = &check.event;
    format!(
        "#{} {} | {} ({}) | {} | helmet: {} | vest: {} | verified: {} | {}",
        check.record_id,
        event.captured_at_utc.format("%Y-%m-%d %H:%M:%SZ"),
        check.crew_name.as_deref().unwrap_or("?"),
        event.crew_id,
        if event.present { "Present" } else { "Absent" },
        yes_no(event.helmet),
        yes_no(event.vest),
        yes_no(event.verification.verified),
        event.verification.note.as_deref().unwrap_or("")
    )
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
