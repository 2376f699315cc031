use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::attendance::{AttendanceCheckEvent, CheckRecord, RecordId};
use crate::crew::{CrewId, CrewIdentity, CrewRole, Verification};

/// Persists attendance check events.
pub trait AttendanceRecorder: Send {
    fn record(&mut self, event: &AttendanceCheckEvent) -> Result<RecordId>;
}

/// Resolves crew ids to identities.
pub trait CrewDirectory {
    fn lookup(&self, id: CrewId) -> Result<Option<CrewIdentity>>;
}

/// Read side used by the report surfaces.
pub trait AttendanceReports {
    /// All checks with crew names, oldest first.
    fn checks_with_members(&self) -> Result<Vec<CheckRecord>>;

    fn check_by_id(&self, id: RecordId) -> Result<Option<CheckRecord>>;

    /// Crew whose latest check is not present, plus crew never checked.
    fn absentees(&self) -> Result<Vec<CrewIdentity>>;
}

pub struct SqliteAttendanceStore {
    conn: Connection,
}

impl SqliteAttendanceStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open attendance database {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS crew_member (
              crew_id INTEGER PRIMARY KEY,
              crew_name TEXT NOT NULL,
              role TEXT NOT NULL,
              pin TEXT
            );

            CREATE TABLE IF NOT EXISTS crew_check (
              check_id INTEGER PRIMARY KEY AUTOINCREMENT,
              crew_id INTEGER NOT NULL REFERENCES crew_member(crew_id),
              captured_at TEXT NOT NULL,
              check_date TEXT NOT NULL,
              present INTEGER NOT NULL,
              helmet INTEGER NOT NULL,
              vest INTEGER NOT NULL,
              verified INTEGER NOT NULL,
              note TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_check_crew ON crew_check(crew_id, captured_at);
            "#,
        )?;
        Ok(())
    }

    /// Insert or replace a crew member.
    pub fn add_crew(&mut self, identity: &CrewIdentity) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO crew_member(crew_id, crew_name, role, pin)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(crew_id) DO UPDATE SET
              crew_name = excluded.crew_name,
              role = excluded.role,
              pin = excluded.pin
            "#,
            params![
                identity.id.0,
                identity.name,
                identity.role.as_str(),
                identity.pin()
            ],
        )?;
        Ok(())
    }

    pub fn crew(&self) -> Result<Vec<CrewIdentity>> {
        let mut stmt = self
            .conn
            .prepare("SELECT crew_id, crew_name, role, pin FROM crew_member ORDER BY crew_id ASC")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(identity_from_row(row)?);
        }
        Ok(out)
    }

    fn query_checks(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<CheckRecord>> {
        let sql = format!(
            r#"
            SELECT c.check_id, c.crew_id, c.captured_at, c.present, c.helmet, c.vest,
                   c.verified, c.note, m.crew_name
            FROM crew_check c
            LEFT JOIN crew_member m ON m.crew_id = c.crew_id
            {}
            ORDER BY c.captured_at ASC, c.check_id ASC
            "#,
            filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(args)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let captured_at: String = row.get(2)?;
            out.push(CheckRecord {
                record_id: RecordId(row.get(0)?),
                crew_name: row.get(8)?,
                event: AttendanceCheckEvent {
                    crew_id: CrewId(row.get(1)?),
                    captured_at_utc: parse_timestamp(&captured_at)?,
                    present: row.get(3)?,
                    helmet: row.get(4)?,
                    vest: row.get(5)?,
                    verification: Verification {
                        verified: row.get(6)?,
                        note: row.get(7)?,
                    },
                },
            });
        }
        Ok(out)
    }
}

impl AttendanceRecorder for SqliteAttendanceStore {
    fn record(&mut self, event: &AttendanceCheckEvent) -> Result<RecordId> {
        self.conn
            .execute(
                r#"
                INSERT INTO crew_check(crew_id, captured_at, check_date, present, helmet, vest, verified, note)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    event.crew_id.0,
                    format_timestamp(&event.captured_at_utc),
                    event.captured_at_utc.date_naive().to_string(),
                    event.present,
                    event.helmet,
                    event.vest,
                    event.verification.verified,
                    event.verification.note
                ],
            )
            .with_context(|| format!("failed to insert check for crew {}", event.crew_id))?;
        Ok(RecordId(self.conn.last_insert_rowid()))
    }
}

impl CrewDirectory for SqliteAttendanceStore {
    fn lookup(&self, id: CrewId) -> Result<Option<CrewIdentity>> {
        let mut stmt = self
            .conn
            .prepare("SELECT crew_id, crew_name, role, pin FROM crew_member WHERE crew_id = ?1")?;
        let identity = stmt
            .query_row(params![id.0], |row| Ok(identity_from_row(row)))
            .optional()?;
        identity.transpose()
    }
}

impl AttendanceReports for SqliteAttendanceStore {
    fn checks_with_members(&self) -> Result<Vec<CheckRecord>> {
        self.query_checks("", &[])
    }

    fn check_by_id(&self, id: RecordId) -> Result<Option<CheckRecord>> {
        Ok(self
            .query_checks("WHERE c.check_id = ?1", &[&id.0])?
            .into_iter()
            .next())
    }

    fn absentees(&self) -> Result<Vec<CrewIdentity>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT m.crew_id, m.crew_name, m.role, m.pin
            FROM crew_member m
            LEFT JOIN crew_check c ON c.check_id = (
              SELECT check_id FROM crew_check
              WHERE crew_id = m.crew_id
              ORDER BY captured_at DESC, check_id DESC
              LIMIT 1
            )
            WHERE c.check_id IS NULL OR c.present = 0
            ORDER BY m.crew_id ASC
            "#,
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(identity_from_row(row)?);
        }
        Ok(out)
    }
}

fn identity_from_row(row: &Row<'_>) -> Result<CrewIdentity> {
    let role: String = row.get(2)?;
    let pin: Option<String> = row.get(3)?;
    let identity = CrewIdentity::new(CrewId(row.get(0)?), row.get::<_, String>(1)?, role.parse::<CrewRole>()?);
    Ok(match pin {
        Some(pin) => identity.with_pin(pin),
        None => identity,
    })
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| anyhow!("corrupt check timestamp '{}': {}", raw, e))
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryAttendanceStore {
    crew: Vec<CrewIdentity>,
    checks: Vec<(RecordId, AttendanceCheckEvent)>,
    next_id: i64,
    failures_remaining: u32,
}

impl InMemoryAttendanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_crew(mut self, identity: CrewIdentity) -> Self {
        self.add_crew(identity);
        self
    }

    pub fn add_crew(&mut self, identity: CrewIdentity) {
        self.crew.retain(|existing| existing.id != identity.id);
        self.crew.push(identity);
        self.crew.sort_by_key(|c| c.id);
    }

    /// Reject the next `count` record calls.
    pub fn fail_next_records(&mut self, count: u32) {
        self.failures_remaining = count;
    }

    pub fn recorded(&self) -> Vec<AttendanceCheckEvent> {
        self.checks.iter().map(|(_, event)| event.clone()).collect()
    }

    fn name_of(&self, id: CrewId) -> Option<String> {
        self.crew.iter().find(|c| c.id == id).map(|c| c.name.clone())
    }

    fn to_record(&self, id: RecordId, event: &AttendanceCheckEvent) -> CheckRecord {
        CheckRecord {
            record_id: id,
            crew_name: self.name_of(event.crew_id),
            event: event.clone(),
        }
    }
}

impl AttendanceRecorder for InMemoryAttendanceStore {
    fn record(&mut self, event: &AttendanceCheckEvent) -> Result<RecordId> {
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(anyhow!("attendance store unavailable"));
        }
        if self.name_of(event.crew_id).is_none() {
            return Err(anyhow!("crew {} is not registered", event.crew_id));
        }
        self.next_id += 1;
        let id = RecordId(self.next_id);
        self.checks.push((id, event.clone()));
        Ok(id)
    }
}

impl CrewDirectory for InMemoryAttendanceStore {
    fn lookup(&self, id: CrewId) -> Result<Option<CrewIdentity>> {
        Ok(self.crew.iter().find(|c| c.id == id).cloned())
    }
}

impl AttendanceReports for InMemoryAttendanceStore {
    fn checks_with_members(&self) -> Result<Vec<CheckRecord>> {
        let mut out: Vec<CheckRecord> = self
            .checks
            .iter()
            .map(|(id, event)| self.to_record(*id, event))
            .collect();
        out.sort_by_key(|r| (r.event.captured_at_utc, r.record_id));
        Ok(out)
    }

    fn check_by_id(&self, id: RecordId) -> Result<Option<CheckRecord>> {
        Ok(self
            .checks
            .iter()
            .find(|(rid, _)| *rid == id)
            .map(|(rid, event)| self.to_record(*rid, event)))
    }

    fn absentees(&self) -> Result<Vec<CrewIdentity>> {
        Ok(self
            .crew
            .iter()
            .filter(|member| {
                let latest = self
                    .checks
                    .iter()
                    .filter(|(_, event)| event.crew_id == member.id)
                    .max_by_key(|(id, event)| (event.captured_at_utc, *id));
                latest.map_or(true, |(_, event)| !event.present)
            })
            .cloned()
            .collect())
    }
}
