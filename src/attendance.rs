//! Attendance check events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::EquipmentState;
use crate::crew::{CrewId, Verification};

/// Identifier assigned by the attendance recorder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One attendance check, built once per Capture/Analyze.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceCheckEvent {
    pub crew_id: CrewId,
    pub captured_at_utc: DateTime<Utc>,
    pub present: bool,
    pub helmet: bool,
    pub vest: bool,
    pub verification: Verification,
}

impl AttendanceCheckEvent {
    /// A capture always marks the crew member present.
    pub fn new(
        crew_id: CrewId,
        captured_at_utc: DateTime<Utc>,
        equipment: EquipmentState,
        verification: Verification,
    ) -> Self {
        Self {
            crew_id,
            captured_at_utc,
            present: true,
            helmet: equipment.helmet_present,
            vest: equipment.vest_present,
            verification,
        }
    }

    /// A manually entered absence. Carries no equipment.
    pub fn absent(crew_id: CrewId, captured_at_utc: DateTime<Utc>, note: Option<String>) -> Self {
        Self {
            crew_id,
            captured_at_utc,
            present: false,
            helmet: false,
            vest: false,
            verification: Verification {
                verified: false,
                note,
            },
        }
    }

    pub fn equipment(&self) -> EquipmentState {
        EquipmentState::new(self.helmet, self.vest)
    }

    pub fn is_compliant(&self) -> bool {
        self.helmet && self.vest
    }
}

/// An event the recorder accepted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedCheck {
    pub record_id: RecordId,
    pub event: AttendanceCheckEvent,
}

/// A persisted check read back for reporting, joined with the crew name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub record_id: RecordId,
    pub crew_name: Option<String>,
    pub event: AttendanceCheckEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_marks_present_and_copies_equipment() {
        let at = Utc::now();
        let event = AttendanceCheckEvent::new(
            CrewId(5),
            at,
            EquipmentState::new(true, false),
            Verification::default(),
        );
        assert!(event.present);
        assert!(event.helmet);
        assert!(!event.vest);
        assert!(!event.is_compliant());
        assert_eq!(event.equipment(), EquipmentState::new(true, false));
        assert_eq!(event.captured_at_utc, at);
    }

    #[test]
    fn events_serialize_with_utc_timestamps() -> anyhow::Result<()> {
        let at = DateTime::parse_from_rfc3339("2024-03-01T08:15:00Z")?.with_timezone(&Utc);
        let event = AttendanceCheckEvent::new(
            CrewId(9),
            at,
            EquipmentState::new(true, true),
            Verification::verified("officer PIN verified"),
        );
        let json = serde_json::to_string(&event)?;
        assert!(json.contains("2024-03-01T08:15:00Z"));
        let back: AttendanceCheckEvent = serde_json::from_str(&json)?;
        assert_eq!(back, event);
        Ok(())
    }
}
