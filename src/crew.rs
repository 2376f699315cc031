//! Crew identity and role-specific verification.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::classify::EquipmentState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CrewId(pub i64);

impl fmt::Display for CrewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CrewId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(CrewId)
            .map_err(|_| anyhow!("crew id must be an integer, got '{}'", s))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrewRole {
    Officer,
    Engineer,
    #[default]
    Sailor,
}

impl CrewRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrewRole::Officer => "officer",
            CrewRole::Engineer => "engineer",
            CrewRole::Sailor => "sailor",
        }
    }

    /// Role-specific verification at capture time.
    ///
    /// Officers must present their PIN. Engineers are checked against
    /// equipment compliance but never fail verification. Sailors have no
    /// extra step.
    pub fn verify(
        &self,
        identity: &CrewIdentity,
        presented_pin: Option<&str>,
        equipment: EquipmentState,
    ) -> Verification {
        match self {
            CrewRole::Officer => {
                // Stored PINs are plaintext.
                let matches = match (identity.pin.as_deref(), presented_pin) {
                    (Some(expected), Some(given)) => expected == given,
                    _ => false,
                };
                if matches {
                    Verification::verified("officer PIN verified")
                } else {
                    log::warn!("Verification: officer {} failed PIN check", identity.id);
                    Verification::unverified("officer PIN verification failed")
                }
            }
            CrewRole::Engineer => {
                let note = if equipment.is_compliant() {
                    "engineer equipment OK"
                } else {
                    "engineer equipment incomplete"
                };
                Verification::unverified(note)
            }
            CrewRole::Sailor => Verification::default(),
        }
    }
}

impl fmt::Display for CrewRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrewRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "officer" => Ok(CrewRole::Officer),
            "engineer" => Ok(CrewRole::Engineer),
            "sailor" => Ok(CrewRole::Sailor),
            other => Err(anyhow!("unknown crew role '{}'", other)),
        }
    }
}

/// A crew member as known to the crew directory.
#[derive(Clone, PartialEq, Eq)]
pub struct CrewIdentity {
    pub id: CrewId,
    pub name: String,
    pub role: CrewRole,
    pin: Option<String>,
}

impl CrewIdentity {
    pub fn new(id: CrewId, name: impl Into<String>, role: CrewRole) -> Self {
        Self {
            id,
            name: name.into(),
            role,
            pin: None,
        }
    }

    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    pub fn pin(&self) -> Option<&str> {
        self.pin.as_deref()
    }

    pub fn verify(&self, presented_pin: Option<&str>, equipment: EquipmentState) -> Verification {
        self.role.verify(self, presented_pin, equipment)
    }
}

impl fmt::Debug for CrewIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrewIdentity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("pin", &self.pin.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Outcome of the role-specific verification step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub verified: bool,
    pub note: Option<String>,
}

impl Verification {
    pub fn verified(note: impl Into<String>) -> Self {
        Self {
            verified: true,
            note: Some(note.into()),
        }
    }

    pub fn unverified(note: impl Into<String>) -> Self {
        Self {
            verified: false,
            note: Some(note.into()),
        }
    }
}
