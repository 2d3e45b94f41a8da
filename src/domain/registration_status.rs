use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Lifecycle of a registration request. Only PENDING requests can move, and
/// only once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegistrationStatus {
    Pending,
    Approved,
    Rejected,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "PENDING",
            RegistrationStatus::Approved => "APPROVED",
            RegistrationStatus::Rejected => "REJECTED",
        }
    }

    pub fn can_transition_to(self, next: RegistrationStatus) -> bool {
        matches!(
            (self, next),
            (
                RegistrationStatus::Pending,
                RegistrationStatus::Approved | RegistrationStatus::Rejected
            )
        )
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RegistrationStatus::Pending),
            "APPROVED" => Ok(RegistrationStatus::Approved),
            "REJECTED" => Ok(RegistrationStatus::Rejected),
            other => Err(format!("Unknown registration status '{other}'")),
        }
    }
}
