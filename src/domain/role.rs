use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Client,
    Provider,
    Biller,
    Team,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "CLIENT",
            Role::Provider => "PROVIDER",
            Role::Biller => "BILLER",
            Role::Team => "TEAM",
            Role::Admin => "ADMIN",
        }
    }

    /// Role a user ends up with after a leader adds them to a team directly.
    ///
    /// Billers always become BILLER; a TEAM invite only demotes a PROVIDER to
    /// TEAM, any other current role is kept.
    pub fn after_direct_team_add(self, invited: TeamRole) -> Role {
        match (invited, self) {
            (TeamRole::Biller, _) => Role::Biller,
            (TeamRole::Team, Role::Provider) => Role::Team,
            (TeamRole::Team, current) => current,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLIENT" => Ok(Role::Client),
            "PROVIDER" => Ok(Role::Provider),
            "BILLER" => Ok(Role::Biller),
            "TEAM" => Ok(Role::Team),
            "ADMIN" => Ok(Role::Admin),
            other => Err(format!(
                "Invalid role '{other}'. Must be one of: CLIENT, PROVIDER, BILLER, TEAM, ADMIN"
            )),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The subset of roles a leader can invite into a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TeamRole {
    Team,
    Biller,
}

impl From<TeamRole> for Role {
    fn from(role: TeamRole) -> Self {
        match role {
            TeamRole::Team => Role::Team,
            TeamRole::Biller => Role::Biller,
        }
    }
}

impl TryFrom<Role> for TeamRole {
    type Error = String;

    fn try_from(role: Role) -> Result<Self, Self::Error> {
        match role {
            Role::Team => Ok(TeamRole::Team),
            Role::Biller => Ok(TeamRole::Biller),
            _ => Err("Invalid role. Must be one of: TEAM, BILLER".to_string()),
        }
    }
}
