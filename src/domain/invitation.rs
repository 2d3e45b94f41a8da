use time::OffsetDateTime;
use uuid::Uuid;

use crate::authentication::{generate_token, hash_token};
use crate::domain::{Role, TeamRole, UserEmail};

const TOKEN_HEX_LENGTH: usize = 64;

/// Opaque invitation secret carried in a join link. Only its hash is stored.
#[derive(Debug, Clone)]
pub struct InvitationToken(String);

impl InvitationToken {
    pub fn generate() -> Self {
        Self(generate_token())
    }

    pub fn hash(&self) -> String {
        hash_token(&self.0)
    }
}

impl TryFrom<String> for InvitationToken {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.trim().to_ascii_lowercase();
        if value.len() != TOKEN_HEX_LENGTH
            || !value.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err("Invalid or expired invitation link".to_string());
        }
        Ok(Self(value))
    }
}

impl AsRef<str> for InvitationToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> serde::Deserialize<'de> for InvitationToken {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.try_into().map_err(serde::de::Error::custom)
    }
}

/// What accepting an invitation grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationKind {
    /// Join the leader's team, and the project when one is bound.
    Team {
        role: TeamRole,
        project_id: Option<Uuid>,
    },
    /// Become a client of a project.
    Client { project_id: Uuid },
}

impl InvitationKind {
    pub fn new(role: Role, project_id: Option<Uuid>) -> Result<Self, String> {
        match (role, project_id) {
            (Role::Client, Some(project_id)) => {
                Ok(InvitationKind::Client { project_id })
            }
            (Role::Client, None) => {
                Err("Project ID is required for client invitations".to_string())
            }
            (Role::Team | Role::Biller, project_id) => {
                Ok(InvitationKind::Team {
                    role: TeamRole::try_from(role)?,
                    project_id,
                })
            }
            _ => Err(
                "Invalid role. Must be one of: CLIENT, TEAM, BILLER".to_string()
            ),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            InvitationKind::Team { role, .. } => (*role).into(),
            InvitationKind::Client { .. } => Role::Client,
        }
    }

    pub fn project_id(&self) -> Option<Uuid> {
        match self {
            InvitationKind::Team { project_id, .. } => *project_id,
            InvitationKind::Client { project_id } => Some(*project_id),
        }
    }

    /// Frontend path of the join page for this kind of invitation.
    pub fn link_path(&self, token: &InvitationToken) -> String {
        match self.project_id() {
            Some(_) => format!("/join-project/{}", token.as_ref()),
            None => format!("/join-team/{}", token.as_ref()),
        }
    }
}

pub struct NewInvitation {
    pub token: InvitationToken,
    pub kind: InvitationKind,
    pub leader_id: Uuid,
    pub legal_role: Option<String>,
    pub custom_legal_role: Option<String>,
    pub invited_email: Option<UserEmail>,
    pub expires_at: OffsetDateTime,
}

/// An invitation can be accepted until its expiry instant, inclusive.
pub fn invitation_is_live(expires_at: OffsetDateTime, now: OffsetDateTime) -> bool {
    expires_at >= now
}

/// An email-bound invitation only admits the invited address.
pub fn invitation_admits(invited_email: Option<&str>, email: &UserEmail) -> bool {
    invited_email
        .map(|invited| invited.eq_ignore_ascii_case(email.as_ref()))
        .unwrap_or(true)
}
