mod invitation;
mod password;
mod registration_status;
mod role;
mod task_attributes;
mod user_email;
mod user_name;

pub use invitation::{
    InvitationKind, InvitationToken, NewInvitation, invitation_admits,
    invitation_is_live,
};
pub use password::Password;
pub use registration_status::RegistrationStatus;
pub use role::{Role, TeamRole};
pub use task_attributes::{TaskPriority, TaskStatus};
pub use user_email::UserEmail;
pub use user_name::UserName;
