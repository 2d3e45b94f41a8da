pub mod accounts;
pub mod app_state;
pub mod authentication;
pub mod background_workers;
pub mod configuration;
pub mod domain;
pub mod email_client;
pub mod invitations;
pub mod memberships;
pub mod notifications;
mod routers;
pub mod startup;
pub mod telemetry;
pub mod utils;
