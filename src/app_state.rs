use sqlx::PgPool;

use crate::authentication::JwtKeys;
use crate::configuration::AuthSettings;
use crate::email_client::EmailClient;

pub struct AppState {
    pub pool: PgPool,
    pub email_client: EmailClient,
    /// Frontend origin, used for links in emails and invitation responses.
    pub base_url: String,
    pub jwt: JwtKeys,
    pub auth: AuthSettings,
}

impl AppState {
    pub fn link(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
