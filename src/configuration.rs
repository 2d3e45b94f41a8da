use std::{fmt, str::FromStr};

use config::{Config, ConfigError, Environment, File};
use secrecy::{ExposeSecret, SecretBox};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::domain::UserEmail;
use crate::email_client::{EmailClient, FallbackTransport};

#[derive(Deserialize)]
pub struct Settings {
    pub app_settings: AppSettings,
    pub database: DBSettings,
    pub email_client: EmailClientSettings,
    pub auth: AuthSettings,
}

#[derive(Deserialize, Clone)]
pub struct AppSettings {
    pub host: [u8; 4], // IPv4 address
    pub port: u16,
    /// Frontend origin used to build invitation and reset links.
    pub base_url: String,
    /// Seconds between two sweeps of expired OTPs, invitations and reset tokens.
    pub cleanup_interval: u64,
}

#[derive(Deserialize)]
pub struct DBSettings {
    pub username: String,
    pub password: SecretBox<String>,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub require_ssl: bool,
}

#[derive(Deserialize)]
pub struct EmailClientSettings {
    pub base_url: String,
    pub sender_email: String,
    pub authorization_token: SecretBox<String>,
    pub timeout_milliseconds: u64,
    pub fallback: Option<FallbackSettings>,
}

#[derive(Deserialize)]
pub struct FallbackSettings {
    pub base_url: String,
    pub api_key: SecretBox<String>,
}

#[derive(Deserialize)]
pub struct AuthSettings {
    pub jwt_secret: SecretBox<String>,
    pub jwt_ttl_days: i64,
    pub otp_ttl_minutes: i64,
    pub invitation_ttl_days: i64,
    pub reset_token_ttl_minutes: i64,
    pub secure_cookie: bool,
}

impl AuthSettings {
    pub fn jwt_ttl(&self) -> time::Duration {
        time::Duration::days(self.jwt_ttl_days)
    }

    pub fn otp_ttl(&self) -> time::Duration {
        time::Duration::minutes(self.otp_ttl_minutes)
    }

    pub fn invitation_ttl(&self) -> time::Duration {
        time::Duration::days(self.invitation_ttl_days)
    }

    pub fn reset_token_ttl(&self) -> time::Duration {
        time::Duration::minutes(self.reset_token_ttl_minutes)
    }
}

impl EmailClientSettings {
    pub fn sender(&self) -> Result<UserEmail, String> {
        UserEmail::try_from(self.sender_email.clone())
    }

    pub fn client(&self) -> Result<EmailClient, String> {
        let sender = self.sender()?;
        let fallback = self.fallback.as_ref().map(|f| FallbackTransport {
            base_url: f.base_url.clone(),
            api_key: SecretBox::new(Box::new(f.api_key.expose_secret().clone())),
        });

        let client = EmailClient::new(
            self.base_url.clone(),
            sender,
            SecretBox::new(Box::new(
                self.authorization_token.expose_secret().clone(),
            )),
            self.timeout_milliseconds,
        )
        .with_fallback(fallback);
        Ok(client)
    }
}

enum RunningEnv {
    Local,
    Production,
}

impl RunningEnv {
    pub fn as_str(&self) -> &str {
        match self {
            RunningEnv::Local => "local",
            RunningEnv::Production => "production",
        }
    }
}

impl fmt::Display for RunningEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunningEnv {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(RunningEnv::Local),
            "production" => Ok(RunningEnv::Production),
            _ => Err("Invalid environment specified"),
        }
    }
}

impl DBSettings {
    pub fn connect_options_without_database(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
            .ssl_mode(ssl_mode)
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        self.connect_options_without_database()
            .database(&self.database_name)
    }
}

pub fn get_config() -> Result<Settings, ConfigError> {
    let current_dir =
        std::env::current_dir().expect("Failed to get current directory");
    let config_path = current_dir.join("configurations");

    let running_env =
        std::env::var("RUNNING_ENV").unwrap_or_else(|_| "local".to_string());
    let running_env: RunningEnv =
        running_env.as_str().parse().unwrap_or_else(|err| {
            panic!("Failed to parse RUNNING_ENV: {err}");
        });

    let app_config_file = format!("{running_env}.yaml");
    let config = Config::builder()
        .add_source(File::from(config_path.join("base.yaml")))
        .add_source(File::from(config_path.join(app_config_file)))
        .add_source(Environment::with_prefix("FLEXY").separator("__"))
        .build()?;

    config.try_deserialize::<Settings>()
}
