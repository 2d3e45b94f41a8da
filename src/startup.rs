use axum::Router;
use axum::routing::IntoMakeService;
use axum::serve::Serve;
use sqlx::postgres::PgPoolOptions;

use crate::app_state::AppState;
use crate::authentication::JwtKeys;
use crate::configuration::Settings;
use crate::routers;

type Server = Serve<tokio::net::TcpListener, IntoMakeService<Router>, Router>;

pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    pub async fn build(settings: Settings) -> Result<Self, anyhow::Error> {
        let addr = std::net::SocketAddr::from((
            settings.app_settings.host,
            settings.app_settings.port,
        ));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        let pool = PgPoolOptions::new()
            .connect_lazy_with(settings.database.connect_options());

        let email_client = settings
            .email_client
            .client()
            .map_err(|e| anyhow::anyhow!("Invalid email client settings: {e}"))?;

        let app_state = AppState {
            pool,
            email_client,
            base_url: settings.app_settings.base_url,
            jwt: JwtKeys::new(&settings.auth.jwt_secret, settings.auth.jwt_ttl()),
            auth: settings.auth,
        };

        let app = routers::get_router(app_state);
        let server = axum::serve(listener, app.into_make_service());

        Ok(Self {
            port: server.local_addr()?.port(),
            server,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stop(self) -> Result<(), anyhow::Error> {
        tracing::info!("Listening on {}", self.server.local_addr()?);
        self.server.await?;
        Ok(())
    }
}
