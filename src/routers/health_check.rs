pub(crate) async fn health_check() -> &'static str {
    tracing::debug!("Health check endpoint hit");
    "OK"
}
