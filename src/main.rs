use std::fmt::{Debug, Display};

use flexy::background_workers::expired_token_worker::ExpiredTokenWorker;
use flexy::configuration::get_config;
use flexy::startup::Application;
use flexy::telemetry::{get_subscriber, init_subscriber};
use tokio::task::JoinError;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();

    let subscriber =
        get_subscriber("flexy".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber);

    let settings = get_config()?;

    let worker = ExpiredTokenWorker::build(&settings);
    let application = Application::build(settings).await?;

    let application_task = tokio::spawn(application.run_until_stop());
    let worker_task = tokio::spawn(worker.run_until_stop());

    tokio::select! {
        o = application_task => report_exit("API", o),
        o = worker_task => report_exit("Expired token worker", o),
    };

    Ok(())
}

fn report_exit(
    task_name: &str,
    outcome: Result<Result<(), impl Debug + Display>, JoinError>,
) {
    match outcome {
        Ok(Ok(())) => {
            tracing::info!("{} has exited", task_name)
        }
        Ok(Err(e)) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "{} failed",
                task_name
            )
        }
        Err(e) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "{}' task failed to complete",
                task_name
            )
        }
    }
}
