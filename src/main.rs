use std::{sync::Arc, time::Duration};

use crate::{
    backend::BookingBackend,
    clock::{Clock, SystemClock},
    configuration::Configuration,
    configuration_handler::ConfigurationHandler,
    database_interface::DatabaseInterface,
    http::{create_app, AppState},
    local_bookings::LocalBookings,
    notification::TracingNotifier,
};
use tokio::{net::TcpListener, task::JoinHandle, time::sleep};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod backend;
mod booking;
mod cancellation;
mod clock;
mod configuration;
mod configuration_handler;
mod conflict;
mod database_interface;
mod error;
mod http;
mod identity;
mod local_bookings;
mod notification;
mod schema;
mod slot_generator;
#[cfg(test)]
mod testutils;
mod types;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let configuration = ConfigurationHandler::parse_arguments();
    info!(
        business = %configuration.business_name(),
        timezone = %configuration.business_timezone(),
        "Starting booking engine"
    );

    let address = format!("0.0.0.0:{}", configuration.port());
    let listener = TcpListener::bind(&address).await?;
    info!("Accessible at {address}");

    if let Some(database_url) = configuration.database_url() {
        let backend = loop {
            match DatabaseInterface::new(&database_url) {
                Ok(backend) => {
                    info!("Successfully connected to database");
                    break backend;
                }
                Err(err) => {
                    error!(?err, "Failed to establish database connection. Retry in 1 sec. Start without DATABASE_URL to keep bookings in memory.");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        };
        serve(listener, backend, configuration).await
    } else {
        warn!("No DATABASE_URL configured, bookings are kept in memory only");
        serve(listener, LocalBookings::default(), configuration).await
    }
}

async fn serve<B: BookingBackend, C: Configuration>(
    listener: TcpListener,
    backend: B,
    configuration: C,
) -> std::io::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    spawn_completion_sweep(
        backend.clone(),
        clock.clone(),
        configuration.completion_interval(),
    );

    let state = AppState {
        backend,
        configuration,
        clock,
        notifier: Arc::new(TracingNotifier),
    };
    axum::serve(listener, create_app(state)).await
}

/// Periodically marks appointments that have ended as completed.
fn spawn_completion_sweep<B: BookingBackend>(
    backend: B,
    clock: Arc<dyn Clock>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match backend.complete_finished_appointments(clock.now()) {
                Ok(0) => {}
                Ok(completed) => info!(completed, "Marked finished appointments as completed"),
                Err(err) => error!(?err, "Completion sweep failed"),
            }
        }
    })
}
