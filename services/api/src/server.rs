use crate::cli::ServeArgs;
use crate::infra::{in_memory_collaborators, AppState, InMemoryPeople};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use voucher_ledger::config::AppConfig;
use voucher_ledger::error::AppError;
use voucher_ledger::telemetry;
use voucher_ledger::workflows::providers::ProviderCatalogue;
use voucher_ledger::workflows::{Delivery, LedgerServices};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let wiring = in_memory_collaborators(InMemoryPeople::demo_roster());
    let (services, delivery_worker) = LedgerServices::assemble(
        ProviderCatalogue::builtin(),
        wiring.collaborators,
        Delivery::Background,
    )?;
    let services = Arc::new(services);

    let sweeper = config
        .ledger
        .sweep_interval
        .map(|every| spawn_expiry_sweep(services.clone(), every));

    let app = with_service_routes(services)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        sweep_interval = ?config.ledger.sweep_interval,
        "voucher ledger ready"
    );

    let served = axum::serve(listener, app).await;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    if let Some(worker) = delivery_worker {
        worker.abort();
    }
    served?;
    Ok(())
}

/// Runs the expiry sweep on a fixed cadence until the task is aborted.
fn spawn_expiry_sweep(services: Arc<LedgerServices>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let services = services.clone();
            let outcome =
                tokio::task::spawn_blocking(move || services.sweeper.sweep(Utc::now(), None)).await;
            match outcome {
                Ok(Ok(report)) if report.selected > 0 => info!(
                    selected = report.selected,
                    resources_expired = report.resources_expired,
                    assignments_expired = report.assignments_expired,
                    errors = report.errors,
                    "scheduled expiry sweep finished"
                ),
                Ok(Ok(_)) => debug!("scheduled expiry sweep found nothing due"),
                Ok(Err(err)) => warn!(error = %err, "scheduled expiry sweep failed"),
                Err(err) => error!(error = %err, "expiry sweep task panicked"),
            }
        }
    })
}
