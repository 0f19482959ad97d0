//! LogBook service: email action endpoints plus the background delivery worker.

use logbook_api::server::{self, AppState};
use logbook_delivery::{DeliveryQueue, SmtpMailer, TcpProbe};
use logbook_docs::{DocumentPipeline, SofficeConverter};
use logbook_store::SqliteStore;
use logbook_types::EngineConfig;
use logbook_workflow::WorkflowEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // A missing .env is fine; the process environment and defaults still apply.
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env();
    let store = Arc::new(SqliteStore::open(&config.storage.db_path)?);
    std::fs::create_dir_all(&config.storage.output_dir)?;

    let mailer = Arc::new(SmtpMailer::new(&config.smtp)?);
    if !config.smtp.has_credentials() {
        tracing::warn!("SMTP_USERNAME / SMTP_PASSWORD not set; sends will likely be refused");
    }
    let probe = Arc::new(TcpProbe::from_config(&config.probe));
    let delivery = Arc::new(DeliveryQueue::new(
        store.clone(),
        store.clone(),
        store.clone(),
        mailer,
        probe,
        config.delivery.clone(),
    ));
    let worker = delivery.clone().spawn_worker(config.delivery.drain_interval());

    let converter = Arc::new(SofficeConverter::from_config(&config.conversion));
    let engine = Arc::new(WorkflowEngine::new(
        store.clone(),
        store.clone(),
        DocumentPipeline::new(converter),
        delivery,
        config.storage.clone(),
    ));

    let app = server::router(Arc::new(AppState {
        engine,
        audit_log: store,
    }));
    let addr: SocketAddr = config.api.listen.parse()?;
    tracing::info!(
        %addr,
        db = %config.storage.db_path.display(),
        drain_interval_secs = config.delivery.drain_interval().as_secs(),
        "LogBook API listening"
    );
    let served = axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .await;
    worker.abort();
    served?;
    Ok(())
}
