use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use lms_realtime::chat::MemoryMessageStore;
use lms_realtime::config::Settings;
use lms_realtime::server::{create_app, AppState};
use lms_realtime::shutdown::shutdown_signal_handler;
use lms_realtime::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;

    let _telemetry = init_telemetry(&settings.otel, &settings.otel.service_name)?;
    tracing::info!("Configuration loaded");

    if settings.jwt.secret.is_empty() {
        bail!("jwt.secret must be set for the chat server (LMS_JWT__SECRET)");
    }

    // SQL persistence belongs to the CRUD backend; this process keeps history in memory.
    let store = Arc::new(MemoryMessageStore::new());
    let state = AppState::new(settings.clone(), store);
    tracing::info!("Application state initialized");

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(shutdown_signal_handler(shutdown_tx));

    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Chat server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    tracing::info!("Chat server shut down");
    Ok(())
}
