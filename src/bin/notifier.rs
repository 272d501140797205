use anyhow::{bail, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use lms_realtime::api::{notifier_routes, NotifierState};
use lms_realtime::config::Settings;
use lms_realtime::queue::create_task_queue;
use lms_realtime::shutdown::shutdown_signal_handler;
use lms_realtime::telemetry::init_telemetry;
use lms_realtime::worker::{DispatcherConfig, HandlerRegistry, TaskDispatcher};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;

    let service_name = format!("{}-notifier", settings.otel.service_name);
    let _telemetry = init_telemetry(&settings.otel, &service_name)?;
    tracing::info!("Configuration loaded");

    if settings.queue.is_process_local() {
        bail!("queue.backend = \"memory\" cannot receive tasks from other processes; use redis");
    }

    let queue = create_task_queue(&settings)?;
    let registry = HandlerRegistry::with_defaults(settings.notifier.email_delay());
    let dispatcher = TaskDispatcher::new(
        queue,
        registry,
        DispatcherConfig::from(&settings.notifier),
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let addr = settings.notifier_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Notifier health and metrics listening on {}", addr);

    // Workers and the listener subscribe before the signal handler can fire.
    let handle = dispatcher.start(&shutdown_tx);
    let mut http_shutdown = shutdown_tx.subscribe();
    let app = notifier_routes(NotifierState::new(dispatcher.clone()));
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.recv().await;
            })
            .await
    });
    tokio::spawn(shutdown_signal_handler(shutdown_tx));

    handle.join().await;
    match server.await {
        Ok(Err(e)) => tracing::error!(error = %e, "Notifier HTTP listener failed"),
        Err(e) => tracing::error!(error = %e, "Notifier HTTP task terminated abnormally"),
        Ok(Ok(())) => {}
    }

    tracing::info!(stats = ?dispatcher.stats(), "Notifier shut down");
    Ok(())
}
