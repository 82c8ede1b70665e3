use crate::{
    annotate::Annotator,
    config::Config,
    detection::DetectionHandler,
    model_loader::load_model,
    server::{HttpServer, SharedState},
};
use std::sync::Arc;
use tokio::signal;

const UNKNOWN_DEPLOYMENT_TIME: &str = "unknown";

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let model = load_model(&config.model);
    if model.is_none() {
        tracing::warn!("Starting without a model, /detect will fail until restarted");
    }

    let annotator = Annotator::new()?;
    let detection_handler =
        DetectionHandler::new(model, annotator, config.annotation.jpeg_quality);

    let state = SharedState {
        detection_handler,
        deployment_time: Arc::from(
            config
                .deployment_time
                .as_deref()
                .unwrap_or(UNKNOWN_DEPLOYMENT_TIME),
        ),
    };

    let server = HttpServer::new(state, &config.server).await?;

    server
        .run(async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown");
        })
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
