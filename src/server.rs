use crate::{
    config::ServerConfig, detection::DetectionHandler, model_service::ModelService,
    routes::api_routes,
};
use axum::{extract::DefaultBodyLimit, Router};
use std::{future::Future, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub struct SharedState<M: ModelService> {
    pub detection_handler: DetectionHandler<M>,
    pub deployment_time: Arc<str>,
}

impl<M: ModelService> Clone for SharedState<M> {
    fn clone(&self) -> Self {
        Self {
            detection_handler: self.detection_handler.clone(),
            deployment_time: self.deployment_time.clone(),
        }
    }
}

pub fn create_router<M: ModelService>(state: SharedState<M>, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api_routes::<M>()
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(
        state: SharedState<M>,
        config: &ServerConfig,
    ) -> anyhow::Result<Self> {
        let addr = config.get_address();
        let router = create_router(state, config.max_body_bytes);
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        tracing::info!("Starting server on {}", self.listener.local_addr()?);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
