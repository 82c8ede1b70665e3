mod detect;
mod health;
mod root;

use crate::{model_service::ModelService, server::SharedState};
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route("/", get(root::service_info))
        .route("/health", get(health::healthcheck::<M>))
        .route("/detect", post(detect::detect::<M>))
}
