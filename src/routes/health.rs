use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
    model_loaded: bool,
    timestamp: String,
}

pub async fn healthcheck<M: ModelService>(
    State(state): State<SharedState<M>>,
) -> impl IntoResponse {
    Json(Status {
        status: "healthy".into(),
        model_loaded: state.detection_handler.is_ready(),
        timestamp: state.deployment_time.to_string(),
    })
}
