use axum::{response::IntoResponse, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct ServiceInfo {
    message: &'static str,
    version: &'static str,
    endpoints: [&'static str; 2],
}

pub async fn service_info() -> impl IntoResponse {
    Json(ServiceInfo {
        message: "Safety Detection API",
        version: "1.0",
        endpoints: ["/detect", "/health"],
    })
}
