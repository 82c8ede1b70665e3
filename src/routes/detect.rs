use crate::{
    detection::{DetectError, DetectionResult},
    model_service::ModelService,
    server::SharedState,
};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::instrument;

const IMAGE_FIELD: &str = "image";

impl IntoResponse for DetectError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            DetectError::ServerNotReady => {
                tracing::error!("Model is not loaded");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            DetectError::MissingInput => (StatusCode::BAD_REQUEST, self.to_string()),
            DetectError::UploadTooLarge(_) => {
                tracing::warn!("Rejected /detect upload: {}", self);
                (StatusCode::PAYLOAD_TOO_LARGE, "Image file too large".to_string())
            }
            DetectError::Upload(_)
            | DetectError::Decode(_)
            | DetectError::Inference(_)
            | DetectError::Encode(_)
            | DetectError::Task(_) => {
                tracing::error!("Exception in /detect: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn upload_error(e: MultipartError) -> DetectError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        DetectError::UploadTooLarge(e.body_text())
    } else {
        DetectError::Upload(e.body_text())
    }
}

/// First `image` file part of the form. Text parts named `image` are
/// skipped, so `Ok(None)` means no file was uploaded under that name.
async fn read_image_field(mut multipart: Multipart) -> Result<Option<Vec<u8>>, DetectError> {
    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        if field.name() != Some(IMAGE_FIELD) || field.file_name().is_none() {
            continue;
        }
        let data = field.bytes().await.map_err(upload_error)?;
        return Ok(Some(data.to_vec()));
    }
    Ok(None)
}

#[instrument(skip(state, multipart))]
pub async fn detect<M: ModelService>(
    State(state): State<SharedState<M>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectionResult>, DetectError> {
    tracing::info!("/detect endpoint called");

    let handler = state.detection_handler.clone();
    if !handler.is_ready() {
        return Err(DetectError::ServerNotReady);
    }

    let image_bytes = match multipart {
        Ok(multipart) => read_image_field(multipart).await?,
        Err(rejection) => {
            tracing::warn!("Request is not a multipart form: {}", rejection);
            None
        }
    };

    let result = tokio::task::spawn_blocking(move || handler.detect(image_bytes.as_deref()))
        .await
        .map_err(|e| DetectError::Task(e.to_string()))??;

    tracing::info!("Detected {} objects", result.detections.len());
    Ok(Json(result))
}
