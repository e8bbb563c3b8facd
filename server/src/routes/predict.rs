//! Prediction endpoint

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    Json,
};
use tracing::{debug, info};

use coffee_defect::Prediction;

use crate::error::ApiError;
use crate::state::SharedState;

/// Multipart field carrying the image
pub const FILE_FIELD: &str = "file";

/// POST /predict - classify the image uploaded as multipart field `file`
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Prediction>, ApiError> {
    let mut multipart = multipart?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            let file_name = field.file_name().map(str::to_string);
            let bytes = field.bytes().await?;
            debug!("Received {:?} ({} bytes)", file_name, bytes.len());
            upload = Some(bytes);
            break;
        }
    }
    let bytes = upload.ok_or(ApiError::NoFile)?;

    // Owned by the blocking job, which outlives a timed-out request
    let permit = state
        .inference_permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| ApiError::Internal(format!("inference pool closed: {}", e)))?;

    let predictor = state.predictor();
    let job = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        predictor.predict_bytes(&bytes)
    });
    let prediction = job
        .await
        .map_err(|e| ApiError::Internal(format!("inference worker failed: {}", e)))??;

    info!(
        "Predicted {} (id {}, confidence {:.4})",
        prediction.class_name, prediction.class_id, prediction.confidence
    );
    Ok(Json(prediction))
}
