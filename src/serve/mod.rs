//! HTTP serving layer.
//!
//! Two endpoints, matching the long-standing client contract:
//! - `GET /train` runs the full training pipeline and always answers 200;
//!   failures (including rejection) are reported in the body as
//!   `Error Occurred! <cause>`.
//! - `POST /predict` takes raw image bytes and answers the annotated JPEG
//!   as a base64 string, or 500 with a JSON error. The classes drawn onto
//!   the image are listed in the `x-detected-classes` response header.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::Engine;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::domain::PipelineOutcome;
use crate::pipeline::prediction::class_name;
use crate::pipeline::{PredictionPipeline, TrainPipeline};
use crate::storage::StorageGateway;

const MAX_IMAGE_BYTES: usize = 32 * 1024 * 1024;

/// Response header listing the class names drawn onto the returned image,
/// comma-separated, empty when nothing cleared the score threshold.
pub const DETECTED_CLASSES_HEADER: &str = "x-detected-classes";

#[derive(Clone)]
pub struct AppState {
    config: Arc<PipelineConfig>,
    gateway: Arc<dyn StorageGateway>,
}

pub fn router(config: Arc<PipelineConfig>, gateway: Arc<dyn StorageGateway>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/train", get(train))
        .route("/predict", post(predict))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES))
        .layer(cors)
        .with_state(AppState { config, gateway })
}

/// Bind and serve until the process is stopped.
pub async fn serve(
    config: Arc<PipelineConfig>,
    gateway: Arc<dyn StorageGateway>,
) -> anyhow::Result<()> {
    let addr = config.serve_addr()?;
    let app = router(config, gateway);

    info!(%addr, "http server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// Always 200; clients parse the body prefix. Kept for compatibility.
async fn train(State(state): State<AppState>) -> (StatusCode, String) {
    let pipeline = TrainPipeline::new(Arc::clone(&state.config), Arc::clone(&state.gateway));

    let body = match pipeline.run().await {
        Ok(PipelineOutcome::Accepted { .. }) => "Training successful !!".to_string(),
        Ok(PipelineOutcome::Rejected { reason, .. }) => {
            info!(reason, "training run rejected");
            format!("Error Occurred! {reason}")
        }
        Err(err) => {
            error!(error = %err, "training pipeline failed");
            format!("Error Occurred! {err}")
        }
    };

    (StatusCode::OK, body)
}

async fn predict(State(state): State<AppState>, body: Bytes) -> Response {
    let pipeline = PredictionPipeline::new(Arc::clone(&state.config), Arc::clone(&state.gateway));

    match pipeline.run(&body).await {
        Ok(prediction) => {
            let classes: Vec<String> = prediction
                .detections
                .iter()
                .map(|d| class_name(d.label))
                .collect();
            let encoded = base64::engine::general_purpose::STANDARD.encode(prediction.jpeg);
            (
                StatusCode::OK,
                [(DETECTED_CLASSES_HEADER, classes.join(","))],
                encoded,
            )
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "prediction failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}
