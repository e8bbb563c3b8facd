//! Coffee Defect Inference Server
//!
//! HTTP API around a loaded `Predictor`: a health probe and a multipart
//! image classification endpoint.

pub mod error;
pub mod routes;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use state::{AppState, ServerConfig, SharedState};

/// Routes plus the body, time and concurrency limits from `state.config`
pub fn build_router(state: SharedState) -> Router {
    let config = state.config.clone();

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/predict", post(routes::predict::predict))
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(GlobalConcurrencyLimitLayer::new(config.max_concurrency.max(1)))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use serde_json::Value;
    use tower::ServiceExt;

    use coffee_defect::backend::InferenceBackend;
    use coffee_defect::model::Architecture;
    use coffee_defect::{CoffeeClassifier, Predictor, CLASS_NAMES, NUM_CLASSES};

    const BOUNDARY: &str = "coffee-test-boundary";

    fn test_state(config: ServerConfig) -> SharedState {
        let device = Default::default();
        let model = CoffeeClassifier::<InferenceBackend>::new(Architecture::MobileNetV3, NUM_CLASSES, &device);
        let class_names = CLASS_NAMES.iter().map(|s| s.to_string()).collect();
        let predictor = Predictor::new(model, class_names, device).unwrap().with_image_size(32);
        Arc::new(AppState::new(predictor, config))
    }

    fn app() -> Router {
        build_router(test_state(ServerConfig::default()))
    }

    fn multipart_body(field: &str, content: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"bean.png\"\r\n",
                field
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn predict_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(48, 48, Rgb([110, 85, 50])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_ok_with_rfc3339_timestamp() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
        let timestamp = json["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_predict_without_file_field_is_bad_request() {
        let response = app()
            .oneshot(predict_request(multipart_body("image", &png_bytes())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = json_body(response).await;
        assert_eq!(json["error"], "no file");
    }

    #[tokio::test]
    async fn test_predict_rejects_non_image() {
        let response = app()
            .oneshot(predict_request(multipart_body("file", b"not an image at all")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = json_body(response).await;
        assert!(json["error"].as_str().unwrap().starts_with("invalid image"));
    }

    #[tokio::test]
    async fn test_predict_rejects_non_multipart_body() {
        let request = Request::builder()
            .method("POST")
            .uri("/predict")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());

        let json = json_body(response).await;
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_predict_returns_registered_class() {
        let response = app()
            .oneshot(predict_request(multipart_body("file", &png_bytes())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        let class_id = json["class_id"].as_u64().unwrap() as usize;
        assert!(class_id < NUM_CLASSES);
        assert_eq!(json["class_name"], CLASS_NAMES[class_id]);
        let confidence = json["confidence"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&confidence));
    }

    #[tokio::test]
    async fn test_request_waiting_for_inference_slot_times_out() {
        let config = ServerConfig {
            max_concurrency: 1,
            request_timeout: Duration::from_millis(200),
            ..ServerConfig::default()
        };
        let state = test_state(config);
        let app = build_router(state.clone());

        let busy = state.inference_permits.clone().try_acquire_owned().unwrap();
        let response = app
            .clone()
            .oneshot(predict_request(multipart_body("file", &png_bytes())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(state.inference_permits.available_permits(), 0);

        drop(busy);
        let response = app
            .oneshot(predict_request(multipart_body("file", &png_bytes())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.inference_permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_inference_permits_follow_max_concurrency() {
        let config = ServerConfig {
            max_concurrency: 3,
            ..ServerConfig::default()
        };
        assert_eq!(test_state(config).inference_permits.available_permits(), 3);

        let config = ServerConfig {
            max_concurrency: 0,
            ..ServerConfig::default()
        };
        assert_eq!(test_state(config).inference_permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let config = ServerConfig {
            max_body_bytes: 1024,
            ..ServerConfig::default()
        };
        let app = build_router(test_state(config));
        let response = app
            .oneshot(predict_request(multipart_body("file", &vec![0u8; 64 * 1024])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
