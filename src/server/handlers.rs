use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{info, warn};

use super::models::{ProcessScreenshotRequest, ProcessScreenshotResponse};
use super::state::ServerState;
use crate::cancel::Cancellation;
use crate::models::{PipelineResult, PipelineStatus, TranslationRequest};

pub fn router(state: ServerState) -> Router {
    let body_limit = state.body_limit;
    Router::new()
        .route("/health", get(health))
        .route("/process-screenshot", post(process_screenshot))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(cors_middleware))
}

pub async fn run_server(state: ServerState, addr: String) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind server address: {}", addr))?;
    info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
}

async fn process_screenshot(
    State(state): State<ServerState>,
    payload: Result<Json<ProcessScreenshotRequest>, JsonRejection>,
) -> (StatusCode, Json<ProcessScreenshotResponse>) {
    let (status, response) = match payload {
        Ok(Json(payload)) => handle_request(state, payload).await,
        Err(rejection) => reject_body(&rejection),
    };
    (status, Json(response))
}

/// Unreadable bodies get the same envelope as validation failures. Oversized bodies keep
/// 413, everything else is a 400.
fn reject_body(rejection: &JsonRejection) -> (StatusCode, ProcessScreenshotResponse) {
    let status = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        StatusCode::PAYLOAD_TOO_LARGE
    } else {
        StatusCode::BAD_REQUEST
    };
    warn!("rejected request body: {}", rejection.body_text());
    (
        status,
        ProcessScreenshotResponse::rejected(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )),
    )
}

/// Validates the payload, runs the pipeline on a blocking thread and maps the result
/// status to an HTTP status.
pub(crate) async fn handle_request(
    state: ServerState,
    payload: ProcessScreenshotRequest,
) -> (StatusCode, ProcessScreenshotResponse) {
    let request = match validate_request(&state, payload) {
        Ok(request) => request,
        Err(message) => {
            warn!("rejected request: {}", message);
            return (
                StatusCode::BAD_REQUEST,
                ProcessScreenshotResponse::rejected(message),
            );
        }
    };

    let pipeline = state.pipeline.clone();
    let handle = tokio::runtime::Handle::current();
    let result = tokio::task::spawn_blocking(move || {
        handle.block_on(async move { pipeline.run(&request, &Cancellation::never()).await })
    })
    .await;

    match result {
        Ok(result) => respond(result),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ProcessScreenshotResponse::rejected(format!("server task failed: {}", err)),
        ),
    }
}

fn validate_request(
    state: &ServerState,
    payload: ProcessScreenshotRequest,
) -> Result<TranslationRequest, String> {
    let image = payload
        .image
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| "Image is required".to_string())?;
    let target_lang = payload
        .target_language
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| "Target language is required".to_string())?;
    let bytes = decode_image(image).ok_or_else(|| "Image is not valid base64".to_string())?;

    let min_confidence = payload
        .min_confidence_threshold
        .unwrap_or(state.defaults.min_confidence);
    if !(0.0..=1.0).contains(&min_confidence) {
        return Err("Minimum confidence threshold must be between 0 and 1".to_string());
    }

    let source_lang = payload
        .source_language
        .filter(|value| !value.trim().eq_ignore_ascii_case("auto"));
    let mut request = TranslationRequest::new(bytes, target_lang).with_source_lang(source_lang);
    request.filter_low_confidence = payload
        .filter_low_confidence_results
        .unwrap_or(state.defaults.filter_low_confidence);
    request.min_confidence = min_confidence;
    Ok(request)
}

fn decode_image(value: &str) -> Option<Vec<u8>> {
    let encoded = match value.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => value,
    };
    BASE64
        .decode(encoded.trim())
        .ok()
        .filter(|bytes| !bytes.is_empty())
}

fn respond(result: PipelineResult) -> (StatusCode, ProcessScreenshotResponse) {
    let status = match result.status {
        PipelineStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
        PipelineStatus::Success | PipelineStatus::Warning => StatusCode::OK,
    };
    let response = ProcessScreenshotResponse {
        status: result.status,
        translated_text: result.translated_text,
        image_with_overlay: result.image.map(|bytes| BASE64.encode(bytes)),
        error_message: result.message,
        details: Some(result.details),
    };
    (status, response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{MockRecognizer, RecognizerImpl};
    use crate::overlay::{OverlayImpl, PassthroughOverlay};
    use crate::pipeline::Pipeline;
    use crate::settings::Settings;
    use crate::translator::{MockTranslator, TranslatorImpl};
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn state(max_elements: usize) -> ServerState {
        let pipeline = Pipeline::new(
            RecognizerImpl::Mock(MockRecognizer::default().with_max_elements(max_elements)),
            TranslatorImpl::Mock(MockTranslator),
            OverlayImpl::Passthrough(PassthroughOverlay),
        );
        ServerState::new(pipeline, Settings::default().pipeline)
    }

    fn png_base64(width: u32, height: u32) -> String {
        let image = RgbaImage::from_pixel(width, height, Rgba([240, 240, 240, 255]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode");
        BASE64.encode(bytes)
    }

    fn payload(image: Option<String>, lang: Option<&str>) -> ProcessScreenshotRequest {
        ProcessScreenshotRequest {
            image,
            target_language: lang.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_fields_are_bad_requests() {
        let (status, response) = handle_request(state(2), payload(None, Some("es"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.error_message.as_deref(), Some("Image is required"));

        let (status, response) =
            handle_request(state(2), payload(Some(png_base64(4, 4)), Some(" "))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            response.error_message.as_deref(),
            Some("Target language is required")
        );
    }

    #[tokio::test]
    async fn invalid_base64_and_threshold_are_bad_requests() {
        let (status, response) =
            handle_request(state(2), payload(Some("not base64!".to_string()), Some("es"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            response.error_message.as_deref(),
            Some("Image is not valid base64")
        );

        let mut request = payload(Some(png_base64(4, 4)), Some("es"));
        request.min_confidence_threshold = Some(1.5);
        let (status, response) = handle_request(state(2), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.status, PipelineStatus::Error);
        assert!(response.details.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn successful_request_returns_overlay_and_details() {
        let (status, response) =
            handle_request(state(2), payload(Some(png_base64(400, 200)), Some("es"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.status, PipelineStatus::Success);
        assert!(response.image_with_overlay.is_some());
        let details = response.details.expect("details");
        assert_eq!(details.detected_element_count, 2);
        assert_eq!(details.target_language, "es");
        assert_eq!(response.translated_text.lines().count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn data_url_with_no_text_is_a_warning() {
        let image = format!("data:image/png;base64,{}", png_base64(400, 200));
        let (status, response) = handle_request(state(0), payload(Some(image), Some("fr"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.status, PipelineStatus::Warning);
        assert_eq!(response.image_with_overlay, Some(png_base64(400, 200)));
    }

    async fn spawn_server(state: ServerState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router(state)).await;
        });
        format!("http://{}/process-screenshot", addr)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn mistyped_field_gets_json_envelope() {
        let url = spawn_server(state(2)).await;
        let response = reqwest::Client::new()
            .post(&url)
            .json(&serde_json::json!({
                "image": png_base64(4, 4),
                "targetLanguage": "es",
                "minConfidenceThreshold": "high",
            }))
            .send()
            .await
            .expect("send");
        assert_eq!(response.status().as_u16(), 400);
        let body: serde_json::Value = response.json().await.expect("json");
        assert_eq!(body["status"], "error");
        assert!(
            body["errorMessage"]
                .as_str()
                .expect("message")
                .starts_with("Invalid request body")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn body_limit_is_configurable_and_reported_as_json() {
        let url = spawn_server(state(2).with_body_limit(1024)).await;
        let response = reqwest::Client::new()
            .post(&url)
            .json(&serde_json::json!({
                "image": "A".repeat(4096),
                "targetLanguage": "es",
            }))
            .send()
            .await
            .expect("send");
        assert_eq!(response.status().as_u16(), 413);
        let body: serde_json::Value = response.json().await.expect("json");
        assert_eq!(body["status"], "error");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn default_limit_accepts_full_screen_screenshots() {
        let url = spawn_server(state(2)).await;
        let image = "!".repeat(12 * 1024 * 1024);
        let response = reqwest::Client::new()
            .post(&url)
            .json(&serde_json::json!({ "image": image, "targetLanguage": "es" }))
            .send()
            .await
            .expect("send");
        assert_eq!(response.status().as_u16(), 400);
        let body: serde_json::Value = response.json().await.expect("json");
        assert_eq!(body["errorMessage"], "Image is not valid base64");
    }

    #[test]
    fn response_serializes_camel_case() {
        let value = serde_json::to_value(ProcessScreenshotResponse::rejected("Image is required"))
            .expect("serialize");
        assert_eq!(value["status"], "error");
        assert_eq!(value["errorMessage"], "Image is required");
        assert!(value.get("imageWithOverlay").is_none());
    }
}
