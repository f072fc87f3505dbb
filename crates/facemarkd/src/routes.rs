use crate::error::ApiError;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use facemark_core::{Catalog, Descriptor, FaceProvider, MatchResult, RecognitionSession};
use facemark_store::CatalogService;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{self, TraceLayer},
};
use tracing::Level;

pub type Session = RecognitionSession<Box<dyn FaceProvider>>;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub catalog: CatalogService,
    pub session: Option<Session>,
}

pub fn router(state: AppState, public_dir: &Path, max_upload_bytes: usize) -> Router {
    let images = ServeDir::new(state.catalog.assets().root());

    Router::new()
        .route("/upload", post(upload))
        .route("/catalog", get(list_catalog))
        .route("/status", get(status))
        .route("/session/reload", post(reload_session))
        .route("/match", post(match_descriptor))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
        .nest_service("/images", images)
        .fallback_service(ServeDir::new(public_dir))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
    pub label: String,
}

/// `POST /upload`: the first multipart part carrying a filename is the image.
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        let Some(original) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await?;
        let receipt = state.catalog.upload(&bytes, &original).await?;

        return Ok(Json(UploadResponse {
            message: "Image uploaded successfully!".to_string(),
            filename: receipt.saved_filename,
            label: receipt.label,
        }));
    }

    Err(ApiError::BadRequest("upload contains no image file".to_string()))
}

async fn list_catalog(State(state): State<AppState>) -> Result<Json<Catalog>, ApiError> {
    Ok(Json(state.catalog.snapshot().await?))
}

async fn status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = state.catalog.snapshot().await?.len();
    let session = match &state.session {
        Some(session) => json!({
            "enabled": true,
            "labels": session.references().len(),
            "threshold": session.threshold(),
        }),
        None => json!({ "enabled": false }),
    };

    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "catalog_entries": entries,
        "session": session,
    })))
}

/// `POST /session/reload`: rebuild the reference set from the current catalog.
async fn reload_session(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state.session.clone().ok_or(ApiError::SessionDisabled)?;
    let summary = reload(&state.catalog, session).await?;
    Ok(Json(summary))
}

/// Snapshot the catalog and rebuild the session's reference set off the async runtime.
pub async fn reload(catalog: &CatalogService, session: Session) -> Result<serde_json::Value, ApiError> {
    let _reloading = session.reload_guard().await;
    let snapshot = catalog.snapshot().await?;
    let assets = catalog.assets().clone();

    let builder = session.clone();
    let summary = tokio::task::spawn_blocking(move || builder.reload(&snapshot, &assets))
        .await
        .map_err(|e| ApiError::Internal(format!("reference build aborted: {e}")))?;

    let skipped: Vec<_> = summary
        .skipped
        .iter()
        .map(|s| json!({ "label": s.label, "filename": s.filename, "reason": s.reason.to_string() }))
        .collect();

    Ok(json!({ "labels": summary.labels, "skipped": skipped }))
}

#[derive(Debug, Deserialize)]
struct MatchRequest {
    descriptor: Descriptor,
}

/// `POST /match`: identify a descriptor computed by the client.
async fn match_descriptor(
    State(state): State<AppState>,
    Json(request): Json<MatchRequest>,
) -> Result<Json<MatchResult>, ApiError> {
    let session = state.session.as_ref().ok_or(ApiError::SessionDisabled)?;
    if request.descriptor.is_empty() {
        return Err(ApiError::BadRequest("descriptor is empty".to_string()));
    }
    Ok(Json(session.identify(&request.descriptor)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use facemark_core::{BoundingBox, DetectionResult, Frame, ProviderError};
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "facemark-test-boundary";

    /// Descriptor = [red / 255] of the first pixel.
    struct ColourProvider;

    impl FaceProvider for ColourProvider {
        fn load_models(&mut self, _: &Path) -> Result<(), ProviderError> {
            Ok(())
        }

        fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<DetectionResult>, ProviderError> {
            let red = frame.data.first().copied().unwrap_or(0);
            if red == 0 {
                return Ok(Vec::new());
            }
            Ok(vec![DetectionResult {
                bounding_box: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 1.0 },
                landmarks: Vec::new(),
                descriptor: Descriptor::new(vec![red as f32 / 255.0]),
                age: None,
                gender: None,
                gender_probability: None,
            }])
        }
    }

    fn png(red: u8) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        RgbImage::from_pixel(2, 2, image::Rgb([red, 0, 0]))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    async fn app(dir: &TempDir, with_session: bool) -> Router {
        let public = dir.path().join("public");
        let catalog = CatalogService::open(public.join("imageList.json"), public.join("images"))
            .await
            .unwrap();
        let session = with_session.then(|| {
            let provider: Box<dyn FaceProvider> = Box::new(ColourProvider);
            RecognitionSession::new(provider, 0.6).unwrap()
        });
        router(AppState { catalog, session }, &public, 1024 * 1024)
    }

    fn multipart_request(filename: &str, bytes: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::post("/upload")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(uri: &str, value: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_duplicate() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, false).await;

        let response = app.clone().oneshot(multipart_request("alice.jpg", b"jpeg")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Image uploaded successfully!");
        assert_eq!(body["label"], "alice");
        let saved = body["filename"].as_str().unwrap().to_string();

        let response = app.clone().oneshot(multipart_request("alice.png", b"png")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["message"].as_str().unwrap().contains("alice"));

        let response = app
            .oneshot(Request::get("/catalog").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            json!([{ "filename": saved, "label": "alice" }])
        );
    }

    #[tokio::test]
    async fn test_uploaded_image_is_served() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, false).await;

        let response = app.clone().oneshot(multipart_request("bob.png", &png(9))).await.unwrap();
        let saved = body_json(response).await["filename"].as_str().unwrap().to_string();

        let response = app
            .oneshot(Request::get(format!("/images/{saved}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), png(9).as_slice());
    }

    #[tokio::test]
    async fn test_upload_without_file_part() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, false).await;

        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{BOUNDARY}--\r\n"
        );
        let request = Request::post("/upload")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_corrupt_catalog_is_server_error() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, false).await;
        std::fs::write(dir.path().join("public").join("imageList.json"), "{oops").unwrap();

        let response = app.oneshot(multipart_request("carol.jpg", b"jpeg")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_json(response).await["message"].is_string());
    }

    #[tokio::test]
    async fn test_session_endpoints_disabled_without_provider() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, false).await;

        let response = app
            .clone()
            .oneshot(json_request("/match", json!({ "descriptor": [0.1] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app
            .oneshot(Request::post("/session/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_reload_then_match() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, true).await;

        for (name, red) in [("alice.png", 51u8), ("bob.png", 204), ("wall.png", 0)] {
            let response = app.clone().oneshot(multipart_request(name, &png(red))).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(Request::post("/session/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["labels"], 2);
        assert_eq!(body["skipped"][0]["label"], "wall");
        assert_eq!(body["skipped"][0]["reason"], "no face detected");

        let response = app
            .clone()
            .oneshot(json_request("/match", json!({ "descriptor": [0.25] })))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["label"], "alice");
        assert_eq!(body["matched"], true);

        let response = app
            .clone()
            .oneshot(json_request("/match", json!({ "descriptor": [-5.0] })))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["label"], "unknown");

        let response = app
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["catalog_entries"], 3);
        assert_eq!(body["session"]["labels"], 2);
    }

    #[tokio::test]
    async fn test_queued_reload_sees_later_upload() {
        let dir = TempDir::new().unwrap();
        let public = dir.path().join("public");
        let catalog = CatalogService::open(public.join("imageList.json"), public.join("images"))
            .await
            .unwrap();
        let provider: Box<dyn FaceProvider> = Box::new(ColourProvider);
        let session = RecognitionSession::new(provider, 0.6).unwrap();
        catalog.upload(&png(51), "alice.png").await.unwrap();

        let held = session.reload_guard().await;
        let pending = tokio::spawn({
            let catalog = catalog.clone();
            let session = session.clone();
            async move { reload(&catalog, session).await.unwrap() }
        });
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(!pending.is_finished());

        catalog.upload(&png(204), "bob.png").await.unwrap();
        drop(held);

        let summary = pending.await.unwrap();
        assert_eq!(summary["labels"], 2);
        assert!(session.references().contains_label("bob"));
    }

    #[tokio::test]
    async fn test_match_rejects_empty_descriptor() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, true).await;
        let response = app
            .oneshot(json_request("/match", json!({ "descriptor": [] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
