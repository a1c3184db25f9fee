//! HTTP API surface of the transcription service.
//!
//! This module owns request parsing, input validation, and response
//! formatting while delegating inference to the shared speech model.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::error::ApiError;
use crate::model::ModelCell;
use crate::upload::{is_audio_upload, temp_suffix, ScopedAudioFile};

/// Human-readable service name returned by the root endpoint.
pub const APP_NAME: &str = "Audio Transcription API";

/// Maximum accepted upload size in bytes (50 MB).
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared state injected into all route handlers.
pub struct AppState {
    /// Lazily initialized process-wide speech model.
    pub model: ModelCell,
}

impl AppState {
    /// Constructs shared handler state.
    pub fn new(model: ModelCell) -> Self {
        Self { model }
    }
}

/// Builds the Axum router for all public endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/transcribe", post(transcribe))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Root status endpoint (`GET /`).
async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": APP_NAME,
        "status": "running",
    }))
}

/// Liveness endpoint (`GET /health`).
///
/// Reports whether the model handle has been initialized without
/// triggering a load.
async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "model_loaded": state.model.is_loaded(),
    }))
}

/// Successful transcription response body.
#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    filename: String,
    transcription: String,
    language: String,
    success: bool,
}

struct UploadedAudio {
    filename: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// Handles audio transcription requests (`POST /api/transcribe`).
async fn transcribe(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<TranscriptionResponse>, ApiError> {
    let upload = parse_upload_form(&mut multipart).await?;

    if upload.bytes.is_empty() {
        return Err(ApiError::invalid_request("File is empty"));
    }
    if !is_audio_upload(&upload.filename, upload.content_type.as_deref()) {
        return Err(ApiError::invalid_request(
            "Invalid file type. Please upload an audio file (MP3, WAV, M4A, FLAC, OGG, WEBM)",
        ));
    }

    info!(filename = %upload.filename, bytes = upload.bytes.len(), "processing upload");

    let model = state.model.get_or_load().await?;

    let suffix = temp_suffix(&upload.filename, upload.content_type.as_deref());
    let staged = ScopedAudioFile::create(&upload.bytes, suffix.as_deref())?;

    let result = model.transcribe(staged.path()).await;
    staged.cleanup();
    let transcript = result?;

    info!(filename = %upload.filename, "transcription completed");

    Ok(Json(TranscriptionResponse {
        filename: upload.filename,
        transcription: transcript.text,
        language: transcript
            .language
            .unwrap_or_else(|| "unknown".to_string()),
        success: true,
    }))
}

/// Parses the multipart form and extracts the `file` field.
///
/// Fields other than `file` are ignored.
async fn parse_upload_form(multipart: &mut Multipart) -> Result<UploadedAudio, ApiError> {
    let mut upload: Option<UploadedAudio> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_multipart(format!("invalid multipart body: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().map(ToOwned::to_owned).unwrap_or_default();
        let content_type = field.content_type().map(ToOwned::to_owned);
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_multipart(format!("failed to read file bytes: {err}")))?;

        upload = Some(UploadedAudio {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    upload.ok_or_else(|| ApiError::invalid_request("No file uploaded"))
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::error::ApiError;
    use crate::model::{ModelCell, SpeechModel, Transcript};

    use super::{build_router, AppState};

    #[derive(Default)]
    struct SeenAudio {
        path: Option<PathBuf>,
        existed_during_call: bool,
    }

    struct MockModel {
        language: Option<String>,
        fail: bool,
        seen: Arc<Mutex<SeenAudio>>,
    }

    impl MockModel {
        fn new(language: Option<&str>, fail: bool) -> (Arc<Self>, Arc<Mutex<SeenAudio>>) {
            let seen = Arc::new(Mutex::new(SeenAudio::default()));
            let model = Arc::new(Self {
                language: language.map(ToOwned::to_owned),
                fail,
                seen: Arc::clone(&seen),
            });
            (model, seen)
        }
    }

    #[async_trait]
    impl SpeechModel for MockModel {
        async fn transcribe(&self, audio: &Path) -> Result<Transcript, ApiError> {
            {
                let mut seen = self.seen.lock().expect("seen lock");
                seen.path = Some(audio.to_path_buf());
                seen.existed_during_call = audio.exists();
            }
            if self.fail {
                return Err(ApiError::transcription("mock decode exploded"));
            }
            Ok(Transcript {
                text: "hello world".to_string(),
                language: self.language.clone(),
            })
        }
    }

    fn app_with(model: Arc<MockModel>) -> axum::Router {
        let cell = ModelCell::with_loader(Box::new(move || {
            let model = Arc::clone(&model);
            Box::pin(async move { Ok(model as Arc<dyn SpeechModel>) })
        }));
        build_router(Arc::new(AppState::new(cell)))
    }

    fn multipart_request(filename: &str, content_type: &str, payload: &[u8]) -> Request<Body> {
        let boundary = "X-BOUNDARY";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .uri("/api/transcribe")
            .method("POST")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    async fn parse_json_response(res: axum::response::Response) -> Value {
        let bytes = to_bytes(res.into_body(), 1024 * 1024)
            .await
            .expect("body bytes");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn root_reports_running() {
        let (model, _) = MockModel::new(Some("en"), false);
        let app = app_with(model);

        let req = Request::builder()
            .uri("/")
            .method("GET")
            .body(Body::empty())
            .expect("request");
        let res = app.oneshot(req).await.expect("response");
        assert_eq!(res.status(), StatusCode::OK);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["message"], "Audio Transcription API");
        assert_eq!(payload["status"], "running");
    }

    #[tokio::test]
    async fn health_reports_model_loaded_after_first_transcription() {
        let (model, _) = MockModel::new(Some("en"), false);
        let app = app_with(model);

        let health_req = || {
            Request::builder()
                .uri("/health")
                .method("GET")
                .body(Body::empty())
                .expect("request")
        };

        let res = app.clone().oneshot(health_req()).await.expect("response");
        let payload = parse_json_response(res).await;
        assert_eq!(payload["status"], "healthy");
        assert_eq!(payload["model_loaded"], false);

        let res = app
            .clone()
            .oneshot(multipart_request("clip.wav", "audio/wav", b"RIFF____WAVE"))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);

        let res = app.oneshot(health_req()).await.expect("response");
        let payload = parse_json_response(res).await;
        assert_eq!(payload["model_loaded"], true);
    }

    #[tokio::test]
    async fn transcribe_accepts_wav_extension_despite_wrong_mime() {
        let (model, _) = MockModel::new(Some("en"), false);
        let app = app_with(model);

        let res = app
            .oneshot(multipart_request(
                "clip.wav",
                "application/octet-stream",
                b"RIFF____WAVE",
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["filename"], "clip.wav");
        assert_eq!(payload["transcription"], "hello world");
        assert_eq!(payload["language"], "en");
        assert_eq!(payload["success"], true);
    }

    #[tokio::test]
    async fn transcribe_accepts_audio_mime_without_extension() {
        let (model, seen) = MockModel::new(Some("en"), false);
        let app = app_with(model);

        let res = app
            .oneshot(multipart_request("voice", "audio/ogg", b"OggS____"))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);

        let seen = seen.lock().expect("seen lock");
        let path = seen.path.as_ref().expect("model saw a path");
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("ogg"));
    }

    #[tokio::test]
    async fn transcribe_rejects_non_audio_upload() {
        let (model, seen) = MockModel::new(Some("en"), false);
        let app = app_with(model);

        let res = app
            .oneshot(multipart_request("notes.txt", "text/plain", b"meeting notes"))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let payload = parse_json_response(res).await;
        assert!(payload["detail"]
            .as_str()
            .expect("detail string")
            .starts_with("Invalid file type"));
        assert!(seen.lock().expect("seen lock").path.is_none());
    }

    #[tokio::test]
    async fn transcribe_rejects_empty_file_regardless_of_type() {
        let (model, _) = MockModel::new(Some("en"), false);
        let app = app_with(model);

        let res = app
            .oneshot(multipart_request("clip.wav", "audio/wav", b""))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["detail"], "File is empty");
    }

    #[tokio::test]
    async fn transcribe_rejects_missing_file_field() {
        let (model, _) = MockModel::new(Some("en"), false);
        let app = app_with(model);

        let boundary = "X-BOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{b}--\r\n",
            b = boundary
        );
        let req = Request::builder()
            .uri("/api/transcribe")
            .method("POST")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("request");

        let res = app.oneshot(req).await.expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["detail"], "No file uploaded");
    }

    #[tokio::test]
    async fn temp_file_is_removed_after_success() {
        let (model, seen) = MockModel::new(Some("en"), false);
        let app = app_with(model);

        let res = app
            .oneshot(multipart_request("clip.wav", "audio/wav", b"RIFF____WAVE"))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);

        let seen = seen.lock().expect("seen lock");
        assert!(seen.existed_during_call);
        let path = seen.path.as_ref().expect("model saw a path");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn temp_file_is_removed_after_model_failure() {
        let (model, seen) = MockModel::new(None, true);
        let app = app_with(model);

        let res = app
            .oneshot(multipart_request("clip.wav", "audio/wav", b"RIFF____WAVE"))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["detail"], "Transcription failed: mock decode exploded");

        let seen = seen.lock().expect("seen lock");
        assert!(seen.existed_during_call);
        let path = seen.path.as_ref().expect("model saw a path");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn language_defaults_to_unknown_when_model_omits_it() {
        let (model, _) = MockModel::new(None, false);
        let app = app_with(model);

        let res = app
            .oneshot(multipart_request("talk.mp3", "audio/mpeg", b"ID3_____"))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["language"], "unknown");
    }
}
