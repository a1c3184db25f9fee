//! Speech model abstraction and the process-wide shared handle.
//!
//! The HTTP layer depends on the [`SpeechModel`] trait instead of a
//! concrete implementation, which keeps request handling decoupled from
//! inference code. The handle is created lazily on first use and reused
//! by every request thereafter.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::AppConfig;
use crate::error::ApiError;

pub mod store;
pub mod whisper;

/// Inference result returned by a speech model.
#[derive(Debug, Clone)]
pub struct Transcript {
    /// Transcribed text, possibly empty for silent audio.
    pub text: String,
    /// Detected language if the model reports one.
    pub language: Option<String>,
}

/// Contract implemented by speech-to-text engines.
///
/// The call is opaque and non-retriable: it either yields a transcript
/// for the audio file at `audio` or fails the request.
#[async_trait]
pub trait SpeechModel: Send + Sync {
    /// Runs inference on the audio file at `audio`.
    async fn transcribe(&self, audio: &std::path::Path) -> Result<Transcript, ApiError>;
}

/// Future produced by a model loader.
pub type LoadFuture =
    Pin<Box<dyn Future<Output = Result<Arc<dyn SpeechModel>, ApiError>> + Send>>;
/// Factory invoked at most once to initialize the shared model.
pub type ModelLoader = Box<dyn Fn() -> LoadFuture + Send + Sync>;

/// Process-wide, lazily initialized model handle.
///
/// At most one model exists per process. The first caller of
/// [`ModelCell::get_or_load`] runs the loader; concurrent and later
/// callers receive the same `Arc` without reloading. A failed load
/// leaves the cell empty so the next request can retry.
pub struct ModelCell {
    loader: ModelLoader,
    cell: OnceCell<Arc<dyn SpeechModel>>,
}

impl ModelCell {
    /// Cell that loads the configured Whisper model on first use.
    ///
    /// Loading resolves the model file (downloading it when allowed) and
    /// constructs the inference context on a blocking worker, since both
    /// steps can take seconds.
    pub fn whisper(cfg: AppConfig) -> Self {
        Self::with_loader(Box::new(move || {
            let cfg = cfg.clone();
            Box::pin(async move {
                let started = Instant::now();
                let model = tokio::task::spawn_blocking(move || whisper::WhisperModel::load(&cfg))
                    .await
                    .map_err(|err| {
                        ApiError::internal(format!("model load task failed: {err}"))
                    })??;
                info!(
                    model = %model.model_path(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "loaded whisper model"
                );
                Ok(Arc::new(model) as Arc<dyn SpeechModel>)
            })
        }))
    }

    /// Cell backed by an arbitrary loader.
    pub fn with_loader(loader: ModelLoader) -> Self {
        Self {
            loader,
            cell: OnceCell::new(),
        }
    }

    /// Returns the shared model, loading it on first call.
    pub async fn get_or_load(&self) -> Result<Arc<dyn SpeechModel>, ApiError> {
        self.cell
            .get_or_try_init(|| (self.loader)())
            .await
            .cloned()
    }

    /// Whether the model has been initialized. No side effects.
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}
