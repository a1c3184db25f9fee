//! `whisper-rs` speech model implementation.
//!
//! Keeps one Whisper context in memory for the process lifetime and runs
//! inference on blocking worker threads.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task;
use tracing::warn;
use whisper_rs::{
    get_lang_str, FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters,
};

use crate::audio::decode_to_mono_16khz_f32;
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::model::{SpeechModel, Transcript};

/// Local inference model powered by `whisper-rs`.
pub struct WhisperModel {
    model_path: String,
    context: Arc<Mutex<WhisperContext>>,
}

impl WhisperModel {
    /// Resolves the model file and loads the Whisper context.
    ///
    /// Blocks for the duration of the weight load; callers run this on a
    /// blocking worker.
    pub fn load(cfg: &AppConfig) -> Result<Self, ApiError> {
        let model_path = super::store::ensure_model_file(cfg)?;
        let params = WhisperContextParameters::default();
        let context = WhisperContext::new_with_params(&model_path, params).map_err(|err| {
            ApiError::transcription(format!("failed to load model at {model_path:?}: {err}"))
        })?;

        Ok(Self {
            model_path,
            context: Arc::new(Mutex::new(context)),
        })
    }

    /// Filesystem path of the loaded model weights.
    pub fn model_path(&self) -> &str {
        &self.model_path
    }
}

#[async_trait]
impl SpeechModel for WhisperModel {
    async fn transcribe(&self, audio: &Path) -> Result<Transcript, ApiError> {
        let audio_path = audio.to_path_buf();
        let model_path = self.model_path.clone();
        let context = Arc::clone(&self.context);
        task::spawn_blocking(move || run_whisper(&audio_path, &model_path, context))
            .await
            .map_err(|err| ApiError::transcription(format!("whisper worker task failed: {err}")))?
    }
}

fn run_whisper(
    audio_path: &Path,
    model_path: &str,
    context: Arc<Mutex<WhisperContext>>,
) -> Result<Transcript, ApiError> {
    let samples = decode_to_mono_16khz_f32(audio_path)?;

    let context_guard = context
        .lock()
        .map_err(|_| ApiError::transcription("failed to lock whisper model context"))?;

    let mut state = context_guard
        .create_state()
        .map_err(|err| ApiError::transcription(format!("failed to create whisper state: {err}")))?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    params.set_no_timestamps(false);
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);
    params.set_max_initial_ts(5.0);
    params.set_detect_language(true);

    state.full(params, &samples).map_err(|err| {
        ApiError::transcription(format!("whisper inference failed using {model_path:?}: {err}"))
    })?;

    let count = state.full_n_segments();
    let mut pieces = Vec::with_capacity(count as usize);
    for i in 0..count {
        let Some(seg) = state.get_segment(i) else {
            continue;
        };
        let text = seg
            .to_str_lossy()
            .map_err(|err| {
                ApiError::transcription(format!("failed to read segment text: {err}"))
            })?
            .trim()
            .to_string();
        if !text.is_empty() {
            pieces.push(text);
        }
    }

    let text = normalize_text(&pieces.join(" "));
    if text.is_empty() {
        warn!(
            audio_samples = samples.len(),
            segment_count = count,
            "whisper inference completed with empty transcript"
        );
    }

    let language = get_lang_str(state.full_lang_id_from_state()).map(ToOwned::to_owned);

    Ok(Transcript { text, language })
}

/// Normalizes transcript text by collapsing all whitespace runs to one space.
fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
