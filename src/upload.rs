//! Upload acceptance policy and scoped temporary storage.
//!
//! An upload is accepted when either signal indicates audio: the declared
//! MIME type or the filename extension. Accepted bytes are staged in a
//! named temporary file that is removed on every exit path.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::ApiError;

/// File extensions accepted by upload validation.
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "flac", "ogg", "webm"];

/// Returns the lowercased filename extension, if any.
pub fn file_extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.trim().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Decides whether an upload should be treated as audio.
///
/// Either signal alone suffices: a declared MIME type starting with
/// `audio/`, or a filename extension in [`ALLOWED_EXTENSIONS`]. A
/// mislabeled MIME type with a valid extension still passes.
pub fn is_audio_upload(filename: &str, content_type: Option<&str>) -> bool {
    if content_type
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("audio/"))
        .unwrap_or(false)
    {
        return true;
    }

    file_extension(filename)
        .map(|ext| ALLOWED_EXTENSIONS.iter().any(|allowed| *allowed == ext))
        .unwrap_or(false)
}

/// Maps an audio MIME type to a filename extension.
///
/// Container probing keys off the file extension, so audio accepted on
/// the MIME signal alone still needs a plausible suffix.
fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "audio/aac" => Some("m4a"),
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/ogg" | "audio/vorbis" => Some("ogg"),
        "audio/webm" => Some("webm"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        _ => None,
    }
}

/// Picks the temp-file suffix for an upload, dot included.
///
/// Prefers the filename extension; falls back to the MIME subtype when
/// the filename carries none.
pub fn temp_suffix(filename: &str, content_type: Option<&str>) -> Option<String> {
    if let Some(ext) = file_extension(filename) {
        return Some(format!(".{ext}"));
    }
    content_type
        .and_then(extension_for_mime)
        .map(|ext| format!(".{ext}"))
}

/// Request-scoped temporary audio file.
///
/// Created, used, and removed within one request. [`ScopedAudioFile::cleanup`]
/// removes the file and logs removal failures without surfacing them; the
/// `Drop` impl of the inner handle covers early returns and panics.
pub struct ScopedAudioFile {
    file: Option<NamedTempFile>,
}

impl ScopedAudioFile {
    /// Writes `bytes` to a fresh temp file with the given suffix.
    pub fn create(bytes: &[u8], suffix: Option<&str>) -> Result<Self, ApiError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("upload-");
        if let Some(suffix) = suffix {
            builder.suffix(suffix);
        }

        let mut file = builder
            .tempfile()
            .map_err(|err| ApiError::internal(format!("failed to create temp file: {err}")))?;
        file.write_all(bytes)
            .map_err(|err| ApiError::internal(format!("failed to write temp file: {err}")))?;

        Ok(Self { file: Some(file) })
    }

    /// Path handed to the model for the duration of the request.
    pub fn path(&self) -> &Path {
        self.file
            .as_ref()
            .map(NamedTempFile::path)
            .unwrap_or_else(|| Path::new(""))
    }

    /// Removes the temp file, logging (never surfacing) removal failures.
    pub fn cleanup(mut self) {
        if let Some(file) = self.file.take() {
            let path = file.path().to_path_buf();
            if let Err(err) = file.close() {
                warn!(path = %path.display(), error = %err, "failed to clean up temp file");
            }
        }
    }
}
