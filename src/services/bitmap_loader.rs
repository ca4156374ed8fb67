use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::RecognitionError;
use crate::models::bitmap::RawImage;

/// Decode uploaded file bytes into an RGBA frame.
///
/// Content sniffing first; if that fails the bytes are spilled to a temp
/// file named after `file_label`'s extension and decoded by path. The temp
/// file is removed when this returns on every path.
pub fn load_bitmap(bytes: &[u8], file_label: &str) -> Result<RawImage, RecognitionError> {
    let fast_err = match image::load_from_memory(bytes) {
        Ok(img) => return Ok(RawImage::new(img.to_rgba8())),
        Err(e) => e,
    };

    debug!(file_label, error = %fast_err, "In-memory decode failed, trying file decode");

    match decode_via_file(bytes, file_label) {
        Ok(image) => Ok(image),
        Err(slow_err) => {
            warn!(file_label, error = %slow_err, "File decode failed");
            Err(RecognitionError::Decode(format!(
                "{}: {}; fallback: {}",
                file_label, fast_err, slow_err
            )))
        }
    }
}

fn decode_via_file(bytes: &[u8], file_label: &str) -> Result<RawImage, String> {
    let suffix = Path::new(file_label)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| ".img".to_string());

    let mut spill = NamedTempFile::with_suffix(&suffix)
        .map_err(|e| format!("Failed to create temp file: {}", e))?;
    spill
        .write_all(bytes)
        .and_then(|_| spill.flush())
        .map_err(|e| format!("Failed to write temp file: {}", e))?;

    let img = image::open(spill.path()).map_err(|e| e.to_string())?;
    Ok(RawImage::new(img.to_rgba8()))
}

/// Decode on the blocking pool, observing `cancel`
pub async fn load_bitmap_async(
    bytes: Vec<u8>,
    file_label: String,
    cancel: &CancelToken,
) -> Result<RawImage, RecognitionError> {
    cancel.check()?;

    let task = tokio::task::spawn_blocking(move || load_bitmap(&bytes, &file_label));
    cancel
        .run(task)
        .await?
        .map_err(|e| RecognitionError::Decode(format!("Decode task failed: {}", e)))?
}
