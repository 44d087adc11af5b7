//! Turning the raw export bytes into text.

use anyhow::{Context, Result};
use encoding_rs::Encoding;

/// Decode `bytes`, honouring a byte order mark and otherwise falling back to
/// the encoding named by `label`.
pub fn decode_text(bytes: &[u8], label: &str) -> Result<String> {
    let fallback = Encoding::for_label(label.trim().as_bytes())
        .with_context(|| format!("Unknown text encoding: {label}"))?;

    let (text, used, had_errors) = fallback.decode(bytes);
    if had_errors {
        tracing::warn!(
            "Export is not valid {}; undecodable bytes were replaced",
            used.name()
        );
    }
    tracing::debug!("Decoded {} bytes as {}", bytes.len(), used.name());
    Ok(text.into_owned())
}
