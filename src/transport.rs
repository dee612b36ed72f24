//! Transport encoding for JSON and mail payloads

use base64::engine::general_purpose::STANDARD;
use base64::Engine as Base64Engine;
use serde::{Deserialize, Serialize};

use crate::pdf::PageDocument;
use crate::{Error, Result};

const PDF_MIME: &str = "application/pdf";

/// Encode a PDF as a bare base64 payload (no `data:` prefix).
pub fn to_base64(document: &[u8]) -> Result<String> {
    if !looks_like_pdf(document) {
        return Err(Error::EncodingError(format!(
            "input is not a PDF document ({} bytes)",
            document.len()
        )));
    }
    Ok(STANDARD.encode(document))
}

/// Decode a base64 payload, with or without a `data:...;base64,` prefix.
pub fn from_base64(payload: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(strip_data_url_prefix(payload.trim()))
        .map_err(|e| Error::EncodingError(format!("invalid base64 payload: {}", e)))
}

/// Strip a leading `data:<mime>;base64,` prefix if present.
pub fn strip_data_url_prefix(payload: &str) -> &str {
    if payload.starts_with("data:") {
        if let Some(comma) = payload.find(',') {
            return &payload[comma + 1..];
        }
    }
    payload
}

fn looks_like_pdf(bytes: &[u8]) -> bool {
    let tail = &bytes[bytes.len().saturating_sub(1024)..];
    bytes.starts_with(b"%PDF-") && tail.windows(5).any(|w| w == b"%%EOF")
}

/// A mail attachment body as handed to the mail transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    /// Bare base64 content
    pub content: String,
}

impl Attachment {
    pub fn from_document(filename: impl Into<String>, document: &PageDocument) -> Result<Self> {
        Ok(Self {
            filename: filename.into(),
            content_type: PDF_MIME.to_string(),
            content: to_base64(document.as_bytes())?,
        })
    }
}
