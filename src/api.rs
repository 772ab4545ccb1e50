//! External caller surface.
//!
//! Request/response shapes for the two operations the UI layer invokes; the
//! transport (IPC, RPC, local call) is the embedder's business. Both
//! functions are total: every error becomes a structured `success: false`
//! payload, nothing panics across this boundary.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::session::DocumentSession;

/// Scale used when the caller does not specify one.
pub const DEFAULT_SCALE: f32 = 1.0;

/// Response payload for `openDocument`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDocumentResponse {
    pub success: bool,
    pub num_pages: u32,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response payload for `getPage`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPageResponse {
    pub success: bool,
    /// Base64-encoded PNG bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn error_string(e: &SessionError) -> String {
    format!("{}: {e}", e.kind())
}

/// `openDocument(filePath)` entry point.
pub fn open_document(session: &DocumentSession, file_path: impl AsRef<Path>) -> OpenDocumentResponse {
    match session.open_document(file_path) {
        Ok(info) => OpenDocumentResponse {
            success: true,
            num_pages: info.page_count,
            file_name: info.file_name,
            error: None,
        },
        Err(e) => OpenDocumentResponse {
            success: false,
            num_pages: 0,
            file_name: String::new(),
            error: Some(error_string(&e)),
        },
    }
}

/// `getPage(pageNumber, scale?)` entry point.
///
/// Omitted scales default to [`DEFAULT_SCALE`]; scales below
/// [`MIN_SCALE`](crate::session::MIN_SCALE) are clamped up to it, and the
/// returned dimensions reflect the clamped scale.
pub fn get_page(session: &DocumentSession, page_number: u32, scale: Option<f32>) -> GetPageResponse {
    match session.get_page(page_number, scale.unwrap_or(DEFAULT_SCALE)) {
        Ok(artifact) => GetPageResponse {
            success: true,
            image_data: Some(BASE64.encode(&artifact.png)),
            width: artifact.width,
            height: artifact.height,
            error: None,
        },
        Err(e) => GetPageResponse {
            success: false,
            image_data: None,
            width: 0,
            height: 0,
            error: Some(error_string(&e)),
        },
    }
}
