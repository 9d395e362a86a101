//! Request/response model shared between the gateway engine and its
//! transport adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of translation being requested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranslationPrimitive {
    /// Translate a single title string.
    TitleOnly,
    /// Translate a document (title plus markdown body).
    Document,
}

/// A document payload: title plus markdown body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentPayload {
    /// Document title; may be empty.
    #[serde(default)]
    pub title: String,
    /// Markdown body.
    #[serde(default)]
    pub markdown: String,
}

/// An incoming translation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranslationRequest {
    /// Caller-supplied correlation id; echoed back on every response.
    pub request_id: String,
    /// Requested primitive.
    pub primitive: TranslationPrimitive,
    /// Title to translate (used by [`TranslationPrimitive::TitleOnly`]).
    #[serde(default)]
    pub title: String,
    /// Document to translate (used by [`TranslationPrimitive::Document`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentPayload>,
    /// Source language code, in any recognized external form.
    pub source_lang: String,
    /// Target language code, in any recognized external form.
    pub target_lang: String,
}

/// The terminal response for a translation request.
///
/// Translator-level failures are carried in [`error`](Self::error) rather
/// than surfaced as transport errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranslationResponse {
    /// Correlation id from the originating request.
    pub request_id: String,
    /// Translated title, when the request carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_title: Option<String>,
    /// Translated markdown body, for document requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_markdown: Option<String>,
    /// Tokens consumed by the backend; always zero for this backend class.
    pub tokens_used: u32,
    /// Wall-clock inference time in seconds.
    pub inference_seconds: f64,
    /// Completion timestamp.
    pub completed_at: DateTime<Utc>,
    /// Failure message; empty/absent on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
