//! Newline-delimited JSON protocol spoken over the per-worker rendezvous
//! socket. Exactly one request and one response per connection; connections
//! are never reused.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::api::TranslateError;

#[derive(Debug, Serialize)]
pub(crate) struct WireRequest<'a> {
    pub(crate) text: &'a str,
    pub(crate) source_lang: &'a str,
    pub(crate) target_lang: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireResponse {
    pub(crate) success: bool,
    #[serde(default)]
    pub(crate) translated_text: Option<String>,
    #[serde(default)]
    pub(crate) error: Option<String>,
}

#[derive(Debug)]
pub(crate) struct Exchange {
    pub(crate) translated: String,
    pub(crate) request_bytes: usize,
    pub(crate) response_bytes: usize,
}

/// Perform the one request/response exchange this connection exists for.
pub(crate) async fn exchange(
    mut stream: UnixStream,
    request: &WireRequest<'_>,
) -> Result<Exchange, TranslateError> {
    let mut payload = serde_json::to_vec(request)
        .map_err(|err| TranslateError::Transport(format!("encode request: {err}")))?;
    payload.push(b'\n');
    let request_bytes = payload.len();

    stream
        .write_all(&payload)
        .await
        .map_err(|err| TranslateError::Transport(format!("write request: {err}")))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let response_bytes = reader
        .read_line(&mut line)
        .await
        .map_err(|err| TranslateError::Transport(format!("read response: {err}")))?;
    if response_bytes == 0 {
        return Err(TranslateError::Transport(
            "worker closed the connection before responding".to_string(),
        ));
    }

    let response: WireResponse = serde_json::from_str(line.trim_end())
        .map_err(|err| TranslateError::Transport(format!("decode response: {err}")))?;

    if !response.success {
        return Err(TranslateError::Worker(
            response
                .error
                .unwrap_or_else(|| "unspecified worker error".to_string()),
        ));
    }

    match response.translated_text {
        Some(translated) => Ok(Exchange {
            translated,
            request_bytes,
            response_bytes,
        }),
        None => Err(TranslateError::Transport(
            "success response missing translated_text".to_string(),
        )),
    }
}
