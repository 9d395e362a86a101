//! HTTP fallback translator: a LibreTranslate-compatible client implementing
//! the same [`Translator`] contract as the worker pool, for deployments
//! without local worker subprocesses.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::api::{TranslateError, Translator};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct HttpTranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct HttpTranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

#[derive(Debug, Deserialize)]
struct HttpErrorBody {
    error: String,
}

/// Translator backed by a remote LibreTranslate-compatible `POST /translate`
/// endpoint.
pub struct HttpTranslator {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpTranslator {
    /// New client against `base_url` (e.g. `https://libretranslate.example/`).
    pub fn new(base_url: Url, api_key: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        deadline: Option<Instant>,
    ) -> Result<String, TranslateError> {
        let url = self
            .base_url
            .join("translate")
            .map_err(|err| TranslateError::Transport(format!("bad base url: {err}")))?;

        let mut request = self.http.post(url).json(&HttpTranslateRequest {
            q: text,
            source: source_lang,
            target: target_lang,
            format: "text",
            api_key: self.api_key.as_deref(),
        });
        if let Some(deadline) = deadline {
            request = request.timeout(deadline.saturating_duration_since(Instant::now()));
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                TranslateError::DeadlineExceeded
            } else {
                TranslateError::Transport(format!("http: {err}"))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<HttpErrorBody>(&body) {
                Ok(err) => err.error,
                Err(_) => body,
            };
            return Err(TranslateError::Worker(format!("http {status}: {message}")));
        }

        response
            .json::<HttpTranslateResponse>()
            .await
            .map(|body| body.translated_text)
            .map_err(|err| TranslateError::Transport(format!("decode response: {err}")))
    }
}
