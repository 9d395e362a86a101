//! Request validation and dispatch over the job registry.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use iskoces_gateway_core::{TranslationRequest, TranslationResponse};

use crate::api::{HandlerError, JobSnapshot, Never};
use crate::registry::JobRegistry;

/// The in-process handler contract the RPC layer consumes.
///
/// Validation failures surface as [`HandlerError::InvalidArgument`];
/// translator-level failures never do, they come back inside the
/// [`TranslationResponse`].
pub struct TranslationHandler {
    registry: Arc<JobRegistry>,
}

impl TranslationHandler {
    /// New handler over `registry`.
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    /// Synchronous path: create the job, drive it through the processor, and
    /// block until it is terminal.
    pub async fn translate(
        &self,
        request: TranslationRequest,
    ) -> Result<TranslationResponse, HandlerError> {
        validate(&request)?;
        let (_, job) = self.registry.create(request);
        let snapshot = job.wait_terminal().await;
        Ok(response_from(snapshot))
    }

    /// Asynchronous path: create the job and return its id immediately.
    pub fn submit(&self, request: TranslationRequest) -> Result<Uuid, HandlerError> {
        validate(&request)?;
        let (id, _) = self.registry.create(request);
        Ok(id)
    }

    /// Current snapshot of a job.
    pub fn job_status(&self, id: &Uuid) -> Result<JobSnapshot, HandlerError> {
        self.registry
            .get(id)
            .map(|job| job.snapshot())
            .ok_or(HandlerError::JobNotFound(*id))
    }

    /// Subscribe to a job's snapshot stream (the SSE side-channel).
    pub fn subscribe(&self, id: &Uuid) -> Result<watch::Receiver<JobSnapshot>, HandlerError> {
        self.registry
            .get(id)
            .map(|job| job.subscribe())
            .ok_or(HandlerError::JobNotFound(*id))
    }

    /// Streaming translation has no defined contract; the method is
    /// rejected until one exists.
    pub fn translate_stream(
        &self,
        _request: TranslationRequest,
    ) -> Result<Never, HandlerError> {
        Err(HandlerError::Unsupported("streaming translation"))
    }
}

fn validate(request: &TranslationRequest) -> Result<(), HandlerError> {
    if request.request_id.trim().is_empty() {
        return Err(HandlerError::InvalidArgument(
            "request_id must not be empty".to_string(),
        ));
    }
    if request.source_lang.trim().is_empty() {
        return Err(HandlerError::InvalidArgument(
            "source_lang must not be empty".to_string(),
        ));
    }
    if request.target_lang.trim().is_empty() {
        return Err(HandlerError::InvalidArgument(
            "target_lang must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn response_from(snapshot: JobSnapshot) -> TranslationResponse {
    TranslationResponse {
        request_id: snapshot.request_id,
        translated_title: snapshot.translated_title,
        translated_markdown: snapshot.translated_markdown,
        tokens_used: snapshot.tokens_used,
        inference_seconds: snapshot.inference_seconds,
        completed_at: snapshot.completed_at.unwrap_or_else(Utc::now),
        error: snapshot.error,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use async_trait::async_trait;

    use iskoces_gateway_core::{
        DocumentPayload, TranslationPrimitive, TranslationRequest,
    };

    use super::TranslationHandler;
    use crate::api::{HandlerError, JobState, TranslateError, Translator};
    use crate::processor::JobProcessor;
    use crate::registry::JobRegistry;

    struct UppercaseTranslator;

    #[async_trait]
    impl Translator for UppercaseTranslator {
        async fn translate(
            &self,
            text: &str,
            _source_lang: &str,
            _target_lang: &str,
            _deadline: Option<Instant>,
        ) -> Result<String, TranslateError> {
            Ok(text.to_uppercase())
        }
    }

    struct FailingTranslator;

    #[async_trait]
    impl Translator for FailingTranslator {
        async fn translate(
            &self,
            _text: &str,
            _source_lang: &str,
            _target_lang: &str,
            _deadline: Option<Instant>,
        ) -> Result<String, TranslateError> {
            Err(TranslateError::Worker("model not loaded".to_string()))
        }
    }

    fn handler_with(translator: Arc<dyn Translator>) -> TranslationHandler {
        TranslationHandler::new(JobRegistry::new(JobProcessor::new(translator, 10 * 1024)))
    }

    fn title_request() -> TranslationRequest {
        TranslationRequest {
            request_id: "req-1".to_string(),
            primitive: TranslationPrimitive::TitleOnly,
            title: "Hello".to_string(),
            document: None,
            source_lang: "EN".to_string(),
            target_lang: "fr".to_string(),
        }
    }

    #[tokio::test]
    async fn synchronous_path_returns_the_result() {
        let handler = handler_with(Arc::new(UppercaseTranslator));
        let response = handler.translate(title_request()).await.unwrap();

        assert_eq!(response.request_id, "req-1");
        assert_eq!(response.translated_title.as_deref(), Some("HELLO"));
        assert_eq!(response.translated_markdown, None);
        assert_eq!(response.tokens_used, 0);
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn translator_failures_become_failure_responses_not_errors() {
        let handler = handler_with(Arc::new(FailingTranslator));
        let response = handler.translate(title_request()).await.unwrap();

        assert_eq!(response.request_id, "req-1");
        assert!(response.translated_title.is_none());
        assert!(response.error.unwrap().contains("model not loaded"));
    }

    #[tokio::test]
    async fn missing_fields_are_invalid_arguments() {
        let handler = handler_with(Arc::new(UppercaseTranslator));

        for (mutate, field) in [
            (
                Box::new(|r: &mut TranslationRequest| r.request_id.clear())
                    as Box<dyn Fn(&mut TranslationRequest)>,
                "request_id",
            ),
            (
                Box::new(|r: &mut TranslationRequest| r.source_lang = "  ".to_string()),
                "source_lang",
            ),
            (
                Box::new(|r: &mut TranslationRequest| r.target_lang.clear()),
                "target_lang",
            ),
        ] {
            let mut request = title_request();
            mutate(&mut request);
            match handler.submit(request) {
                Err(HandlerError::InvalidArgument(msg)) => {
                    assert!(msg.contains(field), "message {msg:?} should name {field}");
                }
                other => panic!("expected InvalidArgument for {field}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn submit_returns_a_pollable_job_id() {
        let handler = handler_with(Arc::new(UppercaseTranslator));
        let id = handler
            .submit(TranslationRequest {
                request_id: "req-2".to_string(),
                primitive: TranslationPrimitive::Document,
                title: String::new(),
                document: Some(DocumentPayload {
                    title: "Hi".to_string(),
                    markdown: "Body.".to_string(),
                }),
                source_lang: "en".to_string(),
                target_lang: "de".to_string(),
            })
            .unwrap();

        let mut updates = handler.subscribe(&id).unwrap();
        let snap = updates
            .wait_for(|s| s.status.is_terminal())
            .await
            .unwrap()
            .clone();
        assert_eq!(snap.status, JobState::Completed);
        assert_eq!(snap.translated_markdown.as_deref(), Some("BODY."));

        let polled = handler.job_status(&id).unwrap();
        assert_eq!(polled.status, JobState::Completed);
    }

    #[tokio::test]
    async fn unknown_job_ids_are_not_found() {
        let handler = handler_with(Arc::new(UppercaseTranslator));
        let id = uuid::Uuid::new_v4();
        assert!(matches!(
            handler.job_status(&id),
            Err(HandlerError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn streaming_is_rejected() {
        let handler = handler_with(Arc::new(UppercaseTranslator));
        assert!(matches!(
            handler.translate_stream(title_request()),
            Err(HandlerError::Unsupported(_))
        ));
    }
}
