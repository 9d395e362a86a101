//! Drives one job to a terminal state: language normalization, optional
//! chunking, sequential chunk translation, progress accounting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use iskoces_gateway_core::{TranslationPrimitive, chunker, lang};

use crate::api::Translator;
use crate::registry::Job;

/// Overall wall-clock budget for one job.
const JOB_DEADLINE: Duration = Duration::from_secs(10 * 60);

/// Asynchronous job driver. Total with respect to the job: every call leaves
/// it Completed with results set or Failed with an error set.
pub struct JobProcessor {
    translator: Arc<dyn Translator>,
    chunk_bytes: usize,
}

impl JobProcessor {
    /// New processor translating through `translator`, splitting documents
    /// larger than `chunk_bytes`.
    pub fn new(translator: Arc<dyn Translator>, chunk_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            translator,
            chunk_bytes: chunk_bytes.max(1),
        })
    }

    /// Run `job` to completion.
    pub async fn process(&self, job: Arc<Job>) {
        let started = Instant::now();
        match tokio::time::timeout(JOB_DEADLINE, self.run(&job, started)).await {
            Ok(Ok(())) => {}
            Ok(Err(message)) => job.fail(message, started.elapsed()),
            Err(_) => job.fail(
                format!("job deadline exceeded after {JOB_DEADLINE:?}"),
                started.elapsed(),
            ),
        }
    }

    async fn run(&self, job: &Job, started: Instant) -> Result<(), String> {
        job.mark_processing();

        let source = lang::normalize(&job.request.source_lang);
        let target = lang::normalize(&job.request.target_lang);

        match job.request.primitive {
            TranslationPrimitive::TitleOnly => {
                job.set_progress(10, "translating title");
                let translated = self
                    .translator
                    .translate(&job.request.title, &source, &target, None)
                    .await
                    .map_err(|err| format!("translate title: {err}"))?;
                job.complete(Some(translated), None, started.elapsed());
            }
            TranslationPrimitive::Document => {
                let document = job
                    .request
                    .document
                    .clone()
                    .ok_or_else(|| "document payload missing".to_string())?;

                let mut translated_title = None;
                if !document.title.is_empty() {
                    job.set_progress(5, "translating title");
                    let translated = self
                        .translator
                        .translate(&document.title, &source, &target, None)
                        .await
                        .map_err(|err| format!("translate title: {err}"))?;
                    translated_title = Some(translated);
                }

                let translated_markdown = if document.markdown.is_empty() {
                    String::new()
                } else if document.markdown.len() <= self.chunk_bytes {
                    job.set_progress(10, "translating document");
                    self.translator
                        .translate(&document.markdown, &source, &target, None)
                        .await
                        .map_err(|err| format!("translate document: {err}"))?
                } else {
                    job.set_progress(10, "splitting document");
                    self.translate_chunked(job, &document.markdown, &source, &target)
                        .await?
                };

                job.complete(
                    translated_title,
                    Some(translated_markdown),
                    started.elapsed(),
                );
            }
        }

        Ok(())
    }

    /// Chunks are submitted strictly in order so output assembly and
    /// progress reporting stay deterministic.
    async fn translate_chunked(
        &self,
        job: &Job,
        markdown: &str,
        source: &str,
        target: &str,
    ) -> Result<String, String> {
        let chunks = chunker::split(markdown, self.chunk_bytes);
        let total = chunks.len();
        debug!(job_id = %job.id(), total, "translating document in chunks");

        let mut assembled = String::with_capacity(markdown.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let translated = self
                .translator
                .translate(chunk, source, target, None)
                .await
                .map_err(|err| format!("translate chunk {} of {total}: {err}", index + 1))?;
            assembled.push_str(&translated);

            let percent = 10 + ((index + 1) * 80 / total) as u8;
            job.set_progress(
                percent,
                &format!("translated chunk {} of {total}", index + 1),
            );
        }
        Ok(assembled)
    }
}
