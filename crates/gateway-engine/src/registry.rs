//! In-memory job registry: id-keyed jobs with change-published snapshots.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use iskoces_gateway_core::TranslationRequest;

use crate::api::{JobSnapshot, JobState};
use crate::processor::JobProcessor;

/// One translation job. State changes go through the mutation helpers, which
/// publish a fresh [`JobSnapshot`] to every subscriber.
pub struct Job {
    pub(crate) request: TranslationRequest,
    state: Mutex<JobSnapshot>,
    updates: watch::Sender<JobSnapshot>,
}

impl Job {
    fn new(request: TranslationRequest) -> Arc<Self> {
        let snapshot = JobSnapshot {
            id: Uuid::new_v4(),
            request_id: request.request_id.clone(),
            status: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress_percent: 0,
            progress_message: "queued".to_string(),
            translated_title: None,
            translated_markdown: None,
            tokens_used: 0,
            inference_seconds: 0.0,
            error: None,
        };
        let (updates, _) = watch::channel(snapshot.clone());
        Arc::new(Self {
            request,
            state: Mutex::new(snapshot),
            updates,
        })
    }

    /// Job identifier.
    pub fn id(&self) -> Uuid {
        self.state.lock().unwrap().id
    }

    /// Current state of the job.
    pub fn snapshot(&self) -> JobSnapshot {
        self.state.lock().unwrap().clone()
    }

    /// Subscribe to snapshot updates; the receiver starts at the current
    /// snapshot. A transition to a terminal state is the signal to stop
    /// consuming.
    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.updates.subscribe()
    }

    /// Wait until the job reaches Completed or Failed and return that
    /// snapshot.
    pub async fn wait_terminal(&self) -> JobSnapshot {
        let mut rx = self.subscribe();
        // wait_for also inspects the current value first.
        match rx.wait_for(|snap| snap.status.is_terminal()).await {
            Ok(snap) => snap.clone(),
            // The sender lives inside self; this arm is unreachable in
            // practice but degrades to the latest value.
            Err(_) => self.snapshot(),
        }
    }

    fn publish<F: FnOnce(&mut JobSnapshot)>(&self, mutate: F) {
        let snapshot = {
            let mut st = self.state.lock().unwrap();
            if st.status.is_terminal() {
                return;
            }
            mutate(&mut st);
            st.clone()
        };
        let _ = self.updates.send(snapshot);
    }

    pub(crate) fn mark_processing(&self) {
        self.publish(|st| {
            st.status = JobState::Processing;
            st.started_at = Some(Utc::now());
            st.progress_message = "processing".to_string();
        });
    }

    pub(crate) fn set_progress(&self, percent: u8, message: &str) {
        self.publish(|st| {
            st.progress_percent = percent.min(100);
            st.progress_message = message.to_string();
        });
    }

    pub(crate) fn complete(
        &self,
        translated_title: Option<String>,
        translated_markdown: Option<String>,
        elapsed: Duration,
    ) {
        self.publish(|st| {
            st.status = JobState::Completed;
            st.completed_at = Some(Utc::now());
            st.progress_percent = 100;
            st.progress_message = "completed".to_string();
            st.translated_title = translated_title;
            st.translated_markdown = translated_markdown;
            st.tokens_used = 0;
            st.inference_seconds = elapsed.as_secs_f64();
        });
    }

    pub(crate) fn fail(&self, error: impl Into<String>, elapsed: Duration) {
        let error = error.into();
        self.publish(|st| {
            st.status = JobState::Failed;
            st.completed_at = Some(Utc::now());
            st.progress_message = "failed".to_string();
            st.inference_seconds = elapsed.as_secs_f64();
            st.error = Some(error);
        });
    }
}

/// Id-keyed map of live jobs. `create` registers the job and hands it to the
/// processor on a background task; terminal jobs are dropped by [`gc`](Self::gc).
pub struct JobRegistry {
    jobs: Mutex<HashMap<Uuid, Arc<Job>>>,
    processor: Arc<JobProcessor>,
}

impl JobRegistry {
    /// New registry driving jobs through `processor`.
    pub fn new(processor: Arc<JobProcessor>) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
            processor,
        })
    }

    /// Register a job for `request` and start processing it asynchronously.
    pub fn create(&self, request: TranslationRequest) -> (Uuid, Arc<Job>) {
        let job = Job::new(request);
        let id = job.id();
        self.jobs.lock().unwrap().insert(id, job.clone());

        let processor = self.processor.clone();
        let handed = job.clone();
        tokio::spawn(async move {
            processor.process(handed).await;
        });

        (id, job)
    }

    /// Look up a job by id.
    pub fn get(&self, id: &Uuid) -> Option<Arc<Job>> {
        self.jobs.lock().unwrap().get(id).cloned()
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Whether the registry holds no jobs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop terminal jobs whose completion is at least `max_age` old.
    /// Returns how many were removed.
    pub fn gc(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|_, job| {
            let snap = job.snapshot();
            match (snap.status.is_terminal(), snap.completed_at) {
                (true, Some(completed_at)) => completed_at > cutoff,
                _ => true,
            }
        });
        before - jobs.len()
    }
}
