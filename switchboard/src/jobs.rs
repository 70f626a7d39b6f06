//! Async job envelopes for image generation.
//!
//! The wire APIs behind the image adapters are synchronous, but the data
//! plane exposes an async envelope: submit returns a job id, and clients
//! poll `GET /api/v1/ai/jobs/:id`.

use std::collections::HashMap;
use std::sync::Mutex;

use switchboard_core::response::ImageJob;

/// In-memory job store. Jobs are small envelopes; the store is bounded only
/// by process lifetime, which matches the polling contract.
#[derive(Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<String, ImageJob>>,
}

impl JobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a finished (or failed) job under a fresh id, returning the id.
    pub fn insert(&self, mut job: ImageJob) -> String {
        let id = format!("job-{}", uuid::Uuid::new_v4());
        job.job_id = id.clone();
        self.jobs
            .lock()
            .expect("mutex poisoned")
            .insert(id.clone(), job);
        id
    }

    /// Look up a job by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ImageJob> {
        self.jobs.lock().expect("mutex poisoned").get(id).cloned()
    }
}
