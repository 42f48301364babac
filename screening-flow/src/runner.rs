//! ScreeningRunner – loads a session, applies one transition, and persists the result.
//!
//! Each session has its own gate so two requests for the same session never
//! interleave their load → mutate → save cycles. The gate is released while a
//! prediction call is in flight; during that window the stored session reports
//! `pending` and further request attempts are rejected.
//!
//! The outbound call and the save of its outcome run on a spawned task. A
//! caller that goes away mid-request does not leave the session pending.
//!
//! ```rust,ignore
//! let runner = ScreeningRunner::new(storage, assessor);
//! let session = runner.create_session().await?;
//! runner.update(session.id(), |s| s.submit_patient_info(info)).await?;
//! runner.request_questionnaire_assessment(session.id()).await?;
//! ```

use chrono::Utc;
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info};

use crate::{
    assessor::Assessor,
    error::{Result, ScreeningError},
    session::ScreeningSession,
    storage::SessionStorage,
};

#[derive(Clone)]
pub struct ScreeningRunner {
    storage: Arc<dyn SessionStorage>,
    assessor: Arc<dyn Assessor>,
    gates: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ScreeningRunner {
    pub fn new(storage: Arc<dyn SessionStorage>, assessor: Arc<dyn Assessor>) -> Self {
        Self {
            storage,
            assessor,
            gates: Arc::new(DashMap::new()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn SessionStorage> {
        &self.storage
    }

    fn gate_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.gates.entry(session_id.to_string()).or_default().clone()
    }

    pub async fn create_session(&self) -> Result<ScreeningSession> {
        let session = ScreeningSession::new();
        self.storage.save(session.clone()).await?;
        debug!(session_id = %session.id(), "Screening session created");
        Ok(session)
    }

    pub async fn load(&self, session_id: &str) -> Result<ScreeningSession> {
        self.storage
            .get(session_id)
            .await?
            .ok_or_else(|| ScreeningError::SessionNotFound(session_id.to_string()))
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let gate = self.gate_for(session_id);
        let _guard = gate.lock().await;
        self.load(session_id).await?;
        self.storage.delete(session_id).await?;
        self.gates.remove(session_id);
        Ok(())
    }

    /// Drops idle sessions older than `max_age`; returns how many were removed
    pub async fn purge_expired(&self, max_age: Duration) -> Result<usize> {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };
        let purged = self.storage.purge_created_before(cutoff).await?;
        for id in &purged {
            self.gates.remove(id);
        }
        if !purged.is_empty() {
            info!(count = purged.len(), "Expired screening sessions removed");
        }
        Ok(purged.len())
    }

    /// Applies a synchronous transition and saves the session whether or not it succeeded,
    /// so a rejected transition's `last_error` is persisted too.
    pub async fn update<T, F>(&self, session_id: &str, transition: F) -> Result<(ScreeningSession, T)>
    where
        F: FnOnce(&mut ScreeningSession) -> Result<T>,
    {
        let gate = self.gate_for(session_id);
        let _guard = gate.lock().await;
        let mut session = self.load(session_id).await?;
        let outcome = transition(&mut session);
        self.storage.save(session.clone()).await?;
        outcome.map(|value| (session, value))
    }

    pub async fn request_questionnaire_assessment(&self, session_id: &str) -> Result<ScreeningSession> {
        let (_, ticket) = self
            .update(session_id, |s| s.begin_questionnaire_request())
            .await?;

        let runner = self.clone();
        let id = session_id.to_string();
        let task = tokio::spawn(async move {
            let outcome = runner.assessor.assess_questionnaire(&ticket.submission).await;
            runner
                .update(&id, |s| s.complete_questionnaire_request(&ticket, outcome))
                .await
                .map(|(session, ())| session)
        });
        join_request(task, session_id).await
    }

    pub async fn request_image_assessment(&self, session_id: &str) -> Result<ScreeningSession> {
        let (_, ticket) = self.update(session_id, |s| s.begin_image_request()).await?;

        let runner = self.clone();
        let id = session_id.to_string();
        let task = tokio::spawn(async move {
            let outcome = runner.assessor.assess_image(&ticket.image).await;
            runner
                .update(&id, |s| s.complete_image_request(&ticket, outcome))
                .await
                .map(|(session, ())| session)
        });
        join_request(task, session_id).await
    }
}

async fn join_request(task: JoinHandle<Result<ScreeningSession>>, session_id: &str) -> Result<ScreeningSession> {
    match task.await {
        Ok(result) => result,
        Err(e) => {
            error!(session_id, error = %e, "Prediction task aborted");
            Err(ScreeningError::Service(format!("Prediction request aborted: {}", e)))
        }
    }
}
