// src/client/aggregator.rs

//! Final submission from the candidate side.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use super::{
    api::ExamApi,
    error::ClientError,
    events::{CompletionBus, ExamEvent},
    store::{SessionStore, SessionStoreExt, keys},
};
use crate::{
    exam::{FinalResult, ModuleId, ModuleResult, scoring},
    models::session::CompleteExamRequest,
};

/// What [`ResultAggregator::try_finalize`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum Finalization {
    /// This call submitted the exam.
    Submitted(FinalResult),
    /// The session was submitted before; nothing was sent.
    AlreadySubmitted(FinalResult),
    /// Some module results are missing locally; nothing was sent.
    Incomplete(Vec<ModuleId>),
}

/// Submits the exam once per session.
///
/// The one-shot flag lives in the store under `submitted:{session_id}`, so it
/// survives a reload and starts fresh for every new session. Per-module caches
/// are only cleared after the backend confirmed the submission.
pub struct ResultAggregator {
    api: Arc<dyn ExamApi>,
    store: Arc<dyn SessionStore>,
    bus: CompletionBus,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag however the submission ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ResultAggregator {
    pub fn new(api: Arc<dyn ExamApi>, store: Arc<dyn SessionStore>, bus: CompletionBus) -> Self {
        Self {
            api,
            store,
            bus,
            in_flight: AtomicBool::new(false),
        }
    }

    /// The stored final result of a submitted session.
    pub fn submitted(&self, session_id: &str) -> Result<Option<FinalResult>, ClientError> {
        self.store.get_json(&keys::submitted(session_id))
    }

    fn local_results(&self, exam_id: &str) -> Result<BTreeMap<ModuleId, ModuleResult>, ClientError> {
        let mut results = BTreeMap::new();
        for module in ModuleId::ORDER {
            if let Some(result) = self
                .store
                .get_json::<ModuleResult>(&keys::result(exam_id, module))?
            {
                results.insert(module, result);
            }
        }
        Ok(results)
    }

    pub async fn try_finalize(
        &self,
        session_id: &str,
        exam_id: &str,
        token: &str,
    ) -> Result<Finalization, ClientError> {
        if let Some(result) = self.submitted(session_id)? {
            return Ok(Finalization::AlreadySubmitted(result));
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ClientError::SubmissionInFlight);
        }
        let _guard = InFlight(&self.in_flight);

        let results = self.local_results(exam_id)?;
        let aggregate = match scoring::aggregate(&results) {
            Ok(aggregate) => aggregate,
            Err(crate::exam::ExamError::IncompleteResults(missing)) => {
                tracing::info!(%session_id, ?missing, "Not submitting, modules missing");
                return Ok(Finalization::Incomplete(missing));
            }
            Err(e) => return Err(e.into()),
        };

        let request = CompleteExamRequest {
            overall_band: Some(aggregate.overall_band),
        };
        let response = match self.api.complete_exam(token, &request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(%session_id, %e, "Final submission failed, keeping local results");
                return Err(e);
            }
        };

        self.store
            .set_json(&keys::submitted(session_id), &response.result)?;
        self.store.clear_results(exam_id)?;
        self.store.remove(keys::SESSION)?;
        self.store.remove(keys::TOKEN)?;

        tracing::info!(
            %session_id,
            overall_band = response.result.overall_band,
            "Exam submitted"
        );
        self.bus.publish(ExamEvent::ExamSubmitted {
            session_id: session_id.to_string(),
        });

        Ok(if response.already_submitted {
            Finalization::AlreadySubmitted(response.result)
        } else {
            Finalization::Submitted(response.result)
        })
    }
}
