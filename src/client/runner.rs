// src/client/runner.rs

//! Candidate-side orchestration of one exam attempt.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::Utc;
use tokio::{
    sync::{Mutex, broadcast::error::RecvError, watch},
    task::JoinHandle,
};

use super::{
    aggregator::{Finalization, ResultAggregator},
    api::ExamApi,
    error::ClientError,
    events::{CompletionBus, ExamEvent, spawn_store_poller},
    store::{SessionStore, SessionStoreExt, keys},
    timer::Countdown,
};
use crate::{
    config::ModuleDurations,
    exam::{
        Completion, ExamSession, ModuleId, ModuleResult, ModuleScore,
        proctor::{Outcome, ProctorConfig, ProctorMonitor, Signal, Warning},
        scoring,
    },
    models::{
        exam_code::Resolution,
        session::{CandidateInput, ReportViolationRequest, SessionSnapshot, StartExamRequest},
    },
};

const SUBMIT_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const AUTO_SUBMIT_BASE_DELAY: Duration = Duration::from_millis(500);
const AUTO_SUBMIT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identifies this browser; sessions only resume from the same one.
    pub fingerprint: String,
    pub proctoring: ProctorConfig,
    pub durations: ModuleDurations,
}

#[derive(Debug, Default)]
struct ClientState {
    session: Option<ExamSession>,
    token: Option<String>,
    monitor: Option<ProctorMonitor>,
    active: Option<ModuleId>,
    /// Latest answers of the active module, submitted if time runs out.
    draft: Option<ModuleScore>,
    countdown: Option<Countdown>,
}

impl ClientState {
    fn close_module(&mut self) {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.disarm();
        }
        if let Some(countdown) = self.countdown.take() {
            countdown.stop();
        }
        self.active = None;
        self.draft = None;
    }

    fn session_ids(&self) -> Result<(String, String, String), ClientError> {
        match (&self.session, &self.token) {
            (Some(s), Some(token)) => Ok((s.session_id.clone(), s.exam_id.clone(), token.clone())),
            _ => Err(ClientError::NoSession),
        }
    }
}

/// Answers submitted when a module's time runs out with nothing entered.
fn blank_score(module: ModuleId) -> ModuleScore {
    match module {
        ModuleId::Writing => ModuleScore::Writing {
            task1_words: 0,
            task2_words: 0,
        },
        _ => ModuleScore::Objective {
            raw_score: 0,
            total_possible: 40,
        },
    }
}

/// Tells the backend this browser ended the session, with the same retries
/// as a module submission. The local marker stays either way, so a reload
/// sends it again.
async fn send_termination(api: Arc<dyn ExamApi>, token: String, session_id: String) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match api.terminate_session(&token).await {
            Ok(snapshot) => {
                tracing::info!(%session_id, status = %snapshot.status, "Termination confirmed");
                return;
            }
            Err(e) if e.is_retryable() && attempt < SUBMIT_ATTEMPTS => {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                tracing::warn!(%session_id, attempt, %e, "Termination not confirmed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::warn!(%session_id, %e, "Termination not confirmed, resending on next load");
                return;
            }
        }
    }
}

/// Sleeps for `delay`, or forever when there is nothing to retry.
async fn backoff(delay: Option<Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

/// Drives one candidate through verify, start, the three modules and the
/// final submission.
///
/// Nothing advances locally before the backend confirmed it; results are
/// cached in the store first so a failed call can be retried after a reload.
pub struct ExamClient {
    api: Arc<dyn ExamApi>,
    store: Arc<dyn SessionStore>,
    bus: CompletionBus,
    config: ClientConfig,
    aggregator: ResultAggregator,
    state: Mutex<ClientState>,
}

impl ExamClient {
    pub fn new(api: Arc<dyn ExamApi>, store: Arc<dyn SessionStore>, config: ClientConfig) -> Arc<Self> {
        let bus = CompletionBus::default();
        Arc::new(Self {
            aggregator: ResultAggregator::new(api.clone(), store.clone(), bus.clone()),
            api,
            store,
            bus,
            config,
            state: Mutex::new(ClientState::default()),
        })
    }

    pub fn bus(&self) -> &CompletionBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let state = self.state.lock().await;
        state
            .session
            .as_ref()
            .map(|s| SessionSnapshot::new(s, None))
    }

    pub async fn active_module(&self) -> Option<ModuleId> {
        self.state.lock().await.active
    }

    pub async fn violation_count(&self) -> u32 {
        let state = self.state.lock().await;
        match (&state.monitor, &state.session) {
            (Some(m), Some(s)) => m.violation_count().max(s.violation_count()),
            (None, Some(s)) => s.violation_count(),
            _ => 0,
        }
    }

    pub async fn verify(&self, code: &str) -> Result<Resolution, ClientError> {
        self.api.verify_exam_id(code).await
    }

    /// Starts (or resumes on the server) the session for a confirmed code.
    pub async fn begin(&self, code: &str, candidate: CandidateInput) -> Result<SessionSnapshot, ClientError> {
        let request = StartExamRequest {
            code: code.to_string(),
            candidate,
            fingerprint: self.config.fingerprint.clone(),
        };
        let response = self.api.start_exam(&request).await?;
        self.adopt(response.token, response.session).await
    }

    /// Picks up the session recorded in the store, if any.
    ///
    /// The returned snapshot's `next_module` is where the candidate belongs.
    /// A session this browser terminated stays terminated even when the
    /// backend never heard about it.
    pub async fn resume(&self) -> Result<Option<SessionSnapshot>, ClientError> {
        let Some(token) = self.store.get_json::<String>(keys::TOKEN)? else {
            return Ok(None);
        };
        let snapshot = match self.api.get_session(&token).await {
            Ok(snapshot) => snapshot,
            Err(ClientError::Api { status: 401, .. }) => {
                tracing::info!("Stored session token rejected, forgetting it");
                self.store.remove(keys::TOKEN)?;
                self.store.remove(keys::SESSION)?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let snapshot = self.adopt(token, snapshot).await?;
        self.bus.publish(ExamEvent::SessionResumed {
            session_id: snapshot.session_id.clone(),
        });
        Ok(Some(snapshot))
    }

    /// Makes `snapshot` the current session, dropping cached state of any
    /// other session first. Returns the snapshot the client now works with.
    async fn adopt(&self, token: String, mut snapshot: SessionSnapshot) -> Result<SessionSnapshot, ClientError> {
        match self.store.get_json::<SessionSnapshot>(keys::SESSION) {
            Ok(Some(previous)) if previous.session_id != snapshot.session_id => {
                tracing::info!(
                    previous = %previous.session_id,
                    current = %snapshot.session_id,
                    "Discarding cached state of another session"
                );
                self.store.clear_results(&previous.exam_id)?;
                self.store.remove(keys::TOKEN)?;
                self.store.remove(keys::SESSION)?;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%e, "Unreadable cached session, discarding it");
                self.store.remove(keys::TOKEN)?;
                self.store.remove(keys::SESSION)?;
            }
        }
        let mut violations = snapshot.violation_count;
        let terminated_here = self
            .store
            .get_json::<u32>(&keys::terminated(&snapshot.session_id))?;
        if let Some(count) = terminated_here {
            if !snapshot.status.is_terminal() {
                tracing::warn!(
                    session_id = %snapshot.session_id,
                    violations = count,
                    "Backend missed a local termination, resending it"
                );
                let mut session = snapshot.to_session();
                session.terminate()?;
                snapshot = SessionSnapshot::new(&session, None);
                tokio::spawn(send_termination(
                    self.api.clone(),
                    token.clone(),
                    snapshot.session_id.clone(),
                ));
            }
            violations = violations.max(count);
        }

        self.store.set_json(keys::TOKEN, &token)?;
        self.store.set_json(keys::SESSION, &snapshot)?;

        let session_id = snapshot.session_id.clone();
        let bus = self.bus.clone();
        let mut monitor = ProctorMonitor::new(self.config.proctoring.clone()).on_limit_reached(
            move |violations| {
                bus.publish(ExamEvent::ExamTerminated {
                    session_id: session_id.clone(),
                    violations,
                });
            },
        );
        monitor.restore(violations);

        let mut state = self.state.lock().await;
        state.close_module();
        state.session = Some(snapshot.to_session());
        state.token = Some(token);
        state.monitor = Some(monitor);
        Ok(snapshot)
    }

    /// Enters the next module, arms proctoring and starts its countdown.
    ///
    /// Returns the time allowed for the module.
    pub async fn enter_module(self: &Arc<Self>, module: ModuleId) -> Result<Duration, ClientError> {
        let token = {
            let state = self.state.lock().await;
            let session = state.session.as_ref().ok_or(ClientError::NoSession)?;
            // check locally first; the server has the final word
            session.clone().enter_module(module)?;
            state.token.clone().ok_or(ClientError::NoSession)?
        };

        let snapshot = self.api.enter_module(&token, module).await?;
        self.store.set_json(keys::SESSION, &snapshot)?;

        let duration = self.config.durations.for_module(module);
        let client = Arc::clone(self);
        let countdown = Countdown::start(module, duration, move |module| async move {
            client.force_submit(module).await;
        });

        let mut state = self.state.lock().await;
        state.close_module();
        state.session = Some(snapshot.to_session());
        if let Some(monitor) = state.monitor.as_mut() {
            monitor.arm();
        }
        state.active = Some(module);
        state.countdown = Some(countdown);

        tracing::info!(module = %module, ?duration, "Module started");
        Ok(duration)
    }

    /// Keeps the current answers so they survive a timeout.
    pub async fn update_answers(&self, score: ModuleScore) {
        self.state.lock().await.draft = Some(score);
    }

    async fn force_submit(&self, module: ModuleId) {
        let score = {
            let mut state = self.state.lock().await;
            if state.active != Some(module) {
                return;
            }
            state.draft.take().unwrap_or_else(|| blank_score(module))
        };
        match self.complete_module(module, score).await {
            Ok(Completion::Recorded { next: None }) => {
                if let Err(e) = self.submit_exam().await {
                    tracing::warn!(%e, "Final submission after timeout failed");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(module = %module, %e, "Timed-out module not confirmed yet"),
        }
    }

    /// Submits a module result.
    ///
    /// The result is cached before it is sent and stays cached when every
    /// attempt fails; [`ExamClient::flush_pending`] sends it later.
    pub async fn complete_module(&self, module: ModuleId, score: ModuleScore) -> Result<Completion, ClientError> {
        let result = scoring::score_module(module, score, Utc::now())?;

        let (exam_id, token) = {
            let mut state = self.state.lock().await;
            let session = state.session.as_ref().ok_or(ClientError::NoSession)?;
            if session.is_completed(module) {
                return Ok(Completion::AlreadyRecorded);
            }
            session.clone().complete_module(module, result.clone())?;
            let ids = (session.exam_id.clone(), state.token.clone().ok_or(ClientError::NoSession)?);
            if state.active == Some(module) {
                state.close_module();
            }
            ids
        };

        self.store.set_json(&keys::result(&exam_id, module), &result)?;
        self.send_result(&token, &result).await
    }

    async fn send_result(&self, token: &str, result: &ModuleResult) -> Result<Completion, ClientError> {
        let module = result.module;
        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match self.api.complete_module(token, module, &result.score).await {
                Ok(response) => break response,
                Err(e) if e.is_retryable() && attempt < SUBMIT_ATTEMPTS => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    tracing::warn!(module = %module, attempt, %e, "Module submission failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(module = %module, %e, "Module submission failed, result kept locally");
                    return Err(e);
                }
            }
        };

        self.store.set_json(keys::SESSION, &response.session)?;
        let session_id = response.session.session_id.clone();
        {
            let mut state = self.state.lock().await;
            state.session = Some(response.session.to_session());
        }

        self.bus.publish(ExamEvent::ModuleCompleted { session_id, module });

        Ok(if response.recorded {
            Completion::Recorded {
                next: response.session.next_module,
            }
        } else {
            Completion::AlreadyRecorded
        })
    }

    /// Sends cached results the backend has not confirmed yet, in module
    /// order. Returns how many were confirmed.
    pub async fn flush_pending(&self) -> Result<usize, ClientError> {
        let (pending, token) = {
            let state = self.state.lock().await;
            let session = state.session.as_ref().ok_or(ClientError::NoSession)?;
            let token = state.token.clone().ok_or(ClientError::NoSession)?;
            let mut pending = Vec::new();
            for module in ModuleId::ORDER {
                if session.is_completed(module) {
                    continue;
                }
                match self
                    .store
                    .get_json::<ModuleResult>(&keys::result(&session.exam_id, module))?
                {
                    Some(result) => pending.push(result),
                    None => break,
                }
            }
            (pending, token)
        };

        let mut flushed = 0;
        for result in pending {
            self.send_result(&token, &result).await?;
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Feeds one environment signal to the proctoring monitor.
    ///
    /// Counted violations are reported to the backend in the background. The
    /// caller applies `prevent_default`, shows the warning and, for
    /// `schedule_blur_check`, sends `Signal::BlurConfirmed` after the delay.
    pub async fn handle_signal(&self, signal: &Signal) -> Outcome {
        let mut state = self.state.lock().await;
        let Some(monitor) = state.monitor.as_mut() else {
            return Outcome::default();
        };
        let outcome = monitor.handle(signal, Utc::now());

        if let (Some(violation), Some(token)) = (&outcome.violation, state.token.clone()) {
            let api = self.api.clone();
            let request = ReportViolationRequest {
                kind: violation.kind,
                timestamp: Some(violation.timestamp),
            };
            tokio::spawn(async move {
                if let Err(e) = api.report_violation(&token, &request).await {
                    tracing::warn!(kind = %request.kind, %e, "Failed to report violation");
                }
            });
        }

        if outcome.limit_reached {
            state.close_module();
            let token = state.token.clone();
            let count = state.monitor.as_ref().map_or(0, ProctorMonitor::violation_count);
            if let Some(session) = state.session.as_mut() {
                match session.terminate() {
                    Ok(()) => {
                        let marker = keys::terminated(&session.session_id);
                        if let Err(e) = self.store.set_json(&marker, &count) {
                            tracing::warn!(%e, "Failed to record local termination");
                        }
                        if let Some(token) = token {
                            tokio::spawn(send_termination(
                                self.api.clone(),
                                token,
                                session.session_id.clone(),
                            ));
                        }
                    }
                    Err(e) => tracing::debug!(%e, "Session already closed"),
                }
                let snapshot = SessionSnapshot::new(session, None);
                if let Err(e) = self.store.set_json(keys::SESSION, &snapshot) {
                    tracing::warn!(%e, "Failed to store terminated session");
                }
            }
        }

        outcome
    }

    pub async fn pending_warning(&self) -> Option<Warning> {
        let state = self.state.lock().await;
        state.monitor.as_ref().and_then(|m| m.pending_warning().cloned())
    }

    pub async fn acknowledge_warning(&self) -> Option<Warning> {
        let mut state = self.state.lock().await;
        state.monitor.as_mut().and_then(ProctorMonitor::acknowledge_warning)
    }

    /// Aggregates and submits the exam once all three modules are done.
    pub async fn submit_exam(&self) -> Result<Finalization, ClientError> {
        let (session_id, exam_id, token) = self.state.lock().await.session_ids()?;
        let finalization = self
            .aggregator
            .try_finalize(&session_id, &exam_id, &token)
            .await?;
        if matches!(
            finalization,
            Finalization::Submitted(_) | Finalization::AlreadySubmitted(_)
        ) {
            self.state.lock().await.close_module();
        }
        Ok(finalization)
    }

    /// Submits the exam whenever a module completion or a resume may have
    /// made it complete, and keeps retrying a failed submission with backoff.
    ///
    /// Stops when `cancel` turns true, its sender is dropped, or the client
    /// goes away.
    pub fn spawn_auto_submit(self: &Arc<Self>, mut cancel: watch::Receiver<bool>) -> JoinHandle<()> {
        let client: Weak<Self> = Arc::downgrade(self);
        let mut events = self.bus.subscribe();
        tokio::spawn(async move {
            let mut retry: Option<Duration> = None;
            loop {
                let triggered = tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break;
                        }
                        false
                    }
                    event = events.recv() => match event {
                        Ok(ExamEvent::ModuleCompleted { .. } | ExamEvent::SessionResumed { .. }) => true,
                        Ok(ExamEvent::ExamSubmitted { .. }) => {
                            retry = None;
                            false
                        }
                        Ok(ExamEvent::ExamTerminated { .. }) => false,
                        // missed events may have included a completion
                        Err(RecvError::Lagged(_)) => true,
                        Err(RecvError::Closed) => break,
                    },
                    _ = backoff(retry) => true,
                };
                if !triggered {
                    continue;
                }

                let Some(client) = client.upgrade() else {
                    break;
                };
                retry = match client.submit_exam().await {
                    Ok(_) | Err(ClientError::NoSession) => None,
                    Err(ClientError::SubmissionInFlight) => retry.or(Some(AUTO_SUBMIT_BASE_DELAY)),
                    Err(e) if e.is_retryable() => {
                        let delay = retry.map_or(AUTO_SUBMIT_BASE_DELAY, |d| (d * 2).min(AUTO_SUBMIT_MAX_DELAY));
                        tracing::warn!(%e, ?delay, "Final submission failed, retrying");
                        Some(delay)
                    }
                    Err(e) => {
                        tracing::warn!(%e, "Final submission rejected");
                        None
                    }
                };
            }
            tracing::debug!("auto submit stopped");
        })
    }

    /// Watches the store for results written by other tabs of this session
    /// and republishes them on the bus.
    pub async fn watch_store(
        &self,
        interval: Duration,
        cancel: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, ClientError> {
        let (session_id, exam_id, _) = self.state.lock().await.session_ids()?;
        Ok(spawn_store_poller(
            self.store.clone(),
            self.bus.clone(),
            session_id,
            exam_id,
            interval,
            cancel,
        ))
    }

    /// Forgets everything this client stored.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        state.close_module();
        *state = ClientState::default();
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::{fake::FakeApi, store::MemoryStore},
        exam::ExamStatus,
    };
    use serde_json::json;

    fn candidate() -> CandidateInput {
        CandidateInput {
            name: "Test Candidate".to_string(),
            contact_phone: "0912000000".to_string(),
            national_id: "1234567890".to_string(),
        }
    }

    fn objective(raw_score: u32) -> ModuleScore {
        ModuleScore::Objective {
            raw_score,
            total_possible: 40,
        }
    }

    fn writing() -> ModuleScore {
        ModuleScore::Writing {
            task1_words: 180,
            task2_words: 300,
        }
    }

    /// A fresh client over existing state, as after a page reload.
    fn reload(api: &Arc<FakeApi>, store: &Arc<MemoryStore>) -> Arc<ExamClient> {
        ExamClient::new(
            api.clone(),
            store.clone(),
            ClientConfig {
                fingerprint: "fp-12345678".to_string(),
                proctoring: ProctorConfig::default(),
                durations: ModuleDurations::default(),
            },
        )
    }

    fn setup() -> (Arc<FakeApi>, Arc<MemoryStore>, Arc<ExamClient>) {
        let api = Arc::new(FakeApi::new("s-1"));
        let store = Arc::new(MemoryStore::new());
        let client = reload(&api, &store);
        (api, store, client)
    }

    async fn wait_for_submission(events: &mut tokio::sync::broadcast::Receiver<ExamEvent>) {
        let submitted = tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                if let ExamEvent::ExamSubmitted { .. } = events.recv().await.unwrap() {
                    break;
                }
            }
        })
        .await;
        assert!(submitted.is_ok(), "exam was never submitted");
    }

    async fn complete_all(client: &Arc<ExamClient>) {
        client.enter_module(ModuleId::Listening).await.unwrap();
        client.complete_module(ModuleId::Listening, objective(30)).await.unwrap();
        client.enter_module(ModuleId::Reading).await.unwrap();
        client.complete_module(ModuleId::Reading, objective(30)).await.unwrap();
        client.enter_module(ModuleId::Writing).await.unwrap();
        client.complete_module(ModuleId::Writing, writing()).await.unwrap();
    }

    #[tokio::test]
    async fn begin_drops_cached_state_of_another_session() {
        let (_api, store, client) = setup();
        store
            .set(keys::SESSION, json!({"session_id": "old"}))
            .unwrap();
        // an unreadable snapshot must not block a new session
        client.begin("bac2500123", candidate()).await.unwrap();

        let old = SessionSnapshot::new(
            &ExamSession::new(
                "old".to_string(),
                "OLD0000001".to_string(),
                candidate().into(),
                crate::exam::AssignedSets {
                    listening: 1,
                    reading: 1,
                    writing: 1,
                },
                Utc::now(),
            ),
            None,
        );
        store.set_json(keys::SESSION, &old).unwrap();
        store
            .set(&keys::result("OLD0000001", ModuleId::Listening), json!({}))
            .unwrap();

        let snapshot = client.begin("bac2500123", candidate()).await.unwrap();
        assert_eq!(snapshot.session_id, "s-1");
        assert_eq!(
            store.get(&keys::result("OLD0000001", ModuleId::Listening)).unwrap(),
            None
        );
        let stored: SessionSnapshot = store.get_json(keys::SESSION).unwrap().unwrap();
        assert_eq!(stored.session_id, "s-1");
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_result_stays_cached_and_is_flushed_later() {
        let (api, store, client) = setup();
        client.begin("BAC2500123", candidate()).await.unwrap();
        client.enter_module(ModuleId::Listening).await.unwrap();

        api.fail_module_calls(SUBMIT_ATTEMPTS);
        let err = client
            .complete_module(ModuleId::Listening, objective(28))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(api.calls(|c| c.complete_module), SUBMIT_ATTEMPTS);

        // not advanced without confirmation
        let snapshot = client.snapshot().await.unwrap();
        assert!(snapshot.completed_modules.is_empty());
        assert!(
            store
                .get(&keys::result("BAC2500123", ModuleId::Listening))
                .unwrap()
                .is_some()
        );

        assert_eq!(client.flush_pending().await.unwrap(), 1);
        let snapshot = client.snapshot().await.unwrap();
        assert_eq!(snapshot.completed_modules, vec![ModuleId::Listening]);
        assert_eq!(snapshot.next_module, Some(ModuleId::Reading));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let (api, _store, client) = setup();
        client.begin("BAC2500123", candidate()).await.unwrap();
        client.enter_module(ModuleId::Listening).await.unwrap();

        api.fail_module_calls(1);
        let completion = client
            .complete_module(ModuleId::Listening, objective(28))
            .await
            .unwrap();
        assert_eq!(
            completion,
            Completion::Recorded {
                next: Some(ModuleId::Reading)
            }
        );
        assert_eq!(api.calls(|c| c.complete_module), 2);

        // a second submission of the same module is a no-op
        assert_eq!(
            client
                .complete_module(ModuleId::Listening, objective(40))
                .await
                .unwrap(),
            Completion::AlreadyRecorded
        );
        assert_eq!(api.calls(|c| c.complete_module), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn violations_are_reported_and_the_limit_terminates() {
        let (api, _store, client) = setup();
        let mut events = client.bus().subscribe();
        client.begin("BAC2500123", candidate()).await.unwrap();

        // not armed before a module is entered
        assert_eq!(
            client.handle_signal(&Signal::VisibilityHidden).await,
            Outcome::default()
        );

        client.enter_module(ModuleId::Listening).await.unwrap();
        for _ in 0..2 {
            let outcome = client.handle_signal(&Signal::VisibilityHidden).await;
            assert!(outcome.violation.is_some());
            assert!(!outcome.limit_reached);
            assert!(client.acknowledge_warning().await.is_some());
        }
        let third = client.handle_signal(&Signal::VisibilityHidden).await;
        assert!(third.limit_reached);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.calls(|c| c.violations.len()), 3);

        assert_eq!(
            events.recv().await.unwrap(),
            ExamEvent::ExamTerminated {
                session_id: "s-1".to_string(),
                violations: 3,
            }
        );
        let snapshot = client.snapshot().await.unwrap();
        assert_eq!(snapshot.status, ExamStatus::Terminated);
        assert_eq!(client.active_module().await, None);
        assert!(matches!(
            client.enter_module(ModuleId::Listening).await,
            Err(ClientError::Exam(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn local_termination_survives_a_reload() {
        let (api, store, client) = setup();
        client.begin("BAC2500123", candidate()).await.unwrap();
        client.enter_module(ModuleId::Listening).await.unwrap();

        // the backend hears nothing of it
        api.fail_violation_calls(3);
        api.fail_terminate_calls(SUBMIT_ATTEMPTS);
        for _ in 0..3 {
            client.handle_signal(&Signal::VisibilityHidden).await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.calls(|c| c.terminate), SUBMIT_ATTEMPTS);
        assert_eq!(api.status(), Some(ExamStatus::InProgress));
        assert_eq!(store.get_json::<u32>(&keys::terminated("s-1")).unwrap(), Some(3));
        drop(client);

        let client = reload(&api, &store);
        let snapshot = client.resume().await.unwrap().expect("stored session");
        assert_eq!(snapshot.status, ExamStatus::Terminated);
        assert_eq!(snapshot.next_module, None);
        assert_eq!(client.violation_count().await, 3);
        assert!(matches!(
            client.enter_module(ModuleId::Listening).await,
            Err(ClientError::Exam(_))
        ));
        // further signals count for nothing
        assert!(!client.handle_signal(&Signal::VisibilityHidden).await.limit_reached);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.calls(|c| c.terminate), SUBMIT_ATTEMPTS + 1);
        assert_eq!(api.status(), Some(ExamStatus::Terminated));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_final_submission_is_retried_automatically() {
        let (api, store, client) = setup();
        let mut events = client.bus().subscribe();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        client.spawn_auto_submit(cancel_rx);
        client.begin("BAC2500123", candidate()).await.unwrap();

        api.fail_exam_calls(1);
        complete_all(&client).await;
        wait_for_submission(&mut events).await;

        assert_eq!(api.calls(|c| c.complete_exam), 2);
        assert!(store.get(&keys::submitted("s-1")).unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_submits_a_finished_exam() {
        let (api, store, client) = setup();
        client.begin("BAC2500123", candidate()).await.unwrap();
        complete_all(&client).await;
        api.fail_exam_calls(1);
        assert!(client.submit_exam().await.is_err());
        drop(client);

        let client = reload(&api, &store);
        let mut events = client.bus().subscribe();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let listener = client.spawn_auto_submit(cancel_rx);
        client.resume().await.unwrap();
        wait_for_submission(&mut events).await;
        assert_eq!(api.calls(|c| c.complete_exam), 2);

        cancel_tx.send(true).unwrap();
        listener.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn results_from_another_tab_are_picked_up() {
        let (_api, store, client) = setup();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        assert!(matches!(
            client.watch_store(Duration::from_millis(10), cancel_rx.clone()).await,
            Err(ClientError::NoSession)
        ));

        client.begin("BAC2500123", candidate()).await.unwrap();
        let mut events = client.bus().subscribe();
        client
            .watch_store(Duration::from_millis(10), cancel_rx)
            .await
            .unwrap();
        store
            .set(&keys::result("BAC2500123", ModuleId::Reading), json!({}))
            .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            ExamEvent::ModuleCompleted {
                session_id: "s-1".to_string(),
                module: ModuleId::Reading,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_submits_current_answers() {
        let (_api, store, client) = setup();
        client.begin("BAC2500123", candidate()).await.unwrap();
        let allowed = client.enter_module(ModuleId::Listening).await.unwrap();
        client.update_answers(objective(25)).await;

        tokio::time::sleep(allowed + Duration::from_secs(1)).await;

        let snapshot = client.snapshot().await.unwrap();
        assert_eq!(snapshot.completed_modules, vec![ModuleId::Listening]);
        assert_eq!(
            snapshot.scores[0].score,
            objective(25),
            "answers given before the timeout are kept"
        );
        assert!(
            store
                .get(&keys::result("BAC2500123", ModuleId::Listening))
                .unwrap()
                .is_some()
        );
        assert_eq!(client.active_module().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn exam_is_submitted_once() {
        let (api, store, client) = setup();
        client.begin("BAC2500123", candidate()).await.unwrap();
        complete_all(&client).await;

        let first = client.submit_exam().await.unwrap();
        assert!(matches!(first, Finalization::Submitted(_)));
        assert!(store.get(&keys::result("BAC2500123", ModuleId::Writing)).unwrap().is_none());
        assert!(store.get(&keys::submitted("s-1")).unwrap().is_some());

        let second = client.submit_exam().await.unwrap();
        assert!(matches!(second, Finalization::AlreadySubmitted(_)));
        assert_eq!(api.calls(|c| c.complete_exam), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_final_submission_keeps_local_results() {
        let (api, store, client) = setup();
        client.begin("BAC2500123", candidate()).await.unwrap();
        complete_all(&client).await;

        api.fail_exam_calls(1);
        assert!(client.submit_exam().await.is_err());
        for module in ModuleId::ORDER {
            assert!(store.get(&keys::result("BAC2500123", module)).unwrap().is_some());
        }
        assert!(store.get(&keys::submitted("s-1")).unwrap().is_none());

        assert!(matches!(
            client.submit_exam().await.unwrap(),
            Finalization::Submitted(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_results_are_never_submitted() {
        let (api, _store, client) = setup();
        client.begin("BAC2500123", candidate()).await.unwrap();
        client.enter_module(ModuleId::Listening).await.unwrap();
        client.complete_module(ModuleId::Listening, objective(30)).await.unwrap();

        assert_eq!(
            client.submit_exam().await.unwrap(),
            Finalization::Incomplete(vec![ModuleId::Reading, ModuleId::Writing])
        );
        assert_eq!(api.calls(|c| c.complete_exam), 0);
    }

    #[tokio::test]
    async fn logout_clears_the_store() {
        let (_api, store, client) = setup();
        client.begin("BAC2500123", candidate()).await.unwrap();
        client.logout().await.unwrap();
        assert!(store.keys().unwrap().is_empty());
        assert!(client.snapshot().await.is_none());
        assert!(client.resume().await.unwrap().is_none());
    }
}
