// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Long-lived agent sessions decoupled from WebSocket connections.
//!
//! A session outlives any client: events stream to the attached client when
//! one exists and are buffered otherwise, then replayed on attach.  Exactly
//! one client may be attached at a time; a new attach preempts the old one
//! with `session_taken`.  Sessions are keyed first under a temporary
//! `pending_<hex>` ID and rekeyed once the SDK discloses the real one.
//!
//! Lock order is registry → session. No path may hold a session's inner
//! mutex while acquiring the registry mutex.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::EventBuffer;
use crate::connection::ConnectionRegistry;
use crate::events::AgentEvent;
use crate::push::PushService;
use crate::runner;
use crate::sdk::{PermissionContext, PermissionDecision, PermissionHandler, SdkClient, SdkConnector};
use crate::tracker::BackgroundTaskTracker;

/// Events a session buffers while no client is attached.
pub const BUFFER_CAPACITY: usize = 100;

/// Timeouts governing session lifecycle.
#[derive(Debug, Clone)]
pub struct SessionTimings {
    /// Evict sessions whose `last_activity` is older than this.
    pub idle_timeout: Duration,
    /// Delay before an offline completion notification.
    pub grace_period: Duration,
    /// How long a mid-turn user prompt may stay unanswered.
    pub ask_user_timeout: Duration,
    /// Wall clock for a single turn.
    pub turn_timeout: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            grace_period: Duration::from_secs(5),
            ask_user_timeout: Duration::from_secs(55),
            turn_timeout: Duration::from_secs(600),
        }
    }
}

/// Outcome of submitting an ask-user response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskUserOutcome {
    Accepted,
    Invalid(String),
    Ignored,
    SessionTaken,
}

/// Answer payload completed by the attached client.
#[derive(Debug)]
pub struct AskUserAnswer {
    pub answers: serde_json::Map<String, serde_json::Value>,
    pub cancelled: bool,
}

/// Outstanding mid-turn user prompt.
struct PendingPrompt {
    question_id: String,
    /// The `ask_user_question` event, retained for replay on attach.
    event: AgentEvent,
    /// Completion side of the bridge; `None` once answered.
    answer_tx: Option<oneshot::Sender<AskUserAnswer>>,
    started_at: tokio::time::Instant,
}

/// Mutable per-session state, guarded by the session mutex.
struct SessionInner {
    session_id: String,
    buffer: EventBuffer,
    completed_at: Option<DateTime<Utc>>,
    last_event_type: Option<String>,
    /// Retained separately from the buffer so the terminal event survives
    /// overflow and is replayable on any later attach.
    last_terminal_event: Option<AgentEvent>,
    connected_client_id: Option<String>,
    is_processing: bool,
    replay_in_progress: bool,
    pending: Option<PendingPrompt>,
}

/// One long-lived session.
pub struct Session {
    inner: Mutex<SessionInner>,
    input_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    /// Epoch millis of the last activity; atomic so the idle scan can read
    /// it without taking the session mutex inside the registry mutex.
    last_activity_ms: AtomicI64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Current registry key for this session.
    pub async fn current_id(&self) -> String {
        self.inner.lock().await.session_id.clone()
    }

    fn touch(&self) {
        self.last_activity_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn last_activity(&self) -> DateTime<Utc> {
        let ms = self.last_activity_ms.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
    }
}

/// Replay bundle handed to the transport on attach.
pub struct AttachReplay {
    /// `session_status` snapshot taken under the session mutex.
    pub status: AgentEvent,
    /// Buffered events to replay, in order.
    pub events: Vec<AgentEvent>,
}

/// Registry and lifecycle manager for agent sessions.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    connections: Arc<ConnectionRegistry>,
    connector: Arc<dyn SdkConnector>,
    push: Arc<PushService>,
    tracker: Arc<BackgroundTaskTracker>,
    timings: SessionTimings,
}

impl SessionManager {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        connector: Arc<dyn SdkConnector>,
        push: Arc<PushService>,
        tracker: Arc<BackgroundTaskTracker>,
        timings: SessionTimings,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            connections,
            connector,
            push,
            tracker,
            timings,
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(session_id).map(Arc::clone)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Resume the session registered under `requested`, or create a new one
    /// keyed under a temporary `pending_<hex>` ID.
    pub async fn get_or_create(self: &Arc<Self>, requested: Option<String>) -> Arc<Session> {
        let mut sessions = self.sessions.lock().await;
        if let Some(ref requested) = requested {
            if let Some(existing) = sessions.get(requested) {
                existing.touch();
                info!(session_id = %requested, "resuming existing agent session");
                return Arc::clone(existing);
            }
        }

        info!(resume = ?requested, "creating new agent session");
        let temp_id = format!("pending_{}", uuid::Uuid::new_v4().simple());
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            inner: Mutex::new(SessionInner {
                session_id: temp_id.clone(),
                buffer: EventBuffer::new(BUFFER_CAPACITY),
                completed_at: None,
                last_event_type: None,
                last_terminal_event: None,
                connected_client_id: None,
                is_processing: false,
                replay_in_progress: false,
                pending: None,
            }),
            input_tx,
            cancel: CancellationToken::new(),
            last_activity_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            task: Mutex::new(None),
        });
        sessions.insert(temp_id, Arc::clone(&session));
        drop(sessions);

        let bridge = AskUserBridge {
            manager: Arc::downgrade(self),
            session: Arc::clone(&session),
        };
        let client = self.connector.connect(requested, Arc::new(bridge));

        let manager = Arc::clone(self);
        let task_session = Arc::clone(&session);
        let handle =
            tokio::spawn(async move { manager.process_loop(task_session, input_rx, client).await });
        *session.task.lock().await = Some(handle);

        session
    }

    // -- Input -----------------------------------------------------------------

    /// Queue a user message for processing. Never blocks on turn progress.
    pub async fn send_user_message(
        &self,
        session_id: &str,
        message: String,
        client_id: Option<&str>,
    ) -> bool {
        let Some(session) = self.get(session_id).await else {
            warn!(session_id = %session_id, "cannot send message to non-existent session");
            return false;
        };
        self.send_user_message_to(&session, message, client_id).await
    }

    /// Queue a user message on a session handle.
    pub async fn send_user_message_to(
        &self,
        session: &Arc<Session>,
        message: String,
        client_id: Option<&str>,
    ) -> bool {
        if let Some(client_id) = client_id {
            let active = session.inner.lock().await.connected_client_id.clone();
            if active.as_deref() != Some(client_id) {
                warn!(
                    client_id = %client_id,
                    active = ?active,
                    "rejected message from non-active client"
                );
                self.connections.send(client_id, AgentEvent::SessionTaken).await;
                self.connections.disconnect(client_id).await;
                return false;
            }
        }
        if session.input_tx.send(message).is_err() {
            return false;
        }
        session.touch();
        true
    }

    // -- Attach / detach / replay ----------------------------------------------

    /// Attach a client, preempting any previous one.
    ///
    /// Returns the `session_status` snapshot plus the events the transport
    /// must replay in order (buffer contents, then the retained terminal
    /// event and any pending question if not already present).
    pub async fn attach(&self, session: &Arc<Session>, client_id: &str) -> AttachReplay {
        session.touch();
        let (previous, status, mut events, terminal, pending_question) = {
            let mut inner = session.inner.lock().await;
            let previous = match inner.connected_client_id.as_deref() {
                Some(prev) if prev != client_id => Some(prev.to_owned()),
                _ => None,
            };
            inner.connected_client_id = Some(client_id.to_owned());
            inner.replay_in_progress = true;

            let status = status_snapshot(&inner, session.last_activity());
            let events = inner.buffer.drain();
            let terminal = match inner.last_event_type.as_deref() {
                Some("complete" | "error") => inner.last_terminal_event.clone(),
                _ => None,
            };
            let pending_question = inner
                .pending
                .as_ref()
                .filter(|p| p.answer_tx.is_some())
                .map(|p| p.event.clone());
            (previous, status, events, terminal, pending_question)
        };

        if let Some(terminal) = terminal {
            if !events.contains(&terminal) {
                events.push(terminal);
            }
        }
        if let Some(question) = pending_question {
            if !events.contains(&question) {
                events.push(question);
            }
        }

        if let Some(previous) = previous {
            info!(previous = %previous, client_id = %client_id, "kicking previous client");
            self.connections.send(&previous, AgentEvent::SessionTaken).await;
            self.connections.disconnect(&previous).await;
        }

        debug!(client_id = %client_id, buffered = events.len(), "client attached");
        AttachReplay { status, events }
    }

    /// Flush events that arrived during replay, then resume live dispatch.
    ///
    /// Loops because flushing happens outside the session mutex: anything
    /// buffered while a batch was on the wire is sent in the next pass. The
    /// replay flag is only cleared when the buffer is empty and this client
    /// is still the attached one.
    pub async fn finish_replay(&self, session: &Arc<Session>, client_id: &str) {
        loop {
            let pending = {
                let mut inner = session.inner.lock().await;
                if inner.connected_client_id.as_deref() != Some(client_id) {
                    inner.replay_in_progress = false;
                    return;
                }
                if inner.buffer.is_empty() {
                    inner.replay_in_progress = false;
                    return;
                }
                inner.buffer.drain()
            };
            for event in pending {
                self.connections.send(client_id, event).await;
            }
        }
    }

    /// Detach a client. The session keeps running and buffers events.
    pub async fn detach(&self, session: &Arc<Session>, client_id: &str) {
        let mut inner = session.inner.lock().await;
        if inner.connected_client_id.as_deref() == Some(client_id) {
            inner.connected_client_id = None;
            inner.replay_in_progress = false;
            debug!(client_id = %client_id, session_id = %inner.session_id, "client detached");
        }
    }

    /// Current `session_status` snapshot.
    pub async fn status(&self, session: &Arc<Session>) -> AgentEvent {
        let inner = session.inner.lock().await;
        status_snapshot(&inner, session.last_activity())
    }

    // -- Ask-user bridge -------------------------------------------------------

    /// Complete a pending ask-user prompt.
    pub async fn submit_ask_user_response(
        &self,
        session_id: &str,
        question_id: &str,
        answers: serde_json::Map<String, serde_json::Value>,
        cancelled: bool,
        client_id: Option<&str>,
    ) -> AskUserOutcome {
        let Some(session) = self.get(session_id).await else {
            warn!(session_id = %session_id, "ask-user response for unknown session");
            return AskUserOutcome::Ignored;
        };
        self.submit_ask_user_response_to(&session, question_id, answers, cancelled, client_id)
            .await
    }

    pub async fn submit_ask_user_response_to(
        &self,
        session: &Arc<Session>,
        question_id: &str,
        answers: serde_json::Map<String, serde_json::Value>,
        cancelled: bool,
        client_id: Option<&str>,
    ) -> AskUserOutcome {
        if let Some(client_id) = client_id {
            let active = session.inner.lock().await.connected_client_id.clone();
            if active.as_deref() != Some(client_id) {
                warn!(client_id = %client_id, "rejected ask-user response from non-active client");
                self.connections.send(client_id, AgentEvent::SessionTaken).await;
                self.connections.disconnect(client_id).await;
                return AskUserOutcome::SessionTaken;
            }
        }

        let tx = {
            let mut inner = session.inner.lock().await;
            let Some(pending) = inner.pending.as_mut() else {
                return AskUserOutcome::Ignored;
            };
            if pending.question_id != question_id {
                return AskUserOutcome::Invalid(
                    "Question ID does not match pending question".to_owned(),
                );
            }
            if pending.answer_tx.is_none() {
                return AskUserOutcome::Ignored;
            }
            if !cancelled {
                if let Some(error) = validate_answers(&answers) {
                    return AskUserOutcome::Invalid(error);
                }
            }
            pending.answer_tx.take()
        };

        if let Some(tx) = tx {
            let _ = tx.send(AskUserAnswer { answers, cancelled });
        }
        AskUserOutcome::Accepted
    }

    /// Bridge an `AskUserQuestion` tool request to the attached client.
    async fn handle_ask_user_question(
        &self,
        session: &Arc<Session>,
        tool_input: serde_json::Value,
    ) -> PermissionDecision {
        let questions: Vec<serde_json::Value> = tool_input
            .get("questions")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter(|v| v.is_object()).cloned().collect())
            .unwrap_or_default();

        let question_id = format!("q_{}", uuid::Uuid::new_v4().simple());
        let timeout_seconds = self.timings.ask_user_timeout.as_secs();
        let event = AgentEvent::AskUserQuestion {
            question_id: question_id.clone(),
            questions: questions.clone(),
            timeout_seconds,
        };

        let (answer_tx, answer_rx) = oneshot::channel();
        {
            let mut inner = session.inner.lock().await;
            if inner.pending.as_ref().is_some_and(|p| p.answer_tx.is_some()) {
                return PermissionDecision::deny(
                    "Another user question is already pending",
                    true,
                );
            }
            inner.pending = Some(PendingPrompt {
                question_id: question_id.clone(),
                event: event.clone(),
                answer_tx: Some(answer_tx),
                started_at: tokio::time::Instant::now(),
            });
        }

        self.dispatch_event(session, event).await;
        info!(question_id = %question_id, timeout_seconds, "ask_user_question sent");

        let response = tokio::time::timeout(self.timings.ask_user_timeout, answer_rx).await;
        let duration = {
            let inner = session.inner.lock().await;
            inner.pending.as_ref().map(|p| p.started_at.elapsed())
        };

        match response {
            Err(_) => {
                self.dispatch_event(
                    session,
                    AgentEvent::AskUserTimeout {
                        question_id: question_id.clone(),
                        error: "User response timed out".to_owned(),
                    },
                )
                .await;
                self.clear_pending(session, &question_id).await;
                info!(question_id = %question_id, duration = ?duration, "ask_user timeout");
                PermissionDecision::deny("User response timeout", true)
            }
            Ok(Err(_)) => {
                // Answer sender dropped during session teardown.
                self.clear_pending(session, &question_id).await;
                PermissionDecision::deny("Session closed", true)
            }
            Ok(Ok(answer)) => {
                self.clear_pending(session, &question_id).await;
                info!(question_id = %question_id, duration = ?duration, "ask_user answer received");
                if answer.cancelled {
                    return PermissionDecision::deny("User cancelled question", true);
                }
                let normalized = normalize_answers(answer.answers);
                let mut updated_input = match tool_input {
                    serde_json::Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                updated_input
                    .insert("questions".to_owned(), serde_json::Value::Array(questions));
                updated_input.insert("answers".to_owned(), serde_json::Value::Object(normalized));
                PermissionDecision::Allow {
                    updated_permissions: None,
                    updated_input: Some(serde_json::Value::Object(updated_input)),
                }
            }
        }
    }

    async fn clear_pending(&self, session: &Arc<Session>, question_id: &str) {
        let mut inner = session.inner.lock().await;
        if inner.pending.as_ref().is_some_and(|p| p.question_id == question_id) {
            inner.pending = None;
        }
    }

    // -- Processing loop -------------------------------------------------------

    async fn process_loop(
        self: Arc<Self>,
        session: Arc<Session>,
        mut input_rx: mpsc::UnboundedReceiver<String>,
        client: Arc<dyn SdkClient>,
    ) {
        info!("agent processing loop started");
        'outer: loop {
            let user_message = tokio::select! {
                _ = session.cancel.cancelled() => break 'outer,
                message = input_rx.recv() => match message {
                    Some(message) => message,
                    None => break 'outer,
                },
            };

            session.inner.lock().await.is_processing = true;
            let mut events =
                runner::spawn_turn(Arc::clone(&client), user_message, self.timings.turn_timeout);

            loop {
                let event = tokio::select! {
                    // Leave is_processing set: cleanup uses it to detect a
                    // turn cancelled before its terminal event.
                    _ = session.cancel.cancelled() => break 'outer,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                if let AgentEvent::SessionId { ref session_id } = event {
                    self.rekey(&session, session_id).await;
                }
                session.touch();
                let completed = matches!(event, AgentEvent::Complete { .. });
                self.dispatch_event(&session, event).await;
                if completed {
                    self.handle_completion(&session).await;
                }
            }

            session.inner.lock().await.is_processing = false;
        }

        self.cleanup_session(&session, client).await;
    }

    /// Send to the attached client, or buffer.
    ///
    /// Terminal events are retained in `last_terminal_event` instead of the
    /// detached-session buffer, so overflow can never evict them and a later
    /// attach replays them exactly once. During an in-progress replay the
    /// terminal goes into the buffer as well: the replay flush is the only
    /// remaining path to the already-attached client.
    async fn dispatch_event(&self, session: &Arc<Session>, event: AgentEvent) {
        session.touch();
        let target = {
            let mut inner = session.inner.lock().await;
            inner.last_event_type = Some(event.event_type().to_owned());
            let terminal = matches!(event, AgentEvent::Complete { .. } | AgentEvent::Error { .. });
            if terminal {
                inner.completed_at = Some(Utc::now());
                inner.last_terminal_event = Some(event.clone());
            }
            match inner.connected_client_id.clone() {
                Some(client_id) if !inner.replay_in_progress => Some((client_id, terminal)),
                attached => {
                    if !terminal || attached.is_some() {
                        inner.buffer.append(event);
                    }
                    return;
                }
            }
        };

        if let Some((client_id, terminal)) = target {
            if !self.connections.send(&client_id, event.clone()).await {
                warn!(client_id = %client_id, "failed to send to client, buffering");
                if !terminal {
                    session.inner.lock().await.buffer.append(event);
                }
            }
        }
    }

    /// Grace-period routine for a `complete` with no attached client.
    ///
    /// Sleeps, re-checks, and pushes an offline notification if still
    /// disconnected. Never terminates the session: it stays registered for
    /// reconnection until the idle timeout.
    async fn handle_completion(&self, session: &Arc<Session>) {
        let connected = session.inner.lock().await.connected_client_id.is_some();
        if connected {
            return;
        }

        info!(
            grace_seconds = self.timings.grace_period.as_secs(),
            "response complete with no client, delaying notification"
        );
        tokio::select! {
            _ = session.cancel.cancelled() => return,
            _ = tokio::time::sleep(self.timings.grace_period) => {}
        }

        let (still_disconnected, session_id, terminal) = {
            let inner = session.inner.lock().await;
            (
                inner.connected_client_id.is_none(),
                inner.session_id.clone(),
                inner.last_terminal_event.clone(),
            )
        };
        if !still_disconnected {
            return;
        }

        let mut data = serde_json::json!({
            "type": "chat_complete",
            "session_id": session_id,
            "status": "success",
            "deeplink_url": format!("prime://chat/session/{session_id}"),
        });
        if let Some(AgentEvent::Complete { status, cost_usd, duration_ms }) = terminal {
            data["status"] = serde_json::Value::String(status);
            if let Some(cost_usd) = cost_usd {
                data["costUsd"] = serde_json::json!(cost_usd);
            }
            if let Some(duration_ms) = duration_ms {
                data["durationMs"] = serde_json::json!(duration_ms);
            }
        }

        match self
            .push
            .send_notification(
                "Chat response ready",
                "Your chat response is complete.",
                Some(data),
                None,
            )
            .await
        {
            Ok(summary) => {
                info!(
                    session_id = %session_id,
                    sent = summary.sent,
                    failed = summary.failed,
                    invalid_tokens_removed = summary.invalid_tokens_removed,
                    "chat completion notification sent"
                );
                self.tracker.record_success("chat_completion_push").await;
            }
            Err(e) => {
                warn!(session_id = %session_id, err = %e, "failed to send completion notification");
                self.tracker.record_failure("chat_completion_push", &e).await;
            }
        }
    }

    /// Re-register the session under the SDK-assigned ID.
    async fn rekey(&self, session: &Arc<Session>, new_id: &str) {
        let old_id = session.current_id().await;
        if old_id == new_id {
            return;
        }

        let collision = {
            let mut sessions = self.sessions.lock().await;
            if sessions.get(&old_id).is_some_and(|s| Arc::ptr_eq(s, session)) {
                sessions.remove(&old_id);
            }
            let collision = match sessions.get(new_id) {
                Some(existing) if !Arc::ptr_eq(existing, session) => sessions.remove(new_id),
                _ => None,
            };
            session.inner.lock().await.session_id = new_id.to_owned();
            sessions.insert(new_id.to_owned(), Arc::clone(session));
            collision
        };

        info!(old_id = %old_id, new_id = %new_id, "session rekeyed");
        if let Some(colliding) = collision {
            warn!(session_id = %new_id, "session ID collision, terminating prior session");
            self.terminate_instance(&colliding).await;
        }
    }

    // -- Termination & cleanup -------------------------------------------------

    /// Cancel the processing task, join it, and remove the session.
    /// Idempotent.
    pub async fn terminate(&self, session_id: &str) {
        let Some(session) = self.get(session_id).await else {
            return;
        };
        self.terminate_instance(&session).await;
    }

    async fn terminate_instance(&self, session: &Arc<Session>) {
        session.cancel.cancel();
        let handle = session.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Concurrently terminate every session (shutdown path).
    pub async fn terminate_all(&self) {
        let sessions: Vec<Arc<Session>> =
            self.sessions.lock().await.values().map(Arc::clone).collect();
        let count = sessions.len();
        futures_util::future::join_all(
            sessions.iter().map(|session| self.terminate_instance(session)),
        )
        .await;
        info!(count, "terminated all sessions");
    }

    /// Resource release when the processing loop exits, on every path.
    async fn cleanup_session(&self, session: &Arc<Session>, client: Arc<dyn SdkClient>) {
        let session_id = session.current_id().await;
        {
            let mut sessions = self.sessions.lock().await;
            if sessions.get(&session_id).is_some_and(|s| Arc::ptr_eq(s, session)) {
                sessions.remove(&session_id);
            }
        }

        let (client_id, mid_turn) = {
            let mut inner = session.inner.lock().await;
            if let Some(pending) = inner.pending.as_mut() {
                // Dropping the sender wakes the bridge with a deny.
                pending.answer_tx = None;
            }
            inner.replay_in_progress = false;
            let mid_turn = inner.is_processing;
            inner.is_processing = false;
            (inner.connected_client_id.take(), mid_turn)
        };

        if let Some(client_id) = client_id {
            if mid_turn {
                // The client never saw a terminal event for the cancelled turn.
                self.connections
                    .send(
                        &client_id,
                        AgentEvent::Error {
                            error: "Session terminated".to_owned(),
                            is_permanent: Some(true),
                        },
                    )
                    .await;
            }
            self.connections.disconnect(&client_id).await;
        }

        client.close().await;
        info!(session_id = %session_id, "session terminated");
    }

    // -- Idle eviction ---------------------------------------------------------

    /// Terminate sessions idle longer than the timeout. Enumerates under the
    /// registry mutex, terminates outside it.
    pub async fn cleanup_idle_once(&self) -> usize {
        let cutoff = Utc::now().timestamp_millis()
            - self.timings.idle_timeout.as_millis() as i64;
        let stale: Vec<String> = {
            let sessions = self.sessions.lock().await;
            sessions
                .iter()
                .filter(|(_, s)| s.last_activity_ms.load(Ordering::Relaxed) < cutoff)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for session_id in &stale {
            info!(session_id = %session_id, "session timed out");
            self.terminate(session_id).await;
        }
        stale.len()
    }

    /// Background eviction loop; one scan per minute.
    pub fn spawn_cleanup_loop(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                manager.cleanup_idle_once().await;
            }
            info!("session cleanup loop stopped");
        })
    }
}

/// Session summary, snapshotted under the session mutex.
fn status_snapshot(inner: &SessionInner, last_activity: DateTime<Utc>) -> AgentEvent {
    AgentEvent::SessionStatus {
        buffered_count: inner.buffer.len(),
        completed_at: inner.completed_at.map(|t| t.to_rfc3339()),
        last_activity: last_activity.to_rfc3339(),
        last_event_type: inner.last_event_type.clone(),
        is_processing: inner.is_processing,
        waiting_for_user: inner.pending.as_ref().is_some_and(|p| p.answer_tx.is_some()),
        pending_question_id: inner.pending.as_ref().map(|p| p.question_id.clone()),
    }
}

/// Answer values must be strings or lists of strings.
fn validate_answers(
    answers: &serde_json::Map<String, serde_json::Value>,
) -> Option<String> {
    for value in answers.values() {
        match value {
            serde_json::Value::String(_) => {}
            serde_json::Value::Array(items) => {
                if !items.iter().all(|item| item.is_string()) {
                    return Some("Answer list values must be strings".to_owned());
                }
            }
            _ => return Some("Answer values must be strings".to_owned()),
        }
    }
    None
}

/// List answers join on ", "; scalars pass through.
fn normalize_answers(
    answers: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    let mut normalized = serde_json::Map::new();
    for (question, value) in answers {
        let joined = match value {
            serde_json::Value::Array(items) => {
                let parts: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
                serde_json::Value::String(parts.join(", "))
            }
            other => other,
        };
        normalized.insert(question, joined);
    }
    normalized
}

/// Permission handler bound to one session.
///
/// All tools except `AskUserQuestion` are allowed with the SDK's suggested
/// permission updates; ask-user requests block on the attached client
/// through a one-shot bridge.
struct AskUserBridge {
    manager: Weak<SessionManager>,
    session: Arc<Session>,
}

impl PermissionHandler for AskUserBridge {
    fn can_use_tool(
        &self,
        tool_name: String,
        tool_input: serde_json::Value,
        context: PermissionContext,
    ) -> Pin<Box<dyn Future<Output = PermissionDecision> + Send + '_>> {
        Box::pin(async move {
            if tool_name != "AskUserQuestion" {
                return PermissionDecision::Allow {
                    updated_permissions: Some(context.suggestions),
                    updated_input: None,
                };
            }
            let Some(manager) = self.manager.upgrade() else {
                return PermissionDecision::deny("Session manager stopped", true);
            };
            manager.handle_ask_user_question(&self.session, tool_input).await
        })
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
