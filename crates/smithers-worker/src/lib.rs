// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Background coordination surface that drives the agent run state machine
//! against the durable [`Store`] and exposes a poll-friendly contract to a
//! foreground observer (the TUI or any other frontend).
//!
//! The agent itself (model, tools, mode) is owned behind a single
//! `tokio::sync::Mutex` — matching the "one shared mutex" discipline the
//! coordination surface is specified against. `should_stop`, `state_changed`
//! and `busy` are plain atomics so the foreground can read them without
//! awaiting a lock. `tokio::sync::Notify` stands in for a condition
//! variable: unlike `std::sync::Condvar` it can be awaited without blocking
//! an OS thread, which is the only way to honor "never hold the mutex
//! across a blocking syscall" inside an async runtime. The [`Store`] handle
//! is cheap and internally synchronized (`Arc<std::sync::Mutex<..>>`), so it
//! is cloned freely rather than routed through the worker's own mutex.
//!
//! One call to [`Agent::submit_with_cancel`] already runs an entire user
//! turn — streaming, tool dispatch, and any continuation rounds — as a
//! single cooperatively-scheduled `async fn`; every `.await` inside it
//! (stream poll, tool executor poll) is already a non-blocking suspension
//! point. The worker's "tick" therefore operates at the granularity of one
//! dequeued pending message rather than one wire event: it dequeues, holds
//! the agent mutex for the duration of the turn (this *is* the "busy"
//! state), and drains the turn's `AgentEvent` stream into the store
//! concurrently so every phase transition is durable as it happens. See
//! `DESIGN.md` for why this collapses the phase list without losing any
//! of its guarantees.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn, Instrument};

use smithers_core::{Agent, AgentEvent};
use smithers_store::{AddMessageOptions, Message as StoreMessage, RunStatus, Store};

/// How long the worker blocks on its `Notify` while idle. Bounded so
/// `should_stop` keeps being observed promptly even if nobody signals.
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Maximum characters kept in a human-visible "tool result" system message;
/// the continuation request sent to the provider still gets the full
/// content; truncation is purely a display-layer concern.
const TOOL_RESULT_DISPLAY_LIMIT: usize = 4000;

/// System message appended when a run is found active at startup.
pub const INTERRUPTED_NOTICE: &str = "Previous agent run was interrupted. Starting fresh.";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] smithers_store::StoreError),
    #[error("agent turn failed: {0}")]
    Agent(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;

/// Reconcile a store that may contain a run left active by an unclean
/// shutdown. Marks it `error` and appends exactly one system message
/// explaining the interruption. A no-op if no run is active.
///
/// Call once per session before starting the worker loop. The richer
/// "resume from `current_tool_idx`" policy is deliberately not implemented:
/// the stored
/// `pending_tools`/`tool_results` fields are left untouched for forensics,
/// but resumption always starts fresh (see DESIGN.md).
pub fn recover_session(store: &Store, session_id: i64) -> Result<()> {
    if let Some(run) = store.active_run(session_id)? {
        warn!(run_id = run.id, session_id, "recovering interrupted agent run");
        store.fail_run(run.id)?;
        store.add_message(
            session_id,
            smithers_store::Role::System,
            INTERRUPTED_NOTICE,
            AddMessageOptions::default(),
        )?;
    }
    Ok(())
}

/// The agent plus its cancel slot, behind the worker's single mutex.
struct Shared {
    agent: Agent,
    cancel: Option<oneshot::Sender<()>>,
}

/// Background worker owning the agent run state machine for one session.
///
/// Constructed with an already-built [`Agent`] (model, tools and mode are
/// bootstrap concerns, not the coordination surface's) and a [`Store`]
/// handle. [`Worker::spawn`] starts the loop as a `tokio` task and returns a
/// cheap, cloneable [`WorkerHandle`] the foreground uses to enqueue input,
/// cancel, and poll `state_changed`.
pub struct Worker {
    shared: Arc<Mutex<Shared>>,
    store: Store,
    session_id: i64,
    should_stop: Arc<AtomicBool>,
    state_changed: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl Worker {
    pub fn new(store: Store, agent: Agent, session_id: i64) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared { agent, cancel: None })),
            store,
            session_id,
            should_stop: Arc::new(AtomicBool::new(false)),
            state_changed: Arc::new(AtomicBool::new(false)),
            busy: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Start the background loop and return a handle to it plus the
    /// `JoinHandle` of the spawned task (mainly useful for tests that want
    /// to await clean shutdown).
    pub fn spawn(self) -> (WorkerHandle, JoinHandle<()>) {
        let handle = WorkerHandle {
            shared: self.shared.clone(),
            store: self.store.clone(),
            session_id: self.session_id,
            should_stop: self.should_stop.clone(),
            state_changed: self.state_changed.clone(),
            busy: self.busy.clone(),
            notify: self.notify.clone(),
        };
        let join = tokio::spawn(run_loop(
            self.shared,
            self.store,
            self.session_id,
            self.should_stop,
            self.state_changed,
            self.busy,
            self.notify,
        ));
        (handle, join)
    }
}

/// Handle to a running [`Worker`]. Cheap to clone; every clone shares the
/// same mutex, atomics, and notify.
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<Mutex<Shared>>,
    store: Store,
    session_id: i64,
    should_stop: Arc<AtomicBool>,
    state_changed: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl WorkerHandle {
    /// Enqueue a user message as `pending` and wake the worker. Returns the
    /// new message's row id (its `entry_id` is assigned only once the
    /// worker dequeues it, via `mark_sent`).
    pub fn submit(&self, content: &str) -> Result<i64> {
        let id = self
            .store
            .enqueue_pending(self.session_id, smithers_store::Role::User, content)?;
        self.notify.notify_one();
        Ok(id)
    }

    /// Cooperatively cancel the in-flight turn, if any. A no-op while idle.
    pub async fn cancel(&self) {
        let mut guard = self.shared.lock().await;
        if let Some(tx) = guard.cancel.take() {
            let _ = tx.send(());
        }
    }

    /// Atomically consume the `state_changed` flag: returns `true` and
    /// clears it if it was set, `false` otherwise. The foreground calls this
    /// once per redraw tick to decide whether to reload from the store.
    pub fn consume_state_changed(&self) -> bool {
        self.state_changed.swap(false, Ordering::AcqRel)
    }

    /// Signal the worker loop to exit after its current tick.
    pub fn stop(&self) {
        self.should_stop.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// `true` while a turn is in flight (streaming, tool dispatch, or a
    /// continuation round). Lock-free.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    shared: Arc<Mutex<Shared>>,
    store: Store,
    session_id: i64,
    should_stop: Arc<AtomicBool>,
    state_changed: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
) {
    loop {
        if should_stop.load(Ordering::Acquire) {
            debug!("coordination worker stopping");
            return;
        }

        // Work is available iff a pending message exists (the
        // in-flight-stream / in-flight-tool cases collapse into one
        // `busy`-gated `submit_with_cancel` call, see module docs).
        let next_pending = match store.next_pending(session_id) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "store error while polling pending queue");
                None
            }
        };

        match next_pending {
            Some(msg) => {
                busy.store(true, Ordering::Release);
                if let Err(e) = run_one_turn(&shared, &store, session_id, msg).await {
                    warn!(error = %e, "agent turn ended in error");
                }
                busy.store(false, Ordering::Release);
                state_changed.store(true, Ordering::Release);
            }
            None => {
                // Wait for a wake-up (new pending message, cancel, stop) or
                // the bounded timeout, whichever comes first.
                let _ = timeout(IDLE_WAIT, notify.notified()).await;
            }
        }
    }
}

/// Dequeue → stream → persist, one user message's worth of agent run.
///
/// Walks the run through `pending` → `streaming` → (`tools` ⇄
/// `continuing`)* → `complete`/`error`, mirroring every transition into the
/// `agent_runs` row as it happens so a crash mid-turn leaves a reconcilable
/// row behind (see [`recover_session`]).
async fn run_one_turn(
    shared: &Arc<Mutex<Shared>>,
    store: &Store,
    session_id: i64,
    pending: StoreMessage,
) -> Result<()> {
    store.mark_sent(pending.id)?;
    let run_id = store.create_run(session_id)?;
    store.set_status(run_id, RunStatus::Streaming)?;

    let (tx, rx) = mpsc::channel::<AgentEvent>(256);
    let (cancel_tx, cancel_rx) = oneshot::channel();

    let mut guard = shared.lock().await;
    guard.cancel = Some(cancel_tx);

    // Drain the turn's events into the store concurrently with the agent
    // loop itself; `store` is a cheap clone so the drain task never
    // contends with `shared`.
    let drain_store = store.clone();
    let drain = tokio::spawn(drain_events(drain_store, session_id, run_id, pending.id, rx));

    // Holding the mutex guard across this await is the point: it *is* the
    // "busy" state for anyone else who might try to touch the agent, and
    // `tokio::sync::Mutex` (unlike `std::sync::Mutex`) is designed to be
    // held across `.await`.
    let result = guard
        .agent
        .submit_with_cancel(&pending.content, tx, cancel_rx)
        .instrument(tracing::info_span!("agent_run", trace_id = %run_id))
        .await;
    guard.cancel = None;
    drop(guard);

    // `tx` was moved into `submit_with_cancel` and dropped when it
    // returned, closing the channel and letting `drain_events` finish.
    let _ = drain.await;

    match &result {
        Ok(()) => store.complete_run(run_id)?,
        Err(_) => store.fail_run(run_id)?,
    }
    result.map_err(WorkerError::Agent)
}

/// Persist one turn's `AgentEvent` stream into the store as it arrives.
///
/// Text deltas update a single streaming
/// assistant placeholder message (cursor glyph while in progress, stripped
/// on completion or replaced with "No response" if the turn produced
/// neither text nor tool calls), tool starts/finishes become the
/// "🔧 Executing: …" / "✓ …" system messages, and `RunStatus` flips between
/// `Tools` and `Continuing` around each tool boundary.
async fn drain_events(
    store: Store,
    session_id: i64,
    run_id: i64,
    first_kept_msg_id: i64,
    mut rx: mpsc::Receiver<AgentEvent>,
) {
    const CURSOR: &str = "▌";
    let mut placeholder_id: Option<i64> = None;
    let mut accumulated = String::new();
    let mut saw_tool_call = false;
    let mut pending_tools: Vec<serde_json::Value> = Vec::new();
    let mut tool_results: Vec<serde_json::Value> = Vec::new();

    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::TextDelta(delta) => {
                accumulated.push_str(&delta);
                let display = format!("{accumulated}{CURSOR}");
                match placeholder_id {
                    Some(id) => {
                        let _ = store.update_message_content(id, &display);
                    }
                    None => {
                        if let Ok((id, _)) = store.add_message(
                            session_id,
                            smithers_store::Role::Assistant,
                            &display,
                            AddMessageOptions::default(),
                        ) {
                            placeholder_id = Some(id);
                        }
                    }
                }
            }
            AgentEvent::TextComplete(full) => {
                accumulated = full.clone();
                let content = serde_json::json!([{ "type": "text", "text": full }]);
                let _ = store.set_assistant_content(run_id, &content.to_string());
            }
            AgentEvent::ToolCallStarted(call) => {
                saw_tool_call = true;
                let _ = store.set_status(run_id, RunStatus::Tools);
                // Durable counterpart of the in-memory `tool_use` content
                // block, recorded before the "Executing" notice so the
                // transcript shows the assistant's call, not just its effect.
                let _ = store.add_tool_call(session_id, &call.name, &call.args.to_string());
                let _ = store.add_message(
                    session_id,
                    smithers_store::Role::System,
                    &format!("🔧 Executing: {}", call.name),
                    AddMessageOptions::default(),
                );
                pending_tools.push(serde_json::json!({
                    "id": call.id,
                    "name": call.name,
                    "args": call.args,
                }));
                let _ = store.set_tools(
                    run_id,
                    &serde_json::Value::Array(pending_tools.clone()).to_string(),
                    (pending_tools.len() - 1) as i64,
                );
            }
            AgentEvent::ToolCallFinished {
                call_id,
                tool_name,
                output,
                is_error,
            } => {
                let mut display = output.clone();
                if display.len() > TOOL_RESULT_DISPLAY_LIMIT {
                    display.truncate(TOOL_RESULT_DISPLAY_LIMIT);
                    display.push_str("\n… (truncated)");
                }
                let marker = if is_error { "✗" } else { "✓" };
                let _ = store.add_tool_result(
                    session_id,
                    &tool_name,
                    "",
                    &format!("{marker} {tool_name}:\n{display}"),
                );
                tool_results.push(serde_json::json!({
                    "call_id": call_id,
                    "tool_name": tool_name,
                    "output": output,
                    "is_error": is_error,
                }));
                let _ = store.set_results(
                    run_id,
                    &serde_json::Value::Array(tool_results.clone()).to_string(),
                );
                let _ = store.set_status(run_id, RunStatus::Continuing);
            }
            AgentEvent::ContextCompacted {
                summary,
                tokens_before,
                ..
            } => {
                if !summary.is_empty() {
                    let _ = store.create_compaction(
                        session_id,
                        &summary,
                        first_kept_msg_id,
                        tokens_before as i64,
                        None,
                    );
                }
            }
            AgentEvent::TurnComplete => {
                finalize_placeholder(&store, &mut placeholder_id, &accumulated, saw_tool_call, session_id);
            }
            AgentEvent::Error(msg) => {
                let _ = store.add_message(
                    session_id,
                    smithers_store::Role::System,
                    &format!("Error: {msg}"),
                    AddMessageOptions::default(),
                );
            }
            AgentEvent::Aborted { partial_text } => {
                accumulated = partial_text;
                finalize_placeholder(&store, &mut placeholder_id, &accumulated, saw_tool_call, session_id);
                let _ = store.add_message(
                    session_id,
                    smithers_store::Role::System,
                    "Interrupted",
                    AddMessageOptions::default(),
                );
            }
            // Thinking deltas, token usage, todo/mode/question events are
            // display-layer concerns the foreground reads straight off the
            // live `AgentEvent` stream (the TUI subscribes independently);
            // the durable store only needs the chat-visible transcript.
            _ => {}
        }
    }

    // Stream ended without an explicit TurnComplete/Aborted (e.g. the
    // channel was simply dropped) — still finalize so no placeholder is
    // left with a dangling cursor.
    if placeholder_id.is_some() && accumulated.is_empty() {
        finalize_placeholder(&store, &mut placeholder_id, &accumulated, saw_tool_call, session_id);
    }
}

fn finalize_placeholder(
    store: &Store,
    placeholder_id: &mut Option<i64>,
    accumulated: &str,
    saw_tool_call: bool,
    session_id: i64,
) {
    match placeholder_id.take() {
        Some(id) => {
            let _ = store.update_message_content(id, accumulated);
        }
        None if !saw_tool_call && accumulated.is_empty() => {
            let _ = store.add_message(
                session_id,
                smithers_store::Role::Assistant,
                "No response",
                AddMessageOptions::default(),
            );
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recover_session_is_noop_without_active_run() {
        let store = Store::open(None).unwrap();
        let session_id = store.current_session().unwrap().id;
        recover_session(&store, session_id).unwrap();
        assert!(store.get_messages(session_id).unwrap().is_empty());
    }

    #[test]
    fn recover_session_fails_active_run_and_appends_notice() {
        let store = Store::open(None).unwrap();
        let session_id = store.current_session().unwrap().id;
        let run_id = store.create_run(session_id).unwrap();
        store.set_status(run_id, RunStatus::Tools).unwrap();

        recover_session(&store, session_id).unwrap();

        let run = store.get_run(run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Error);

        let messages = store.get_messages(session_id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, INTERRUPTED_NOTICE);

        // Idempotent: recovering again with no active run left is a no-op.
        recover_session(&store, session_id).unwrap();
        assert_eq!(store.get_messages(session_id).unwrap().len(), 1);
    }

    #[test]
    fn worker_handle_submit_enqueues_pending_message() {
        let store = Store::open(None).unwrap();
        let session_id = store.current_session().unwrap().id;
        assert!(!store.has_pending(session_id).unwrap());
        store
            .enqueue_pending(session_id, smithers_store::Role::User, "hello")
            .unwrap();
        assert!(store.has_pending(session_id).unwrap());
        let next = store.next_pending(session_id).unwrap().unwrap();
        assert_eq!(next.content, "hello");
    }
}
