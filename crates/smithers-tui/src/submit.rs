// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Unified user-input submission path — documentation and integration tests.
//!
//! # Message Lifecycle
//!
//! The journey from "user presses Enter" to "agent receives a message with the
//! correct model configured" passes through the following steps:
//!
//! **Step 1** — `handle_term_event` / `Action::Submit`
//!   (`app/term_events.rs` → `dispatch()`)
//!   Takes the trimmed input buffer and calls `App::submit_user_input()`.
//!
//! **Step 2** — `App::submit_user_input()`
//!   Dispatches slash commands via `dispatch_command()` (staging model/mode
//!   overrides into `SessionState`) or falls through to the plain-text path.
//!
//! **Step 3** — `App::enqueue_or_send_text()`
//!   Calls `SessionState::consume_staged()` which promotes the staged model to
//!   `model_display` (status bar reflects switch immediately) and returns
//!   `(model_cfg, mode)` for the `QueuedMessage`.
//!
//! **Step 4** — `QueuedMessage` construction
//!   If the agent is busy, the message is pushed to `App::queued`.
//!   If the agent is idle, `App::send_resubmit_to_agent()` is called directly.
//!
//! **Step 5** — `App::send_resubmit_to_agent()`
//!   Sends `AgentRequest::Resubmit { messages, new_user_content, model_override }`
//!   to the background agent task via `agent_tx`.  The staged `AgentMode` only
//!   affects `SessionState` (status bar / slash-command resolution) — it has no
//!   effect on the underlying agent loop, so it is not forwarded on the channel.
//!
//! **Step 6** — `agent_task` loop
//!   (`agent.rs`)
//!   Receives `AgentRequest::Resubmit`.  Resolves `model_override` to a
//!   `Arc<dyn ModelProvider>` via `smithers_model::from_config` and calls
//!   `agent.set_model()`.
//!
//! **Step 7** — `agent.replace_history_and_submit_with_cancel()`
//!   (`smithers-core/src/agent.rs`)
//!   Replaces the agent's conversation history, appends the new user message,
//!   and runs the agentic loop.
//!
//! # Implementation Location
//!
//! The `submit_user_input`, `enqueue_or_send_text`, `send_to_agent`,
//! `send_resubmit_to_agent`, and `try_dequeue_next` methods live in this module.

use smithers_model::Message;

use crate::{
    agent::AgentRequest,
    app::{App, FocusPane, ModelDirective, QueuedMessage},
    chat::segment::{messages_for_resubmit, ChatSegment},
    commands::{dispatch_command, CommandContext, ImmediateAction},
};

impl App {
    // ── Submit path ───────────────────────────────────────────────────────────

    /// Process user input text: dispatch slash commands or send as a message.
    ///
    /// # Message Lifecycle
    ///
    /// 1. `Action::Submit` calls this with the trimmed input buffer text.
    /// 2. If `text` starts with `/`: dispatch via `dispatch_command()`.
    ///    - Quit → return `true` (terminate event loop).
    ///    - Model override → `SessionState::stage_model()` (also applies mode
    ///      immediately when the agent is idle so the status bar updates).
    ///    - `message_to_send` → replace `text`, fall through to step 3.
    ///    - No message → return `false` (command consumed, no send).
    ///    - Unknown command → return `false`.
    /// 3. Plain-text (or injected `message_to_send`) path:
    ///    a. `SessionState::consume_staged()` promotes the staged model to
    ///       `model_display` and returns `(model, mode)` for the message.
    ///    b. `QueuedMessage` constructed with those values.
    ///    c. Agent busy → push to queue.
    ///       Agent idle → snapshot history, append user segment, rerender,
    ///       send via `send_resubmit_to_agent()`.
    /// 4. `agent_task` receives `AgentRequest::Resubmit`.
    /// 5. `agent.set_model()` / `agent.replace_history_and_submit_with_cancel()`.
    pub(crate) async fn submit_user_input(&mut self, text: &str) -> bool {
        if text.starts_with('/') {
            let ctx = CommandContext {
                config: self.config.clone(),
                current_model_provider: self.session.model_cfg.provider.clone(),
                current_model_name: self.session.model_cfg.name.clone(),
            };
            match dispatch_command(text, &self.command_registry, &ctx) {
                Some((_name, result)) => {
                    match &result.immediate_action {
                        Some(ImmediateAction::Quit) => return true,
                        Some(ImmediateAction::Abort) => {
                            self.abort_pending = true;
                            self.send_abort_signal().await;
                        }
                        Some(ImmediateAction::ClearChat) => self.clear_chat(),
                        Some(ImmediateAction::Session(action)) => {
                            self.handle_session_action(action.clone()).await;
                        }
                        None => {}
                    }

                    if let Some(model_str) = result.model_override {
                        let resolved =
                            smithers_model::resolve_model_from_config(&self.config, &model_str);
                        self.session.stage_model(resolved);
                    }

                    if let Some(mode) = result.mode_override {
                        self.session.stage_mode(mode);
                        // Apply immediately when idle so the status bar reflects
                        // the change before the next message is sent.
                        if !self.agent_busy {
                            self.session.mode = mode;
                        }
                    }

                    match result.message_to_send {
                        None => return false,
                        Some(msg) => {
                            return self.enqueue_or_send_text(&msg).await;
                        }
                    }
                }
                None => return false,
            }
        }

        self.enqueue_or_send_text(text).await
    }

    /// Consume staged overrides and either enqueue or send `text` to the agent.
    pub(crate) async fn enqueue_or_send_text(&mut self, text: &str) -> bool {
        self.auto_scroll = true;
        let (staged_model, staged_mode) = self.session.consume_staged();
        let qm = QueuedMessage {
            content: text.to_string(),
            model_transition: staged_model.map(ModelDirective::SwitchTo),
            mode_transition: staged_mode,
        };
        if self.agent_busy {
            self.queued.push_back(qm);
            self.queue_selected = Some(self.queued.len() - 1);
        } else {
            let history = messages_for_resubmit(&self.chat_segments);
            self.chat_segments.push(ChatSegment::Message(Message::user(text)));
            self.persistence.record_user(text);
            self.rerender_chat().await;
            self.scroll_to_bottom();
            self.send_resubmit_to_agent(history, qm).await;
        }
        false
    }

    /// Send on the active turn's cancel sender, if one is parked in
    /// `cancel_handle`. Mirrors `agent_task`'s own take-and-clear pattern;
    /// a no-op while idle.
    pub(crate) async fn send_abort_signal(&mut self) {
        if let Some(tx) = self.cancel_handle.lock().await.take() {
            let _ = tx.send(());
        }
    }

    /// Apply a `/session` slash command's effect: starting a fresh session,
    /// bookmarking the current leaf, or rewinding to a bookmarked one.
    pub(crate) async fn handle_session_action(&mut self, action: crate::commands::SessionAction) {
        use crate::commands::SessionAction;
        match action {
            SessionAction::New(name) => {
                let name = name.unwrap_or_else(|| "session".to_string());
                if let Err(e) = self.persistence.start_new_session(&name) {
                    self.persistence.record_system(&format!("/session new failed: {e}"));
                    return;
                }
                self.clear_chat();
            }
            SessionAction::Label(name) => {
                if let Err(e) = self.persistence.label_last(&name) {
                    self.persistence.record_system(&format!("/session label failed: {e}"));
                }
            }
            SessionAction::Branch(name) => match self.persistence.branch_to_label(&name) {
                Ok(segments) => {
                    self.chat_segments = segments;
                    self.collapsed_segments.clear();
                    self.rerender_chat().await;
                    self.scroll_to_bottom();
                }
                Err(e) => {
                    self.persistence.record_system(&format!("/session branch failed: {e}"));
                }
            },
        }
    }

    pub(crate) async fn send_to_agent(&mut self, qm: QueuedMessage) {
        if let Some(tx) = &self.agent_tx {
            let _ = tx
                .send(AgentRequest::Submit {
                    content: qm.content,
                    model_override: qm.model_transition.map(ModelDirective::into_model_config),
                })
                .await;
            self.agent_busy = true;
        }
    }

    pub(crate) async fn send_resubmit_to_agent(
        &mut self,
        messages: Vec<Message>,
        qm: QueuedMessage,
    ) {
        if let Some(tx) = &self.agent_tx {
            let _ = tx
                .send(AgentRequest::Resubmit {
                    messages,
                    new_user_content: qm.content,
                    model_override: qm.model_transition.map(ModelDirective::into_model_config),
                })
                .await;
            self.agent_busy = true;
        }
    }

    /// If the agent is currently idle and there are queued messages waiting,
    /// dequeue the first one and send it.  Called after a queue-item edit ends
    /// so that a turn that completed while the user was editing isn't dropped.
    pub(crate) async fn try_dequeue_next(&mut self) {
        if !self.agent_busy && self.editing_queue_index.is_none() {
            if let Some(next) = self.queued.pop_front() {
                self.queue_selected = self.queue_selected
                    .map(|s| s.saturating_sub(1))
                    .filter(|_| !self.queued.is_empty());
                if self.queued.is_empty() && self.focus == FocusPane::Queue {
                    self.focus = FocusPane::Input;
                }
                self.chat_segments.push(ChatSegment::Message(Message::user(&next.content)));
                self.persistence.record_user(&next.content);
                self.rerender_chat().await;
                self.auto_scroll = true;
                self.scroll_to_bottom();
                self.send_to_agent(next).await;
            }
        }
    }
}

// ── Integration tests ─────────────────────────────────────────────────────────
//
// These tests exercise the full "user input → AgentRequest channel" path through
// the real App + SessionState machinery with a mock agent receiver.

#[cfg(test)]
mod submit_integration_tests {
    use smithers_config::AgentMode;

    use crate::agent::AgentRequest;
    use crate::app::App;
    use crate::keys::Action;

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Extract the `new_user_content` from a `Resubmit` request.
    fn resubmit_content(req: &AgentRequest) -> &str {
        match req {
            AgentRequest::Resubmit { new_user_content, .. } => new_user_content,
            other => panic!("expected Resubmit, got {:?}", other),
        }
    }

    /// Extract the `model_override` display label from a `Resubmit` request.
    fn resubmit_model(req: &AgentRequest) -> Option<String> {
        match req {
            AgentRequest::Resubmit { model_override, .. } => {
                model_override.as_ref().map(|c| format!("{}/{}", c.provider, c.name))
            }
            other => panic!("expected Resubmit, got {:?}", other),
        }
    }

    // ── Tests ─────────────────────────────────────────────────────────────────

    /// Plain message: no overrides — content reaches agent unchanged.
    #[tokio::test]
    async fn plain_message_reaches_agent() {
        let (mut app, mut rx) = App::for_testing();
        app.inject_input("hello world");
        app.dispatch_action(Action::Submit).await;

        let req = rx.try_recv().expect("expected a request");
        assert_eq!(resubmit_content(&req), "hello world");
        assert!(resubmit_model(&req).is_none(), "no model override expected");
    }

    /// `/model openai/gpt-4o` followed by a message → agent receives the model
    /// override and the correct message content.
    #[tokio::test]
    async fn model_command_then_message_sends_correct_model() {
        let (mut app, mut rx) = App::for_testing();

        app.inject_input("/model openai/gpt-4o");
        app.dispatch_action(Action::Submit).await;

        app.inject_input("hello");
        app.dispatch_action(Action::Submit).await;

        let req = rx.try_recv().expect("expected a request");
        assert_eq!(resubmit_content(&req), "hello");
        assert_eq!(resubmit_model(&req).as_deref(), Some("openai/gpt-4o"));
    }

    /// After the model override is consumed, subsequent messages carry no override.
    #[tokio::test]
    async fn model_override_consumed_after_first_message() {
        let (mut app, mut rx) = App::for_testing();

        app.inject_input("/model openai/gpt-4o");
        app.dispatch_action(Action::Submit).await;

        app.inject_input("first");
        app.dispatch_action(Action::Submit).await;

        let first = rx.try_recv().expect("first request");
        assert_eq!(resubmit_model(&first).as_deref(), Some("openai/gpt-4o"));

        // Simulate turn complete so the second message is sent directly.
        app.simulate_turn_complete();

        app.inject_input("second");
        app.dispatch_action(Action::Submit).await;

        let second = rx.try_recv().expect("second request");
        assert!(
            resubmit_model(&second).is_none(),
            "model override must not persist to second message"
        );
    }

    /// `/mode research` stages a mode change reflected in `SessionState`, even
    /// though `AgentMode` is not forwarded to the background agent task.
    #[tokio::test]
    async fn mode_command_updates_session_state() {
        let (mut app, mut rx) = App::for_testing();

        app.inject_input("/mode research");
        app.dispatch_action(Action::Submit).await;

        app.inject_input("hello");
        app.dispatch_action(Action::Submit).await;

        let _req = rx.try_recv().expect("expected a request");
        assert_eq!(app.session.mode, AgentMode::Research);
    }

    /// `/quit` returns `true` (event-loop termination signal).
    #[tokio::test]
    async fn quit_command_returns_true() {
        let (mut app, _rx) = App::for_testing();
        app.inject_input("/quit");
        let quit = app.dispatch_action(Action::Submit).await;
        assert!(quit, "/quit must return true to terminate the event loop");
    }

    /// Unknown slash command: no message sent, returns false.
    #[tokio::test]
    async fn unknown_command_sends_nothing() {
        let (mut app, mut rx) = App::for_testing();
        app.inject_input("/doesnotexist foo");
        let quit = app.dispatch_action(Action::Submit).await;
        assert!(!quit);
        assert!(rx.try_recv().is_err(), "unknown command must not send to agent");
    }

    /// When the agent is busy, messages are queued instead of sent.
    #[tokio::test]
    async fn busy_agent_queues_messages() {
        let (mut app, mut rx) = App::for_testing();

        // First message: goes through because agent is idle.
        app.inject_input("first");
        app.dispatch_action(Action::Submit).await;
        let _first = rx.try_recv().expect("first message sent");

        assert!(app.is_agent_busy(), "agent should be busy after first send");

        app.inject_input("second");
        app.dispatch_action(Action::Submit).await;

        assert_eq!(app.queued_len(), 1, "second message should be queued while agent busy");
        assert!(rx.try_recv().is_err(), "no second request should reach agent yet");
    }

    /// Queued message with a staged model retains the override when dequeued.
    #[tokio::test]
    async fn queued_message_retains_model_override() {
        let (mut app, mut rx) = App::for_testing();

        // First message goes to agent.
        app.inject_input("first");
        app.dispatch_action(Action::Submit).await;
        let _first = rx.try_recv().expect("first message");

        // Agent busy; stage model then send second message (goes to queue).
        app.inject_input("/model anthropic/claude-opus-4-6");
        app.dispatch_action(Action::Submit).await;

        app.inject_input("second");
        app.dispatch_action(Action::Submit).await;

        assert_eq!(app.queued_len(), 1);
        // The queued message should carry the staged model override.
        // We can't observe it directly here without exposing the queue,
        // but model_display is updated on consume_staged; verify it changed.
        assert_eq!(
            app.model_display(),
            "anthropic/claude-opus-4-6",
            "model_display should be promoted when override is consumed into queue"
        );
    }

    /// Empty input: nothing is sent.
    #[tokio::test]
    async fn empty_input_sends_nothing() {
        let (mut app, mut rx) = App::for_testing();
        app.inject_input("   ");
        app.dispatch_action(Action::Submit).await;
        assert!(rx.try_recv().is_err(), "empty/whitespace input must not send to agent");
    }
}
