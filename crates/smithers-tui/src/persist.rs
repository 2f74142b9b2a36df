// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Durable persistence mirror for the chat transcript.
//!
//! The interactive agent loop (`crate::agent::agent_task`) keeps its own
//! in-memory `Session` for the model ↔ tool loop, exactly as the teacher's
//! own agent task does. This module mirrors that transcript durably: every
//! message that reaches `chat_segments` is mirrored into the embedded
//! [`smithers_store::Store`] as it happens, so the transcript survives a
//! restart and an unclean shutdown is reconcilable via `recover_session`.
//!
//! A [`Persistence`] is opened once per `App` (real file store in normal
//! use, in-memory for tests — same contract `Store::open` already gives
//! every other caller) and is best-effort from the UI's point of view: a
//! write failure is logged and otherwise ignored, since losing the durable
//! mirror must never interrupt the live conversation the user is having.

use std::path::Path;

use smithers_core::SessionApi;
use smithers_model::Message as ChatMessage;
use smithers_store::{AddMessageOptions, Role as StoreRole, Store};
use tracing::warn;

use crate::chat::segment::ChatSegment;

/// Mirrors `smithers-worker`'s own display-truncation limit: the model-bound
/// conversation gets full content, only the human-visible "tool result"
/// system message is capped here.
const TOOL_RESULT_DISPLAY_LIMIT: usize = 4000;

/// Durable mirror of the active session's transcript.
pub struct Persistence {
    api: SessionApi,
    session_id: i64,
}

impl Persistence {
    /// Open (or create) the store at `path`, or an in-memory store when
    /// `path` is `None`. Runs crash recovery and the ephemeral-message
    /// purge for the current session before returning.
    pub fn open(path: Option<&Path>) -> anyhow::Result<Self> {
        let store = Store::open(path)?;
        let session_id = store.current_session()?.id;
        smithers_worker::recover_session(&store, session_id)?;
        store.purge_ephemeral(session_id)?;
        Ok(Self {
            api: SessionApi::new(store),
            session_id,
        })
    }

    /// An in-memory-only instance. Used by tests and as a last-resort
    /// fallback if opening the real on-disk store fails.
    pub fn in_memory() -> Self {
        Self::open(None).expect("in-memory store open cannot fail")
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn store(&self) -> &Store {
        self.api.store()
    }

    /// Load the current branch's transcript (root to leaf) as display
    /// segments, for resuming a session across restarts. Empty for a fresh
    /// store or on read failure.
    pub fn load_segments(&self) -> Vec<ChatSegment> {
        match self.api.branch_path(self.session_id, None) {
            Ok(messages) => messages
                .into_iter()
                .filter(|m| !m.ephemeral)
                .map(|m| {
                    let message = match m.role {
                        StoreRole::User => ChatMessage::user(m.content),
                        StoreRole::Assistant => ChatMessage::assistant(m.content),
                        StoreRole::System => ChatMessage::system(m.content),
                    };
                    ChatSegment::Message(message)
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to load persisted history");
                Vec::new()
            }
        }
    }

    pub fn record_user(&self, content: &str) {
        self.append(StoreRole::User, content);
    }

    pub fn record_assistant(&self, content: &str) {
        if content.is_empty() {
            return;
        }
        self.append(StoreRole::Assistant, content);
    }

    pub fn record_system(&self, content: &str) {
        self.append(StoreRole::System, content);
    }

    pub fn record_tool_started(&self, tool_name: &str) {
        self.record_system(&format!("🔧 Executing: {tool_name}"));
    }

    pub fn record_tool_finished(&self, tool_name: &str, output: &str, is_error: bool) {
        let mut display = output.to_string();
        if display.len() > TOOL_RESULT_DISPLAY_LIMIT {
            display.truncate(TOOL_RESULT_DISPLAY_LIMIT);
            display.push_str("\n… (truncated)");
        }
        let marker = if is_error { "✗" } else { "✓" };
        if let Err(e) = self.store().add_tool_result(
            self.session_id,
            tool_name,
            "",
            &format!("{marker} {tool_name}:\n{display}"),
        ) {
            warn!(error = %e, tool_name, "failed to persist tool result");
        }
    }

    /// Start a brand new session and switch the mirror onto it. Used by
    /// `/session new`; the caller is responsible for clearing `chat_segments`
    /// since the new session starts with an empty transcript.
    pub fn start_new_session(&mut self, name: &str) -> anyhow::Result<()> {
        self.session_id = self.api.new_session(name)?;
        Ok(())
    }

    /// Label the most recent message on the current branch. Used by
    /// `/session label <name>` as a bookmark for a later `/session branch`.
    pub fn label_last(&self, name: &str) -> anyhow::Result<()> {
        let last = self
            .api
            .branch_path(self.session_id, None)?
            .into_iter()
            .filter_map(|m| m.entry_id)
            .next_back()
            .ok_or_else(|| anyhow::anyhow!("no messages to label yet"))?;
        self.api.label(self.session_id, &last, name)?;
        Ok(())
    }

    /// Rewind the current branch to a previously-`label`ed entry and return
    /// the segments to redisplay. Used by `/session branch <name>`.
    pub fn branch_to_label(&self, name: &str) -> anyhow::Result<Vec<ChatSegment>> {
        let entry_id = self
            .api
            .find_by_label(self.session_id, name)?
            .ok_or_else(|| anyhow::anyhow!("no such label: {name}"))?;
        self.api.branch_from(self.session_id, &entry_id)?;
        Ok(self.load_segments())
    }

    fn append(&self, role: StoreRole, content: &str) {
        if let Err(e) =
            self.api
                .add_message(self.session_id, role, content, AddMessageOptions::default())
        {
            warn!(error = %e, "failed to persist message");
        }
    }
}
