// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! High-level session/branch operations layered on [`smithers_store::Store`].
//!
//! This is a thin, transactional wrapper: every method is a handful of store
//! calls with the conversation-feed assembly rule applied where relevant
//! (`get_conversation` prepends the latest compaction's summary as a
//! synthesized system message).  It owns no state itself — a
//! [`SessionApi`] is just a `Store` handle plus the convenience of not
//! re-deriving that rule at every call site.

use smithers_store::{
    AddMessageOptions, Compaction, Label, Message, Role, Store, StoreError,
};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Thin transactional layer over [`Store`] implementing session/branch
/// operations.
#[derive(Clone)]
pub struct SessionApi {
    store: Store,
}

impl SessionApi {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ---- sessions --------------------------------------------------

    pub fn new_session(&self, name: &str) -> Result<i64> {
        self.store.new_session(name)
    }

    pub fn switch_session(&self, id: i64) -> Result<smithers_store::Session> {
        self.store
            .get_session(id)?
            .ok_or_else(|| StoreError::InvariantViolation(format!("unknown session {id}")))
    }

    /// Cascades messages, labels, compactions and agent runs — all destroyed
    /// by cascaded delete.
    pub fn delete_session(&self, id: i64) -> Result<()> {
        self.store.delete_session(id)
    }

    pub fn rename_session(&self, id: i64, name: &str) -> Result<()> {
        self.store.rename_session(id, name)
    }

    pub fn count_sessions(&self) -> Result<i64> {
        self.store.count_sessions()
    }

    // ---- branching ---------------------------------------------------

    /// Validates `entry_id` exists and rewinds the session's leaf to it;
    /// the next append becomes a sibling of whatever previously followed
    /// `entry_id`.
    pub fn branch_from(&self, session_id: i64, entry_id: &str) -> Result<()> {
        self.store.create_branch(session_id, entry_id)
    }

    pub fn branch_path(&self, session_id: i64, leaf: Option<&str>) -> Result<Vec<Message>> {
        self.store.get_branch(session_id, leaf)
    }

    pub fn has_children(&self, session_id: i64, entry_id: &str) -> Result<bool> {
        self.store.has_children(session_id, entry_id)
    }

    // ---- labels --------------------------------------------------------

    pub fn label(&self, session_id: i64, entry_id: &str, name: &str) -> Result<()> {
        self.store.set_label(session_id, entry_id, name)
    }

    pub fn find_by_label(&self, session_id: i64, name: &str) -> Result<Option<String>> {
        self.store.get_entry_by_label(session_id, name)
    }

    pub fn list_labels(&self, session_id: i64) -> Result<Vec<Label>> {
        self.store.list_labels(session_id)
    }

    pub fn delete_label(&self, session_id: i64, name: &str) -> Result<()> {
        self.store.delete_label(session_id, name)
    }

    // ---- compaction ------------------------------------------------

    pub fn compact(
        &self,
        session_id: i64,
        summary: &str,
        first_kept_msg_id: i64,
        tokens_before: i64,
        details: Option<&str>,
    ) -> Result<i64> {
        self.store
            .create_compaction(session_id, summary, first_kept_msg_id, tokens_before, details)
    }

    pub fn latest_compaction(&self, session_id: i64) -> Result<Option<Compaction>> {
        self.store.latest_compaction(session_id)
    }

    /// Assembles the model-bound conversation feed: the latest compaction's
    /// summary (as a synthesized system message), followed by every `sent`
    /// message from its `first_kept_msg_id` onward; or the full history if
    /// no compaction exists yet.
    pub fn get_conversation(&self, session_id: i64) -> Result<Vec<Message>> {
        match self.store.latest_compaction(session_id)? {
            Some(c) => {
                let mut feed = vec![Message {
                    id: 0,
                    session_id,
                    role: Role::System,
                    content: c.summary,
                    timestamp: c.created_at,
                    ephemeral: false,
                    tool_name: None,
                    tool_input: None,
                    status: smithers_store::MessageStatus::Sent,
                    entry_id: None,
                    parent_id: None,
                }];
                feed.extend(self.store.get_messages_from(session_id, c.first_kept_msg_id)?);
                Ok(feed)
            }
            None => self.store.get_messages(session_id),
        }
    }

    // ---- pending queue passthrough (used by the coordination surface) --

    pub fn enqueue_pending(&self, session_id: i64, content: &str) -> Result<i64> {
        self.store.enqueue_pending(session_id, Role::User, content)
    }

    pub fn has_pending(&self, session_id: i64) -> Result<bool> {
        self.store.has_pending(session_id)
    }

    /// Convenience used by the ephemeral-message contract: ephemeral
    /// messages are purged "at process start". `AddMessageOptions` is
    /// re-exported so callers composing a custom append don't need to
    /// depend on `smithers_store` directly for that one type.
    pub fn add_message(
        &self,
        session_id: i64,
        role: Role,
        content: &str,
        opts: AddMessageOptions,
    ) -> Result<(i64, String)> {
        self.store.add_message(session_id, role, content, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smithers_store::AddMessageOptions;

    fn api() -> (SessionApi, i64) {
        let store = Store::open(None).unwrap();
        let session_id = store.current_session().unwrap().id;
        (SessionApi::new(store), session_id)
    }

    #[test]
    fn branch_and_label_roundtrip() {
        let (api, sid) = api();
        let (_, a) = api
            .add_message(sid, Role::User, "a", AddMessageOptions::default())
            .unwrap();
        let (_, b) = api
            .add_message(sid, Role::User, "b", AddMessageOptions::default())
            .unwrap();
        let (_, c) = api
            .add_message(sid, Role::User, "c", AddMessageOptions::default())
            .unwrap();

        api.label(sid, &b, "mid").unwrap();
        api.branch_from(sid, &a).unwrap();
        let (_, d) = api
            .add_message(sid, Role::User, "d", AddMessageOptions::default())
            .unwrap();

        let branch_d: Vec<String> = api
            .branch_path(sid, Some(&d))
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(branch_d, vec!["a", "d"]);

        let branch_c: Vec<String> = api
            .branch_path(sid, Some(&c))
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(branch_c, vec!["a", "b", "c"]);

        assert_eq!(api.find_by_label(sid, "mid").unwrap(), Some(b));
        assert!(api.has_children(sid, &a).unwrap());
    }

    #[test]
    fn label_delete_then_lookup_is_none() {
        let (api, sid) = api();
        let (_, a) = api
            .add_message(sid, Role::User, "a", AddMessageOptions::default())
            .unwrap();
        api.label(sid, &a, "bookmark").unwrap();
        assert_eq!(api.find_by_label(sid, "bookmark").unwrap(), Some(a));
        api.delete_label(sid, "bookmark").unwrap();
        assert_eq!(api.find_by_label(sid, "bookmark").unwrap(), None);
    }

    #[test]
    fn conversation_feed_prepends_compaction_summary() {
        let (api, sid) = api();
        let (first_id, _) = api
            .add_message(sid, Role::User, "keep me", AddMessageOptions::default())
            .unwrap();
        api.add_message(sid, Role::Assistant, "old reply", AddMessageOptions::default())
            .unwrap();
        api.compact(sid, "summary of earlier turns", first_id, 500, None)
            .unwrap();

        let feed = api.get_conversation(sid).unwrap();
        assert_eq!(feed[0].role, Role::System);
        assert_eq!(feed[0].content, "summary of earlier turns");
        assert!(feed.iter().any(|m| m.content == "keep me"));
    }

    #[test]
    fn delete_session_cascades() {
        let (api, sid) = api();
        api.add_message(sid, Role::User, "hi", AddMessageOptions::default())
            .unwrap();
        api.delete_session(sid).unwrap();
        assert!(api.store().get_session(sid).unwrap().is_none());
    }
}
