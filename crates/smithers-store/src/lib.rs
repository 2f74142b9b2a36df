//! Durable, transactional relational backing for sessions, branching
//! messages, labels, compactions and agent runs — the sole shared mutator
//! of conversation state.
//!
//! A [`Store`] is a cheap, cloneable handle (an `Arc` around a mutex-guarded
//! connection); every public method takes `&self` and locks internally, so
//! the same handle can be held by both the agent worker and a foreground
//! observer.

mod error;
mod ids;
mod schema;
pub mod types;

use std::path::Path;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rusqlite::{params, Connection, OptionalExtension};

pub use error::{Result, StoreError};
pub use types::{
    AddMessageOptions, AgentRun, Compaction, Label, Message, MessageStatus, Role, RunStatus,
    Session,
};

struct Inner {
    conn: Connection,
    rng: StdRng,
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<Inner>>,
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Store {
    /// Opens (creating if absent) the store at `path`, or an in-memory
    /// database when `path` is `None` (used by tests and `:memory:`
    /// callers). Applies schema migrations and seeds a default "main"
    /// session if the store is empty.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let conn = match path {
            Some(p) => {
                if let Some(parent) = p.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(p)?
            }
            None => Connection::open_in_memory()?,
        };
        schema::open_and_migrate(&conn)?;

        let store = Store {
            inner: Arc::new(Mutex::new(Inner {
                conn,
                rng: StdRng::from_entropy(),
            })),
        };
        store.ensure_default_session()?;
        Ok(store)
    }

    /// Like [`Store::open`] but with a deterministic `entry_id` generator,
    /// for tests that want reproducible ids.
    pub fn open_with_seed(path: Option<&Path>, seed: u64) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)?,
            None => Connection::open_in_memory()?,
        };
        schema::open_and_migrate(&conn)?;
        let store = Store {
            inner: Arc::new(Mutex::new(Inner {
                conn,
                rng: StdRng::seed_from_u64(seed),
            })),
        };
        store.ensure_default_session()?;
        Ok(store)
    }

    fn ensure_default_session(&self) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let count: i64 = guard
            .conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?;
        if count == 0 {
            guard.conn.execute(
                "INSERT INTO sessions (name, leaf_id, created_at) VALUES (?1, NULL, ?2)",
                params!["main", now()],
            )?;
        }
        Ok(())
    }

    // ---- sessions -------------------------------------------------------

    pub fn current_session(&self) -> Result<Session> {
        let guard = self.inner.lock().unwrap();
        guard.conn.query_row(
            "SELECT id, name, leaf_id, created_at FROM sessions ORDER BY id LIMIT 1",
            [],
            row_to_session,
        ).map_err(Into::into)
    }

    pub fn get_session(&self, id: i64) -> Result<Option<Session>> {
        let guard = self.inner.lock().unwrap();
        guard
            .conn
            .query_row(
                "SELECT id, name, leaf_id, created_at FROM sessions WHERE id = ?1",
                params![id],
                row_to_session,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn new_session(&self, name: &str) -> Result<i64> {
        let guard = self.inner.lock().unwrap();
        guard.conn.execute(
            "INSERT INTO sessions (name, leaf_id, created_at) VALUES (?1, NULL, ?2)",
            params![name, now()],
        )?;
        Ok(guard.conn.last_insert_rowid())
    }

    pub fn rename_session(&self, id: i64, name: &str) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        guard
            .conn
            .execute("UPDATE sessions SET name = ?1 WHERE id = ?2", params![name, id])?;
        Ok(())
    }

    pub fn delete_session(&self, id: i64) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        guard.conn.execute("DELETE FROM compactions WHERE session_id = ?1", params![id])?;
        guard.conn.execute("DELETE FROM labels WHERE session_id = ?1", params![id])?;
        guard.conn.execute("DELETE FROM agent_runs WHERE session_id = ?1", params![id])?;
        guard.conn.execute("DELETE FROM messages WHERE session_id = ?1", params![id])?;
        guard.conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// All sessions, most recently created first — backs the `/session list`
    /// command.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let guard = self.inner.lock().unwrap();
        let mut stmt = guard
            .conn
            .prepare("SELECT id, name, leaf_id, created_at FROM sessions ORDER BY id DESC")?;
        let rows = stmt.query_map([], row_to_session)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn count_sessions(&self) -> Result<i64> {
        let guard = self.inner.lock().unwrap();
        guard
            .conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
            .map_err(Into::into)
    }

    // ---- messages ---------------------------------------------------

    pub fn add_message(
        &self,
        session_id: i64,
        role: Role,
        content: &str,
        opts: AddMessageOptions,
    ) -> Result<(i64, String)> {
        self.insert_message(session_id, role, content, None, None, opts)
    }

    /// Records the assistant's tool-use placeholder: the durable/visible
    /// counterpart of the in-memory `MessageContent::ToolCall` the agent
    /// pushes into its own session before dispatching the call.
    pub fn add_tool_call(
        &self,
        session_id: i64,
        tool_name: &str,
        tool_input: &str,
    ) -> Result<(i64, String)> {
        self.insert_message(
            session_id,
            Role::Assistant,
            &format!("[tool_call: {tool_name}]"),
            Some(tool_name),
            Some(tool_input),
            AddMessageOptions::default(),
        )
    }

    pub fn add_tool_result(
        &self,
        session_id: i64,
        tool_name: &str,
        tool_input: &str,
        content: &str,
    ) -> Result<(i64, String)> {
        self.insert_message(
            session_id,
            Role::System,
            content,
            Some(tool_name),
            Some(tool_input),
            AddMessageOptions::default(),
        )
    }

    fn insert_message(
        &self,
        session_id: i64,
        role: Role,
        content: &str,
        tool_name: Option<&str>,
        tool_input: Option<&str>,
        opts: AddMessageOptions,
    ) -> Result<(i64, String)> {
        let mut guard = self.inner.lock().unwrap();

        let parent_id: Option<String> = match opts.parent {
            Some(p) => Some(p),
            None => guard
                .conn
                .query_row(
                    "SELECT leaf_id FROM sessions WHERE id = ?1",
                    params![session_id],
                    |r| r.get(0),
                )
                .optional()?
                .flatten(),
        };

        let entry_id = ids::generate_unique_entry_id(&guard.conn, &mut guard.rng, session_id)?;

        guard.conn.execute(
            "INSERT INTO messages
                (session_id, role, content, timestamp, ephemeral, tool_name, tool_input,
                 status, entry_id, parent_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'sent', ?8, ?9)",
            params![
                session_id,
                role.as_str(),
                content,
                now(),
                opts.ephemeral as i64,
                tool_name,
                tool_input,
                entry_id,
                parent_id,
            ],
        )?;
        let id = guard.conn.last_insert_rowid();

        guard.conn.execute(
            "UPDATE sessions SET leaf_id = ?1 WHERE id = ?2",
            params![entry_id, session_id],
        )?;

        Ok((id, entry_id))
    }

    pub fn update_message_content(&self, id: i64, content: &str) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        guard
            .conn
            .execute("UPDATE messages SET content = ?1 WHERE id = ?2", params![content, id])?;
        Ok(())
    }

    pub fn purge_ephemeral(&self, session_id: i64) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        guard.conn.execute(
            "DELETE FROM messages WHERE session_id = ?1 AND ephemeral = 1",
            params![session_id],
        )?;
        Ok(())
    }

    // ---- pending queue ------------------------------------------------

    pub fn enqueue_pending(&self, session_id: i64, role: Role, content: &str) -> Result<i64> {
        let guard = self.inner.lock().unwrap();
        guard.conn.execute(
            "INSERT INTO messages
                (session_id, role, content, timestamp, ephemeral, status, entry_id, parent_id)
             VALUES (?1, ?2, ?3, ?4, 0, 'pending', NULL, NULL)",
            params![session_id, role.as_str(), content, now()],
        )?;
        Ok(guard.conn.last_insert_rowid())
    }

    pub fn next_pending(&self, session_id: i64) -> Result<Option<Message>> {
        let guard = self.inner.lock().unwrap();
        guard
            .conn
            .query_row(
                "SELECT id, session_id, role, content, timestamp, ephemeral, tool_name,
                        tool_input, status, entry_id, parent_id
                 FROM messages
                 WHERE session_id = ?1 AND status = 'pending'
                 ORDER BY id ASC LIMIT 1",
                params![session_id],
                row_to_message,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Marks a pending message `sent` and attaches it to the message tree
    /// (fresh entry_id, parented on the current leaf), returning its entry
    /// id. This is the step that turns a queued input into an addressable
    /// tree node once the worker actually starts processing it.
    pub fn mark_sent(&self, id: i64) -> Result<String> {
        let mut guard = self.inner.lock().unwrap();
        let session_id: i64 = guard.conn.query_row(
            "SELECT session_id FROM messages WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )?;
        let leaf: Option<String> = guard
            .conn
            .query_row(
                "SELECT leaf_id FROM sessions WHERE id = ?1",
                params![session_id],
                |r| r.get(0),
            )
            .optional()?
            .flatten();
        let entry_id = ids::generate_unique_entry_id(&guard.conn, &mut guard.rng, session_id)?;
        guard.conn.execute(
            "UPDATE messages SET status = 'sent', entry_id = ?1, parent_id = ?2 WHERE id = ?3",
            params![entry_id, leaf, id],
        )?;
        guard.conn.execute(
            "UPDATE sessions SET leaf_id = ?1 WHERE id = ?2",
            params![entry_id, session_id],
        )?;
        Ok(entry_id)
    }

    pub fn has_pending(&self, session_id: i64) -> Result<bool> {
        let guard = self.inner.lock().unwrap();
        let count: i64 = guard.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1 AND status = 'pending'",
            params![session_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    // ---- feed / branching ----------------------------------------------

    pub fn get_messages(&self, session_id: i64) -> Result<Vec<Message>> {
        let guard = self.inner.lock().unwrap();
        let mut stmt = guard.conn.prepare(
            "SELECT id, session_id, role, content, timestamp, ephemeral, tool_name,
                    tool_input, status, entry_id, parent_id
             FROM messages WHERE session_id = ?1 AND status = 'sent' ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_messages_from(&self, session_id: i64, from_id: i64) -> Result<Vec<Message>> {
        let guard = self.inner.lock().unwrap();
        let mut stmt = guard.conn.prepare(
            "SELECT id, session_id, role, content, timestamp, ephemeral, tool_name,
                    tool_input, status, entry_id, parent_id
             FROM messages
             WHERE session_id = ?1 AND status = 'sent' AND id >= ?2
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id, from_id], row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_current_leaf(&self, session_id: i64) -> Result<Option<String>> {
        let guard = self.inner.lock().unwrap();
        guard
            .conn
            .query_row(
                "SELECT leaf_id FROM sessions WHERE id = ?1",
                params![session_id],
                |r| r.get(0),
            )
            .optional()
            .map(|o: Option<Option<String>>| o.flatten())
            .map_err(Into::into)
    }

    /// Rewinds the session's leaf to `from_entry_id`, validating it exists.
    /// Subsequent appends parent off this entry, diverging the tree.
    pub fn create_branch(&self, session_id: i64, from_entry_id: &str) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        let exists: bool = guard
            .conn
            .query_row(
                "SELECT 1 FROM messages WHERE session_id = ?1 AND entry_id = ?2",
                params![session_id, from_entry_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !exists {
            return Err(StoreError::InvariantViolation(format!(
                "unknown branch target entry_id {from_entry_id}"
            )));
        }
        guard.conn.execute(
            "UPDATE sessions SET leaf_id = ?1 WHERE id = ?2",
            params![from_entry_id, session_id],
        )?;
        Ok(())
    }

    /// Walks `parent_id` pointers from `leaf` (or the session's current
    /// leaf) back to the root and returns the path root-first.
    pub fn get_branch(&self, session_id: i64, leaf: Option<&str>) -> Result<Vec<Message>> {
        let guard = self.inner.lock().unwrap();
        let leaf_entry: Option<String> = match leaf {
            Some(l) => Some(l.to_string()),
            None => guard
                .conn
                .query_row(
                    "SELECT leaf_id FROM sessions WHERE id = ?1",
                    params![session_id],
                    |r| r.get(0),
                )
                .optional()?
                .flatten(),
        };

        let mut path = Vec::new();
        let mut cursor = leaf_entry;
        while let Some(entry_id) = cursor {
            let msg = guard.conn.query_row(
                "SELECT id, session_id, role, content, timestamp, ephemeral, tool_name,
                        tool_input, status, entry_id, parent_id
                 FROM messages WHERE session_id = ?1 AND entry_id = ?2",
                params![session_id, entry_id],
                row_to_message,
            )?;
            cursor = msg.parent_id.clone();
            path.push(msg);
        }
        path.reverse();
        Ok(path)
    }

    pub fn has_children(&self, session_id: i64, entry_id: &str) -> Result<bool> {
        let guard = self.inner.lock().unwrap();
        let count: i64 = guard.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1 AND parent_id = ?2",
            params![session_id, entry_id],
            |r| r.get(0),
        )?;
        Ok(count >= 2)
    }

    // ---- labels ---------------------------------------------------------

    pub fn set_label(&self, session_id: i64, entry_id: &str, label: &str) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        let exists: bool = guard
            .conn
            .query_row(
                "SELECT 1 FROM messages WHERE session_id = ?1 AND entry_id = ?2",
                params![session_id, entry_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !exists {
            return Err(StoreError::InvariantViolation(format!(
                "cannot label unknown entry_id {entry_id}"
            )));
        }
        guard.conn.execute(
            "INSERT INTO labels (session_id, target_id, label, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id, label) DO UPDATE SET target_id = excluded.target_id",
            params![session_id, entry_id, label, now()],
        )?;
        Ok(())
    }

    pub fn get_label(&self, session_id: i64, entry_id: &str) -> Result<Option<String>> {
        let guard = self.inner.lock().unwrap();
        guard
            .conn
            .query_row(
                "SELECT label FROM labels WHERE session_id = ?1 AND target_id = ?2",
                params![session_id, entry_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_entry_by_label(&self, session_id: i64, label: &str) -> Result<Option<String>> {
        let guard = self.inner.lock().unwrap();
        guard
            .conn
            .query_row(
                "SELECT target_id FROM labels WHERE session_id = ?1 AND label = ?2",
                params![session_id, label],
                |r| r.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_labels(&self, session_id: i64) -> Result<Vec<Label>> {
        let guard = self.inner.lock().unwrap();
        let mut stmt = guard.conn.prepare(
            "SELECT id, session_id, target_id, label, created_at FROM labels
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(Label {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    target_id: row.get(2)?,
                    label: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_label(&self, session_id: i64, label: &str) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        guard
            .conn
            .execute("DELETE FROM labels WHERE session_id = ?1 AND label = ?2", params![session_id, label])?;
        Ok(())
    }

    // ---- compactions ------------------------------------------------

    pub fn create_compaction(
        &self,
        session_id: i64,
        summary: &str,
        first_kept_msg_id: i64,
        tokens_before: i64,
        details: Option<&str>,
    ) -> Result<i64> {
        let guard = self.inner.lock().unwrap();
        guard.conn.execute(
            "INSERT INTO compactions
                (session_id, summary, first_kept_msg_id, tokens_before, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![session_id, summary, first_kept_msg_id, tokens_before, details, now()],
        )?;
        Ok(guard.conn.last_insert_rowid())
    }

    pub fn latest_compaction(&self, session_id: i64) -> Result<Option<Compaction>> {
        let guard = self.inner.lock().unwrap();
        guard
            .conn
            .query_row(
                "SELECT id, session_id, summary, first_kept_msg_id, tokens_before, details, created_at
                 FROM compactions WHERE session_id = ?1 ORDER BY id DESC LIMIT 1",
                params![session_id],
                row_to_compaction,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn delete_session_compactions(&self, session_id: i64) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        guard
            .conn
            .execute("DELETE FROM compactions WHERE session_id = ?1", params![session_id])?;
        Ok(())
    }

    // ---- agent runs -------------------------------------------------

    pub fn create_run(&self, session_id: i64) -> Result<i64> {
        let guard = self.inner.lock().unwrap();
        let ts = now();
        guard.conn.execute(
            "INSERT INTO agent_runs
                (session_id, status, current_tool_idx, created_at, updated_at)
             VALUES (?1, 'pending', 0, ?2, ?2)",
            params![session_id, ts],
        )?;
        Ok(guard.conn.last_insert_rowid())
    }

    pub fn active_run(&self, session_id: i64) -> Result<Option<AgentRun>> {
        let guard = self.inner.lock().unwrap();
        guard
            .conn
            .query_row(
                "SELECT id, session_id, status, pending_tools, current_tool_idx, tool_results,
                        assistant_content, created_at, updated_at
                 FROM agent_runs
                 WHERE session_id = ?1 AND status NOT IN ('complete', 'error')
                 ORDER BY id DESC LIMIT 1",
                params![session_id],
                row_to_run,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_run(&self, id: i64) -> Result<Option<AgentRun>> {
        let guard = self.inner.lock().unwrap();
        guard
            .conn
            .query_row(
                "SELECT id, session_id, status, pending_tools, current_tool_idx, tool_results,
                        assistant_content, created_at, updated_at
                 FROM agent_runs WHERE id = ?1",
                params![id],
                row_to_run,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn set_status(&self, id: i64, status: RunStatus) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        guard.conn.execute(
            "UPDATE agent_runs SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now(), id],
        )?;
        Ok(())
    }

    pub fn set_tools(&self, id: i64, pending_tools_json: &str, current_tool_idx: i64) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        guard.conn.execute(
            "UPDATE agent_runs SET pending_tools = ?1, current_tool_idx = ?2, updated_at = ?3 WHERE id = ?4",
            params![pending_tools_json, current_tool_idx, now(), id],
        )?;
        Ok(())
    }

    pub fn set_results(&self, id: i64, tool_results_json: &str) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        guard.conn.execute(
            "UPDATE agent_runs SET tool_results = ?1, updated_at = ?2 WHERE id = ?3",
            params![tool_results_json, now(), id],
        )?;
        Ok(())
    }

    pub fn set_assistant_content(&self, id: i64, content_json: &str) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        guard.conn.execute(
            "UPDATE agent_runs SET assistant_content = ?1, updated_at = ?2 WHERE id = ?3",
            params![content_json, now(), id],
        )?;
        Ok(())
    }

    pub fn complete_run(&self, id: i64) -> Result<()> {
        self.set_status(id, RunStatus::Complete)
    }

    pub fn fail_run(&self, id: i64) -> Result<()> {
        self.set_status(id, RunStatus::Error)
    }
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        name: row.get(1)?,
        leaf_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let status: String = row.get(8)?;
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: Role::parse(&role),
        content: row.get(3)?,
        timestamp: row.get(4)?,
        ephemeral: row.get::<_, i64>(5)? != 0,
        tool_name: row.get(6)?,
        tool_input: row.get(7)?,
        status: MessageStatus::parse(&status),
        entry_id: row.get(9)?,
        parent_id: row.get(10)?,
    })
}

fn row_to_compaction(row: &rusqlite::Row) -> rusqlite::Result<Compaction> {
    Ok(Compaction {
        id: row.get(0)?,
        session_id: row.get(1)?,
        summary: row.get(2)?,
        first_kept_msg_id: row.get(3)?,
        tokens_before: row.get(4)?,
        details: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<AgentRun> {
    let status: String = row.get(2)?;
    Ok(AgentRun {
        id: row.get(0)?,
        session_id: row.get(1)?,
        status: RunStatus::parse(&status),
        pending_tools: row.get(3)?,
        current_tool_idx: row.get(4)?,
        tool_results: row.get(5)?,
        assistant_content: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
