use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => Role::System,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Pending,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => MessageStatus::Pending,
            _ => MessageStatus::Sent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Streaming,
    Tools,
    Continuing,
    Complete,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Streaming => "streaming",
            RunStatus::Tools => "tools",
            RunStatus::Continuing => "continuing",
            RunStatus::Complete => "complete",
            RunStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "streaming" => RunStatus::Streaming,
            "tools" => RunStatus::Tools,
            "continuing" => RunStatus::Continuing,
            "complete" => RunStatus::Complete,
            "error" => RunStatus::Error,
            _ => RunStatus::Pending,
        }
    }

    /// A run in any of these states counts toward the "at most one active
    /// run per session" invariant.
    pub fn is_active(&self) -> bool {
        !matches!(self, RunStatus::Complete | RunStatus::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub name: String,
    pub leaf_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub session_id: i64,
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
    pub ephemeral: bool,
    pub tool_name: Option<String>,
    pub tool_input: Option<String>,
    pub status: MessageStatus,
    pub entry_id: Option<String>,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub id: i64,
    pub session_id: i64,
    pub target_id: String,
    pub label: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compaction {
    pub id: i64,
    pub session_id: i64,
    pub summary: String,
    pub first_kept_msg_id: i64,
    pub tokens_before: i64,
    pub details: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: i64,
    pub session_id: i64,
    pub status: RunStatus,
    pub pending_tools: Option<String>,
    pub current_tool_idx: i64,
    pub tool_results: Option<String>,
    pub assistant_content: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Options accepted by `add_message`. `parent` defaults to the session's
/// current leaf when `None`.
#[derive(Debug, Clone, Default)]
pub struct AddMessageOptions {
    pub ephemeral: bool,
    pub parent: Option<String>,
}
