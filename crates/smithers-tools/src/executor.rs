// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Single-slot, poll-based tool executor.
//!
//! The agent run state machine (C5) drives tool execution off its own
//! `tick()` without ever blocking on a tool's completion. `Executor` wraps
//! exactly one in-flight `tokio::spawn`'d task at a time: `execute` rejects a
//! second call while one is outstanding, and `poll` returns the result
//! exactly once, after which the slot goes idle again. Tools always run
//! strictly serially — parallel dispatch is not supported by this type.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{Tool, ToolCall, ToolOutput};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor is already running a tool")]
    Busy,
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// Result of a completed execution, returned once by `poll()`.
#[derive(Debug, Clone)]
pub struct ExecutorOutcome {
    pub tool_id: String,
    pub tool_name: String,
    pub result: ToolOutput,
}

/// Single-slot asynchronous tool executor (spec C4).
pub struct Executor {
    slot: Option<Slot>,
}

struct Slot {
    tool_id: String,
    tool_name: String,
    handle: JoinHandle<ToolOutput>,
}

impl Executor {
    pub fn new() -> Self {
        Self { slot: None }
    }

    /// Returns true while a tool is in flight (not yet consumed by `poll`).
    pub fn is_running(&self) -> bool {
        self.slot.as_ref().is_some_and(|s| !s.handle.is_finished())
    }

    /// Start executing `tool` with `call`. Fails with `Busy` if a previous
    /// execution is still outstanding (including one whose result has not
    /// yet been consumed via `poll`).
    pub fn execute(&mut self, tool: Arc<dyn Tool>, call: ToolCall) -> Result<(), ExecutorError> {
        if self.slot.is_some() {
            return Err(ExecutorError::Busy);
        }
        let tool_id = call.id.clone();
        let tool_name = call.name.clone();
        let handle = tokio::spawn(async move { tool.execute(&call).await });
        self.slot = Some(Slot { tool_id, tool_name, handle });
        Ok(())
    }

    /// Non-blocking poll. Returns `Some(outcome)` exactly once when the
    /// in-flight execution has completed, then the slot goes idle.
    pub async fn poll(&mut self) -> Option<ExecutorOutcome> {
        let finished = self.slot.as_ref().is_some_and(|s| s.handle.is_finished());
        if !finished {
            return None;
        }
        let slot = self.slot.take()?;
        let result = match slot.handle.await {
            Ok(output) => output,
            Err(join_err) => ToolOutput::err(
                &slot.tool_id,
                format!("tool task panicked: {join_err}"),
            ),
        };
        Some(ExecutorOutcome { tool_id: slot.tool_id, tool_name: slot.tool_name, result })
    }

    /// Cancel any in-flight execution, releasing its child task immediately.
    /// Idempotent; a no-op when idle.
    pub fn cancel(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.handle.abort();
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
