// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Runtime context for an agent run.
//!
//! Separate from `smithers_config::AgentConfig`, which holds only
//! config-file fields. [`AgentRuntimeContext`] carries values detected or
//! supplied at construction time (project root, git context, prompt
//! overrides).

use std::path::PathBuf;

/// Environment-detected context injected into an agent at construction time.
#[derive(Debug, Default, Clone)]
pub struct AgentRuntimeContext {
    /// Absolute path to the project root (found via `.git` walk-up).
    pub project_root: Option<PathBuf>,
    /// Pre-formatted git context block (branch, commit, dirty status).
    pub git_context_note: Option<String>,
    /// Text appended to the default system prompt.
    pub append_system_prompt: Option<String>,
    /// Full system prompt override. When set, replaces the default prompt.
    pub system_prompt_override: Option<String>,
}
