// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Runtime context detection for agent construction.
//!
//! [`RuntimeContext`] holds environment-detected information (project root,
//! live git state) that is not part of the config file schema — separate
//! from [`smithers_config::AgentConfig`], which holds only config-file
//! fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use smithers_core::AgentRuntimeContext;

/// Per-command timeout for git sub-processes.
const GIT_TIMEOUT: Duration = Duration::from_secs(5);
/// Maximum bytes read from a single git sub-command output.
const GIT_OUTPUT_LIMIT: usize = 4 * 1024;

/// Environment-detected context for an agent session.
#[derive(Debug, Default, Clone)]
pub struct RuntimeContext {
    /// Absolute path to the project root (detected from `.git` walk-up).
    pub project_root: Option<PathBuf>,
    /// Pre-formatted git context block (branch, commit, dirty status).
    pub git_context_note: Option<String>,
    /// Text appended after the default system prompt Guidelines section.
    pub append_system_prompt: Option<String>,
    /// Full system prompt override (from `--system-prompt-file`).
    pub system_prompt_override: Option<String>,
}

impl RuntimeContext {
    /// Create with auto-detected project root and live git state.
    pub fn auto_detect() -> Self {
        let project_root = find_project_root();
        let git_context_note = project_root
            .as_ref()
            .and_then(|root| collect_git_context(root).to_prompt_section());

        Self {
            project_root,
            git_context_note,
            append_system_prompt: None,
            system_prompt_override: None,
        }
    }

    /// Create an empty context (no project/git detection).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Convert into the `smithers-core` type consumed by [`crate::AgentBuilder`].
    pub fn into_agent_runtime_context(self) -> AgentRuntimeContext {
        AgentRuntimeContext {
            project_root: self.project_root,
            git_context_note: self.git_context_note,
            append_system_prompt: self.append_system_prompt,
            system_prompt_override: self.system_prompt_override,
        }
    }
}

// ─── Project root detection ───────────────────────────────────────────────────

/// Walk up the directory tree from the current working directory until a
/// `.git` directory is found.  Returns `None` if no `.git` is found anywhere
/// above the current directory.
fn find_project_root() -> Option<PathBuf> {
    let start = std::env::current_dir().ok()?;
    let mut current = start.as_path();
    loop {
        if current.join(".git").exists() {
            return std::fs::canonicalize(current).ok();
        }
        current = current.parent()?;
    }
}

// ─── Git context ──────────────────────────────────────────────────────────────

/// Live state of the git repository at the project root.
#[derive(Debug, Default)]
struct GitContext {
    branch: Option<String>,
    commit: Option<String>,
    dirty_count: usize,
}

impl GitContext {
    fn is_empty(&self) -> bool {
        self.branch.is_none() && self.commit.is_none()
    }

    /// Format as a system-prompt section.  Returns `None` for an empty context.
    fn to_prompt_section(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut lines = vec!["## Git Context".to_string()];
        if let Some(branch) = &self.branch {
            lines.push(format!("Branch: {branch}"));
        }
        if let Some(commit) = &self.commit {
            lines.push(format!("Commit: {commit}"));
        }
        if self.dirty_count > 0 {
            lines.push(format!("Uncommitted changes: {} file(s)", self.dirty_count));
        } else if self.commit.is_some() {
            lines.push("Working tree: clean".to_string());
        }
        Some(lines.join("\n"))
    }
}

/// Collect git metadata from the repository at `project_root` by running git
/// sub-processes with a per-command timeout.  Returns a default (empty)
/// `GitContext` if git is not available, the directory is not a repository,
/// or the commands time out.
fn collect_git_context(project_root: &Path) -> GitContext {
    let branch = run_git_timed(&["rev-parse", "--abbrev-ref", "HEAD"], project_root);
    let commit = run_git_timed(&["rev-parse", "--short", "HEAD"], project_root);
    let dirty_count = run_git_timed(&["status", "--porcelain"], project_root)
        .map(|s| s.lines().count())
        .unwrap_or(0);

    GitContext {
        branch,
        commit,
        dirty_count,
    }
}

/// Run a git command in `dir` with a hard timeout, off the calling thread so
/// a hung `git` process can never block context detection indefinitely.
fn run_git_timed(args: &[&str], dir: &Path) -> Option<String> {
    use std::sync::mpsc;
    use std::thread;

    let dir = dir.to_path_buf();
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = std::process::Command::new("git")
            .args(&args)
            .current_dir(&dir)
            .output();
        let _ = tx.send(result);
    });

    let output = rx.recv_timeout(GIT_TIMEOUT).ok()?.ok()?;
    if !output.status.success() {
        return None;
    }
    let raw =
        String::from_utf8_lossy(&output.stdout[..output.stdout.len().min(GIT_OUTPUT_LIMIT)]);
    let s = raw.trim().to_string();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_project_root() {
        let ctx = RuntimeContext::empty();
        assert!(ctx.project_root.is_none());
        assert!(ctx.git_context_note.is_none());
    }

    #[test]
    fn git_context_empty_prompt_section_is_none() {
        let ctx = GitContext::default();
        assert!(ctx.to_prompt_section().is_none());
    }

    #[test]
    fn git_context_with_branch_formats_section() {
        let ctx = GitContext {
            branch: Some("main".to_string()),
            commit: Some("abc1234".to_string()),
            dirty_count: 0,
        };
        let section = ctx.to_prompt_section().unwrap();
        assert!(section.contains("Branch: main"));
        assert!(section.contains("abc1234"));
        assert!(section.contains("clean"));
    }

    #[test]
    fn git_context_dirty_reports_file_count() {
        let ctx = GitContext {
            branch: Some("main".to_string()),
            commit: None,
            dirty_count: 3,
        };
        let section = ctx.to_prompt_section().unwrap();
        assert!(section.contains("3 file(s)"));
    }

    #[test]
    fn into_agent_runtime_context_preserves_fields() {
        let ctx = RuntimeContext {
            project_root: Some(PathBuf::from("/tmp/proj")),
            git_context_note: Some("## Git Context".to_string()),
            append_system_prompt: Some("extra".to_string()),
            system_prompt_override: None,
        };
        let runtime = ctx.into_agent_runtime_context();
        assert_eq!(runtime.project_root, Some(PathBuf::from("/tmp/proj")));
        assert_eq!(runtime.append_system_prompt.as_deref(), Some("extra"));
    }
}
