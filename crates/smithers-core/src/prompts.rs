// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! System prompt construction for an agent run.
use chrono::Local;
use std::path::Path;

/// Optional contextual blocks injected into the system prompt.
#[derive(Debug, Default)]
pub struct PromptContext<'a> {
    /// Absolute path to the project root (from `.git` detection).
    pub project_root: Option<&'a Path>,
    /// Pre-formatted git context (branch, commit, dirty status).
    ///
    /// **Caching note**: this field is *volatile* — it changes on every commit
    /// and with every file edit (dirty count). When prompt caching is enabled
    /// this content should be placed in a separate, uncached system block so
    /// that the stable prefix remains cacheable across runs.
    pub git_context: Option<&'a str>,
    /// Text appended verbatim after the Guidelines section.
    pub append: Option<&'a str>,
}

impl<'a> PromptContext<'a> {
    /// Format the volatile fields (currently just git context) as a block
    /// suitable for appending to the system prompt outside the cached region.
    pub fn dynamic_block(&self) -> Option<String> {
        self.git_context
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string())
    }
}

fn build_guidelines_section() -> String {
    "## Guidelines\n\n\
     - Be concise and precise. Use tools instead of guessing.\n\
     - Read files (`read_file`) before editing them (`edit_file`); prefer `edit_file` over \
       `write` for modifying existing files — it preserves surrounding context.\n\
     - Discovery workflow: `glob` to find files, `grep` to narrow, `read_file` with a \
       specific offset/limit for the parts that matter.\n\
     - Batch independent tool calls in the same turn where possible.\n\
     - `bash` is for running commands, not file I/O — use `read_file`/`write`/`edit_file`/\
       `grep`/`glob` instead of `cat`/`sed`/`find`/`grep` on the command line.\n\
     - Write tests for new functionality and preserve existing code style.\n\
     - When a tool fails, diagnose before retrying; don't repeat the identical call."
        .to_string()
}

/// Build the system prompt for an agent run.
///
/// `custom`, when set, overrides the generated prompt entirely (still honoring
/// `ctx.append`). `ctx` carries optional project/git context.
pub fn system_prompt(custom: Option<&str>, ctx: PromptContext<'_>) -> String {
    if let Some(custom) = custom {
        if let Some(extra) = ctx.append {
            return format!("{}\n\n{}", custom.trim_end(), extra);
        }
        return custom.to_string();
    }

    let identity = format!(
        "You are Smithers, a coding agent that reads and edits files, runs shell commands, \
         and searches a codebase to complete engineering tasks.\n\n\
         Current date and time: `{now}`\n\
         Current working directory: `{cwd}`",
        now = Local::now().format("%Y-%m-%d %H:%M:%S"),
        cwd = std::env::current_dir().unwrap().display(),
    );

    let project_section = ctx
        .project_root
        .map(|root| {
            format!(
                "\n\n## Project Context\nProject root directory: `{}`\n\
                 - Use this absolute path for all file read/write operations.\n\
                 - Prefer absolute paths over relative paths in every tool call.",
                root.display()
            )
        })
        .unwrap_or_default();

    let git_section = ctx
        .git_context
        .map(|git| format!("\n\n{git}"))
        .unwrap_or_default();

    let guidelines_section = build_guidelines_section();

    let append_section = ctx
        .append
        .map(|extra| format!("\n\n{extra}"))
        .unwrap_or_default();

    format!(
        "{identity}{project_section}{git_section}\n\n{guidelines_section}{append_section}",
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
