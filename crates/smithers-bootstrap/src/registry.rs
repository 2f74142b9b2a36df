// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Centralised tool-registry builder.
//!
//! All callers (headless runner, TUI) use `build_tool_registry` instead of
//! each inlining their own registration loop, so adding a tool means adding
//! it here once.

use smithers_config::Config;
use smithers_tools::{
    BashTool, EditFileTool, GlobTool, GrepTool, ListDirTool, ReadFileTool, ToolRegistry, WriteTool,
};

/// Build a [`ToolRegistry`] populated with the full built-in tool set.
pub fn build_tool_registry(cfg: &Config) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(ReadFileTool);
    reg.register(WriteTool);
    reg.register(EditFileTool);
    reg.register(ListDirTool);
    reg.register(GlobTool);
    reg.register(GrepTool);
    reg.register(BashTool {
        timeout_secs: cfg.tools.timeout_secs,
    });
    reg
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_exactly_the_seven_builtins() {
        let cfg = Config::default();
        let reg = build_tool_registry(&cfg);
        let mut names = reg.names();
        names.sort();
        assert_eq!(
            names,
            vec!["bash", "edit_file", "glob", "grep", "list_dir", "read_file", "write"]
        );
    }

    #[test]
    fn bash_tool_uses_configured_timeout() {
        let mut cfg = Config::default();
        cfg.tools.timeout_secs = 45;
        let reg = build_tool_registry(&cfg);
        assert!(reg.get("bash").is_some());
    }
}
