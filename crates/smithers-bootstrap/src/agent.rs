// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! [`AgentBuilder`] — single entry point for constructing a fully wired Agent.
//!
//! Callers pass a [`smithers_config::Config`], an optional [`RuntimeContext`],
//! and a model provider.  The builder handles registry construction and
//! [`AgentRuntimeContext`] population internally.

use std::sync::Arc;

use smithers_config::Config;
use smithers_core::Agent;
use smithers_model::ModelProvider;

use crate::context::RuntimeContext;
use crate::registry::build_tool_registry;

/// Constructs a fully wired [`Agent`] from configuration and runtime context.
///
/// # Example
/// ```rust,ignore
/// let agent = AgentBuilder::new(config)
///     .with_runtime_context(RuntimeContext::auto_detect())
///     .build(model);
/// ```
pub struct AgentBuilder {
    config: Arc<Config>,
    runtime_ctx: RuntimeContext,
}

impl AgentBuilder {
    /// Create a builder with the given configuration.
    /// Runtime context defaults to empty (no project/git detection).
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            runtime_ctx: RuntimeContext::empty(),
        }
    }

    /// Set the runtime context (project root, live git state).
    pub fn with_runtime_context(mut self, ctx: RuntimeContext) -> Self {
        self.runtime_ctx = ctx;
        self
    }

    /// Build the [`Agent`] for the given model provider.
    pub fn build(self, model: Arc<dyn ModelProvider>) -> Agent {
        let runtime = self.runtime_ctx.into_agent_runtime_context();
        let registry = build_tool_registry(&self.config);

        // Resolve context window from the static catalog; fall back to 128 000.
        let context_window = model.catalog_context_window().unwrap_or(128_000) as usize;

        Agent::new(
            model,
            Arc::new(registry),
            Arc::new(self.config.agent.clone()),
            runtime,
            context_window,
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use smithers_model::mock::MockProvider;

    #[test]
    fn build_produces_agent_with_empty_session() {
        let config = Arc::new(Config::default());
        let model: Arc<dyn ModelProvider> = Arc::new(MockProvider::default());
        let agent = AgentBuilder::new(config).build(model);
        assert!(agent.session().messages.is_empty());
    }

    #[test]
    fn with_runtime_context_carries_project_root() {
        let config = Arc::new(Config::default());
        let ctx = RuntimeContext {
            project_root: Some(std::path::PathBuf::from("/tmp/proj")),
            ..RuntimeContext::empty()
        };
        let model: Arc<dyn ModelProvider> = Arc::new(MockProvider::default());
        let agent = AgentBuilder::new(config)
            .with_runtime_context(ctx)
            .build(model);
        let sys = agent.current_system_message();
        assert!(sys.as_text().unwrap().contains("/tmp/proj"));
    }
}
