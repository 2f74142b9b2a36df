// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use smithers_tools::ToolCall;

/// Which compaction path produced a given [`AgentEvent::ContextCompacted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategyUsed {
    /// Rolling LLM summary using the structured (bullet-point) format.
    Structured,
    /// Rolling LLM summary using the narrative (prose) format.
    Narrative,
    /// Old messages dropped without a model call because even the
    /// compaction prompt itself would have overflowed the budget.
    Emergency,
}

/// Events emitted by the agent during a single turn.
/// Consumers (the coordination worker, a TUI) subscribe to these to drive
/// their own persistence/rendering.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model
    TextDelta(String),
    /// A complete text response from the model (after streaming finishes)
    TextComplete(String),
    /// A thinking/reasoning chunk from the model (extended thinking API).
    /// Consumers should accumulate deltas and finalise them into a Thinking
    /// segment when the model signals the end of the reasoning block.
    ThinkingDelta(String),
    /// A complete thinking/reasoning block (accumulated from ThinkingDelta events).
    ThinkingComplete(String),
    /// The model has requested a tool call
    ToolCallStarted(ToolCall),
    /// A tool call finished
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// Context was compacted; statistics for the UI plus the summary text
    /// itself so a durable consumer (the coordination worker) can persist a
    /// `Compaction` row without re-deriving it from the session.
    ContextCompacted {
        tokens_before: usize,
        tokens_after: usize,
        strategy: CompactionStrategyUsed,
        turn: u32,
        summary: String,
    },
    /// Current token usage update
    TokenUsage {
        input: u32,
        output: u32,
        context_total: usize,
        /// Tokens served from the provider's prompt cache this turn.
        cache_read: u32,
        /// Tokens written into the provider's prompt cache this turn.
        cache_write: u32,
    },
    /// The agent has finished processing the current user turn
    TurnComplete,
    /// A recoverable error occurred
    Error(String),
    /// The turn was interrupted by a user-initiated cancel. `partial_text`
    /// is whatever had already streamed before the cancel took effect (may
    /// be empty if cancelled before any text arrived).
    Aborted { partial_text: String },
}
