//! Incremental decoder for the newline-delimited SSE wire format a streaming
//! completion endpoint emits: lines of `data: <json-object>` terminated by a
//! `data: [DONE]` sentinel (or plain EOF).
//!
//! The decoder owns no I/O. Callers feed it opaque byte chunks as they
//! arrive from whatever transport they used (HTTP response body, a pipe, a
//! test fixture) and receive back an ordered, finite sequence of
//! [`ModelEvent`]s. Decoding is chunking-invariant: the same underlying byte
//! stream produces the same event sequence no matter how it is split across
//! `feed` calls, since a line is only acted on once the trailing `\n` has
//! arrived.

use serde_json::Value;
use thiserror::Error;

/// One decoded event from the model's streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// Emitted exactly once, before any other event.
    Start,
    /// A chunk of assistant-visible text.
    TextDelta(String),
    /// A new tool invocation has begun.
    ToolBegin { id: String, name: String },
    /// Another fragment of the current tool's JSON input.
    ToolInputDelta(String),
    /// The current tool's input is complete.
    ToolEnd,
    /// The model reported why it stopped generating.
    StopReason(StopReason),
    /// The stream is finished; no further events follow.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Other,
}

impl StopReason {
    fn from_wire(s: &str) -> Self {
        match s {
            "end_turn" | "stop" => StopReason::EndTurn,
            "max_tokens" | "length" => StopReason::MaxTokens,
            "tool_use" | "tool_calls" => StopReason::ToolUse,
            _ => StopReason::Other,
        }
    }
}

/// Fatal decoder failure. Only raised when the wire is too corrupt to make
/// forward progress; a single malformed line is silently skipped instead (see
/// [`StreamDecoder::feed`]).
#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("{0} consecutive unparsable SSE lines; aborting stream")]
    TooManyMalformedLines(usize),
}

/// Maximum number of consecutive lines that fail to parse as JSON before the
/// decoder gives up and reports a fatal error. A handful of stray malformed
/// lines is tolerated (proxies sometimes inject keep-alive comments); a long
/// run of them means the wire format itself is wrong, not a single hiccup.
const MAX_CONSECUTIVE_PARSE_ERRORS: usize = 32;

/// Bounded line-assembly buffer. A single SSE line is never expected to
/// exceed this; a line that does is corrupt (or the caller fed raw binary by
/// mistake) and its remainder is discarded rather than risking unbounded
/// growth or splicing garbage into the next line.
const MAX_LINE_BYTES: usize = 8 * 1024;

pub struct StreamDecoder {
    buf: Vec<u8>,
    /// `true` while the tail of `buf` is the unterminated remainder of a
    /// line that already exceeded `MAX_LINE_BYTES` — everything up to the
    /// next `\n` is discarded rather than parsed.
    discarding_overflow: bool,
    started: bool,
    done: bool,
    /// Index of the content block currently accumulating tool input, if any.
    current_tool_index: Option<u64>,
    consecutive_parse_errors: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            discarding_overflow: false,
            started: false,
            done: false,
            current_tool_index: None,
            consecutive_parse_errors: 0,
        }
    }

    /// `true` once a `done` event has been produced; the caller should stop
    /// feeding further chunks.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed the next chunk of raw bytes and drain any complete lines it
    /// completes (plus any already-buffered partial line).
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<ModelEvent>, DecoderError> {
        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            events.push(ModelEvent::Start);
        }

        self.buf.extend_from_slice(chunk);

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buf.drain(..=pos).collect();
            if self.discarding_overflow {
                self.discarding_overflow = false;
                continue;
            }
            let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]);
            let line = line.trim_end_matches('\r');
            self.process_line(line, &mut events)?;
            if self.done {
                return Ok(events);
            }
        }

        if !self.discarding_overflow && self.buf.len() > MAX_LINE_BYTES {
            self.buf.clear();
            self.discarding_overflow = true;
        }

        Ok(events)
    }

    /// Signal end-of-stream (no more chunks will arrive). Flushes a final
    /// partial line only if it happens to be a complete `data: ...` record
    /// that never got a trailing newline, then emits `Done` if it has not
    /// already been emitted.
    pub fn finish(&mut self) -> Vec<ModelEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        if !self.discarding_overflow && !self.buf.is_empty() {
            let line = String::from_utf8_lossy(&self.buf).to_string();
            self.buf.clear();
            // A partial-line parse error at EOF is not "fatal" — there's
            // nothing left to abort; just drop it.
            let _ = self.process_line(&line, &mut events);
        }
        if !self.done {
            self.done = true;
            events.push(ModelEvent::Done);
        }
        events
    }

    fn process_line(
        &mut self,
        line: &str,
        events: &mut Vec<ModelEvent>,
    ) -> Result<(), DecoderError> {
        let Some(data) = line.strip_prefix("data: ") else {
            return Ok(());
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            events.push(ModelEvent::Done);
            return Ok(());
        }

        match serde_json::from_str::<Value>(data) {
            Ok(v) => {
                self.consecutive_parse_errors = 0;
                self.map_event(&v, events);
                Ok(())
            }
            Err(_) => {
                self.consecutive_parse_errors += 1;
                tracing::warn!(line = %data, "skipping malformed SSE line");
                if self.consecutive_parse_errors >= MAX_CONSECUTIVE_PARSE_ERRORS {
                    Err(DecoderError::TooManyMalformedLines(
                        self.consecutive_parse_errors,
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn map_event(&mut self, v: &Value, events: &mut Vec<ModelEvent>) {
        match v["type"].as_str().unwrap_or("") {
            "content_block_start" => {
                let index = v["index"].as_u64().unwrap_or(0);
                let block = &v["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.current_tool_index = Some(index);
                    events.push(ModelEvent::ToolBegin {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                    });
                }
            }
            "content_block_delta" => {
                let index = v["index"].as_u64().unwrap_or(0);
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or("");
                        if !text.is_empty() {
                            events.push(ModelEvent::TextDelta(text.to_string()));
                        }
                    }
                    "input_json_delta" => {
                        if self.current_tool_index == Some(index) {
                            let partial = delta["partial_json"].as_str().unwrap_or("");
                            events.push(ModelEvent::ToolInputDelta(partial.to_string()));
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                let index = v["index"].as_u64().unwrap_or(0);
                if self.current_tool_index == Some(index) {
                    self.current_tool_index = None;
                    events.push(ModelEvent::ToolEnd);
                }
            }
            "message_delta" => {
                if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                    events.push(ModelEvent::StopReason(StopReason::from_wire(reason)));
                }
            }
            "message_stop" => {
                self.done = true;
                events.push(ModelEvent::Done);
            }
            _ => {}
        }
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}
