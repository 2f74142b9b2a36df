// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Explicit observability handle: a bounded ring buffer of structured
//! events for crash dumps, installed as a `tracing_subscriber::Layer`.
//!
//! Global mutable logging and process-wide observability state is a source
//! pattern worth avoiding here. The fix is the same shape as the rest of
//! this crate's dependency-injection story: no module-level singleton —
//! a caller constructs an [`ObservabilityHandle`] once, at whatever
//! capacity and level it wants, and installs the `Layer` it hands back
//! alongside its own formatting layer. Anyone holding a clone of the
//! handle can read the buffer back (a `/debug dump` command, a panic
//! hook) independently of how events were formatted or shipped.
//!
//! Trace/span correlation piggybacks on `tracing`'s own span stack rather
//! than threading ids by hand: callers open `tracing::info_span!("agent_run",
//! trace_id = %run_id)` once per run (see `smithers-worker`) and
//! `tracing::info_span!("streaming" | "tools" | "continuing")` once per
//! phase (see `smithers-core::agent`); this layer reads the root span's
//! `trace_id` field and the innermost span's name back out of the
//! subscriber's span stack for every event recorded inside them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::span as tracing_span;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// The six observability levels, ordered from least to most verbose so
/// `self.level` acts as a maximum-verbosity cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObsLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl ObsLevel {
    fn from_tracing(level: &Level) -> Self {
        match *level {
            Level::ERROR => ObsLevel::Error,
            Level::WARN => ObsLevel::Warn,
            Level::INFO => ObsLevel::Info,
            Level::DEBUG => ObsLevel::Debug,
            Level::TRACE => ObsLevel::Trace,
        }
    }
}

/// One structured event, matching the `{ts_ms, level, trace_id, span_id,
/// event_type, src, msg}` record shape.
#[derive(Debug, Clone)]
pub struct ObservabilityRecord {
    pub ts_ms: u128,
    pub level: ObsLevel,
    /// The run a given event belongs to — the root span's `trace_id`
    /// field, when recorded inside one.
    pub trace_id: Option<String>,
    /// The phase an event was recorded in (e.g. `streaming`, `tools`,
    /// `continuing`, `agent_run`) — the innermost active span's name.
    pub span_id: Option<String>,
    /// The tracing callsite's name (`event <file>:<line>` by default).
    pub event_type: String,
    /// The tracing target, usually the emitting module path.
    pub src: String,
    pub msg: String,
}

struct RingBuffer {
    cap: usize,
    buf: VecDeque<ObservabilityRecord>,
}

impl RingBuffer {
    fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            buf: VecDeque::with_capacity(cap.min(1024)),
        }
    }

    fn push(&mut self, rec: ObservabilityRecord) {
        if self.buf.len() >= self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(rec);
    }
}

/// Shared handle to a bounded ring buffer of recent structured events.
///
/// Cheap to clone — every clone observes the same buffer. Construct once
/// at process startup (capacity and level are fixed for the handle's
/// lifetime; there is deliberately no global reconfiguration hook).
#[derive(Clone)]
pub struct ObservabilityHandle {
    level: ObsLevel,
    buf: Arc<Mutex<RingBuffer>>,
}

impl ObservabilityHandle {
    /// `capacity` is the number of most-recent records retained; `level`
    /// is the most verbose level this handle will store (independent of
    /// whatever `EnvFilter` governs a separate formatting layer).
    pub fn new(capacity: usize, level: ObsLevel) -> Self {
        Self {
            level,
            buf: Arc::new(Mutex::new(RingBuffer::new(capacity))),
        }
    }

    /// A `tracing_subscriber::Layer` feeding this handle. Compose into a
    /// registry alongside any other layer:
    /// `tracing_subscriber::registry().with(handle.layer()).with(fmt_layer)`.
    pub fn layer(&self) -> ObservabilityLayer {
        ObservabilityLayer {
            handle: self.clone(),
        }
    }

    /// Snapshot the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<ObservabilityRecord> {
        self.buf.lock().unwrap().buf.iter().cloned().collect()
    }

    /// Render the snapshot as plain text, one line per record — what a
    /// panic hook or a `/debug dump` command writes out.
    pub fn dump_to_string(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        for r in self.snapshot() {
            let _ = writeln!(
                out,
                "[{}] {:?} trace={} span={} {} {}: {}",
                r.ts_ms,
                r.level,
                r.trace_id.as_deref().unwrap_or("-"),
                r.span_id.as_deref().unwrap_or("-"),
                r.event_type,
                r.src,
                r.msg,
            );
        }
        out
    }

    fn record(&self, rec: ObservabilityRecord) {
        if rec.level > self.level {
            return;
        }
        self.buf.lock().unwrap().push(rec);
    }
}

/// Per-span state stashed in the subscriber's extensions by
/// [`ObservabilityLayer::on_new_span`] so later events in the same span
/// tree can recover the run's `trace_id` without re-walking fields.
struct SpanFields {
    trace_id: Option<String>,
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    trace_id: Option<String>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "trace_id" => self.trace_id = Some(format!("{value:?}").trim_matches('"').to_string()),
            name if self.message.is_empty() => self.message = format!("{name}={value:?}"),
            name => self.message.push_str(&format!(", {name}={value:?}")),
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "trace_id" => self.trace_id = Some(value.to_string()),
            name if self.message.is_empty() => self.message = format!("{name}={value}"),
            name => self.message.push_str(&format!(", {name}={value}")),
        }
    }
}

/// `tracing_subscriber::Layer` that feeds an [`ObservabilityHandle`].
pub struct ObservabilityLayer {
    handle: ObservabilityHandle,
}

impl<S> Layer<S> for ObservabilityLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &tracing_span::Attributes<'_>, id: &tracing_span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        if visitor.trace_id.is_some() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(SpanFields {
                    trace_id: visitor.trace_id,
                });
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut trace_id = None;
        let mut span_id = None;
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                span_id = Some(span.name().to_string());
                if trace_id.is_none() {
                    let ext = span.extensions();
                    if let Some(fields) = ext.get::<SpanFields>() {
                        trace_id = fields.trace_id.clone();
                    }
                }
            }
        }

        let ts_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);

        self.handle.record(ObservabilityRecord {
            ts_ms,
            level: ObsLevel::from_tracing(meta.level()),
            trace_id,
            span_id,
            event_type: meta.name().to_string(),
            src: meta.target().to_string(),
            msg: visitor.message,
        });
    }
}
