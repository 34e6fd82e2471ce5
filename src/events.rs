//! Progress events emitted by the refinement loop.
//!
//! The vocabulary is closed. Within one iteration events arrive in this order:
//!
//! ```text
//! iteration_started
//! render_attempt_failed*      (zero or more)
//! rendered
//! evaluated
//! fulfilled | planned -> code_generated
//! ```
//!
//! Every run ends with exactly one terminal event: `fulfilled`,
//! `iteration_exhausted` or `aborted`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::refine::AbortReason;

/// A single observable transition of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    IterationStarted {
        iteration: u32,
        max_iterations: u32,
    },
    RenderAttemptFailed {
        iteration: u32,
        /// Zero for the initial render, then the repair attempt number.
        attempt: u32,
        max_attempts: u32,
        diagnostic: String,
    },
    Rendered {
        iteration: u32,
        views: Vec<String>,
        /// The source was changed by the repair sub-loop before rendering.
        repaired: bool,
        final_pass: bool,
    },
    Evaluated {
        iteration: u32,
        fulfilled: bool,
        explanation: String,
        raw: String,
        final_pass: bool,
    },
    Planned {
        iteration: u32,
        plan: Value,
        raw: String,
    },
    CodeGenerated {
        iteration: u32,
        source: String,
        digest: String,
    },
    Fulfilled {
        iterations_run: u32,
    },
    IterationExhausted {
        iterations_run: u32,
        explanation: String,
    },
    Aborted {
        reason: AbortReason,
        detail: String,
        iterations_run: u32,
    },
}

impl ProgressEvent {
    /// The `type` tag of this event.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IterationStarted { .. } => "iteration_started",
            Self::RenderAttemptFailed { .. } => "render_attempt_failed",
            Self::Rendered { .. } => "rendered",
            Self::Evaluated { .. } => "evaluated",
            Self::Planned { .. } => "planned",
            Self::CodeGenerated { .. } => "code_generated",
            Self::Fulfilled { .. } => "fulfilled",
            Self::IterationExhausted { .. } => "iteration_exhausted",
            Self::Aborted { .. } => "aborted",
        }
    }

    /// Whether this event ends the run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Fulfilled { .. } | Self::IterationExhausted { .. } | Self::Aborted { .. }
        )
    }
}

/// Receives progress events from a run.
///
/// Sinks are called synchronously from the loop and must not block for long.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: &ProgressEvent) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::IterationStarted {
                iteration,
                max_iterations,
            } => info!("iteration {}/{} started", iteration, max_iterations),
            ProgressEvent::RenderAttemptFailed {
                iteration,
                attempt,
                diagnostic,
                ..
            } => warn!(iteration, attempt, "render failed: {}", diagnostic),
            ProgressEvent::Evaluated {
                iteration,
                fulfilled,
                explanation,
                ..
            } => info!(iteration, fulfilled, "evaluated: {}", explanation),
            ProgressEvent::Aborted { reason, detail, .. } => {
                warn!(reason = %reason, "run aborted: {}", detail)
            }
            ProgressEvent::Fulfilled { iterations_run } => {
                info!(iterations_run, "specification fulfilled")
            }
            other => debug!(event = other.kind(), "progress"),
        }
    }
}

/// Appends events to a JSON Lines file.
///
/// Each line is the serialized event plus `run_id` and `ts` fields.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            run_id: run_id.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn append(&self, event: &ProgressEvent) -> anyhow::Result<()> {
        let mut value = serde_json::to_value(event)?;
        if let Value::Object(map) = &mut value {
            map.insert("run_id".to_string(), Value::String(self.run_id.clone()));
            map.insert("ts".to_string(), Value::String(now_utc_iso()));
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let line = serde_json::to_string(&value)?;
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonlSink {
    fn emit(&self, event: &ProgressEvent) {
        if let Err(e) = self.append(event) {
            warn!("failed to write event to {}: {}", self.path.display(), e);
        }
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Sends events over an unbounded channel.
///
/// Once the receiver is dropped, later events are discarded.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<ProgressEvent>,
    receiver_gone: Arc<AtomicBool>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self {
            tx,
            receiver_gone: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True once an event could not be delivered.
    pub fn receiver_gone(&self) -> bool {
        self.receiver_gone.load(Ordering::Relaxed)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: &ProgressEvent) {
        let delivered = self.tx.send(event.clone()).is_ok();
        if !delivered && !self.receiver_gone.swap(true, Ordering::Relaxed) {
            debug!(
                "event receiver dropped, discarding '{}' and later events",
                event.kind()
            );
        }
    }
}

/// Fans events out to several sinks in order.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn ProgressSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: Box<dyn ProgressSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ProgressSink for MultiSink {
    fn emit(&self, event: &ProgressEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
