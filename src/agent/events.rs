//! Event streaming substrate
//!
//! Process-wide registry mapping cycle id to a bounded FIFO of typed
//! events. Stages emit from any thread; SSE consumers read by sequence
//! cursor so delivery order always matches emission order. Streams are
//! retained for a grace period after the cycle terminates.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

/// Max buffered events per cycle; oldest are dropped on overflow.
const STREAM_CAPACITY: usize = 1000;
/// How long a terminated cycle's stream stays readable.
const RETIRE_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connection,
    Progress,
    DecisionItem,
    ActionItem,
    AgentDialogue,
    FinanceFeedback,
    Forecast,
    ReviewRequired,
    Status,
    Error,
    Close,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub stage: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

struct CycleStream {
    events: VecDeque<StreamEvent>,
    next_seq: u64,
    retired_at: Option<Instant>,
}

impl CycleStream {
    fn new() -> Self {
        Self {
            events: VecDeque::with_capacity(64),
            next_seq: 0,
            retired_at: None,
        }
    }

    fn push(&mut self, mut event: StreamEvent) {
        event.seq = self.next_seq;
        self.next_seq += 1;
        if self.events.len() >= STREAM_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

lazy_static! {
    static ref STREAMS: Mutex<HashMap<String, CycleStream>> = Mutex::new(HashMap::new());
}

/// Handle for emitting events into one cycle's stream.
#[derive(Clone)]
pub struct EventSink {
    cycle_id: String,
}

impl EventSink {
    pub fn cycle_id(&self) -> &str {
        &self.cycle_id
    }

    pub fn emit(&self, kind: EventKind, stage: &str, message: impl Into<String>) {
        self.emit_with(kind, stage, message, None);
    }

    pub fn emit_with(
        &self,
        kind: EventKind,
        stage: &str,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) {
        emit(&self.cycle_id, kind, stage, message.into(), details);
    }
}

/// Register a stream for a new cycle and return its sink.
pub fn create_stream(cycle_id: &str) -> EventSink {
    let mut streams = STREAMS.lock();
    gc_retired(&mut streams);
    streams.insert(cycle_id.to_string(), CycleStream::new());
    EventSink {
        cycle_id: cycle_id.to_string(),
    }
}

pub fn emit(
    cycle_id: &str,
    kind: EventKind,
    stage: &str,
    message: String,
    details: Option<serde_json::Value>,
) {
    let mut streams = STREAMS.lock();
    if let Some(stream) = streams.get_mut(cycle_id) {
        debug!(cycle = cycle_id, stage, "{}", message);
        stream.push(StreamEvent {
            seq: 0,
            kind,
            stage: stage.to_string(),
            message,
            details,
            timestamp: Utc::now(),
        });
    }
}

/// Events with `seq >= cursor`, in emission order. Returns the cursor to
/// use on the next poll.
pub fn events_since(cycle_id: &str, cursor: u64) -> (Vec<StreamEvent>, u64) {
    let streams = STREAMS.lock();
    match streams.get(cycle_id) {
        Some(stream) => {
            let batch: Vec<StreamEvent> = stream
                .events
                .iter()
                .filter(|e| e.seq >= cursor)
                .cloned()
                .collect();
            let next = batch.last().map(|e| e.seq + 1).unwrap_or(cursor);
            (batch, next)
        }
        None => (Vec::new(), cursor),
    }
}

/// Mark a cycle's stream terminal. It stays readable for the grace
/// period, then is dropped by the next registry access.
pub fn retire_stream(cycle_id: &str) {
    let mut streams = STREAMS.lock();
    if let Some(stream) = streams.get_mut(cycle_id) {
        stream.retired_at = Some(Instant::now());
    }
}

fn gc_retired(streams: &mut HashMap<String, CycleStream>) {
    streams.retain(|_, s| match s.retired_at {
        Some(at) => at.elapsed() < RETIRE_GRACE,
        None => true,
    });
}
