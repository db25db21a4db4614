use serde_json::{json, Value};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// Notification emitted while a digest run progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress { message: String },
    FinalData { json_data: Vec<Value> },
    Error { message: String },
}

impl ProgressEvent {
    pub fn progress(message: impl Into<String>) -> Self {
        Self::Progress {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Event name on the wire (`event:` line of the SSE frame).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::FinalData { .. } => "final_data",
            Self::Error { .. } => "error",
        }
    }

    /// Event body (`data:` line of the SSE frame).
    pub fn payload(&self) -> Value {
        match self {
            Self::Progress { message } | Self::Error { message } => json!({ "message": message }),
            Self::FinalData { json_data } => json!({ "jsonData": json_data }),
        }
    }

    /// Single-object form used on the websocket: the payload tagged with `type`.
    pub fn to_tagged_json(&self) -> Value {
        let mut value = self.payload();
        if let Value::Object(map) = &mut value {
            map.insert("type".to_string(), Value::String(self.name().to_string()));
        }
        value
    }
}

/// Receiver of progress events. Emitting never blocks and never fails: a consumer that went
/// away simply stops seeing events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        if self.send(event).is_err() {
            debug!("progress consumer disconnected, event dropped");
        }
    }
}

/// Sink writing every event to the log; used by the one-shot CLI run.
#[derive(Debug, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::Progress { message } => info!("{}", message),
            ProgressEvent::Error { message } => tracing::error!("{}", message),
            ProgressEvent::FinalData { json_data } => {
                info!(results = json_data.len(), "final data ready")
            }
        }
    }
}

/// Sink keeping every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress { message } | ProgressEvent::Error { message } => {
                    Some(message)
                }
                ProgressEvent::FinalData { .. } => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
