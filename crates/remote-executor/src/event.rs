//! Raw events from a live remote session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw event from a remote session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The type of event
    pub event_type: SessionEventType,
    /// Optional data associated with the event
    pub data: Option<String>,
}

impl SessionEvent {
    /// Create a new session event
    pub fn new(event_type: SessionEventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            data: None,
        }
    }

    /// Create a new session event with data
    pub fn new_with_data(event_type: SessionEventType, data: String) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            data: Some(data),
        }
    }
}

/// Types of raw session events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionEventType {
    /// The local transport process has started
    Started {
        /// Local pid of the transport process
        pid: u32,
    },
    /// Log line from the session's stdout
    Stdout,
    /// Log line from the session's stderr
    Stderr,
}
