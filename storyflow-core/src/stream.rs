//! Events delivered to stream listeners.
//!
//! Contract:
//! - Every decoded frame is delivered once under [`EventKind::Message`] and, when it
//!   carries a string `type`, once more under the kind named by that type.
//! - `Open`, `Close`, `Error` and `ParseError` are local lifecycle channels; a frame
//!   can reach `Error` (its `type` is `"error"`) but never the other three.
//!
//! `StreamEvent` does not derive `Clone` because it carries `StoryflowError`.

use std::fmt;

use crate::error::StoryflowError;
use crate::sse::frame::EventFrame;

/// Registry key for listeners.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Error,
    ParseError,
    Message,
    Connected,
    Token,
    StageUpdate,
    Progress,
    Done,
    StreamEnd,
    /// Frame types the client has no dedicated kind for, e.g. `pipeline_done`.
    Other(String),
}

impl EventKind {
    /// Classify a frame's `type` value.
    pub fn from_frame_type(t: &str) -> Self {
        match t {
            "connected" => Self::Connected,
            "token" => Self::Token,
            "stage_update" => Self::StageUpdate,
            "progress" => Self::Progress,
            "done" => Self::Done,
            "error" => Self::Error,
            "stream_end" => Self::StreamEnd,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Error => "error",
            Self::ParseError => "parse_error",
            Self::Message => "message",
            Self::Connected => "connected",
            Self::Token => "token",
            Self::StageUpdate => "stage_update",
            Self::Progress => "progress",
            Self::Done => "done",
            Self::StreamEnd => "stream_end",
            Self::Other(name) => name,
        }
    }

    /// Frame kinds after which the producer considers the stream finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::StreamEnd)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport status, mirroring the EventSource ready states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

/// What a listener receives.
#[non_exhaustive]
#[derive(Debug)]
pub enum StreamEvent {
    /// The transport reported the connection as open.
    Open { url: String },
    /// The transport closed; a reconnect may follow.
    Close { url: String },
    /// Transport-level failure, reported before any reconnect decision.
    TransportError {
        error: StoryflowError,
        ready_state: ReadyState,
    },
    /// A frame could not be decoded; the connection stays open.
    ParseError { error: StoryflowError, raw: String },
    /// A decoded frame, delivered under `Message` and under its own kind.
    Frame(EventFrame),
}

impl StreamEvent {
    pub fn as_frame(&self) -> Option<&EventFrame> {
        match self {
            Self::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    /// Error carried by a transport or parse failure.
    pub fn error(&self) -> Option<&StoryflowError> {
        match self {
            Self::TransportError { error, .. } | Self::ParseError { error, .. } => Some(error),
            _ => None,
        }
    }
}
