use thiserror::Error;

/// Core error type for storyflow. Stream failures reach listeners as events;
/// config and REST calls return them through `CoreResult<T>`.
#[derive(Debug, Error)]
pub enum StoryflowError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// A streamed frame was not a JSON object.
    #[error("frame decode failed: {0}")]
    FrameDecode(String),

    /// The streaming transport failed or was closed underneath us.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("listener for `{event}` panicked: {message}")]
    Listener { event: String, message: String },

    #[error("reconnect attempts exhausted after {attempts} tries to {url}")]
    ReconnectExhausted { url: String, attempts: u32 },

    #[error("rate limited by {endpoint}")]
    RateLimited {
        endpoint: String,
        retry_after: Option<u64>,
    },

    #[error("backend unavailable: {endpoint}")]
    Unavailable { endpoint: String },

    #[error("upstream error from {endpoint}: {code} {message}")]
    Upstream {
        endpoint: String,
        code: String,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = std::result::Result<T, StoryflowError>;
