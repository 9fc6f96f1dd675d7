use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoryflowError;

/// A step of the backend's content pipeline, in execution order.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Rewrite,
    Storyboard,
    ImageGeneration,
    CameraMovement,
    VideoGeneration,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Rewrite,
        Stage::Storyboard,
        Stage::ImageGeneration,
        Stage::CameraMovement,
        Stage::VideoGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Rewrite => "rewrite",
            Stage::Storyboard => "storyboard",
            Stage::ImageGeneration => "image_generation",
            Stage::CameraMovement => "camera_movement",
            Stage::VideoGeneration => "video_generation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = StoryflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| StoryflowError::Validation(format!("unknown stage '{s}'")))
    }
}

// ---- Frame payloads published by the backend ----

/// Incremental text from an LLM-backed stage.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TokenPayload {
    pub content: String,
    #[serde(default)]
    pub full_text: String,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StageUpdatePayload {
    #[serde(default)]
    pub stage: Option<String>,
    /// processing / completed / failed
    pub status: String,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Batch progress for image and video generation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProgressPayload {
    pub current: u32,
    pub total: u32,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub item_name: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DonePayload {
    #[serde(default)]
    pub full_text: String,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorPayload {
    pub error: String,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub stage: Option<String>,
}

// ---- REST wire types ----

/// `202 Accepted` body returned when a stage is queued for background execution.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExecuteStageAccepted {
    pub task_id: String,
    #[serde(default)]
    pub channel: Option<String>,
    pub stage: Stage,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}
