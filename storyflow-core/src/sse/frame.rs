use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{CoreResult, StoryflowError};
use crate::stream::EventKind;

/// One decoded server-pushed message.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    raw: String,
    payload: Map<String, Value>,
    event_type: Option<String>,
}

impl EventFrame {
    /// Decode a frame's data. Anything but a JSON object is a decode error.
    /// A `type` that is not a string is left unclassified.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| StoryflowError::FrameDecode(e.to_string()))?;
        let Value::Object(payload) = value else {
            return Err(StoryflowError::FrameDecode(format!(
                "expected a JSON object, got {}",
                json_kind(&value)
            )));
        };
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self {
            raw: raw.to_string(),
            payload,
            event_type,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    pub fn kind(&self) -> Option<EventKind> {
        self.event_type.as_deref().map(EventKind::from_frame_type)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Map the payload onto one of the typed payloads in [`crate::model`].
    pub fn decode<T: DeserializeOwned>(&self) -> CoreResult<T> {
        serde_json::from_value(Value::Object(self.payload.clone()))
            .map_err(|e| StoryflowError::FrameDecode(e.to_string()))
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
