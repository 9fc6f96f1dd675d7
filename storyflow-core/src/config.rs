use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

pub const ENV_STREAM_BASE_URL: &str = "STORYFLOW_STREAM_BASE_URL";
pub const ENV_API_BASE_URL: &str = "STORYFLOW_API_BASE_URL";
pub const ENV_API_PREFIX: &str = "STORYFLOW_API_PREFIX";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EndpointCfg {
    /// Base URL of the server-push endpoint (default http://localhost:8010)
    #[serde(default = "default_stream_base_url")]
    pub stream_base_url: String,
    /// Base URL of the REST API (default http://localhost:8000)
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Path prefix shared by both surfaces (default /api/v1)
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
}

impl Default for EndpointCfg {
    fn default() -> Self {
        Self {
            stream_base_url: default_stream_base_url(),
            api_base_url: default_api_base_url(),
            api_prefix: default_api_prefix(),
        }
    }
}

fn default_stream_base_url() -> String {
    "http://localhost:8010".into()
}
fn default_api_base_url() -> String {
    "http://localhost:8000".into()
}
fn default_api_prefix() -> String {
    "/api/v1".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StreamCfg {
    #[serde(default)]
    pub auto_reconnect: bool,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base of the linear reconnect backoff, in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Delay between a terminal frame and the automatic disconnect
    #[serde(default = "default_grace_delay_ms")]
    pub grace_delay_ms: u64,
}

impl Default for StreamCfg {
    fn default() -> Self {
        Self {
            auto_reconnect: false,
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            grace_delay_ms: default_grace_delay_ms(),
        }
    }
}

impl StreamCfg {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }
}

fn default_max_reconnect_attempts() -> u32 {
    3
}
fn default_reconnect_delay_ms() -> u64 {
    1_000
}
fn default_grace_delay_ms() -> u64 {
    100
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total timeout for REST calls in milliseconds (default 60000ms).
    /// Streams are long-lived and never get a total timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub endpoints: EndpointCfg,
    #[serde(default)]
    pub stream: StreamCfg,
    #[serde(default)]
    pub http: HttpCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::StoryflowError::from)?;
        let s = std::str::from_utf8(&bytes)
            .map_err(|e| crate::error::StoryflowError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::StoryflowError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::StoryflowError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::StoryflowError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::StoryflowError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }

    /// Overlay endpoint settings from the process environment. Read once at
    /// startup; later changes to the environment are not observed.
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::with_env`] with an injectable lookup.
    pub fn with_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty(ENV_STREAM_BASE_URL) {
            self.endpoints.stream_base_url = v;
        }
        if let Some(v) = non_empty(ENV_API_BASE_URL) {
            self.endpoints.api_base_url = v;
        }
        if let Some(v) = non_empty(ENV_API_PREFIX) {
            self.endpoints.api_prefix = v;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_backend_conventions() {
        let cfg = Config::default();
        assert_eq!(cfg.endpoints.stream_base_url, "http://localhost:8010");
        assert_eq!(cfg.endpoints.api_base_url, "http://localhost:8000");
        assert_eq!(cfg.endpoints.api_prefix, "/api/v1");
        assert!(!cfg.stream.auto_reconnect);
        assert_eq!(cfg.stream.max_reconnect_attempts, 3);
        assert_eq!(cfg.stream.reconnect_delay(), Duration::from_millis(1_000));
        assert_eq!(cfg.stream.grace_delay(), Duration::from_millis(100));
    }

    #[test]
    fn load_from_json() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("storyflow.json");
        let json = r#"{
          "endpoints": {"stream_base_url": "http://sse.internal:9000"},
          "stream": {"auto_reconnect": true, "max_reconnect_attempts": 5}
        }"#;
        fs::write(&file, json).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.endpoints.stream_base_url, "http://sse.internal:9000");
        assert_eq!(cfg.endpoints.api_base_url, "http://localhost:8000");
        assert!(cfg.stream.auto_reconnect);
        assert_eq!(cfg.stream.max_reconnect_attempts, 5);
        assert_eq!(cfg.stream.reconnect_delay_ms, 1_000);
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.http.pool_max_idle_per_host, None);
    }

    #[test]
    fn load_from_toml() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("storyflow.toml");
        let toml = r#"
[endpoints]
api_base_url = "http://api.internal"
api_prefix = "/api/v2"

[stream]
reconnect_delay_ms = 250
grace_delay_ms = 50

[http]
request_timeout_ms = 10000
"#;
        fs::write(&file, toml).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.endpoints.api_base_url, "http://api.internal");
        assert_eq!(cfg.endpoints.api_prefix, "/api/v2");
        assert_eq!(cfg.stream.reconnect_delay(), Duration::from_millis(250));
        assert_eq!(cfg.stream.grace_delay(), Duration::from_millis(50));
        assert_eq!(cfg.http.request_timeout_ms, 10_000);
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
    }

    #[test]
    fn missing_file_returns_io_error() {
        let missing = std::path::PathBuf::from("/definitely/not/here/storyflow-missing.json");
        let err = Config::from_path(&missing).unwrap_err();
        match err {
            crate::error::StoryflowError::Io(_) => {}
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_json_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.json");
        fs::write(&file, r#"{ "stream": { "auto_reconnect": "yes" }"#).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            crate::error::StoryflowError::Other(_) => {}
            other => panic!("expected Other(json parse) error, got: {:?}", other),
        }
    }

    #[test]
    fn unknown_extension_falls_back_to_toml() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("storyflow.conf");
        fs::write(&file, "[stream]\nauto_reconnect = true\n").unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert!(cfg.stream.auto_reconnect);
        assert_eq!(cfg.stream.max_reconnect_attempts, 3);
    }

    #[test]
    fn env_overlay_replaces_only_present_values() {
        let env: HashMap<&str, &str> = [
            (ENV_STREAM_BASE_URL, "http://stream.example"),
            (ENV_API_PREFIX, "  "),
        ]
        .into_iter()
        .collect();
        let cfg = Config::default().with_env_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.endpoints.stream_base_url, "http://stream.example");
        assert_eq!(cfg.endpoints.api_base_url, "http://localhost:8000");
        assert_eq!(cfg.endpoints.api_prefix, "/api/v1");
    }
}
