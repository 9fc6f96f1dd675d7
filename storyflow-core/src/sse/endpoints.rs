use crate::config::{Config, EndpointCfg};
use crate::error::{CoreResult, StoryflowError};
use crate::model::Stage;
use crate::sse::client::{ConnectOptions, SseClient};

/// URL layout of the backend's project streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoints {
    base_url: String,
    api_prefix: String,
}

impl StreamEndpoints {
    pub fn new(base_url: &str, api_prefix: &str) -> Self {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let prefix = api_prefix.trim().trim_matches('/');
        let api_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("/{prefix}")
        };
        Self {
            base_url,
            api_prefix,
        }
    }

    pub fn from_cfg(cfg: &EndpointCfg) -> Self {
        Self::new(&cfg.stream_base_url, &cfg.api_prefix)
    }

    /// Stream of one stage of a project.
    pub fn stage(&self, project_id: &str, stage: Stage) -> CoreResult<String> {
        Ok(format!("{}stages/{}/", self.project(project_id)?, stage))
    }

    /// Stream of every stage of a project.
    pub fn project(&self, project_id: &str) -> CoreResult<String> {
        let id = project_id.trim();
        if id.is_empty() {
            return Err(StoryflowError::Validation("project id is empty".into()));
        }
        if id.contains('/') {
            return Err(StoryflowError::Validation(format!(
                "project id '{id}' contains '/'"
            )));
        }
        Ok(format!(
            "{}{}/projects/sse/projects/{}/",
            self.base_url, self.api_prefix, id
        ))
    }
}

/// Connect a client configured from `cfg` to one stage's stream.
pub fn open_stage_stream(
    cfg: &Config,
    project_id: &str,
    stage: Stage,
    options: ConnectOptions,
) -> CoreResult<SseClient> {
    let url = StreamEndpoints::from_cfg(&cfg.endpoints).stage(project_id, stage)?;
    let client = SseClient::from_config(cfg)?;
    client.connect(&url, options);
    Ok(client)
}

/// Connect a client configured from `cfg` to a project's all-stages stream.
pub fn open_project_stream(
    cfg: &Config,
    project_id: &str,
    options: ConnectOptions,
) -> CoreResult<SseClient> {
    let url = StreamEndpoints::from_cfg(&cfg.endpoints).project(project_id)?;
    let client = SseClient::from_config(cfg)?;
    client.connect(&url, options);
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let ep = StreamEndpoints::from_cfg(&EndpointCfg::default());
        assert_eq!(
            ep.stage("p1", Stage::Rewrite).unwrap(),
            "http://localhost:8010/api/v1/projects/sse/projects/p1/stages/rewrite/"
        );
        assert_eq!(
            ep.project("p1").unwrap(),
            "http://localhost:8010/api/v1/projects/sse/projects/p1/"
        );
    }

    #[test]
    fn slashes_are_normalized() {
        let ep = StreamEndpoints::new("https://api.example.com//", "api/v2/");
        assert_eq!(
            ep.stage("abc", Stage::ImageGeneration).unwrap(),
            "https://api.example.com/api/v2/projects/sse/projects/abc/stages/image_generation/"
        );
        let bare = StreamEndpoints::new("http://h", "");
        assert_eq!(bare.project("x").unwrap(), "http://h/projects/sse/projects/x/");
    }

    #[test]
    fn bad_project_ids_are_rejected() {
        let ep = StreamEndpoints::new("http://h", "/api/v1");
        assert!(matches!(ep.project(" "), Err(StoryflowError::Validation(_))));
        assert!(matches!(
            ep.stage("a/b", Stage::Storyboard),
            Err(StoryflowError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn open_project_stream_rejects_empty_id_before_connecting() {
        let err = open_project_stream(&Config::default(), "", ConnectOptions::default())
            .err()
            .expect("validation error");
        assert!(matches!(err, StoryflowError::Validation(_)));
    }

    #[tokio::test]
    async fn open_stage_stream_connects_to_the_stage_url() {
        let client = open_stage_stream(
            &Config::default(),
            "p9",
            Stage::Storyboard,
            ConnectOptions::default(),
        )
        .unwrap();
        assert_eq!(
            client.url().as_deref(),
            Some("http://localhost:8010/api/v1/projects/sse/projects/p9/stages/storyboard/")
        );
        client.disconnect();
    }
}
