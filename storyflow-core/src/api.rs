use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::{CoreResult, StoryflowError};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{ExecuteStageAccepted, Stage};

/// REST client for the project stage-control endpoints.
#[derive(Debug, Clone)]
pub struct ProjectsApi {
    http: HttpClient,
    base: String,
}

// ---- Wire structs ----
#[derive(Serialize)]
struct ExecuteStageReq<'a> {
    stage_name: Stage,
    input_data: &'a Value,
    use_streaming: bool,
}

#[derive(Serialize)]
struct StageReq {
    stage_name: Stage,
}

#[derive(Serialize)]
struct Empty {}

#[derive(Serialize)]
struct ExportReq<'a> {
    include_subtitles: bool,
    video_format: &'a str,
}

/// Filters for [`ProjectsApi::list_projects`]; unset fields are left out of the query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Sort field, `-` prefixed for descending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordering: Option<String>,
}

/// Export options; the server renders mp4 with subtitles unless told otherwise.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub include_subtitles: bool,
    pub video_format: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_subtitles: true,
            video_format: "mp4".to_string(),
        }
    }
}

impl ProjectsApi {
    pub fn new(http: HttpClient, api_base_url: &str, api_prefix: &str) -> Self {
        let prefix = api_prefix.trim().trim_matches('/');
        let mut base = api_base_url.trim().trim_end_matches('/').to_string();
        if !prefix.is_empty() {
            base.push('/');
            base.push_str(prefix);
        }
        Self { http, base }
    }

    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        Ok(Self::new(
            HttpClient::from_cfg(&cfg.http)?,
            &cfg.endpoints.api_base_url,
            &cfg.endpoints.api_prefix,
        ))
    }

    fn project_url(&self, project_id: &str, action: &str) -> CoreResult<String> {
        let id = project_id.trim();
        if id.is_empty() || id.contains('/') {
            return Err(StoryflowError::Validation(format!(
                "invalid project id '{project_id}'"
            )));
        }
        Ok(format!("{}/projects/projects/{id}/{action}", self.base))
    }

    fn collection_url(&self) -> String {
        format!("{}/projects/projects/", self.base)
    }

    pub async fn list_projects(&self, query: &ProjectQuery) -> CoreResult<Value> {
        self.http
            .get_json_query(&self.collection_url(), query, &RequestCtx::default())
            .await
    }

    /// Create a project from `data` (`name`, `description`, `original_topic`,
    /// `prompt_template_set`). `name` is required.
    pub async fn create_project(&self, data: &Value) -> CoreResult<Value> {
        let named = data
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|n| !n.trim().is_empty());
        if !named {
            return Err(StoryflowError::Validation("project name is required".into()));
        }
        let created: Value = self
            .http
            .post_json(&self.collection_url(), data, &RequestCtx::default())
            .await?;
        tracing::info!(project_id = %created.get("id").unwrap_or(&serde_json::Value::Null), "project created");
        Ok(created)
    }

    pub async fn update_project(&self, project_id: &str, changes: &Value) -> CoreResult<Value> {
        let url = self.project_url(project_id, "")?;
        self.http
            .patch_json(&url, changes, &RequestCtx::default())
            .await
    }

    pub async fn delete_project(&self, project_id: &str) -> CoreResult<()> {
        let url = self.project_url(project_id, "")?;
        self.http.delete(&url, &RequestCtx::default()).await?;
        tracing::info!(project_id, "project deleted");
        Ok(())
    }

    /// Start rendering the final video.
    pub async fn export_project(
        &self,
        project_id: &str,
        options: &ExportOptions,
    ) -> CoreResult<Value> {
        let url = self.project_url(project_id, "export/")?;
        let body = ExportReq {
            include_subtitles: options.include_subtitles,
            video_format: &options.video_format,
        };
        self.http
            .post_json(&url, &body, &RequestCtx::default())
            .await
    }

    pub async fn get_project(&self, project_id: &str) -> CoreResult<Value> {
        let url = self.project_url(project_id, "")?;
        self.http.get_json(&url, &RequestCtx::default()).await
    }

    pub async fn list_stages(&self, project_id: &str) -> CoreResult<Value> {
        let url = self.project_url(project_id, "stages/")?;
        self.http.get_json(&url, &RequestCtx::default()).await
    }

    /// Queue `stage` for background execution. Progress arrives on the stage stream.
    pub async fn execute_stage(
        &self,
        project_id: &str,
        stage: Stage,
        input: &Value,
        use_streaming: bool,
    ) -> CoreResult<ExecuteStageAccepted> {
        let url = self.project_url(project_id, "execute_stage/")?;
        let body = ExecuteStageReq {
            stage_name: stage,
            input_data: input,
            use_streaming,
        };
        let accepted: ExecuteStageAccepted = self
            .http
            .post_json(&url, &body, &RequestCtx::default())
            .await?;
        tracing::info!(project_id, stage = %stage, task_id = %accepted.task_id, "stage queued");
        Ok(accepted)
    }

    pub async fn retry_stage(&self, project_id: &str, stage: Stage) -> CoreResult<Value> {
        let url = self.project_url(project_id, "retry_stage/")?;
        self.http
            .post_json(&url, &StageReq { stage_name: stage }, &RequestCtx::default())
            .await
    }

    pub async fn rollback_stage(&self, project_id: &str, stage: Stage) -> CoreResult<Value> {
        let url = self.project_url(project_id, "rollback_stage/")?;
        self.http
            .post_json(&url, &StageReq { stage_name: stage }, &RequestCtx::default())
            .await
    }

    pub async fn pause(&self, project_id: &str) -> CoreResult<Value> {
        self.post_action(project_id, "pause/").await
    }

    pub async fn resume(&self, project_id: &str) -> CoreResult<Value> {
        self.post_action(project_id, "resume/").await
    }

    /// Run every stage that has not completed yet.
    pub async fn run_pipeline(&self, project_id: &str) -> CoreResult<Value> {
        self.post_action(project_id, "run_pipeline/").await
    }

    async fn post_action(&self, project_id: &str, action: &str) -> CoreResult<Value> {
        let url = self.project_url(project_id, action)?;
        self.http
            .post_json(&url, &Empty {}, &RequestCtx::default())
            .await
    }
}
