use std::pin::Pin;
use std::time::{Duration, Instant};

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use crate::config::HttpCfg;
use crate::error::{CoreResult, StoryflowError};

/// Request context carries correlation IDs and idempotency key.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
    pub idempotency_key: Option<&'a str>,
}

/// One dispatched event-stream message. `event` is `"message"` when the
/// server sent no `event:` field; multi-line `data` is joined with `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: String,
}

pub type SseStream = Pin<Box<dyn Stream<Item = CoreResult<SseEvent>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
    request_timeout: Duration,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    /// The underlying client carries no total timeout so that event streams
    /// can stay open; REST calls apply `request_timeout_ms` per request.
    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder.build().map_err(|e| {
            StoryflowError::Other(anyhow::anyhow!("http client build failed: {e}"))
        })?;
        Ok(Self {
            inner,
            user_agent: "storyflow/0.1".to_string(),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
        })
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<R> {
        let req = self
            .inner
            .post(url)
            .json(body)
            .timeout(self.request_timeout)
            .header("User-Agent", &self.user_agent);
        self.send_json(url, apply_ctx(req, ctx)).await
    }

    pub async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<R> {
        let req = self
            .inner
            .get(url)
            .timeout(self.request_timeout)
            .header("User-Agent", &self.user_agent);
        self.send_json(url, apply_ctx(req, ctx)).await
    }

    /// GET with `query` serialized into the URL query string.
    pub async fn get_json_query<Q: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        query: &Q,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<R> {
        let req = self
            .inner
            .get(url)
            .query(query)
            .timeout(self.request_timeout)
            .header("User-Agent", &self.user_agent);
        self.send_json(url, apply_ctx(req, ctx)).await
    }

    pub async fn patch_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<R> {
        let req = self
            .inner
            .patch(url)
            .json(body)
            .timeout(self.request_timeout)
            .header("User-Agent", &self.user_agent);
        self.send_json(url, apply_ctx(req, ctx)).await
    }

    /// DELETE `url`; any response body is discarded.
    pub async fn delete(&self, url: &str, ctx: &RequestCtx<'_>) -> CoreResult<()> {
        let req = self
            .inner
            .delete(url)
            .timeout(self.request_timeout)
            .header("User-Agent", &self.user_agent);
        self.send(url, apply_ctx(req, ctx)).await.map(|_| ())
    }

    async fn send_json<R: DeserializeOwned>(
        &self,
        url: &str,
        req: reqwest::RequestBuilder,
    ) -> CoreResult<R> {
        let resp = self.send(url, req).await?;
        let status = resp.status();
        resp.json::<R>().await.map_err(|e| StoryflowError::Upstream {
            endpoint: url.into(),
            code: status.as_u16().to_string(),
            message: format!("json decode error: {e}"),
        })
    }

    /// Send `req` and map any non-success status to an error.
    async fn send(
        &self,
        url: &str,
        req: reqwest::RequestBuilder,
    ) -> CoreResult<reqwest::Response> {
        let start = Instant::now();
        let resp = req.send().await.map_err(|e| {
            tracing::warn!(url, error = %e, "request failed");
            StoryflowError::Unavailable {
                endpoint: url.into(),
            }
        })?;

        let status = resp.status();
        let headers = resp.headers().clone();
        tracing::debug!(
            url,
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            backend_request_id = extract_request_id(&headers).as_deref(),
            "response received"
        );

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let ra = parse_retry_after(&headers);
            return Err(map_http_error(url, status, ra, &text));
        }
        Ok(resp)
    }

    /// GET an event-stream endpoint and return its body as parsed messages.
    /// Comments and `retry:` lines are consumed by the parser.
    pub async fn get_sse(&self, url: &str, ctx: &RequestCtx<'_>) -> CoreResult<SseStream> {
        let req = self
            .inner
            .get(url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache");
        let resp = apply_ctx(req, ctx).send().await.map_err(|e| {
            StoryflowError::Transport(format!("connect to {url} failed: {e}"))
        })?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let ra = parse_retry_after(&headers);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(url, status, ra, &body));
        }

        let stream = resp.bytes_stream().eventsource().map(|item| match item {
            Ok(evt) => Ok(SseEvent {
                event: evt.event,
                data: evt.data,
                id: evt.id,
            }),
            Err(e) => Err(StoryflowError::Transport(format!("stream read failed: {e}"))),
        });
        Ok(Box::pin(stream))
    }
}

fn apply_ctx(mut req: reqwest::RequestBuilder, ctx: &RequestCtx<'_>) -> reqwest::RequestBuilder {
    if let Some(rid) = ctx.request_id {
        req = req.header("X-Request-Id", rid);
    }
    if let Some(ik) = ctx.idempotency_key {
        req = req.header("Idempotency-Key", ik);
    }
    req
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 2] = ["x-request-id", "request-id"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    None
}

fn map_http_error(
    endpoint: &str,
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> StoryflowError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => StoryflowError::RateLimited {
            endpoint: endpoint.to_string(),
            retry_after,
        },
        s if s.is_server_error() => StoryflowError::Unavailable {
            endpoint: endpoint.to_string(),
        },
        s => StoryflowError::Upstream {
            endpoint: endpoint.to_string(),
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut t = s[..end].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}
