use futures::future::{self, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};

use crate::config::HttpCfg;
use crate::error::{CoreResult, StoryflowError};
use crate::http_client::{HttpClient, RequestCtx};
use crate::stream::ReadyState;

/// What a live transport reports to its owning client.
#[derive(Debug)]
pub enum TransportEvent {
    /// The server accepted the stream.
    Open,
    /// Data of one complete event-stream message.
    Message(String),
    /// The response body ended cleanly.
    End,
    /// The transport failed; `ready_state` says whether it is still usable.
    Error {
        error: StoryflowError,
        ready_state: ReadyState,
    },
}

pub type TransportStream = BoxStream<'static, TransportEvent>;

/// Opens transports. Dropping the returned stream closes the connection.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: &str) -> TransportStream;
}

/// Event-stream transport over HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    http: HttpClient,
}

impl HttpConnector {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        Ok(Self::new(HttpClient::from_cfg(cfg)?))
    }
}

impl Connector for HttpConnector {
    fn open(&self, url: &str) -> TransportStream {
        let http = self.http.clone();
        let url = url.to_string();
        async move {
            match http.get_sse(&url, &RequestCtx::default()).await {
                Ok(events) => {
                    let messages = events.filter_map(|item| {
                        future::ready(match item {
                            Ok(ev) if ev.event.is_empty() || ev.event == "message" => {
                                Some(TransportEvent::Message(ev.data))
                            }
                            // Named events never reach an `onmessage` consumer.
                            Ok(ev) => {
                                tracing::debug!(event = %ev.event, "named event dropped");
                                None
                            }
                            Err(error) => Some(TransportEvent::Error {
                                error,
                                ready_state: ReadyState::Closed,
                            }),
                        })
                    });
                    stream::once(future::ready(TransportEvent::Open))
                        .chain(messages)
                        .chain(stream::once(future::ready(TransportEvent::End)))
                        .boxed()
                }
                Err(error) => stream::once(future::ready(TransportEvent::Error {
                    error,
                    ready_state: ReadyState::Closed,
                }))
                .boxed(),
            }
        }
        .flatten_stream()
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;

    #[tokio::test]
    async fn http_connector_yields_open_messages_end() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/api/v1/projects/sse/projects/p1/");
            then.status(200)
                .header("content-type", "text/event-stream; charset=utf-8")
                .body("data: {\"type\":\"connected\"}\n\n: ping\n\ndata: {\"type\":\"done\"}\n\n");
        });
        let connector = HttpConnector::from_cfg(&HttpCfg::default()).unwrap();
        let events: Vec<TransportEvent> = connector
            .open(&server.url("/api/v1/projects/sse/projects/p1/"))
            .collect()
            .await;

        assert_eq!(events.len(), 4, "{events:?}");
        assert!(matches!(events[0], TransportEvent::Open));
        assert!(matches!(&events[1], TransportEvent::Message(m) if m == "{\"type\":\"connected\"}"));
        assert!(matches!(&events[2], TransportEvent::Message(m) if m == "{\"type\":\"done\"}"));
        assert!(matches!(events[3], TransportEvent::End));
    }

    #[tokio::test]
    async fn http_connector_skips_named_events_and_joins_data_lines() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/s");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(concat!(
                    "event: ping\ndata: {}\n\n",
                    "event: message\ndata: {\"type\":\n",
                    "data: \"token\"}\n\n",
                ));
        });
        let connector = HttpConnector::from_cfg(&HttpCfg::default()).unwrap();
        let events: Vec<TransportEvent> = connector.open(&server.url("/s")).collect().await;

        assert_eq!(events.len(), 3, "{events:?}");
        assert!(matches!(&events[1], TransportEvent::Message(m) if m == "{\"type\":\n\"token\"}"));
        assert!(matches!(events[2], TransportEvent::End));
    }

    #[tokio::test]
    async fn http_connector_reports_failed_open_as_closed() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/gone");
            then.status(500);
        });
        let connector = HttpConnector::from_cfg(&HttpCfg::default()).unwrap();
        let events: Vec<TransportEvent> = connector.open(&server.url("/gone")).collect().await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            TransportEvent::Error { error, ready_state } => {
                assert!(matches!(error, StoryflowError::Unavailable { .. }));
                assert_eq!(*ready_state, ReadyState::Closed);
            }
            other => panic!("expected Error, got: {:?}", other),
        }
    }
}
