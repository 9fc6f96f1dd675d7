//! A project/stage stream bound to an owner's lifetime.
//!
//! `StageSession` keeps the observable state a UI or CLI needs (connected flag,
//! received frames, last error) and forwards stream events to [`SessionHooks`].
//! Dropping the session closes its stream.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::Config;
use crate::error::CoreResult;
use crate::model::Stage;
use crate::sse::client::{
    ConnectOptions, ConnectionState, DEFAULT_GRACE_DELAY, ReconnectPolicy, SseClient,
};
use crate::sse::endpoints::StreamEndpoints;
use crate::sse::frame::EventFrame;
use crate::sse::transport::{Connector, HttpConnector};
use crate::stream::{EventKind, StreamEvent};

/// Callbacks for session events. Every method defaults to a no-op.
/// Hooks run on the stream task.
pub trait SessionHooks: Send + Sync + 'static {
    fn on_open(&self) {}
    fn on_message(&self, _frame: &EventFrame) {}
    fn on_connected(&self, _frame: &EventFrame) {}
    fn on_token(&self, _frame: &EventFrame) {}
    fn on_stage_update(&self, _frame: &EventFrame) {}
    fn on_progress(&self, _frame: &EventFrame) {}
    fn on_done(&self, _frame: &EventFrame) {}
    /// Transport failure or an `error` frame.
    fn on_error(&self, _event: &StreamEvent) {}
    fn on_close(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl SessionHooks for NoHooks {}

#[derive(Debug, Default)]
struct SessionState {
    connected: bool,
    messages: Vec<EventFrame>,
    last_error: Option<String>,
}

pub struct StageSession {
    connector: Arc<dyn Connector>,
    endpoints: StreamEndpoints,
    policy: ReconnectPolicy,
    grace_delay: Duration,
    hooks: Arc<dyn SessionHooks>,
    state: Arc<Mutex<SessionState>>,
    client: Option<SseClient>,
}

impl StageSession {
    pub fn new<H: SessionHooks>(
        connector: Arc<dyn Connector>,
        endpoints: StreamEndpoints,
        hooks: H,
    ) -> Self {
        Self {
            connector,
            endpoints,
            policy: ReconnectPolicy::default(),
            grace_delay: DEFAULT_GRACE_DELAY,
            hooks: Arc::new(hooks),
            state: Arc::default(),
            client: None,
        }
    }

    pub fn from_config<H: SessionHooks>(cfg: &Config, hooks: H) -> CoreResult<Self> {
        let connector = Arc::new(HttpConnector::from_cfg(&cfg.http)?);
        Ok(Self::new(connector, StreamEndpoints::from_cfg(&cfg.endpoints), hooks)
            .with_policy(ReconnectPolicy {
                max_attempts: cfg.stream.max_reconnect_attempts,
                base_delay: cfg.stream.reconnect_delay(),
            })
            .with_grace_delay(cfg.stream.grace_delay()))
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_grace_delay(mut self, delay: Duration) -> Self {
        self.grace_delay = delay;
        self
    }

    /// Stream one stage of `project_id`, or all of its stages when `stage` is
    /// `None`. Replaces any stream this session already has.
    pub fn open(
        &mut self,
        project_id: &str,
        stage: Option<Stage>,
        options: ConnectOptions,
    ) -> CoreResult<()> {
        let url = match stage {
            Some(stage) => self.endpoints.stage(project_id, stage)?,
            None => self.endpoints.project(project_id)?,
        };
        self.disconnect();

        let client = SseClient::builder(self.connector.clone())
            .policy(self.policy)
            .grace_delay(self.grace_delay)
            .build();
        self.register(&client);
        tracing::info!(project_id, stage = ?stage, url = %url, "opening stage session");
        client.connect(&url, options);
        self.client = Some(client);
        Ok(())
    }

    fn register(&self, client: &SseClient) {
        let (state, hooks) = (self.state.clone(), self.hooks.clone());
        client.on(EventKind::Open, move |_| {
            {
                let mut st = lock(&state);
                st.connected = true;
                st.last_error = None;
            }
            hooks.on_open();
        });

        let (state, hooks) = (self.state.clone(), self.hooks.clone());
        client.on(EventKind::Message, move |ev| {
            if let Some(frame) = ev.as_frame() {
                lock(&state).messages.push(frame.clone());
                hooks.on_message(frame);
            }
        });

        let frame_hooks: [(EventKind, fn(&dyn SessionHooks, &EventFrame)); 5] = [
            (EventKind::Connected, |h, f| h.on_connected(f)),
            (EventKind::Token, |h, f| h.on_token(f)),
            (EventKind::StageUpdate, |h, f| h.on_stage_update(f)),
            (EventKind::Progress, |h, f| h.on_progress(f)),
            (EventKind::Done, |h, f| h.on_done(f)),
        ];
        for (kind, forward) in frame_hooks {
            let hooks = self.hooks.clone();
            client.on(kind, move |ev| {
                if let Some(frame) = ev.as_frame() {
                    forward(hooks.as_ref(), frame);
                }
            });
        }

        let (state, hooks) = (self.state.clone(), self.hooks.clone());
        client.on(EventKind::Error, move |ev| {
            lock(&state).last_error = Some(describe_error(ev));
            hooks.on_error(ev);
        });

        let (state, hooks) = (self.state.clone(), self.hooks.clone());
        client.on(EventKind::Close, move |_| {
            lock(&state).connected = false;
            hooks.on_close();
        });
    }

    /// Close the stream. Received messages are kept.
    pub fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            client.disconnect();
        }
        lock(&self.state).connected = false;
    }

    /// Open as last reported by the stream, and not yet torn down.
    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected && self.client.as_ref().is_some_and(SseClient::is_connected)
    }

    /// Whether the underlying client still holds a connection or a pending reconnect.
    pub fn is_active(&self) -> bool {
        self.client
            .as_ref()
            .is_some_and(|c| c.state() != ConnectionState::Idle)
    }

    pub fn client(&self) -> Option<&SseClient> {
        self.client.as_ref()
    }

    pub fn messages(&self) -> Vec<EventFrame> {
        lock(&self.state).messages.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.clone()
    }

    pub fn clear_messages(&self) {
        lock(&self.state).messages.clear();
    }
}

impl Drop for StageSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn describe_error(ev: &StreamEvent) -> String {
    if let Some(err) = ev.error() {
        return err.to_string();
    }
    ev.as_frame()
        .and_then(|f| f.get("error"))
        .map(|v| match v.as_str() {
            Some(s) => s.to_string(),
            None => v.to_string(),
        })
        .unwrap_or_else(|| "unknown stream error".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::transport::{TransportEvent, TransportStream};
    use futures::StreamExt;

    /// Serves one fixed script per open, then keeps the stream pending.
    struct FixedConnector {
        script: Vec<&'static str>,
        urls: Mutex<Vec<String>>,
    }

    impl Connector for FixedConnector {
        fn open(&self, url: &str) -> TransportStream {
            self.urls.lock().unwrap().push(url.to_string());
            let events = std::iter::once(TransportEvent::Open)
                .chain(self.script.iter().map(|s| TransportEvent::Message(s.to_string())))
                .collect::<Vec<_>>();
            futures::stream::iter(events)
                .chain(futures::stream::pending())
                .boxed()
        }
    }

    fn connector(script: Vec<&'static str>) -> Arc<FixedConnector> {
        Arc::new(FixedConnector {
            script,
            urls: Mutex::new(Vec::new()),
        })
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl SessionHooks for Arc<Recorder> {
        fn on_open(&self) {
            self.0.lock().unwrap().push("open".into());
        }
        fn on_token(&self, frame: &EventFrame) {
            let content = frame.get("content").and_then(|v| v.as_str()).unwrap_or("");
            self.0.lock().unwrap().push(format!("token:{content}"));
        }
        fn on_done(&self, _frame: &EventFrame) {
            self.0.lock().unwrap().push("done".into());
        }
        fn on_error(&self, _event: &StreamEvent) {
            self.0.lock().unwrap().push("error".into());
        }
        fn on_close(&self) {
            self.0.lock().unwrap().push("close".into());
        }
    }

    fn endpoints() -> StreamEndpoints {
        StreamEndpoints::new("http://sse", "/api/v1")
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_frames_to_hooks_and_records_messages() {
        let conn = connector(vec![
            r#"{"type":"connected"}"#,
            r#"{"type":"token","content":"Hi"}"#,
            r#"{"type":"done","full_text":"Hi"}"#,
        ]);
        let rec = Arc::new(Recorder::default());
        let mut session = StageSession::new(conn.clone(), endpoints(), rec.clone());
        session.open("p1", Some(Stage::Rewrite), ConnectOptions::default()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(session.is_connected());
        assert_eq!(session.messages().len(), 3);
        assert_eq!(*rec.0.lock().unwrap(), vec!["open", "token:Hi", "done"]);
        assert_eq!(
            conn.urls.lock().unwrap()[0],
            "http://sse/api/v1/projects/sse/projects/p1/stages/rewrite/"
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!session.is_active(), "terminal frame closes the stream");
        assert!(!session.is_connected());

        session.clear_messages();
        assert!(session.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn error_frame_sets_last_error() {
        let conn = connector(vec![r#"{"type":"error","error":"model timeout"}"#]);
        let rec = Arc::new(Recorder::default());
        let mut session = StageSession::new(conn, endpoints(), rec.clone());
        session.open("p1", None, ConnectOptions::default()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(session.last_error().as_deref(), Some("model timeout"));
        assert_eq!(*rec.0.lock().unwrap(), vec!["open", "error"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reopen_replaces_client_and_disconnect_clears_connected() {
        let conn = connector(vec![]);
        let mut session = StageSession::new(conn.clone(), endpoints(), NoHooks);
        session.open("p1", None, ConnectOptions::default()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        session
            .open("p2", Some(Stage::VideoGeneration), ConnectOptions::auto_reconnect())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(conn.urls.lock().unwrap().len(), 2);
        assert_eq!(
            session.client().and_then(|c| c.url()).as_deref(),
            Some("http://sse/api/v1/projects/sse/projects/p2/stages/video_generation/")
        );
        assert!(session.is_connected());

        session.disconnect();
        assert!(!session.is_connected());
        assert!(session.client().is_none());
    }

    #[test]
    fn open_rejects_empty_project_without_touching_existing_stream() {
        let conn = connector(vec![]);
        let mut session = StageSession::new(conn.clone(), endpoints(), NoHooks);
        assert!(session.open("", None, ConnectOptions::default()).is_err());
        assert!(conn.urls.lock().unwrap().is_empty());
    }
}
