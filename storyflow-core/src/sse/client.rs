//! Streaming event client: one server-push connection, its listeners, and its
//! reconnect policy.
//!
//! State machine: `Idle` → `Connecting` → `Open` → `Reconnecting` → `Connecting` …,
//! or back to `Idle` on release. At most one transport exists at a time; every
//! transport carries a generation number and events or timers from an older
//! generation are dropped.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::Instrument;

use crate::config::Config;
use crate::error::{CoreResult, StoryflowError};
use crate::sse::frame::EventFrame;
use crate::sse::listeners::{self, Handler, Listeners};
use crate::sse::transport::{Connector, HttpConnector, TransportEvent, TransportStream};
use crate::stream::{EventKind, ReadyState, StreamEvent};

pub const DEFAULT_GRACE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub auto_reconnect: bool,
}

impl ConnectOptions {
    pub fn auto_reconnect() -> Self {
        Self {
            auto_reconnect: true,
        }
    }
}

/// Bounded linear backoff: attempt `n` waits `base_delay * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    /// A transport failed and a reopen is scheduled.
    Reconnecting,
}

pub struct SseClientBuilder {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    grace_delay: Duration,
}

impl SseClientBuilder {
    pub fn policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Delay between a `done`/`error`/`stream_end` frame and the automatic disconnect.
    pub fn grace_delay(mut self, delay: Duration) -> Self {
        self.grace_delay = delay;
        self
    }

    pub fn build(self) -> SseClient {
        SseClient {
            shared: Arc::new(Shared {
                connector: self.connector,
                policy: self.policy,
                grace_delay: self.grace_delay,
                state: Mutex::new(State::default()),
            }),
        }
    }
}

/// Client for one server-push stream.
///
/// `connect` spawns onto the ambient Tokio runtime; called outside one it reports
/// an `error` event and stays idle. Listeners run on the transport task, in
/// registration order, with no internal lock held, so they may call back into
/// the client or own it.
pub struct SseClient {
    shared: Arc<Shared>,
}

impl SseClient {
    pub fn builder(connector: Arc<dyn Connector>) -> SseClientBuilder {
        SseClientBuilder {
            connector,
            policy: ReconnectPolicy::default(),
            grace_delay: DEFAULT_GRACE_DELAY,
        }
    }

    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::builder(connector).build()
    }

    /// HTTP-backed client using the stream policy from `cfg`.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let connector = HttpConnector::from_cfg(&cfg.http)?;
        Ok(Self::builder(Arc::new(connector))
            .policy(ReconnectPolicy {
                max_attempts: cfg.stream.max_reconnect_attempts,
                base_delay: cfg.stream.reconnect_delay(),
            })
            .grace_delay(cfg.stream.grace_delay())
            .build())
    }

    /// Open a stream to `url`. Any existing connection is released first,
    /// listeners included. Failures are reported through `error`/`close` events.
    pub fn connect(&self, url: &str, options: ConnectOptions) -> &Self {
        self.disconnect();
        if url.trim().is_empty() {
            self.shared.reject(StoryflowError::Validation("stream url is empty".into()));
            return self;
        }
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                self.shared
                    .reject(StoryflowError::Transport(format!("no async runtime: {e}")));
                return self;
            }
        };
        tracing::info!(url, auto_reconnect = options.auto_reconnect, "connecting");
        let mut st = self.shared.lock();
        st.target = Some(Target {
            url: url.to_string(),
            options,
            runtime,
        });
        st.reconnect_attempts = 0;
        self.shared.start_transport(&mut st);
        self
    }

    pub fn on<F>(&self, kind: EventKind, f: F) -> &Self
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.on_handler(kind, listeners::handler(f))
    }

    /// Register a shared handler; keep a clone to pass to [`SseClient::off`].
    pub fn on_handler(&self, kind: EventKind, handler: Handler) -> &Self {
        self.shared.lock().listeners.add(kind, handler);
        self
    }

    /// Remove `handler` from `kind`, or every handler of `kind` when `None`.
    pub fn off(&self, kind: &EventKind, handler: Option<&Handler>) -> &Self {
        let removed = self.shared.lock().listeners.remove(kind, handler);
        drop(removed);
        self
    }

    pub fn listener_count(&self, kind: &EventKind) -> usize {
        self.shared.lock().listeners.count(kind)
    }

    /// Close the transport and release listeners, counter and pending timers.
    /// No-op when idle.
    pub fn disconnect(&self) {
        let released = {
            let mut st = self.shared.lock();
            if st.phase == ConnectionState::Idle {
                return;
            }
            tracing::info!(url = st.url(), "disconnecting");
            st.release()
        };
        drop(released);
    }

    pub fn is_connected(&self) -> bool {
        let st = self.shared.lock();
        st.transport.is_some() && st.phase == ConnectionState::Open
    }

    pub fn ready_state(&self) -> ReadyState {
        match self.shared.lock().phase {
            ConnectionState::Connecting => ReadyState::Connecting,
            ConnectionState::Open => ReadyState::Open,
            ConnectionState::Idle | ConnectionState::Reconnecting => ReadyState::Closed,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().phase
    }

    pub fn url(&self) -> Option<String> {
        self.shared.lock().target.as_ref().map(|t| t.url.clone())
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().reconnect_attempts
    }
}

impl Drop for SseClient {
    fn drop(&mut self) {
        let released = self.shared.lock().release();
        drop(released);
    }
}

struct Shared {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    grace_delay: Duration,
    state: Mutex<State>,
}

struct Target {
    url: String,
    options: ConnectOptions,
    runtime: Handle,
}

struct Transport {
    generation: u64,
    task: AbortHandle,
}

struct Timer {
    generation: u64,
    task: AbortHandle,
}

#[derive(Default)]
struct State {
    phase: ConnectionState,
    target: Option<Target>,
    transport: Option<Transport>,
    listeners: Listeners,
    reconnect_attempts: u32,
    reconnect_timer: Option<Timer>,
    grace_timer: Option<Timer>,
    generation: u64,
}

impl State {
    fn url(&self) -> &str {
        self.target.as_ref().map_or("", |t| t.url.as_str())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.phase != ConnectionState::Idle
    }

    /// Return to `Idle`. The listener registry is handed back so it is dropped
    /// after the lock: a listener may own the last reference to the client.
    #[must_use]
    fn release(&mut self) -> Listeners {
        if let Some(t) = self.transport.take() {
            t.task.abort();
        }
        if let Some(t) = self.reconnect_timer.take() {
            t.task.abort();
        }
        if let Some(t) = self.grace_timer.take() {
            t.task.abort();
        }
        self.phase = ConnectionState::Idle;
        self.target = None;
        self.reconnect_attempts = 0;
        std::mem::take(&mut self.listeners)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, kind: &EventKind, event: &StreamEvent) {
        let handlers = self.lock().listeners.snapshot(kind);
        listeners::invoke(kind, &handlers, event);
    }

    /// Report a connect that never got a transport.
    fn reject(&self, error: StoryflowError) {
        tracing::warn!(error = %error, "refusing to connect");
        self.emit(
            &EventKind::Error,
            &StreamEvent::TransportError {
                error,
                ready_state: ReadyState::Closed,
            },
        );
    }

    fn start_transport(self: &Arc<Self>, st: &mut State) {
        let Some(target) = st.target.as_ref() else {
            return;
        };
        st.generation += 1;
        let generation = st.generation;
        let url = target.url.clone();
        let runtime = target.runtime.clone();
        let stream = self.connector.open(&url);
        let span = tracing::info_span!("sse", url = %url, generation);
        let task = runtime.spawn(pump(Arc::downgrade(self), generation, stream).instrument(span));
        st.phase = ConnectionState::Connecting;
        st.transport = Some(Transport {
            generation,
            task: task.abort_handle(),
        });
    }

    fn spawn_timer<F>(self: &Arc<Self>, delay: Duration, fire: F) -> AbortHandle
    where
        F: FnOnce(&Arc<Shared>) + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                fire(&shared);
            }
        })
        .abort_handle()
    }

    fn on_transport_event(self: &Arc<Self>, generation: u64, event: TransportEvent) -> ControlFlow<()> {
        match event {
            TransportEvent::Open => {
                let url = {
                    let mut st = self.lock();
                    if !st.is_current(generation) {
                        return ControlFlow::Break(());
                    }
                    st.phase = ConnectionState::Open;
                    st.reconnect_attempts = 0;
                    st.url().to_string()
                };
                tracing::info!("stream open");
                self.emit(&EventKind::Open, &StreamEvent::Open { url });
                ControlFlow::Continue(())
            }
            TransportEvent::Message(data) => {
                if !self.lock().is_current(generation) {
                    return ControlFlow::Break(());
                }
                self.dispatch_frame(generation, data);
                ControlFlow::Continue(())
            }
            TransportEvent::End => {
                {
                    let st = self.lock();
                    if !st.is_current(generation) {
                        return ControlFlow::Break(());
                    }
                    if st.grace_timer.is_some() {
                        tracing::debug!("stream ended after terminal frame");
                        return ControlFlow::Break(());
                    }
                }
                self.on_failure(
                    generation,
                    StoryflowError::Transport("stream ended by server".into()),
                    ReadyState::Closed,
                )
            }
            TransportEvent::Error { error, ready_state } => {
                self.on_failure(generation, error, ready_state)
            }
        }
    }

    fn dispatch_frame(self: &Arc<Self>, generation: u64, data: String) {
        match EventFrame::parse(&data) {
            Err(error) => {
                tracing::warn!(error = %error, raw = %data, "frame decode failed");
                self.emit(
                    &EventKind::ParseError,
                    &StreamEvent::ParseError { error, raw: data },
                );
            }
            Ok(frame) => {
                let kind = frame.kind();
                let event = StreamEvent::Frame(frame);
                self.emit(&EventKind::Message, &event);
                // A `message` listener may have reconnected or disconnected.
                let Some(kind) = kind else { return };
                if !self.lock().is_current(generation) {
                    return;
                }
                self.emit(&kind, &event);
                if kind.is_terminal() {
                    self.schedule_teardown(generation, &kind);
                }
            }
        }
    }

    fn schedule_teardown(self: &Arc<Self>, generation: u64, kind: &EventKind) {
        let mut st = self.lock();
        if !st.is_current(generation) || st.grace_timer.is_some() {
            return;
        }
        tracing::info!(event = %kind, grace_ms = self.grace_delay.as_millis() as u64, "terminal frame, closing soon");
        let task = self.spawn_timer(self.grace_delay, move |shared| {
            let released = {
                let mut st = shared.lock();
                if !st.grace_timer.as_ref().is_some_and(|t| t.generation == generation) {
                    return;
                }
                st.grace_timer = None;
                tracing::info!(url = st.url(), "disconnecting after terminal frame");
                st.release()
            };
            drop(released);
        });
        st.grace_timer = Some(Timer { generation, task });
    }

    fn on_failure(
        self: &Arc<Self>,
        generation: u64,
        error: StoryflowError,
        ready_state: ReadyState,
    ) -> ControlFlow<()> {
        tracing::warn!(error = %error, ?ready_state, "transport error");
        if ready_state != ReadyState::Closed {
            let mut st = self.lock();
            if st.is_current(generation) {
                st.phase = ConnectionState::Connecting;
            }
        }
        self.emit(
            &EventKind::Error,
            &StreamEvent::TransportError { error, ready_state },
        );
        if ready_state != ReadyState::Closed {
            return ControlFlow::Continue(());
        }

        let url = {
            let mut st = self.lock();
            if !st.is_current(generation) {
                return ControlFlow::Break(());
            }
            st.transport = None;
            st.url().to_string()
        };
        tracing::info!("stream closed");
        self.emit(&EventKind::Close, &StreamEvent::Close { url: url.clone() });

        // Listeners may have disconnected or reconnected meanwhile.
        let released = {
            let mut st = self.lock();
            if !st.is_current(generation) || st.grace_timer.is_some() {
                return ControlFlow::Break(());
            }
            let auto_reconnect = st.target.as_ref().is_some_and(|t| t.options.auto_reconnect);
            if auto_reconnect && st.reconnect_attempts < self.policy.max_attempts {
                st.reconnect_attempts += 1;
                let attempt = st.reconnect_attempts;
                let delay = self.policy.delay_for(attempt);
                tracing::info!(
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                st.phase = ConnectionState::Reconnecting;
                let task = self.spawn_timer(delay, move |shared| {
                    let mut st = shared.lock();
                    let due = st.phase == ConnectionState::Reconnecting
                        && st.reconnect_timer.as_ref().is_some_and(|t| t.generation == generation);
                    if due {
                        st.reconnect_timer = None;
                        tracing::info!(url = st.url(), attempt = st.reconnect_attempts, "reconnecting");
                        shared.start_transport(&mut st);
                    }
                });
                st.reconnect_timer = Some(Timer { generation, task });
                return ControlFlow::Break(());
            }
            if auto_reconnect {
                let error = StoryflowError::ReconnectExhausted {
                    url,
                    attempts: st.reconnect_attempts,
                };
                tracing::warn!(error = %error, "giving up");
            }
            st.release()
        };
        drop(released);
        ControlFlow::Break(())
    }
}
async fn pump(shared: Weak<Shared>, generation: u64, mut stream: TransportStream) {
    while let Some(event) = stream.next().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if shared.on_transport_event(generation, event).is_break() {
            return;
        }
    }
    if let Some(shared) = shared.upgrade() {
        let _ = shared.on_transport_event(generation, TransportEvent::End);
    }
}
