#![cfg(test)]

//! In-memory tracing capture for assertions on log output.
//!
//! The subscriber is installed as the thread default, so it sees everything logged by
//! tasks of a current-thread test runtime.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{Event, Level, Subscriber, span};
use tracing_core::field::{Field, Visit};
use tracing_subscriber::registry::{self, LookupSpan};
use tracing_subscriber::{Layer, layer::Context};

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: HashMap<String, String>,
    /// Name of the innermost span the event was logged in.
    pub span: Option<String>,
}

#[derive(Default, Debug)]
pub struct LogStore {
    events: Mutex<Vec<CapturedEvent>>,
    spans: Mutex<HashMap<span::Id, HashMap<String, String>>>,
}

impl LogStore {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.message == message)
            .collect()
    }

    pub fn span_fields(&self, name: &str) -> Vec<HashMap<String, String>> {
        self.spans
            .lock()
            .unwrap()
            .values()
            .filter(|f| f.get("span.name").map(String::as_str) == Some(name))
            .cloned()
            .collect()
    }
}

struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
}

#[derive(Clone)]
struct CaptureLayer {
    store: Arc<LogStore>,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, _ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        fields.insert("span.name".to_string(), attrs.metadata().name().to_string());
        attrs.record(&mut FieldVisitor(&mut fields));
        self.store.spans.lock().unwrap().insert(id.clone(), fields);
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        event.record(&mut FieldVisitor(&mut fields));
        let message = fields.remove("message").unwrap_or_default();
        let span = ctx.event_span(event).map(|s| s.name().to_string());
        self.store.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message,
            fields,
            span,
        });
    }
}

thread_local! {
    static GUARDS: std::cell::RefCell<Vec<tracing::subscriber::DefaultGuard>> =
        const { std::cell::RefCell::new(Vec::new()) };
}

/// Route this thread's logs into a fresh store for the rest of the test.
pub fn install_capture() -> Arc<LogStore> {
    use tracing_subscriber::prelude::*;
    let store = Arc::new(LogStore::default());
    let subscriber = registry::Registry::default().with(CaptureLayer {
        store: store.clone(),
    });
    let guard = tracing::subscriber::set_default(subscriber);
    GUARDS.with(|g| g.borrow_mut().push(guard));
    store
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_event_fields_and_span() {
        let store = install_capture();
        let span = tracing::info_span!("sse", url = "http://x/");
        span.in_scope(|| tracing::warn!(attempt = 2u64, reason = %"reset", "retrying"));

        let events = store.events_with_message("retrying");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::WARN);
        assert_eq!(events[0].fields["attempt"], "2");
        assert_eq!(events[0].fields["reason"], "reset");
        assert_eq!(events[0].span.as_deref(), Some("sse"));
        assert_eq!(store.span_fields("sse")[0]["url"], "http://x/");
    }
}
