use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::StoryflowError;
use crate::stream::{EventKind, StreamEvent};

/// A listener callback. Identity (for removal) is the allocation behind the `Arc`.
pub type Handler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Wrap a closure as a [`Handler`], keeping a clone lets the caller `off` it later.
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&StreamEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Event kind to insertion-ordered handlers.
#[derive(Default)]
pub(crate) struct Listeners {
    map: HashMap<EventKind, Vec<Handler>>,
}

impl Listeners {
    pub(crate) fn add(&mut self, kind: EventKind, handler: Handler) {
        self.map.entry(kind).or_default().push(handler);
    }

    /// Remove every registration of `handler` under `kind`, or the whole kind.
    /// Removed handlers are returned so the caller can drop them unlocked.
    #[must_use]
    pub(crate) fn remove(&mut self, kind: &EventKind, handler: Option<&Handler>) -> Vec<Handler> {
        let Some(target) = handler else {
            return self.map.remove(kind).unwrap_or_default();
        };
        let Some(list) = self.map.get_mut(kind) else {
            return Vec::new();
        };
        let (removed, kept): (Vec<Handler>, Vec<Handler>) = std::mem::take(list)
            .into_iter()
            .partition(|h| std::ptr::addr_eq(Arc::as_ptr(h), Arc::as_ptr(target)));
        *list = kept;
        if list.is_empty() {
            self.map.remove(kind);
        }
        removed
    }

    /// Handlers are cloned out so they run without the registry borrowed.
    pub(crate) fn snapshot(&self, kind: &EventKind) -> Vec<Handler> {
        self.map.get(kind).cloned().unwrap_or_default()
    }

    pub(crate) fn count(&self, kind: &EventKind) -> usize {
        self.map.get(kind).map_or(0, Vec::len)
    }
}

/// Run handlers in order. A panicking handler is logged and skipped.
pub(crate) fn invoke(kind: &EventKind, handlers: &[Handler], event: &StreamEvent) {
    for h in handlers {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| h(event))) {
            let err = StoryflowError::Listener {
                event: kind.to_string(),
                message: panic_message(payload.as_ref()),
            };
            tracing::error!(event = %kind, error = %err, "listener failed");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
