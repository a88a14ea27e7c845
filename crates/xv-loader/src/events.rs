//! Page-wide notifications emitted by the load pipeline.

use crate::error::LoadErrorKind;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::broadcast;
use url::Url;
use xv_dom::Document;
use xv_dom::NodeId;

const EVENT_CAPACITY: usize = 64;

/// Synchronous subscriber run under the page lock right after a swap.
pub trait ContentListener: Send + Sync {
    fn content_loaded(&self, page: &mut Document, element: NodeId);
}

impl<F> ContentListener for F
where
    F: Fn(&mut Document, NodeId) + Send + Sync,
{
    fn content_loaded(&self, page: &mut Document, element: NodeId) {
        self(page, element);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    ContentLoaded {
        element: NodeId,
        url: Url,
    },
    LoadFailed {
        element: NodeId,
        url: Url,
        kind: LoadErrorKind,
        message: String,
    },
}

impl PageEvent {
    pub fn element(&self) -> NodeId {
        match self {
            Self::ContentLoaded { element, .. } | Self::LoadFailed { element, .. } => *element,
        }
    }
}

pub struct EventBus {
    listeners: Mutex<Vec<Arc<dyn ContentListener>>>,
    sender: broadcast::Sender<PageEvent>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &lock(&self.listeners).len())
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            listeners: Mutex::new(Vec::new()),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.sender.subscribe()
    }

    pub fn add_listener(&self, listener: Arc<dyn ContentListener>) {
        lock(&self.listeners).push(listener);
    }

    pub fn clear_listeners(&self) {
        lock(&self.listeners).clear();
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Runs every listener, in registration order, against the swapped element.
    pub fn notify_loaded(&self, page: &mut Document, element: NodeId) {
        let listeners: Vec<Arc<dyn ContentListener>> = lock(&self.listeners).clone();
        for listener in listeners {
            listener.content_loaded(page, element);
        }
    }

    /// Broadcasts to async observers; having none is not an error.
    pub fn publish(&self, event: PageEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("page event dropped without receivers");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::EventBus;
    use super::PageEvent;
    use std::sync::Arc;
    use url::Url;
    use xv_dom::Document;
    use xv_dom::NodeId;

    #[test]
    fn listeners_run_in_registration_order() {
        let bus = EventBus::new();
        bus.add_listener(Arc::new(|page: &mut Document, element: NodeId| {
            let _ = page.set_attr(element, "data-order", "first");
        }));
        bus.add_listener(Arc::new(|page: &mut Document, element: NodeId| {
            let previous = page.attr(element, "data-order").unwrap_or_default().to_owned();
            let _ = page.set_attr(element, "data-order", &format!("{previous},second"));
        }));

        let mut page = Document::empty();
        let div = page.create_element("div");
        assert!(page.append_child(page.root(), div).is_ok());
        bus.notify_loaded(&mut page, div);
        assert_eq!(page.attr(div, "data-order"), Some("first,second"));

        bus.clear_listeners();
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        bus.publish(PageEvent::ContentLoaded {
            element: 1,
            url: match Url::parse("https://example.com/lost.xml") {
                Ok(url) => url,
                Err(error) => panic!("{error}"),
            },
        });

        let mut receiver = bus.subscribe();
        let url = match Url::parse("https://example.com/a.xml") {
            Ok(url) => url,
            Err(error) => panic!("{error}"),
        };
        bus.publish(PageEvent::ContentLoaded { element: 7, url });
        let event = match receiver.recv().await {
            Ok(event) => event,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(event.element(), 7);
    }
}
