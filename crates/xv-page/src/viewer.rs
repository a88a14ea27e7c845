//! The live page: parsed markup, the load controller driving its bound
//! elements, and the periodic full-page refresh.

use crate::config::ViewerConfig;
use crate::init::InitReport;
use crate::init::PageInitializer;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tokio::task::JoinHandle;
use url::Url;
use xv_core::XvResult;
use xv_dom::NodeId;
use xv_html::HtmlParser;
use xv_loader::EventBus;
use xv_loader::Fetcher;
use xv_loader::LoadController;
use xv_loader::SharedPage;
use xv_loader::TransformEngine;
use xv_loader::lock_page;

/// Host page markup plus the location it was served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSource {
    pub markup: String,
    /// Relative load sources resolve against this URL.
    pub base_url: Url,
    /// Fragment of the page location, with or without the leading `#`.
    pub anchor: Option<String>,
}

struct ViewerShared {
    source: PageSource,
    config: ViewerConfig,
    page: SharedPage,
    controller: LoadController,
    refresh: Mutex<Option<JoinHandle<()>>>,
    page_loads: AtomicU64,
}

impl Drop for ViewerShared {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.refresh).take() {
            task.abort();
        }
        self.controller.reset();
    }
}

/// A live page: parsed markup, bound elements, and their load pipeline.
///
/// Must be opened from inside a tokio runtime; loads run as spawned tasks.
#[derive(Clone)]
pub struct Viewer {
    shared: Arc<ViewerShared>,
}

impl std::fmt::Debug for Viewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Viewer")
            .field("base_url", &self.shared.source.base_url.as_str())
            .field("controller", &self.shared.controller)
            .finish_non_exhaustive()
    }
}

impl Viewer {
    pub fn open(source: PageSource, config: ViewerConfig, fetcher: Arc<dyn Fetcher>) -> XvResult<Self> {
        let page: SharedPage = Arc::new(Mutex::new(HtmlParser.parse(&source.markup)));

        let mut engine = TransformEngine::new(fetcher);
        if let Some(capacity) = config.stylesheet_cache_capacity() {
            engine = engine.with_cache(capacity);
        }
        let controller = LoadController::new(
            Arc::clone(&page),
            engine,
            config.animator(),
            Arc::new(EventBus::new()),
            config.load_options(),
        );

        let viewer = Self {
            shared: Arc::new(ViewerShared {
                source,
                config,
                page,
                controller,
                refresh: Mutex::new(None),
                page_loads: AtomicU64::new(0),
            }),
        };
        viewer.initialize()?;
        Ok(viewer)
    }

    fn initialize(&self) -> XvResult<InitReport> {
        let report = PageInitializer::new(&self.shared.config).initialize(self)?;
        self.shared.page_loads.fetch_add(1, Ordering::Relaxed);
        Ok(report)
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.shared.config
    }

    pub fn controller(&self) -> &LoadController {
        &self.shared.controller
    }

    pub fn page(&self) -> &SharedPage {
        &self.shared.page
    }

    pub fn base_url(&self) -> &Url {
        &self.shared.source.base_url
    }

    pub fn anchor(&self) -> Option<&str> {
        self.shared.source.anchor.as_deref()
    }

    /// How many times the page has been initialized, the first open included.
    pub fn page_loads(&self) -> u64 {
        self.shared.page_loads.load(Ordering::Relaxed)
    }

    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        lock_page(&self.shared.page).element_by_id(id)
    }

    pub fn click(&self, node: NodeId) -> bool {
        self.shared.controller.click(node)
    }

    pub fn click_id(&self, id: &str) -> bool {
        match self.element_by_id(id) {
            Some(node) => self.click(node),
            None => {
                tracing::warn!(id, "click target not found");
                false
            }
        }
    }

    pub async fn settle(&self) {
        self.shared.controller.settle().await;
    }

    pub fn html(&self) -> String {
        lock_page(&self.shared.page).to_html()
    }

    /// Discards all loaded content and runs initialization again on the original markup.
    pub fn reload_page(&self) -> XvResult<InitReport> {
        let controller = &self.shared.controller;
        controller.reset();
        controller.events().clear_listeners();
        *lock_page(&self.shared.page) = HtmlParser.parse(&self.shared.source.markup);
        tracing::info!(url = self.base_url().as_str(), "page reloaded");
        self.initialize()
    }

    /// Starts the periodic full-page reload once, if configured.
    pub(crate) fn ensure_auto_refresh(&self) {
        let Some(period) = self.shared.config.auto_refresh() else {
            return;
        };
        let mut refresh = lock(&self.shared.refresh);
        if refresh.is_some() {
            return;
        }

        let weak: Weak<ViewerShared> = Arc::downgrade(&self.shared);
        *refresh = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let viewer = Viewer { shared };
                if let Err(error) = viewer.reload_page() {
                    tracing::error!(%error, "auto refresh failed");
                }
            }
        }));
    }

    /// Stops auto-refresh and aborts in-flight loads.
    pub fn shutdown(&self) {
        if let Some(task) = lock(&self.shared.refresh).take() {
            task.abort();
        }
        self.shared.controller.reset();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
