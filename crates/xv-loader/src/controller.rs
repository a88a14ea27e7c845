//! Per-element load state machine: fetch, resolve, transform, animated swap.
//!
//! Every bound element is tracked in an explicit store keyed by [`NodeId`];
//! markup attributes are only read once, at binding time. Two requests on
//! the same element never swap content concurrently:
//!
//! - [`ReloadPolicy::Queue`] runs requests one after another through a
//!   per-element async gate, so the later request wins.
//! - [`ReloadPolicy::Supersede`] lets requests overlap but tags each with a
//!   generation; a request that is no longer the newest when it reaches the
//!   swap leaves the page untouched and reports [`LoadOutcome::Superseded`].
//!
//! The page lock is only taken inside synchronous helpers, never across an
//! `.await`.

use crate::animate::Animator;
use crate::animate::Transition;
use crate::engine::TransformEngine;
use crate::error::LoadError;
use crate::events::EventBus;
use crate::events::PageEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use tokio::task::JoinHandle;
use url::Url;
use xv_core::XvError;
use xv_core::XvResult;
use xv_dom::Document;
use xv_dom::Fragment;
use xv_dom::FragmentNode;
use xv_dom::NodeId;
use xv_dom::Selector;

pub const LOADING_CLASS: &str = "loading";
pub const ERROR_CLASS: &str = "error";
pub const RELOAD_CLASS: &str = "reload";
pub const LOAD_ERROR_CLASS: &str = "load-error";
const RELOAD_LABEL: &str = "\u{21bb} Reload";
const HIDDEN_STYLE: &str = "display: none";

pub type SharedPage = Arc<Mutex<Document>>;

/// Locks the page, recovering the document if a previous holder panicked.
pub fn lock_page(page: &SharedPage) -> MutexGuard<'_, Document> {
    lock(&**page)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundElement {
    pub source_url: Url,
    pub state: LoadState,
    /// Bumped by every request; only the newest may swap under `Supersede`.
    pub generation: u64,
    pub completed_loads: u64,
    pub last_error: Option<LoadError>,
    pub interactive: bool,
    pub reload_control: Option<NodeId>,
}

impl BoundElement {
    fn new(source_url: Url, interactive: bool) -> Self {
        Self {
            source_url,
            state: LoadState::Idle,
            generation: 0,
            completed_loads: 0,
            last_error: None,
            interactive,
            reload_control: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ReloadPolicy {
    #[default]
    Queue,
    Supersede,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub policy: ReloadPolicy,
    /// Default interactivity for elements loaded without an explicit `bind`.
    pub reload_affordance: bool,
    pub source_footer: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            policy: ReloadPolicy::Queue,
            reload_affordance: true,
            source_footer: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Failed(LoadError),
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
    Reload { element: NodeId },
    /// Click-to-load placeholder; fires once and then unregisters itself.
    LazyLoad {
        element: NodeId,
        clear_attribute: String,
    },
}

enum Swap {
    Stale,
    Committed { reload_control: Option<NodeId> },
}

struct Shared {
    page: SharedPage,
    engine: TransformEngine,
    animator: Arc<dyn Animator>,
    events: Arc<EventBus>,
    options: LoadOptions,
    elements: Mutex<HashMap<NodeId, BoundElement>>,
    gates: Mutex<HashMap<NodeId, Arc<tokio::sync::Mutex<()>>>>,
    clicks: Mutex<HashMap<NodeId, ClickAction>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct LoadController {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LoadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadController")
            .field("options", &self.shared.options)
            .field("elements", &lock(&self.shared.elements).len())
            .finish_non_exhaustive()
    }
}

impl LoadController {
    pub fn new(
        page: SharedPage,
        engine: TransformEngine,
        animator: Arc<dyn Animator>,
        events: Arc<EventBus>,
        options: LoadOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                page,
                engine,
                animator,
                events,
                options,
                elements: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
                clicks: Mutex::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn page(&self) -> &SharedPage {
        &self.shared.page
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.shared.events
    }

    pub fn options(&self) -> LoadOptions {
        self.shared.options
    }

    /// Registers `element` as bound to `url` without loading it.
    pub fn bind(&self, element: NodeId, url: Url, interactive: bool) {
        let mut elements = lock(&self.shared.elements);
        match elements.get_mut(&element) {
            Some(bound) => {
                bound.source_url = url;
                bound.interactive = interactive;
            }
            None => {
                elements.insert(element, BoundElement::new(url, interactive));
            }
        }
    }

    pub fn state(&self, element: NodeId) -> Option<LoadState> {
        lock(&self.shared.elements).get(&element).map(|bound| bound.state)
    }

    pub fn bound(&self, element: NodeId) -> Option<BoundElement> {
        lock(&self.shared.elements).get(&element).cloned()
    }

    pub fn bound_elements(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = lock(&self.shared.elements).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn load(&self, element: NodeId, url: Url) -> XvResult<LoadOutcome> {
        {
            let mut elements = lock(&self.shared.elements);
            let interactive = self.shared.options.reload_affordance;
            elements
                .entry(element)
                .and_modify(|bound| bound.source_url = url.clone())
                .or_insert_with(|| BoundElement::new(url.clone(), interactive));
        }
        self.run(element, url).await
    }

    /// Load re-invoked against the element's bound source URL.
    pub async fn reload(&self, element: NodeId) -> XvResult<LoadOutcome> {
        let url = self
            .bound(element)
            .map(|bound| bound.source_url)
            .ok_or_else(|| {
                XvError::new(
                    "loader.element.unbound",
                    format!("node {element} has no load source"),
                )
            })?;
        self.run(element, url).await
    }

    pub fn spawn_load(&self, element: NodeId, url: Url) {
        let controller = self.clone();
        self.track(tokio::spawn(async move {
            if let Err(error) = controller.load(element, url).await {
                tracing::error!(element, %error, "load aborted");
            }
        }));
    }

    pub fn spawn_reload(&self, element: NodeId) {
        let controller = self.clone();
        self.track(tokio::spawn(async move {
            if let Err(error) = controller.reload(element).await {
                tracing::error!(element, %error, "reload aborted");
            }
        }));
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = lock(&self.shared.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Waits until every spawned load, including ones spawned meanwhile, has finished.
    pub async fn settle(&self) {
        loop {
            let handles = std::mem::take(&mut *lock(&self.shared.tasks));
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(error) = handle.await {
                    if error.is_panic() {
                        tracing::error!(%error, "load task panicked");
                    }
                }
            }
        }
    }

    pub fn register_click(&self, node: NodeId, action: ClickAction) {
        lock(&self.shared.clicks).insert(node, action);
    }

    pub fn click_action(&self, node: NodeId) -> Option<ClickAction> {
        lock(&self.shared.clicks).get(&node).cloned()
    }

    /// Dispatches a click on `node`, bubbling through its ancestors.
    ///
    /// Returns false when no registered action handled it.
    pub fn click(&self, node: NodeId) -> bool {
        let chain = {
            let page = lock_page(&self.shared.page);
            let mut chain = vec![node];
            chain.extend(page.ancestors(node));
            chain
        };
        let found = {
            let clicks = lock(&self.shared.clicks);
            chain
                .iter()
                .find_map(|candidate| clicks.get(candidate).map(|action| (*candidate, action.clone())))
        };
        let Some((target, action)) = found else {
            return false;
        };

        match action {
            ClickAction::Reload { element } => {
                tracing::debug!(element, "reload requested");
                self.spawn_reload(element);
            }
            ClickAction::LazyLoad {
                element,
                clear_attribute,
            } => {
                let Some(url) = self.bound(element).map(|bound| bound.source_url) else {
                    tracing::warn!(element, "lazy element lost its binding");
                    return false;
                };
                lock(&self.shared.clicks).remove(&target);
                lock_page(&self.shared.page).remove_attr(element, &clear_attribute);
                tracing::debug!(element, url = url.as_str(), "lazy load triggered");
                self.spawn_load(element, url);
            }
        }
        true
    }

    /// Aborts in-flight work and forgets every binding.
    pub fn reset(&self) {
        for task in std::mem::take(&mut *lock(&self.shared.tasks)) {
            task.abort();
        }
        lock(&self.shared.elements).clear();
        lock(&self.shared.gates).clear();
        lock(&self.shared.clicks).clear();
    }

    fn gate(&self, element: NodeId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(lock(&self.shared.gates).entry(element).or_default())
    }

    async fn run(&self, element: NodeId, url: Url) -> XvResult<LoadOutcome> {
        let gate = match self.shared.options.policy {
            ReloadPolicy::Queue => Some(self.gate(element)),
            ReloadPolicy::Supersede => None,
        };
        let _turn = match &gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };

        let generation = self.begin(element, &url)?;
        tracing::info!(element, url = url.as_str(), generation, "load started");

        let rendered = match self.shared.engine.render(&url).await {
            Ok(rendered) => rendered,
            Err(error) => return Ok(self.fail(element, &url, generation, error)),
        };

        self.shared.animator.run(element, Transition::SlideOut).await;
        let reload_control = match self.swap(element, &url, generation, &rendered.fragment) {
            Ok(Swap::Committed { reload_control }) => reload_control,
            Ok(Swap::Stale) => {
                tracing::warn!(element, url = url.as_str(), generation, "load superseded before swap");
                return Ok(LoadOutcome::Superseded);
            }
            Err(source) => return Ok(self.fail(element, &url, generation, swap_failure(&url, source))),
        };
        self.shared.animator.run(element, Transition::SlideIn).await;

        match self.finish(element, generation) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(element, url = url.as_str(), generation, "load superseded after swap");
                return Ok(LoadOutcome::Superseded);
            }
            Err(source) => return Ok(self.fail(element, &url, generation, swap_failure(&url, source))),
        }
        self.shared.events.publish(PageEvent::ContentLoaded {
            element,
            url: url.clone(),
        });
        tracing::info!(
            element,
            url = url.as_str(),
            stylesheet = rendered.stylesheet_url.as_str(),
            "load finished"
        );

        if let Some(control) = reload_control {
            self.shared.animator.run(control, Transition::FadeIn).await;
            lock_page(&self.shared.page).remove_attr(control, "style");
        }
        Ok(LoadOutcome::Loaded)
    }

    fn is_current(&self, element: NodeId, generation: u64) -> bool {
        lock(&self.shared.elements)
            .get(&element)
            .is_some_and(|bound| bound.generation == generation)
    }

    /// Enters `Loading`: visual state, placeholder, new generation.
    fn begin(&self, element: NodeId, url: &Url) -> XvResult<u64> {
        let mut page = lock_page(&self.shared.page);
        if !page.is_element(element) {
            return Err(XvError::new(
                "loader.element.missing",
                format!("node {element} is not an element of the page"),
            ));
        }
        page.remove_class(element, ERROR_CLASS)?;
        page.add_class(element, LOADING_CLASS)?;
        let placeholder = Fragment::from(vec![
            FragmentNode::text("Loading from "),
            link(url.as_str(), url.as_str()),
        ]);
        page.replace_children_with_fragment(element, &placeholder)?;

        let mut elements = lock(&self.shared.elements);
        let interactive = self.shared.options.reload_affordance;
        let bound = elements
            .entry(element)
            .or_insert_with(|| BoundElement::new(url.clone(), interactive));
        bound.state = LoadState::Loading;
        bound.generation += 1;
        Ok(bound.generation)
    }

    fn swap(&self, element: NodeId, url: &Url, generation: u64, fragment: &Fragment) -> XvResult<Swap> {
        let mut page = lock_page(&self.shared.page);
        if !self.is_current(element, generation) {
            return Ok(Swap::Stale);
        }
        page.replace_children_with_fragment(element, fragment)?;
        tracing::debug!(element, nodes = fragment.nodes.len(), "content swapped");

        if self.shared.options.source_footer {
            append_source_footers(&mut page, element, url)?;
        }
        let reload_control = self.install_reload_control(&mut page, element, true)?;
        Ok(Swap::Committed { reload_control })
    }

    /// Leaves `Loading` for `Loaded` and runs the content listeners.
    fn finish(&self, element: NodeId, generation: u64) -> XvResult<bool> {
        let mut page = lock_page(&self.shared.page);
        {
            let mut elements = lock(&self.shared.elements);
            let Some(bound) = elements.get_mut(&element) else {
                return Ok(false);
            };
            if bound.generation != generation {
                return Ok(false);
            }
            bound.state = LoadState::Loaded;
            bound.completed_loads += 1;
            bound.last_error = None;
        }
        page.remove_class(element, LOADING_CLASS)?;
        self.shared.events.notify_loaded(&mut page, element);
        Ok(true)
    }

    /// Enters `Error`. The state is recorded even when the page can no longer show it.
    fn fail(&self, element: NodeId, url: &Url, generation: u64, error: LoadError) -> LoadOutcome {
        {
            let mut page = lock_page(&self.shared.page);
            {
                let mut elements = lock(&self.shared.elements);
                let Some(bound) = elements.get_mut(&element).filter(|bound| bound.generation == generation)
                else {
                    tracing::warn!(element, url = url.as_str(), generation, %error, "stale load failed");
                    return LoadOutcome::Superseded;
                };
                bound.state = LoadState::Error;
                bound.last_error = Some(error.clone());
            }
            if let Err(dom_error) = self.render_error(&mut page, element, &error) {
                tracing::warn!(element, %dom_error, "error state not rendered");
            }
        }

        tracing::warn!(
            element,
            url = url.as_str(),
            kind = error.kind().as_str(),
            %error,
            "load failed"
        );
        self.shared.events.publish(PageEvent::LoadFailed {
            element,
            url: url.clone(),
            kind: error.kind(),
            message: error.to_string(),
        });
        LoadOutcome::Failed(error)
    }

    fn render_error(&self, page: &mut Document, element: NodeId, error: &LoadError) -> XvResult<()> {
        page.remove_class(element, LOADING_CLASS)?;
        page.add_class(element, ERROR_CLASS)?;
        let message = Fragment::from(vec![FragmentNode::Element {
            name: "div".to_owned(),
            attrs: vec![("class".to_owned(), LOAD_ERROR_CLASS.to_owned())],
            children: vec![FragmentNode::text(error.to_string())],
        }]);
        page.replace_children_with_fragment(element, &message)?;
        self.install_reload_control(page, element, false)?;
        Ok(())
    }

    /// Prepends the reload control when the element is interactive.
    fn install_reload_control(&self, page: &mut Document, element: NodeId, hidden: bool) -> XvResult<Option<NodeId>> {
        let mut elements = lock(&self.shared.elements);
        let Some(bound) = elements.get_mut(&element) else {
            return Ok(None);
        };
        if !bound.interactive {
            return Ok(None);
        }

        let mut attrs = vec![("class".to_owned(), RELOAD_CLASS.to_owned())];
        if hidden {
            attrs.push(("style".to_owned(), HIDDEN_STYLE.to_owned()));
        }
        let control = page.create_element_with_attrs("div", attrs);
        let anchor = page.create_element_with_attrs(
            "a",
            vec![("href".to_owned(), "javascript:void(0)".to_owned())],
        );
        let label = page.create_text(RELOAD_LABEL);
        page.append_child(anchor, label)?;
        page.append_child(control, anchor)?;
        page.prepend_child(element, control)?;

        let previous = bound.reload_control.replace(control);
        let mut clicks = lock(&self.shared.clicks);
        if let Some(previous) = previous {
            clicks.remove(&previous);
        }
        clicks.insert(control, ClickAction::Reload { element });
        Ok(Some(control))
    }
}

fn swap_failure(url: &Url, source: XvError) -> LoadError {
    LoadError::SwapFailure {
        url: url.to_string(),
        source,
    }
}

fn link(href: &str, text: &str) -> FragmentNode {
    FragmentNode::Element {
        name: "a".to_owned(),
        attrs: vec![("href".to_owned(), href.to_owned())],
        children: vec![FragmentNode::text(text)],
    }
}

fn append_source_footers(page: &mut Document, element: NodeId, url: &Url) -> XvResult<()> {
    let footer = Fragment::from(vec![FragmentNode::Element {
        name: "tfoot".to_owned(),
        attrs: Vec::new(),
        children: vec![FragmentNode::Element {
            name: "tr".to_owned(),
            attrs: Vec::new(),
            children: vec![FragmentNode::Element {
                name: "td".to_owned(),
                attrs: Vec::new(),
                children: vec![FragmentNode::text("Source: "), link(url.as_str(), url.as_str())],
            }],
        }],
    }]);
    for table in page.select(element, &Selector::tag("table")) {
        page.append_fragment(table, &footer)?;
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
