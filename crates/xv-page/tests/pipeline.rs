use std::sync::Arc;
use std::time::Duration;
use url::Url;
use xv_dom::Selector;
use xv_loader::LoadOutcome;
use xv_loader::LoadState;
use xv_loader::ResourceKind;
use xv_loader::StaticFetcher;
use xv_loader::lock_page;
use xv_page::PageSource;
use xv_page::Viewer;
use xv_page::ViewerConfig;
use xv_page::config::ReloadPolicySetting;

const BASE: &str = "https://status.example.com/index.html";
const NODES_XML: &str = "https://status.example.com/data/nodes.xml";
const NODES_XSL: &str = "https://status.example.com/ui/nodes.xsl";

const XSL: &str = "<xsl:stylesheet version=\"1.0\" xmlns:xsl=\"http://www.w3.org/1999/XSL/Transform\">\
    <xsl:template match=\"/nodes\">\
      <h2><xsl:value-of select=\"@title\"/></h2>\
      <span id=\"convert-timestamp\" timestamp=\"{@generated}\"><xsl:value-of select=\"@generated\"/></span>\
      <table><xsl:for-each select=\"node\"><tr><td><xsl:value-of select=\"@name\"/></td></tr></xsl:for-each></table>\
    </xsl:template>\
    </xsl:stylesheet>";

fn nodes_xml(title: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n<?xml-stylesheet type='text/xsl' href='/ui/nodes.xsl'?>\n\
         <nodes title=\"{title}\" generated=\"0\"><node name=\"alpha\"/><node name=\"beta\"/></nodes>"
    )
}

fn url(raw: &str) -> Url {
    match Url::parse(raw) {
        Ok(url) => url,
        Err(error) => panic!("{error}"),
    }
}

fn config() -> ViewerConfig {
    let mut config = ViewerConfig::default();
    config.animation.enabled = false;
    config.timestamp_utc = true;
    config
}

fn fetcher() -> Arc<StaticFetcher> {
    let fetcher = Arc::new(StaticFetcher::new());
    fetcher.insert(NODES_XML, "text/xml", nodes_xml("Nodes"));
    fetcher.insert(NODES_XSL, "text/xsl", XSL);
    fetcher
}

fn open(markup: &str, anchor: Option<&str>, config: ViewerConfig, fetcher: Arc<StaticFetcher>) -> Viewer {
    let source = PageSource {
        markup: markup.to_owned(),
        base_url: url(BASE),
        anchor: anchor.map(str::to_owned),
    };
    match Viewer::open(source, config, fetcher) {
        Ok(viewer) => viewer,
        Err(error) => panic!("{error}"),
    }
}

fn element(viewer: &Viewer, id: &str) -> u64 {
    match viewer.element_by_id(id) {
        Some(node) => node,
        None => panic!("no element #{id}"),
    }
}

fn toc_entries(viewer: &Viewer) -> Vec<String> {
    let page = lock_page(viewer.page());
    let Some(toc) = page.element_by_id("toc") else {
        panic!("toc missing");
    };
    page.select(toc, &Selector::tag("li").with_class("toc-entry"))
        .into_iter()
        .map(|entry| page.text_content(entry))
        .collect()
}

const PAGE: &str = "<html><body><ul id=\"toc\"></ul>\
    <h2>Overview</h2>\
    <div id=\"nodes\" load=\"/data/nodes.xml\"></div>\
    </body></html>";

#[tokio::test]
async fn bound_element_is_rendered_through_its_stylesheet() {
    let fetcher = fetcher();
    let viewer = open(PAGE, None, config(), fetcher.clone());
    viewer.settle().await;

    let nodes = element(&viewer, "nodes");
    assert_eq!(viewer.controller().state(nodes), Some(LoadState::Loaded));
    {
        let page = lock_page(viewer.page());
        assert!(!page.has_class(nodes, "loading"));
        let cells: Vec<String> = page
            .select(nodes, &Selector::tag("td"))
            .into_iter()
            .map(|cell| page.text_content(cell))
            .collect();
        assert_eq!(cells, vec!["alpha".to_owned(), "beta".to_owned()]);

        let stamps = page.select(nodes, &Selector::tag("span").with_id("convert-timestamp"));
        assert_eq!(stamps.len(), 1);
        assert_eq!(page.text_content(stamps[0]), "1/1/1970, 12:00:00 AM");
    }
    assert_eq!(toc_entries(&viewer), vec!["Overview".to_owned(), "Nodes".to_owned()]);
    assert_eq!(
        fetcher.requests(),
        vec![
            (url(NODES_XML), ResourceKind::Document),
            (url(NODES_XSL), ResourceKind::Stylesheet),
        ]
    );
}

#[tokio::test]
async fn document_without_stylesheet_ends_in_error() {
    let fetcher = fetcher();
    fetcher.insert(NODES_XML, "text/xml", "<nodes title=\"bare\"/>");
    let viewer = open(PAGE, None, config(), fetcher.clone());
    viewer.settle().await;

    let nodes = element(&viewer, "nodes");
    let bound = match viewer.controller().bound(nodes) {
        Some(bound) => bound,
        None => panic!("element not bound"),
    };
    assert_eq!(bound.state, LoadState::Error);
    assert_eq!(bound.completed_loads, 0);

    let html = viewer.html();
    assert!(html.contains("class=\"error\""));
    assert!(html.contains("does not start with an xml-stylesheet processing instruction"));
    assert!(!html.contains("Loading from"));

    // Retry through the still-offered reload control once the document is fixed.
    fetcher.insert(NODES_XML, "text/xml", nodes_xml("Nodes"));
    let control = match bound.reload_control {
        Some(control) => control,
        None => panic!("no reload control"),
    };
    assert!(viewer.click(control));
    viewer.settle().await;
    assert_eq!(viewer.controller().state(nodes), Some(LoadState::Loaded));
}

#[tokio::test]
async fn repeated_reloads_are_idempotent() {
    let viewer = open(PAGE, None, config(), fetcher());
    viewer.settle().await;
    let nodes = element(&viewer, "nodes");
    let first = viewer.html();

    for _ in 0..2 {
        match viewer.controller().reload(nodes).await {
            Ok(outcome) => assert_eq!(outcome, LoadOutcome::Loaded),
            Err(error) => panic!("{error}"),
        }
    }

    assert_eq!(viewer.html(), first);
    assert_eq!(toc_entries(&viewer), vec!["Overview".to_owned(), "Nodes".to_owned()]);
    let bound = match viewer.controller().bound(nodes) {
        Some(bound) => bound,
        None => panic!("element not bound"),
    };
    assert_eq!(bound.completed_loads, 3);
}

#[tokio::test]
async fn lazy_element_waits_for_click() {
    let markup = "<ul id=\"toc\"></ul><div id=\"later\" load=\"/data/nodes.xml\" on-request></div>";
    let fetcher = fetcher();
    let viewer = open(markup, None, config(), fetcher.clone());
    viewer.settle().await;

    let later = element(&viewer, "later");
    assert_eq!(fetcher.request_count(), 0);
    assert_eq!(viewer.controller().state(later), Some(LoadState::Idle));
    assert!(viewer.html().contains(
        "Click to load from https://status.example.com/data/nodes.xml \
         (<a href=\"https://status.example.com/data/nodes.xml\">source</a>)."
    ));

    assert!(viewer.click_id("later"));
    viewer.settle().await;

    assert_eq!(
        fetcher.requests(),
        vec![
            (url(NODES_XML), ResourceKind::Document),
            (url(NODES_XSL), ResourceKind::Stylesheet),
        ]
    );
    assert_eq!(viewer.controller().state(later), Some(LoadState::Loaded));
    assert!(!lock_page(viewer.page()).has_attr(later, "on-request"));

    // The placeholder handler fired once; the element itself no longer reacts.
    assert!(!viewer.click(later));
}

#[tokio::test]
async fn lazy_element_targeted_by_anchor_loads_immediately() {
    let markup = "<div id=\"later\" load=\"/data/nodes.xml\" on-request=\"yes\"></div>";
    let fetcher = fetcher();
    let viewer = open(markup, Some("#later"), config(), fetcher.clone());
    viewer.settle().await;

    let later = element(&viewer, "later");
    assert_eq!(viewer.controller().state(later), Some(LoadState::Loaded));
    assert_eq!(fetcher.request_count(), 2);
    assert!(!lock_page(viewer.page()).has_attr(later, "on-request"));
}

const LAZY_PAGE: &str = "<div id=\"nodes\" load=\"/data/nodes.xml\" on-request></div>";

#[tokio::test]
async fn queued_reload_runs_after_the_in_flight_load() {
    let fetcher = fetcher();
    fetcher.insert(NODES_XML, "text/xml", nodes_xml("v1"));
    fetcher.delay_next(NODES_XML, &[Duration::from_millis(150)]);
    let viewer = open(LAZY_PAGE, None, config(), fetcher.clone());
    let nodes = element(&viewer, "nodes");
    let controller = viewer.controller().clone();

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.load(nodes, url(NODES_XML)).await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    fetcher.insert(NODES_XML, "text/xml", nodes_xml("v2"));

    let second = match controller.reload(nodes).await {
        Ok(outcome) => outcome,
        Err(error) => panic!("{error}"),
    };
    assert_eq!(second, LoadOutcome::Loaded);
    match first.await {
        Ok(Ok(outcome)) => assert_eq!(outcome, LoadOutcome::Loaded),
        other => panic!("unexpected {other:?}"),
    }

    let html = viewer.html();
    assert!(html.contains("<h2>v2"));
    assert!(!html.contains("v1"));
    let bound = match controller.bound(nodes) {
        Some(bound) => bound,
        None => panic!("element not bound"),
    };
    assert_eq!(bound.completed_loads, 2);
    assert_eq!(bound.state, LoadState::Loaded);
}

#[tokio::test]
async fn superseding_reload_discards_the_slow_load() {
    let fetcher = fetcher();
    fetcher.insert(NODES_XML, "text/xml", nodes_xml("v1"));
    fetcher.delay_next(NODES_XML, &[Duration::from_millis(150)]);
    let mut config = config();
    config.reload_policy = ReloadPolicySetting::Supersede;
    let viewer = open(LAZY_PAGE, None, config, fetcher.clone());
    let nodes = element(&viewer, "nodes");
    let controller = viewer.controller().clone();

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.load(nodes, url(NODES_XML)).await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    fetcher.insert(NODES_XML, "text/xml", nodes_xml("v2"));

    match controller.reload(nodes).await {
        Ok(outcome) => assert_eq!(outcome, LoadOutcome::Loaded),
        Err(error) => panic!("{error}"),
    }
    match first.await {
        Ok(Ok(outcome)) => assert_eq!(outcome, LoadOutcome::Superseded),
        other => panic!("unexpected {other:?}"),
    }

    let html = viewer.html();
    assert!(html.contains("<h2>v2"));
    assert!(!html.contains("v1"));
    let bound = match controller.bound(nodes) {
        Some(bound) => bound,
        None => panic!("element not bound"),
    };
    assert_eq!(bound.completed_loads, 1);
    assert_eq!(bound.generation, 2);
}

#[tokio::test]
async fn page_reload_rebuilds_from_original_markup() {
    let viewer = open(PAGE, None, config(), fetcher());
    viewer.settle().await;
    let before = viewer.html();

    let report = match viewer.reload_page() {
        Ok(report) => report,
        Err(error) => panic!("{error}"),
    };
    assert_eq!(report.eager, 1);
    viewer.settle().await;

    assert_eq!(viewer.page_loads(), 2);
    assert_eq!(viewer.html(), before);
    assert_eq!(viewer.controller().events().listener_count(), 2);
}

#[tokio::test]
async fn auto_refresh_reloads_the_page() {
    let mut config = config();
    config.auto_refresh_secs = Some(1);
    let fetcher = fetcher();
    let viewer = open(PAGE, None, config, fetcher.clone());
    viewer.settle().await;

    tokio::time::sleep(Duration::from_millis(1300)).await;
    viewer.settle().await;
    viewer.shutdown();

    assert!(viewer.page_loads() >= 2);
    assert!(fetcher.request_count() >= 4);
    assert_eq!(toc_entries(&viewer), vec!["Overview".to_owned(), "Nodes".to_owned()]);
}

#[tokio::test]
async fn source_footer_is_config_gated() {
    let mut config = config();
    config.source_footer = true;
    let viewer = open(PAGE, None, config, fetcher());
    viewer.settle().await;
    assert!(viewer.html().contains(
        "<tfoot><tr><td>Source: <a href=\"https://status.example.com/data/nodes.xml\">\
         https://status.example.com/data/nodes.xml</a></td></tr></tfoot>"
    ));
}
