//! One-time page setup: element discovery, lazy gating, TOC and timestamp passes.

use crate::config::ViewerConfig;
use crate::timestamp::TimestampFormatter;
use crate::toc::TocBuilder;
use crate::viewer::Viewer;
use std::sync::Arc;
use url::Url;
use xv_core::XvResult;
use xv_dom::DOCUMENT_NODE;
use xv_dom::Document;
use xv_dom::Fragment;
use xv_dom::FragmentNode;
use xv_dom::NodeId;
use xv_dom::Selector;
use xv_loader::ClickAction;
use xv_loader::lock_page;

/// What `initialize` found and started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitReport {
    pub eager: usize,
    pub lazy: usize,
    pub skipped: usize,
    pub toc_entries: usize,
    pub timestamps: usize,
}

#[derive(Debug, Clone)]
pub struct PageInitializer {
    config: ViewerConfig,
    toc: TocBuilder,
    timestamps: TimestampFormatter,
}

impl PageInitializer {
    pub fn new(config: &ViewerConfig) -> Self {
        Self {
            config: config.clone(),
            toc: TocBuilder::new(&config.toc_container_id, &config.toc_heading_tag),
            timestamps: TimestampFormatter {
                tag: config.timestamp_tag.clone(),
                id: config.timestamp_id.clone(),
                attribute: config.timestamp_attribute.clone(),
                format: config.timestamp_format.clone(),
                utc: config.timestamp_utc,
            },
        }
    }

    pub fn initialize(&self, viewer: &Viewer) -> XvResult<InitReport> {
        let controller = viewer.controller();
        self.subscribe(viewer);

        let mut report = InitReport::default();
        let mut eager: Vec<(NodeId, Url)> = Vec::new();
        {
            let mut page = lock_page(controller.page());
            let candidates = page.select(
                DOCUMENT_NODE,
                &Selector::default().with_attr(&self.config.load_attribute),
            );

            for element in candidates {
                let raw = page
                    .attr(element, &self.config.load_attribute)
                    .unwrap_or_default()
                    .trim()
                    .to_owned();
                let url = match viewer.base_url().join(&raw) {
                    Ok(url) if !raw.is_empty() => url,
                    Ok(_) => {
                        tracing::warn!(element, "empty load source");
                        report.skipped += 1;
                        continue;
                    }
                    Err(error) => {
                        tracing::warn!(element, source = raw.as_str(), %error, "invalid load source");
                        report.skipped += 1;
                        continue;
                    }
                };
                controller.bind(element, url.clone(), self.config.reload_affordance);

                let lazy = page.has_attr(element, &self.config.lazy_attribute);
                if lazy && !is_anchor_target(&page, element, viewer.anchor()) {
                    render_lazy_placeholder(&mut page, element, &url)?;
                    controller.register_click(
                        element,
                        ClickAction::LazyLoad {
                            element,
                            clear_attribute: self.config.lazy_attribute.clone(),
                        },
                    );
                    report.lazy += 1;
                } else {
                    page.remove_attr(element, &self.config.lazy_attribute);
                    eager.push((element, url));
                }
            }

            report.toc_entries = self.toc.build(&mut page)?;
            report.timestamps = self.timestamps.apply(&mut page, DOCUMENT_NODE)?;
        }

        report.eager = eager.len();
        for (element, url) in eager {
            controller.spawn_load(element, url);
        }
        viewer.ensure_auto_refresh();

        tracing::info!(
            eager = report.eager,
            lazy = report.lazy,
            skipped = report.skipped,
            toc_entries = report.toc_entries,
            "page initialized"
        );
        Ok(report)
    }

    fn subscribe(&self, viewer: &Viewer) {
        let events = viewer.controller().events();

        let formatter = self.timestamps.clone();
        events.add_listener(Arc::new(move |page: &mut Document, element: NodeId| {
            if let Err(error) = formatter.apply(page, element) {
                tracing::warn!(element, %error, "timestamp pass failed");
            }
        }));

        if self.config.toc_refresh_on_load {
            let toc = self.toc.clone();
            events.add_listener(Arc::new(move |page: &mut Document, element: NodeId| {
                if let Err(error) = toc.build(page) {
                    tracing::warn!(element, %error, "toc refresh failed");
                }
            }));
        }
    }
}

fn is_anchor_target(page: &Document, element: NodeId, anchor: Option<&str>) -> bool {
    let Some(anchor) = anchor.map(|anchor| anchor.trim_start_matches('#')) else {
        return false;
    };
    !anchor.is_empty() && page.attr(element, "id") == Some(anchor)
}

fn render_lazy_placeholder(page: &mut Document, element: NodeId, url: &Url) -> XvResult<()> {
    let placeholder = Fragment::from(vec![
        FragmentNode::text(format!("Click to load from {url} (")),
        FragmentNode::Element {
            name: "a".to_owned(),
            attrs: vec![("href".to_owned(), url.to_string())],
            children: vec![FragmentNode::text("source")],
        },
        FragmentNode::text(")."),
    ]);
    page.replace_children_with_fragment(element, &placeholder)?;
    Ok(())
}
