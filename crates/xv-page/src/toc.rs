//! Table of contents generated from page headings.

use xv_core::XvResult;
use xv_dom::DOCUMENT_NODE;
use xv_dom::Document;
use xv_dom::NodeId;
use xv_dom::Selector;

pub const TOC_ENTRY_CLASS: &str = "toc-entry";
pub const TOC_ANCHOR_CLASS: &str = "toc-anchor";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocBuilder {
    pub container_id: String,
    pub heading_tag: String,
}

impl Default for TocBuilder {
    fn default() -> Self {
        Self {
            container_id: "toc".to_owned(),
            heading_tag: "h2".to_owned(),
        }
    }
}

impl TocBuilder {
    pub fn new(container_id: &str, heading_tag: &str) -> Self {
        Self {
            container_id: container_id.to_owned(),
            heading_tag: heading_tag.to_ascii_lowercase(),
        }
    }

    /// Injects an anchor into every non-empty heading and rewrites the TOC entries.
    ///
    /// Rebuilding reuses anchors and replaces entries, so repeated calls never
    /// duplicate either. When two headings share text the later one keeps the id.
    /// Returns the number of entries written.
    pub fn build(&self, doc: &mut Document) -> XvResult<usize> {
        let container = doc.element_by_id(&self.container_id);
        if let Some(container) = container {
            for entry in doc.select(container, &Selector::tag("li").with_class(TOC_ENTRY_CLASS)) {
                doc.detach(entry);
            }
        }

        let headings = doc.select(DOCUMENT_NODE, &Selector::tag(&self.heading_tag));
        let mut claimed: Vec<(String, NodeId)> = Vec::new();
        let mut written = 0_usize;

        for heading in headings {
            let text = doc.text_content(heading).trim().to_owned();
            if text.is_empty() {
                continue;
            }

            let anchor = self.anchor_for(doc, heading)?;
            if let Some(position) = claimed.iter().position(|(id, _)| *id == text) {
                let (_, previous) = claimed.remove(position);
                doc.remove_attr(previous, "id");
            }
            doc.set_attr(anchor, "id", &text)?;
            claimed.push((text.clone(), anchor));

            if let Some(container) = container {
                let entry = doc.create_element_with_attrs(
                    "li",
                    vec![("class".to_owned(), TOC_ENTRY_CLASS.to_owned())],
                );
                let link = doc.create_element_with_attrs(
                    "a",
                    vec![("href".to_owned(), format!("#{text}"))],
                );
                let label = doc.create_text(&text);
                doc.append_child(link, label)?;
                doc.append_child(entry, link)?;
                doc.append_child(container, entry)?;
                written += 1;
            }
        }

        tracing::debug!(entries = written, anchors = claimed.len(), "toc built");
        Ok(written)
    }

    fn anchor_for(&self, doc: &mut Document, heading: NodeId) -> XvResult<NodeId> {
        let existing = doc
            .children(heading)
            .iter()
            .copied()
            .find(|child| doc.tag_name(*child) == Some("a") && doc.has_class(*child, TOC_ANCHOR_CLASS));
        if let Some(anchor) = existing {
            return Ok(anchor);
        }
        let anchor = doc.create_element_with_attrs(
            "a",
            vec![("class".to_owned(), TOC_ANCHOR_CLASS.to_owned())],
        );
        doc.append_child(heading, anchor)?;
        Ok(anchor)
    }
}

#[cfg(test)]
mod tests {
    use super::TocBuilder;
    use xv_dom::Document;
    use xv_dom::Selector;
    use xv_html::HtmlParser;

    fn parse(markup: &str) -> Document {
        HtmlParser.parse(markup)
    }

    fn entries(doc: &Document) -> Vec<(String, String)> {
        let Some(toc) = doc.element_by_id("toc") else {
            panic!("toc container missing");
        };
        doc.select(toc, &Selector::tag("a"))
            .into_iter()
            .map(|link| {
                (
                    doc.attr(link, "href").unwrap_or_default().to_owned(),
                    doc.text_content(link),
                )
            })
            .collect()
    }

    #[test]
    fn entries_follow_heading_order() {
        let mut doc = parse(
            "<ul id=\"toc\"></ul><h2>Status</h2><p>x</p><h2> Nodes </h2><h3>skip</h3><h2></h2><h2>Jobs</h2>",
        );
        let written = match TocBuilder::default().build(&mut doc) {
            Ok(written) => written,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(written, 3);
        assert_eq!(
            entries(&doc),
            vec![
                ("#Status".to_owned(), "Status".to_owned()),
                ("#Nodes".to_owned(), "Nodes".to_owned()),
                ("#Jobs".to_owned(), "Jobs".to_owned()),
            ]
        );
        assert!(doc.element_by_id("Nodes").is_some());
    }

    #[test]
    fn rebuild_does_not_duplicate() {
        let mut doc = parse("<ul id=\"toc\"><li>static</li></ul><h2>A</h2><h2>B</h2>");
        let builder = TocBuilder::default();
        assert!(builder.build(&mut doc).is_ok());
        let first = doc.to_html();
        assert!(builder.build(&mut doc).is_ok());
        assert_eq!(doc.to_html(), first);
        assert_eq!(doc.select(doc.root(), &Selector::tag("a").with_class("toc-anchor")).len(), 2);
        assert!(first.contains("<li>static</li>"));
    }

    #[test]
    fn duplicate_heading_text_keeps_last_anchor() {
        let mut doc = parse("<ul id=\"toc\"></ul><h2 id=\"one\">Same</h2><h2 id=\"two\">Same</h2>");
        assert!(TocBuilder::default().build(&mut doc).is_ok());
        let anchors = doc.select(doc.root(), &Selector::tag("a").with_id("Same"));
        assert_eq!(anchors.len(), 1);
        let Some(second) = doc.element_by_id("two") else {
            panic!("heading missing");
        };
        assert_eq!(doc.parent(anchors[0]), Some(second));
        assert_eq!(entries(&doc).len(), 2);
    }

    #[test]
    fn anchors_are_injected_without_a_container() {
        let mut doc = parse("<h2>Alone</h2>");
        let written = match TocBuilder::default().build(&mut doc) {
            Ok(written) => written,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(written, 0);
        assert!(doc.element_by_id("Alone").is_some());
    }
}
