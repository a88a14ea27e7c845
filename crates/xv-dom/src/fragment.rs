//! Owned document fragments produced outside the live page.

use crate::serialize::escape_text;
use crate::serialize::is_raw_text_element;
use crate::serialize::is_void_element;
use crate::serialize::write_comment;
use crate::serialize::write_end_tag;
use crate::serialize::write_start_tag;

/// Detached node tree that can be adopted into any [`crate::Document`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    pub nodes: Vec<FragmentNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentNode {
    Element {
        name: String,
        attrs: Vec<(String, String)>,
        children: Vec<FragmentNode>,
    },
    Text(String),
    Comment(String),
}

impl FragmentNode {
    pub fn element(name: impl Into<String>) -> Self {
        Self::Element {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn write_html(&self, raw_text: bool, out: &mut String) {
        match self {
            Self::Element {
                name,
                attrs,
                children,
            } => {
                write_start_tag(name, attrs, out);
                if is_void_element(name) && children.is_empty() {
                    return;
                }
                let raw = is_raw_text_element(name);
                for child in children {
                    child.write_html(raw, out);
                }
                write_end_tag(name, out);
            }
            Self::Text(text) => {
                if raw_text {
                    out.push_str(text);
                } else {
                    escape_text(text, out);
                }
            }
            Self::Comment(text) => write_comment(text, out),
        }
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Self::Element { children, .. } => {
                for child in children {
                    child.collect_text(out);
                }
            }
            Self::Text(text) => out.push_str(text),
            Self::Comment(_) => {}
        }
    }
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push(&mut self, node: FragmentNode) {
        self.nodes.push(node);
    }

    /// Concatenated character data of every text node, in document order.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            node.collect_text(&mut out);
        }
        out
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            node.write_html(false, &mut out);
        }
        out
    }
}

impl From<Vec<FragmentNode>> for Fragment {
    fn from(nodes: Vec<FragmentNode>) -> Self {
        Self { nodes }
    }
}
