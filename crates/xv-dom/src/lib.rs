//! DOM tree data structures for the host page.
//!
//! Nodes live in an arena owned by [`Document`] and are addressed by
//! [`NodeId`]. Detached subtrees stay in the arena but are unreachable from
//! the document node, which is how replaced content is discarded.

pub mod fragment;
pub mod selector;
pub mod serialize;

pub use fragment::Fragment;
pub use fragment::FragmentNode;
pub use selector::Selector;

use serialize::escape_text;
use serialize::is_raw_text_element;
use serialize::is_void_element;
use serialize::write_comment;
use serialize::write_end_tag;
use serialize::write_start_tag;
use xv_core::XvError;
use xv_core::XvResult;

/// ID used to address nodes in the DOM arena.
pub type NodeId = u64;

/// The document node; always present.
pub const DOCUMENT_NODE: NodeId = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Slot {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Mutable page document.
#[derive(Debug, Clone)]
pub struct Document {
    pub title: String,
    slots: Vec<Slot>,
}

impl Default for Document {
    fn default() -> Self {
        Self::empty()
    }
}

impl Document {
    pub fn empty() -> Self {
        Self {
            title: String::new(),
            slots: vec![Slot {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        DOCUMENT_NODE
    }

    pub fn has_root(&self) -> bool {
        !self.slots[0].children.is_empty()
    }

    /// Number of arena slots, attached or not.
    pub fn node_count(&self) -> usize {
        self.slots.len()
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.create_element_with_attrs(tag, Vec::new())
    }

    pub fn create_element_with_attrs(&mut self, tag: &str, attrs: Vec<(String, String)>) -> NodeId {
        self.push_slot(NodeKind::Element(Element {
            tag: tag.to_ascii_lowercase(),
            attrs,
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_slot(NodeKind::Text(text.to_owned()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push_slot(NodeKind::Comment(text.to_owned()))
    }

    fn push_slot(&mut self, kind: NodeKind) -> NodeId {
        let id = self.slots.len() as NodeId;
        self.slots.push(Slot {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn slot(&self, node: NodeId) -> Option<&Slot> {
        usize::try_from(node)
            .ok()
            .and_then(|index| self.slots.get(index))
    }

    fn slot_mut(&mut self, node: NodeId) -> Option<&mut Slot> {
        usize::try_from(node)
            .ok()
            .and_then(|index| self.slots.get_mut(index))
    }

    fn require(&self, node: NodeId) -> XvResult<&Slot> {
        self.slot(node)
            .ok_or_else(|| XvError::new("dom.node.missing", format!("node {node} does not exist")))
    }

    fn require_mut(&mut self, node: NodeId) -> XvResult<&mut Slot> {
        self.slot_mut(node)
            .ok_or_else(|| XvError::new("dom.node.missing", format!("node {node} does not exist")))
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.slot(node).is_some()
    }

    pub fn kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.slot(node).map(|slot| &slot.kind)
    }

    pub fn element(&self, node: NodeId) -> Option<&Element> {
        match self.kind(node) {
            Some(NodeKind::Element(element)) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, node: NodeId) -> XvResult<&mut Element> {
        match &mut self.require_mut(node)?.kind {
            NodeKind::Element(element) => Ok(element),
            _ => Err(XvError::new(
                "dom.node.not_element",
                format!("node {node} is not an element"),
            )),
        }
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.element(node).is_some()
    }

    pub fn tag_name(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|element| element.tag.as_str())
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.slot(node).and_then(|slot| slot.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.slot(node)
            .map(|slot| slot.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.children(node).first().copied()
    }

    /// Ancestors from the parent upwards, ending at the document node when attached.
    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(node);
        while let Some(parent) = current {
            out.push(parent);
            current = self.parent(parent);
        }
        out
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        node == DOCUMENT_NODE || self.ancestors(node).last() == Some(&DOCUMENT_NODE)
    }

    pub fn is_ancestor_of(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.ancestors(node).contains(&ancestor)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> XvResult<()> {
        self.insert_child(parent, child, None)
    }

    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) -> XvResult<()> {
        self.insert_child(parent, child, Some(0))
    }

    fn insert_child(&mut self, parent: NodeId, child: NodeId, at: Option<usize>) -> XvResult<()> {
        let parent_slot = self.require(parent)?;
        if matches!(parent_slot.kind, NodeKind::Text(_) | NodeKind::Comment(_)) {
            return Err(XvError::new(
                "dom.hierarchy.invalid",
                format!("node {parent} cannot have children"),
            ));
        }
        let child_slot = self.require(child)?;
        if matches!(child_slot.kind, NodeKind::Document) {
            return Err(XvError::new(
                "dom.hierarchy.invalid",
                "the document node cannot be inserted",
            ));
        }
        if child == parent || self.is_ancestor_of(child, parent) {
            return Err(XvError::new(
                "dom.hierarchy.cycle",
                format!("node {child} is an ancestor of {parent}"),
            ));
        }

        self.detach(child);
        let slot = self.require_mut(parent)?;
        match at {
            Some(index) => slot.children.insert(index.min(slot.children.len()), child),
            None => slot.children.push(child),
        }
        self.require_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Removes the node from its parent; the subtree stays addressable.
    pub fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.parent(node) else {
            return;
        };
        if let Some(slot) = self.slot_mut(parent) {
            slot.children.retain(|candidate| *candidate != node);
        }
        if let Some(slot) = self.slot_mut(node) {
            slot.parent = None;
        }
    }

    pub fn clear_children(&mut self, node: NodeId) {
        let children = self.children(node).to_vec();
        for child in children {
            self.detach(child);
        }
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node).and_then(|element| {
            element
                .attrs
                .iter()
                .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        })
    }

    pub fn has_attr(&self, node: NodeId, name: &str) -> bool {
        self.attr(node, name).is_some()
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) -> XvResult<()> {
        let element = self.element_mut(node)?;
        match element
            .attrs
            .iter_mut()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => value.clone_into(existing),
            None => element
                .attrs
                .push((name.to_ascii_lowercase(), value.to_owned())),
        }
        Ok(())
    }

    /// Returns true when the attribute was present.
    pub fn remove_attr(&mut self, node: NodeId, name: &str) -> bool {
        let Ok(element) = self.element_mut(node) else {
            return false;
        };
        let before = element.attrs.len();
        element
            .attrs
            .retain(|(candidate, _)| !candidate.eq_ignore_ascii_case(name));
        before != element.attrs.len()
    }

    pub fn classes(&self, node: NodeId) -> Vec<&str> {
        self.attr(node, "class")
            .map(|value| value.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.classes(node).contains(&class)
    }

    pub fn add_class(&mut self, node: NodeId, class: &str) -> XvResult<()> {
        if self.has_class(node, class) {
            return Ok(());
        }
        let mut classes: Vec<String> = self.classes(node).into_iter().map(str::to_owned).collect();
        classes.push(class.to_owned());
        self.set_attr(node, "class", &classes.join(" "))
    }

    pub fn remove_class(&mut self, node: NodeId, class: &str) -> XvResult<()> {
        if !self.has_class(node, class) {
            return Ok(());
        }
        let classes: Vec<String> = self
            .classes(node)
            .into_iter()
            .filter(|candidate| *candidate != class)
            .map(str::to_owned)
            .collect();
        if classes.is_empty() {
            self.remove_attr(node, "class");
            return Ok(());
        }
        self.set_attr(node, "class", &classes.join(" "))
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        match self.kind(node) {
            Some(NodeKind::Text(text)) => out.push_str(text),
            Some(NodeKind::Comment(_)) | None => {}
            Some(_) => {
                for child in self.children(node) {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// Replaces every child with a single text node.
    pub fn set_text(&mut self, node: NodeId, text: &str) -> XvResult<()> {
        self.require(node)?;
        self.clear_children(node);
        let text_node = self.create_text(text);
        self.append_child(node, text_node)
    }

    /// Pre-order descendants of `node`, excluding `node` itself.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.descendants(DOCUMENT_NODE)
            .into_iter()
            .find(|node| self.attr(*node, "id") == Some(id))
    }

    pub fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        let Some(element) = self.element(node) else {
            return false;
        };

        if let Some(tag) = &selector.tag {
            if !element.tag.eq_ignore_ascii_case(tag) {
                return false;
            }
        }

        if let Some(id) = &selector.id {
            if self.attr(node, "id") != Some(id.as_str()) {
                return false;
            }
        }

        if !selector
            .classes
            .iter()
            .all(|class| self.has_class(node, class))
        {
            return false;
        }

        selector.attrs.iter().all(|constraint| {
            match (self.attr(node, &constraint.name), &constraint.value) {
                (Some(_), None) => true,
                (Some(actual), Some(expected)) => actual == expected,
                (None, _) => false,
            }
        })
    }

    /// Matching elements among the descendants of `scope`, in document order.
    pub fn select(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|node| self.matches(*node, selector))
            .collect()
    }

    /// Adopts a copy of the fragment as the last children of `parent`.
    pub fn append_fragment(&mut self, parent: NodeId, fragment: &Fragment) -> XvResult<Vec<NodeId>> {
        let mut inserted = Vec::with_capacity(fragment.nodes.len());
        for node in &fragment.nodes {
            let id = self.adopt_fragment_node(node)?;
            self.append_child(parent, id)?;
            inserted.push(id);
        }
        Ok(inserted)
    }

    /// Replaces all children of `parent` with the fragment in one step.
    pub fn replace_children_with_fragment(
        &mut self,
        parent: NodeId,
        fragment: &Fragment,
    ) -> XvResult<Vec<NodeId>> {
        self.require(parent)?;
        self.clear_children(parent);
        self.append_fragment(parent, fragment)
    }

    fn adopt_fragment_node(&mut self, node: &FragmentNode) -> XvResult<NodeId> {
        match node {
            FragmentNode::Element {
                name,
                attrs,
                children,
            } => {
                let id = self.create_element_with_attrs(name, attrs.clone());
                for child in children {
                    let child_id = self.adopt_fragment_node(child)?;
                    self.append_child(id, child_id)?;
                }
                Ok(id)
            }
            FragmentNode::Text(text) => Ok(self.create_text(text)),
            FragmentNode::Comment(text) => Ok(self.create_comment(text)),
        }
    }

    pub fn inner_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        let raw = self.tag_name(node).is_some_and(is_raw_text_element);
        for child in self.children(node) {
            self.write_node(*child, raw, &mut out);
        }
        out
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_node(node, false, &mut out);
        out
    }

    pub fn to_html(&self) -> String {
        self.inner_html(DOCUMENT_NODE)
    }

    fn write_node(&self, node: NodeId, raw_text: bool, out: &mut String) {
        match self.kind(node) {
            Some(NodeKind::Document) => {
                for child in self.children(node) {
                    self.write_node(*child, false, out);
                }
            }
            Some(NodeKind::Element(element)) => {
                write_start_tag(&element.tag, &element.attrs, out);
                if is_void_element(&element.tag) && self.children(node).is_empty() {
                    return;
                }
                let raw = is_raw_text_element(&element.tag);
                for child in self.children(node) {
                    self.write_node(*child, raw, out);
                }
                write_end_tag(&element.tag, out);
            }
            Some(NodeKind::Text(text)) => {
                if raw_text {
                    out.push_str(text);
                } else {
                    escape_text(text, out);
                }
            }
            Some(NodeKind::Comment(text)) => write_comment(text, out),
            None => {}
        }
    }
}
