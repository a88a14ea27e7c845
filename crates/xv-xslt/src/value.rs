//! Source-tree node handles and XPath values.

use roxmltree::Attribute;
use roxmltree::Node;
use roxmltree::NodeType;
use xv_core::XvError;
use xv_core::XvResult;
use xv_dom::FragmentNode;

/// A node of the source tree. Attributes are addressed through their owner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum XNode<'a, 'i: 'a> {
    Node(Node<'a, 'i>),
    Attribute(Node<'a, 'i>, usize),
}

impl<'a, 'i: 'a> XNode<'a, 'i> {
    /// Attributes sort after their owner and before its children.
    pub(crate) fn order_key(&self) -> (u32, usize) {
        match self {
            Self::Node(node) => (node.id().get(), 0),
            Self::Attribute(owner, index) => (owner.id().get(), index + 1),
        }
    }

    pub(crate) fn as_node(&self) -> Option<Node<'a, 'i>> {
        match self {
            Self::Node(node) => Some(*node),
            Self::Attribute(..) => None,
        }
    }

    pub(crate) fn attribute(&self) -> Option<Attribute<'a, 'i>> {
        match self {
            Self::Attribute(owner, index) => owner.attributes().nth(*index),
            Self::Node(_) => None,
        }
    }

    pub(crate) fn is_attribute(&self) -> bool {
        matches!(self, Self::Attribute(..))
    }

    pub(crate) fn parent(&self) -> Option<XNode<'a, 'i>> {
        match self {
            Self::Node(node) => node.parent().map(XNode::Node),
            Self::Attribute(owner, _) => Some(XNode::Node(*owner)),
        }
    }

    pub(crate) fn string_value(&self) -> String {
        match self {
            Self::Attribute(..) => self
                .attribute()
                .map(|attr| attr.value().to_owned())
                .unwrap_or_default(),
            Self::Node(node) => match node.node_type() {
                NodeType::Root | NodeType::Element => node
                    .descendants()
                    .filter(|child| child.is_text())
                    .filter_map(|child| child.text())
                    .collect(),
                NodeType::Text | NodeType::Comment => node.text().unwrap_or_default().to_owned(),
                NodeType::PI => node
                    .pi()
                    .and_then(|pi| pi.value)
                    .unwrap_or_default()
                    .to_owned(),
            },
        }
    }

    pub(crate) fn local_name(&self) -> String {
        match self {
            Self::Attribute(..) => self
                .attribute()
                .map(|attr| attr.name().to_owned())
                .unwrap_or_default(),
            Self::Node(node) => match node.node_type() {
                NodeType::Element => node.tag_name().name().to_owned(),
                NodeType::PI => node.pi().map(|pi| pi.target.to_owned()).unwrap_or_default(),
                _ => String::new(),
            },
        }
    }

    pub(crate) fn namespace_uri(&self) -> Option<&'a str> {
        match self {
            Self::Attribute(..) => self.attribute().and_then(|attr| attr.namespace()),
            Self::Node(node) if node.is_element() => node.tag_name().namespace(),
            Self::Node(_) => None,
        }
    }

    /// Name with the prefix declared in scope for its namespace, if any.
    pub(crate) fn qualified_name(&self) -> String {
        let local = self.local_name();
        let scope = match self {
            Self::Attribute(owner, _) => *owner,
            Self::Node(node) => *node,
        };
        match self
            .namespace_uri()
            .and_then(|uri| scope.lookup_prefix(uri))
            .filter(|prefix| !prefix.is_empty())
        {
            Some(prefix) => format!("{prefix}:{local}"),
            None => local,
        }
    }
}

/// Sorts into document order and removes duplicates.
pub(crate) fn document_order(nodes: &mut Vec<XNode<'_, '_>>) {
    nodes.sort_by_key(|node| node.order_key());
    nodes.dedup_by_key(|node| node.order_key());
}

#[derive(Debug, Clone)]
pub(crate) enum Value<'a, 'i: 'a> {
    Nodes(Vec<XNode<'a, 'i>>),
    Str(String),
    Num(f64),
    Bool(bool),
    /// Result tree fragment bound by a variable body.
    Tree(Vec<FragmentNode>),
}

impl<'a, 'i: 'a> Value<'a, 'i> {
    pub(crate) fn to_bool(&self) -> bool {
        match self {
            Self::Nodes(nodes) => !nodes.is_empty(),
            Self::Str(value) => !value.is_empty(),
            Self::Num(value) => *value != 0.0 && !value.is_nan(),
            Self::Bool(value) => *value,
            Self::Tree(_) => true,
        }
    }

    pub(crate) fn to_number(&self) -> f64 {
        match self {
            Self::Num(value) => *value,
            Self::Bool(true) => 1.0,
            Self::Bool(false) => 0.0,
            other => parse_number(&other.to_text()),
        }
    }

    /// XPath `string()` conversion.
    pub(crate) fn to_text(&self) -> String {
        match self {
            Self::Nodes(nodes) => nodes
                .first()
                .map(XNode::string_value)
                .unwrap_or_default(),
            Self::Str(value) => value.clone(),
            Self::Num(value) => format_number(*value),
            Self::Bool(value) => value.to_string(),
            Self::Tree(nodes) => nodes.iter().map(FragmentNode::text_content).collect(),
        }
    }

    pub(crate) fn into_nodes(self) -> XvResult<Vec<XNode<'a, 'i>>> {
        match self {
            Self::Nodes(nodes) => Ok(nodes),
            other => Err(XvError::new(
                "xslt.eval.not_a_node_set",
                format!("expected a node-set, found {}", other.type_name()),
            )),
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::Nodes(_) => "node-set",
            Self::Str(_) => "string",
            Self::Num(_) => "number",
            Self::Bool(_) => "boolean",
            Self::Tree(_) => "result tree fragment",
        }
    }
}

/// XPath number literal grammar: optional minus, digits, optional fraction.
pub(crate) fn parse_number(input: &str) -> f64 {
    let trimmed = input.trim_matches(|ch: char| matches!(ch, ' ' | '\t' | '\r' | '\n'));
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let valid = !digits.is_empty()
        && digits != "."
        && digits.chars().all(|ch| ch.is_ascii_digit() || ch == '.')
        && digits.matches('.').count() <= 1;
    if !valid {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

pub(crate) fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }
    if value == 0.0 {
        return "0".to_owned();
    }
    if value.fract() == 0.0 && value.abs() < 1e16 {
        return format!("{}", value as i64);
    }
    format!("{value}")
}

#[cfg(test)]
mod tests {
    use super::format_number;
    use super::parse_number;

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn number_parsing_follows_xpath_grammar() {
        assert_eq!(parse_number(" 42 "), 42.0);
        assert_eq!(parse_number("-1.5"), -1.5);
        assert_eq!(parse_number(".5"), 0.5);
        assert!(parse_number("1e3").is_nan());
        assert!(parse_number("").is_nan());
        assert!(parse_number("abc").is_nan());
    }
}
