//! XPath evaluation over a parsed source tree.

use crate::number::format_number;
use crate::value::Value;
use crate::value::XNode;
use crate::value::document_order;
use crate::xpath::ArithOp;
use crate::xpath::Axis;
use crate::xpath::CompareOp;
use crate::xpath::Expr;
use crate::xpath::Function;
use crate::xpath::NodeTest;
use crate::xpath::PathExpr;
use crate::xpath::PathStart;
use crate::xpath::Step;
use roxmltree::Node;
use roxmltree::NodeType;
use std::iter::successors;
use xv_core::XvError;
use xv_core::XvResult;

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Context node, position and size of the current node list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Focus<'a, 'i: 'a> {
    pub node: XNode<'a, 'i>,
    pub position: usize,
    pub size: usize,
}

impl<'a, 'i: 'a> Focus<'a, 'i> {
    pub(crate) fn single(node: XNode<'a, 'i>) -> Self {
        Self {
            node,
            position: 1,
            size: 1,
        }
    }
}

/// `xsl:strip-space` and `xsl:preserve-space` element lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SpaceRules {
    pub strip: Vec<NodeTest>,
    pub preserve: Vec<NodeTest>,
}

impl SpaceRules {
    pub(crate) fn is_empty(&self) -> bool {
        self.strip.is_empty()
    }

    /// Whether a whitespace-only text node is removed from the source tree.
    pub(crate) fn strips(&self, node: Node<'_, '_>) -> bool {
        if self.is_empty() || !node.is_text() {
            return false;
        }
        if !node
            .text()
            .is_some_and(|text| text.chars().all(|ch| matches!(ch, ' ' | '\t' | '\r' | '\n')))
        {
            return false;
        }
        let Some(parent) = node.parent_element() else {
            return false;
        };

        let strip = best_priority(&self.strip, parent);
        let preserve = best_priority(&self.preserve, parent);
        let strip_wins = match (strip, preserve) {
            (Some(strip), Some(preserve)) => strip > preserve,
            (Some(_), None) => true,
            _ => false,
        };
        if !strip_wins {
            return false;
        }

        let preserved_by_attribute = successors(Some(parent), |node| node.parent_element())
            .find_map(|element| element.attribute((XML_NAMESPACE, "space")))
            .is_some_and(|value| value == "preserve");
        !preserved_by_attribute
    }
}

fn best_priority(tests: &[NodeTest], element: Node<'_, '_>) -> Option<f64> {
    tests
        .iter()
        .filter(|test| test_matches(test, XNode::Node(element), Axis::Child))
        .map(default_priority)
        .reduce(f64::max)
}

/// Default priority of a single-step pattern with this node test.
pub(crate) fn default_priority(test: &NodeTest) -> f64 {
    match test {
        NodeTest::Name { .. } => 0.0,
        NodeTest::ProcessingInstruction(Some(_)) => 0.0,
        NodeTest::NamespaceWildcard(_) => -0.25,
        NodeTest::Any
        | NodeTest::Node
        | NodeTest::Text
        | NodeTest::Comment
        | NodeTest::ProcessingInstruction(None) => -0.5,
    }
}

/// Variable bindings and stylesheet state visible to an expression.
pub(crate) struct EvalEnv<'e, 'a, 'i: 'a> {
    pub locals: &'e [(String, Value<'a, 'i>)],
    pub globals: &'e [(String, Value<'a, 'i>)],
    pub space: &'e SpaceRules,
    pub current: XNode<'a, 'i>,
}

impl<'a, 'i: 'a> EvalEnv<'_, 'a, 'i> {
    fn variable(&self, name: &str) -> XvResult<Value<'a, 'i>> {
        self.locals
            .iter()
            .rev()
            .chain(self.globals.iter().rev())
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| {
                XvError::new(
                    "xslt.eval.unbound_variable",
                    format!("variable `${name}` is not in scope"),
                )
            })
    }
}

pub(crate) fn evaluate<'a, 'i: 'a>(
    expr: &Expr,
    focus: &Focus<'a, 'i>,
    env: &EvalEnv<'_, 'a, 'i>,
) -> XvResult<Value<'a, 'i>> {
    match expr {
        Expr::Or(left, right) => Ok(Value::Bool(
            evaluate(left, focus, env)?.to_bool() || evaluate(right, focus, env)?.to_bool(),
        )),
        Expr::And(left, right) => Ok(Value::Bool(
            evaluate(left, focus, env)?.to_bool() && evaluate(right, focus, env)?.to_bool(),
        )),
        Expr::Compare(op, left, right) => {
            let left = evaluate(left, focus, env)?;
            let right = evaluate(right, focus, env)?;
            Ok(Value::Bool(compare(*op, &left, &right)))
        }
        Expr::Arith(op, left, right) => {
            let left = evaluate(left, focus, env)?.to_number();
            let right = evaluate(right, focus, env)?.to_number();
            Ok(Value::Num(match op {
                ArithOp::Add => left + right,
                ArithOp::Sub => left - right,
                ArithOp::Mul => left * right,
                ArithOp::Div => left / right,
                ArithOp::Mod => left % right,
            }))
        }
        Expr::Negate(operand) => Ok(Value::Num(-evaluate(operand, focus, env)?.to_number())),
        Expr::Union(left, right) => {
            let mut nodes = evaluate(left, focus, env)?.into_nodes()?;
            nodes.extend(evaluate(right, focus, env)?.into_nodes()?);
            document_order(&mut nodes);
            Ok(Value::Nodes(nodes))
        }
        Expr::Literal(value) => Ok(Value::Str(value.clone())),
        Expr::Number(value) => Ok(Value::Num(*value)),
        Expr::Variable(name) => env.variable(name),
        Expr::Function(function, args) => call_function(*function, args, focus, env),
        Expr::Path(path) => evaluate_path(path, focus, env).map(Value::Nodes),
        Expr::Filter(primary, predicates) => {
            let mut nodes = evaluate(primary, focus, env)?.into_nodes()?;
            document_order(&mut nodes);
            for predicate in predicates {
                nodes = apply_predicate(nodes, predicate, env)?;
            }
            Ok(Value::Nodes(nodes))
        }
    }
}

/// Evaluates to a node-set in document order.
pub(crate) fn select<'a, 'i: 'a>(
    expr: &Expr,
    focus: &Focus<'a, 'i>,
    env: &EvalEnv<'_, 'a, 'i>,
) -> XvResult<Vec<XNode<'a, 'i>>> {
    let mut nodes = evaluate(expr, focus, env)?.into_nodes()?;
    document_order(&mut nodes);
    Ok(nodes)
}

fn evaluate_path<'a, 'i: 'a>(
    path: &PathExpr,
    focus: &Focus<'a, 'i>,
    env: &EvalEnv<'_, 'a, 'i>,
) -> XvResult<Vec<XNode<'a, 'i>>> {
    let mut nodes = match &path.start {
        PathStart::Root => vec![XNode::Node(root_of(focus.node))],
        PathStart::Context => vec![focus.node],
        PathStart::Expr(expr) => evaluate(expr, focus, env)?.into_nodes()?,
    };

    for step in &path.steps {
        let mut next = Vec::new();
        for node in &nodes {
            next.extend(evaluate_step(*node, step, env)?);
        }
        document_order(&mut next);
        nodes = next;
    }
    Ok(nodes)
}

pub(crate) fn root_of<'a, 'i: 'a>(node: XNode<'a, 'i>) -> Node<'a, 'i> {
    match node {
        XNode::Node(node) | XNode::Attribute(node, _) => node.document().root(),
    }
}

/// Nodes selected by one step from `origin`, in axis order.
fn evaluate_step<'a, 'i: 'a>(
    origin: XNode<'a, 'i>,
    step: &Step,
    env: &EvalEnv<'_, 'a, 'i>,
) -> XvResult<Vec<XNode<'a, 'i>>> {
    let mut nodes: Vec<XNode<'a, 'i>> = axis_nodes(origin, step.axis, env.space)
        .into_iter()
        .filter(|node| test_matches(&step.test, *node, step.axis))
        .collect();
    if step.axis.is_reverse() {
        nodes.reverse();
    }
    for predicate in &step.predicates {
        nodes = apply_predicate(nodes, predicate, env)?;
    }
    Ok(nodes)
}

/// Keeps the nodes for which `predicate` holds; positions follow list order.
pub(crate) fn apply_predicate<'a, 'i: 'a>(
    nodes: Vec<XNode<'a, 'i>>,
    predicate: &Expr,
    env: &EvalEnv<'_, 'a, 'i>,
) -> XvResult<Vec<XNode<'a, 'i>>> {
    let size = nodes.len();
    let mut kept = Vec::with_capacity(size);
    for (index, node) in nodes.into_iter().enumerate() {
        let focus = Focus {
            node,
            position: index + 1,
            size,
        };
        let holds = match evaluate(predicate, &focus, env)? {
            Value::Num(number) => number == focus.position as f64,
            other => other.to_bool(),
        };
        if holds {
            kept.push(node);
        }
    }
    Ok(kept)
}

/// Raw axis contents in document order.
pub(crate) fn axis_nodes<'a, 'i: 'a>(
    origin: XNode<'a, 'i>,
    axis: Axis,
    space: &SpaceRules,
) -> Vec<XNode<'a, 'i>> {
    let visible = |node: &Node<'a, 'i>| !space.strips(*node);
    match (origin, axis) {
        (_, Axis::SelfAxis) => vec![origin],
        (_, Axis::Parent) => origin.parent().into_iter().collect(),
        (XNode::Node(node), Axis::Child) => node.children().filter(visible).map(XNode::Node).collect(),
        (XNode::Node(node), Axis::Descendant) => node
            .descendants()
            .skip(1)
            .filter(visible)
            .map(XNode::Node)
            .collect(),
        (XNode::Node(node), Axis::DescendantOrSelf) => node
            .descendants()
            .filter(visible)
            .map(XNode::Node)
            .collect(),
        (XNode::Attribute(..), Axis::DescendantOrSelf) => vec![origin],
        (XNode::Node(node), Axis::Attribute) if node.is_element() => (0..node.attributes().count())
            .map(|index| XNode::Attribute(node, index))
            .collect(),
        (_, Axis::Ancestor) => {
            let mut ancestors: Vec<XNode<'a, 'i>> = successors(origin.parent(), XNode::parent).collect();
            ancestors.reverse();
            ancestors
        }
        (_, Axis::AncestorOrSelf) => {
            let mut ancestors: Vec<XNode<'a, 'i>> = successors(Some(origin), XNode::parent).collect();
            ancestors.reverse();
            ancestors
        }
        (XNode::Node(node), Axis::FollowingSibling) => {
            successors(node.next_sibling(), |sibling| sibling.next_sibling())
                .filter(visible)
                .map(XNode::Node)
                .collect()
        }
        (XNode::Node(node), Axis::PrecedingSibling) => {
            let mut siblings: Vec<XNode<'a, 'i>> =
                successors(node.prev_sibling(), |sibling| sibling.prev_sibling())
                    .filter(visible)
                    .map(XNode::Node)
                    .collect();
            siblings.reverse();
            siblings
        }
        (_, Axis::Following) => {
            let (anchor, boundary) = match origin {
                XNode::Node(node) => {
                    let last = node.descendants().last().unwrap_or(node);
                    (node, last.id().get())
                }
                XNode::Attribute(owner, _) => (owner, owner.id().get()),
            };
            anchor
                .document()
                .descendants()
                .filter(|node| node.id().get() > boundary)
                .filter(visible)
                .map(XNode::Node)
                .collect()
        }
        (_, Axis::Preceding) => {
            let anchor = match origin {
                XNode::Node(node) | XNode::Attribute(node, _) => node,
            };
            let ancestors: Vec<_> = anchor.ancestors().map(|node| node.id()).collect();
            anchor
                .document()
                .descendants()
                .take_while(|node| node.id().get() < anchor.id().get())
                .filter(|node| !ancestors.contains(&node.id()))
                .filter(visible)
                .map(XNode::Node)
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Node test against the principal node type of `axis`.
pub(crate) fn test_matches(test: &NodeTest, node: XNode<'_, '_>, axis: Axis) -> bool {
    let principal = if axis == Axis::Attribute {
        node.is_attribute()
    } else {
        node.as_node().is_some_and(|node| node.is_element())
    };
    match test {
        NodeTest::Node => true,
        NodeTest::Any => principal,
        NodeTest::Name { ns, local } => {
            principal && node.local_name() == *local && node.namespace_uri() == ns.as_deref()
        }
        NodeTest::NamespaceWildcard(uri) => {
            principal && node.namespace_uri() == Some(uri.as_str())
        }
        NodeTest::Text => node.as_node().is_some_and(|node| node.is_text()),
        NodeTest::Comment => node.as_node().is_some_and(|node| node.is_comment()),
        NodeTest::ProcessingInstruction(target) => node.as_node().is_some_and(|node| {
            node.node_type() == NodeType::PI
                && target
                    .as_deref()
                    .is_none_or(|target| node.pi().is_some_and(|pi| pi.target == target))
        }),
    }
}

fn compare(op: CompareOp, left: &Value<'_, '_>, right: &Value<'_, '_>) -> bool {
    match (left, right) {
        (Value::Nodes(left_nodes), Value::Nodes(right_nodes)) => {
            left_nodes.iter().any(|left_node| {
                let left_text = left_node.string_value();
                right_nodes
                    .iter()
                    .any(|right_node| compare_atoms(op, &Atom::Str(&left_text), &Atom::Str(&right_node.string_value())))
            })
        }
        (Value::Nodes(nodes), other) => compare_node_set(op, nodes, other, false),
        (other, Value::Nodes(nodes)) => compare_node_set(op, nodes, other, true),
        (left, right) => {
            let left_text = left.to_text();
            let right_text = right.to_text();
            compare_atoms(op, &atom(left, &left_text), &atom(right, &right_text))
        }
    }
}

/// Compares every node of a node-set against a scalar; `swapped` puts the scalar on the left.
fn compare_node_set(op: CompareOp, nodes: &[XNode<'_, '_>], other: &Value<'_, '_>, swapped: bool) -> bool {
    if let Value::Bool(flag) = other {
        let set = Atom::Bool(!nodes.is_empty());
        let scalar = Atom::Bool(*flag);
        return if swapped {
            compare_atoms(op, &scalar, &set)
        } else {
            compare_atoms(op, &set, &scalar)
        };
    }

    let other_text = other.to_text();
    let scalar = atom(other, &other_text);
    nodes.iter().any(|node| {
        let text = node.string_value();
        let node_atom = match scalar {
            Atom::Num(_) => Atom::Num(crate::value::parse_number(&text)),
            _ => Atom::Str(&text),
        };
        if swapped {
            compare_atoms(op, &scalar, &node_atom)
        } else {
            compare_atoms(op, &node_atom, &scalar)
        }
    })
}

enum Atom<'t> {
    Str(&'t str),
    Num(f64),
    Bool(bool),
}

fn atom<'t>(value: &Value<'_, '_>, text: &'t str) -> Atom<'t> {
    match value {
        Value::Num(number) => Atom::Num(*number),
        Value::Bool(flag) => Atom::Bool(*flag),
        _ => Atom::Str(text),
    }
}

fn compare_atoms(op: CompareOp, left: &Atom<'_>, right: &Atom<'_>) -> bool {
    match op {
        CompareOp::Eq | CompareOp::Neq => {
            let equal = match (left, right) {
                (Atom::Bool(_), _) | (_, Atom::Bool(_)) => atom_bool(left) == atom_bool(right),
                (Atom::Num(_), _) | (_, Atom::Num(_)) => atom_number(left) == atom_number(right),
                (Atom::Str(left), Atom::Str(right)) => left == right,
            };
            equal == (op == CompareOp::Eq)
        }
        CompareOp::Lt => atom_number(left) < atom_number(right),
        CompareOp::Le => atom_number(left) <= atom_number(right),
        CompareOp::Gt => atom_number(left) > atom_number(right),
        CompareOp::Ge => atom_number(left) >= atom_number(right),
    }
}

fn atom_bool(atom: &Atom<'_>) -> bool {
    match atom {
        Atom::Str(text) => !text.is_empty(),
        Atom::Num(number) => *number != 0.0 && !number.is_nan(),
        Atom::Bool(flag) => *flag,
    }
}

fn atom_number(atom: &Atom<'_>) -> f64 {
    match atom {
        Atom::Str(text) => crate::value::parse_number(text),
        Atom::Num(number) => *number,
        Atom::Bool(flag) => f64::from(u8::from(*flag)),
    }
}

fn call_function<'a, 'i: 'a>(
    function: Function,
    args: &[Expr],
    focus: &Focus<'a, 'i>,
    env: &EvalEnv<'_, 'a, 'i>,
) -> XvResult<Value<'a, 'i>> {
    let text_arg = |index: usize| -> XvResult<String> {
        match args.get(index) {
            Some(arg) => Ok(evaluate(arg, focus, env)?.to_text()),
            None => Ok(focus.node.string_value()),
        }
    };
    let number_arg = |index: usize| -> XvResult<f64> {
        match args.get(index) {
            Some(arg) => Ok(evaluate(arg, focus, env)?.to_number()),
            None => Ok(crate::value::parse_number(&focus.node.string_value())),
        }
    };
    // First node of the argument, or the context node when omitted.
    let node_arg = || -> XvResult<Option<XNode<'a, 'i>>> {
        match args.first() {
            Some(arg) => Ok(select(arg, focus, env)?.into_iter().next()),
            None => Ok(Some(focus.node)),
        }
    };

    Ok(match function {
        Function::Last => Value::Num(focus.size as f64),
        Function::Position => Value::Num(focus.position as f64),
        Function::Count => Value::Num(select(&args[0], focus, env)?.len() as f64),
        Function::Name => Value::Str(node_arg()?.map(|node| node.qualified_name()).unwrap_or_default()),
        Function::LocalName => Value::Str(node_arg()?.map(|node| node.local_name()).unwrap_or_default()),
        Function::NamespaceUri => Value::Str(
            node_arg()?
                .and_then(|node| node.namespace_uri())
                .unwrap_or_default()
                .to_owned(),
        ),
        Function::String => Value::Str(text_arg(0)?),
        Function::Concat => {
            let mut out = String::new();
            for index in 0..args.len() {
                out.push_str(&text_arg(index)?);
            }
            Value::Str(out)
        }
        Function::Contains => Value::Bool(text_arg(0)?.contains(text_arg(1)?.as_str())),
        Function::StartsWith => Value::Bool(text_arg(0)?.starts_with(text_arg(1)?.as_str())),
        Function::SubstringBefore => {
            let haystack = text_arg(0)?;
            let needle = text_arg(1)?;
            Value::Str(
                haystack
                    .find(needle.as_str())
                    .map(|at| haystack[..at].to_owned())
                    .unwrap_or_default(),
            )
        }
        Function::SubstringAfter => {
            let haystack = text_arg(0)?;
            let needle = text_arg(1)?;
            Value::Str(
                haystack
                    .find(needle.as_str())
                    .map(|at| haystack[at + needle.len()..].to_owned())
                    .unwrap_or_default(),
            )
        }
        Function::Substring => {
            let text = text_arg(0)?;
            let start = round(number_arg(1)?);
            let end = if args.len() > 2 {
                start + round(number_arg(2)?)
            } else {
                f64::INFINITY
            };
            Value::Str(
                text.chars()
                    .enumerate()
                    .filter(|(index, _)| {
                        let position = (*index + 1) as f64;
                        position >= start && position < end
                    })
                    .map(|(_, ch)| ch)
                    .collect(),
            )
        }
        Function::StringLength => Value::Num(text_arg(0)?.chars().count() as f64),
        Function::NormalizeSpace => Value::Str(
            text_arg(0)?
                .split(|ch: char| matches!(ch, ' ' | '\t' | '\r' | '\n'))
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        ),
        Function::Translate => {
            let text = text_arg(0)?;
            let from: Vec<char> = text_arg(1)?.chars().collect();
            let to: Vec<char> = text_arg(2)?.chars().collect();
            Value::Str(
                text.chars()
                    .filter_map(|ch| match from.iter().position(|candidate| *candidate == ch) {
                        Some(index) => to.get(index).copied(),
                        None => Some(ch),
                    })
                    .collect(),
            )
        }
        Function::Not => Value::Bool(!evaluate(&args[0], focus, env)?.to_bool()),
        Function::True => Value::Bool(true),
        Function::False => Value::Bool(false),
        Function::Boolean => Value::Bool(evaluate(&args[0], focus, env)?.to_bool()),
        Function::Number => Value::Num(number_arg(0)?),
        Function::Sum => Value::Num(
            select(&args[0], focus, env)?
                .iter()
                .map(|node| crate::value::parse_number(&node.string_value()))
                .sum(),
        ),
        Function::Floor => Value::Num(number_arg(0)?.floor()),
        Function::Ceiling => Value::Num(number_arg(0)?.ceil()),
        Function::Round => Value::Num(round(number_arg(0)?)),
        Function::Current => Value::Nodes(vec![env.current]),
        Function::GenerateId => Value::Str(
            node_arg()?
                .map(|node| {
                    let (id, attribute) = node.order_key();
                    format!("xv{id}-{attribute}")
                })
                .unwrap_or_default(),
        ),
        Function::FormatNumber => {
            if args.len() > 2 {
                return Err(XvError::new(
                    "xslt.eval.decimal_format_unknown",
                    format!("decimal format '{}' is not declared", text_arg(2)?),
                ));
            }
            Value::Str(format_number(number_arg(0)?, &text_arg(1)?)?)
        }
    })
}

/// XPath `round()`: halves go towards positive infinity.
fn round(value: f64) -> f64 {
    if value.is_nan() || value.is_infinite() {
        value
    } else {
        (value + 0.5).floor()
    }
}
