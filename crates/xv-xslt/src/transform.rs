//! Executes a compiled stylesheet against a source document.

use crate::compile::Avt;
use crate::compile::AvtPart;
use crate::compile::Binding;
use crate::compile::BindingValue;
use crate::compile::CompiledStylesheet;
use crate::compile::Instruction;
use crate::compile::Sort;
use crate::compile::Template;
use crate::eval::EvalEnv;
use crate::eval::Focus;
use crate::eval::axis_nodes;
use crate::eval::evaluate;
use crate::eval::select;
use crate::value::Value;
use crate::value::XNode;
use crate::value::parse_number;
use crate::xpath::Axis;
use roxmltree::NodeType;
use std::cmp::Ordering;
use xv_core::XvError;
use xv_core::XvResult;
use xv_dom::FragmentNode;

const MAX_TEMPLATE_DEPTH: usize = 200;

/// Output under construction for one element (or the fragment root).
#[derive(Debug, Default)]
struct Sink {
    nodes: Vec<FragmentNode>,
    attrs: Vec<(String, String)>,
}

impl Sink {
    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(FragmentNode::Text(last)) = self.nodes.last_mut() {
            last.push_str(text);
        } else {
            self.nodes.push(FragmentNode::Text(text.to_owned()));
        }
    }

    fn push(&mut self, node: FragmentNode) {
        match node {
            FragmentNode::Text(text) => self.push_text(&text),
            other => self.nodes.push(other),
        }
    }

    /// Attributes may only be added before any child content.
    fn set_attr(&mut self, name: String, value: String) {
        if !self.nodes.is_empty() {
            tracing::debug!(attribute = name.as_str(), "attribute after element content ignored");
            return;
        }
        match self.attrs.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name, value)),
        }
    }

    fn text(&self) -> String {
        self.nodes.iter().map(FragmentNode::text_content).collect()
    }

    fn into_element(self, name: String, mut attrs: Vec<(String, String)>) -> FragmentNode {
        for (key, value) in self.attrs {
            match attrs.iter_mut().find(|(existing, _)| *existing == key) {
                Some(slot) => slot.1 = value,
                None => attrs.push((key, value)),
            }
        }
        FragmentNode::Element {
            name,
            attrs,
            children: self.nodes,
        }
    }
}

pub(crate) fn run(
    sheet: &CompiledStylesheet,
    source: &str,
    params: &[(&str, &str)],
) -> XvResult<Vec<FragmentNode>> {
    let doc = roxmltree::Document::parse_with_options(
        source,
        roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        },
    )
    .map_err(|error| {
        XvError::new(
            "xslt.source.invalid_xml",
            format!("source document is not well-formed XML: {error}"),
        )
    })?;

    let root = XNode::Node(doc.root());
    let mut executor = Executor {
        sheet,
        globals: Vec::new(),
        locals: Vec::new(),
        depth: 0,
    };
    executor.bind_globals(root, params)?;

    let mut sink = Sink::default();
    executor.apply_templates(vec![root], None, Vec::new(), &mut sink)?;
    Ok(sink.nodes)
}

struct Executor<'s, 'a, 'i: 'a> {
    sheet: &'s CompiledStylesheet,
    globals: Vec<(String, Value<'a, 'i>)>,
    locals: Vec<(String, Value<'a, 'i>)>,
    depth: usize,
}

impl<'s, 'a, 'i: 'a> Executor<'s, 'a, 'i> {
    fn env(&self, current: XNode<'a, 'i>) -> EvalEnv<'_, 'a, 'i> {
        EvalEnv {
            locals: &self.locals,
            globals: &self.globals,
            space: &self.sheet.space,
            current,
        }
    }

    /// Globals may reference each other in any order; unresolved ones are retried.
    fn bind_globals(&mut self, root: XNode<'a, 'i>, params: &[(&str, &str)]) -> XvResult<()> {
        let sheet = self.sheet;
        let mut pending: Vec<&'s Binding> = Vec::new();
        for binding in &sheet.globals {
            match params.iter().find(|(name, _)| *name == binding.name) {
                Some((_, value)) => self
                    .globals
                    .push((binding.name.clone(), Value::Str((*value).to_owned()))),
                None => pending.push(binding),
            }
        }

        while !pending.is_empty() {
            let mut deferred = Vec::new();
            let mut last_error = None;
            for binding in pending.iter().copied() {
                match self.binding_value(binding, &Focus::single(root)) {
                    Ok(value) => self.globals.push((binding.name.clone(), value)),
                    Err(error) if error.code == "xslt.eval.unbound_variable" => {
                        deferred.push(binding);
                        last_error = Some(error);
                    }
                    Err(error) => return Err(error),
                }
            }
            if deferred.len() == pending.len() {
                return Err(last_error.unwrap_or_else(|| {
                    XvError::new("xslt.eval.unbound_variable", "global variables are circular")
                }));
            }
            pending = deferred;
        }
        Ok(())
    }

    fn binding_value(&mut self, binding: &Binding, focus: &Focus<'a, 'i>) -> XvResult<Value<'a, 'i>> {
        match &binding.value {
            BindingValue::Select(expr) => evaluate(expr, focus, &self.env(focus.node)),
            BindingValue::Body(body) => {
                let mut sink = Sink::default();
                self.execute_body(body, focus, &mut sink)?;
                Ok(Value::Tree(sink.nodes))
            }
            BindingValue::Empty => Ok(Value::Str(String::new())),
        }
    }

    fn evaluate_params(
        &mut self,
        params: &[Binding],
        focus: &Focus<'a, 'i>,
    ) -> XvResult<Vec<(String, Value<'a, 'i>)>> {
        let mut values = Vec::with_capacity(params.len());
        for param in params {
            values.push((param.name.clone(), self.binding_value(param, focus)?));
        }
        Ok(values)
    }

    fn apply_templates(
        &mut self,
        nodes: Vec<XNode<'a, 'i>>,
        mode: Option<&str>,
        params: Vec<(String, Value<'a, 'i>)>,
        sink: &mut Sink,
    ) -> XvResult<()> {
        let size = nodes.len();
        for (index, node) in nodes.into_iter().enumerate() {
            let focus = Focus {
                node,
                position: index + 1,
                size,
            };
            match self.find_rule(node, mode)? {
                Some(template) => self.instantiate(template, &focus, params.clone(), sink)?,
                None => self.builtin(&focus, mode, sink)?,
            }
        }
        Ok(())
    }

    /// Highest priority wins; ties go to the rule declared last.
    fn find_rule(&self, node: XNode<'a, 'i>, mode: Option<&str>) -> XvResult<Option<&'s Template>> {
        let sheet = self.sheet;
        let env = self.env(node);
        let mut best: Option<(f64, usize)> = None;
        for rule in &sheet.rules {
            if rule.mode.as_deref() != mode {
                continue;
            }
            if best.is_some_and(|(priority, _)| rule.priority < priority) {
                continue;
            }
            if rule.pattern.matches(node, &env)? {
                best = Some((rule.priority, rule.template));
            }
        }
        Ok(best.and_then(|(_, template)| sheet.templates.get(template)))
    }

    fn builtin(&mut self, focus: &Focus<'a, 'i>, mode: Option<&str>, sink: &mut Sink) -> XvResult<()> {
        match focus.node {
            XNode::Attribute(..) => sink.push_text(&focus.node.string_value()),
            XNode::Node(node) => match node.node_type() {
                NodeType::Root | NodeType::Element => {
                    let children = axis_nodes(focus.node, Axis::Child, &self.sheet.space);
                    self.apply_templates(children, mode, Vec::new(), sink)?;
                }
                NodeType::Text => sink.push_text(node.text().unwrap_or_default()),
                NodeType::Comment | NodeType::PI => {}
            },
        }
        Ok(())
    }

    fn instantiate(
        &mut self,
        template: &'s Template,
        focus: &Focus<'a, 'i>,
        passed: Vec<(String, Value<'a, 'i>)>,
        sink: &mut Sink,
    ) -> XvResult<()> {
        if self.depth >= MAX_TEMPLATE_DEPTH {
            return Err(XvError::new(
                "xslt.depth_exceeded",
                format!("template recursion deeper than {MAX_TEMPLATE_DEPTH}"),
            ));
        }
        self.depth += 1;
        let saved = std::mem::take(&mut self.locals);
        let result = self.run_template(template, focus, passed, sink);
        self.locals = saved;
        self.depth -= 1;
        result
    }

    /// Binds parameters in a fresh local scope, then runs the body.
    fn run_template(
        &mut self,
        template: &'s Template,
        focus: &Focus<'a, 'i>,
        mut passed: Vec<(String, Value<'a, 'i>)>,
        sink: &mut Sink,
    ) -> XvResult<()> {
        for param in &template.params {
            let value = match passed.iter().position(|(name, _)| *name == param.name) {
                Some(index) => passed.swap_remove(index).1,
                None => self.binding_value(param, focus)?,
            };
            self.locals.push((param.name.clone(), value));
        }
        self.execute_body(&template.body, focus, sink)
    }

    fn execute_body(
        &mut self,
        body: &[Instruction],
        focus: &Focus<'a, 'i>,
        sink: &mut Sink,
    ) -> XvResult<()> {
        let mark = self.locals.len();
        let mut result = Ok(());
        for instruction in body {
            result = self.execute(instruction, focus, sink);
            if result.is_err() {
                break;
            }
        }
        self.locals.truncate(mark);
        result
    }

    fn execute(
        &mut self,
        instruction: &Instruction,
        focus: &Focus<'a, 'i>,
        sink: &mut Sink,
    ) -> XvResult<()> {
        match instruction {
            Instruction::Text(text) => sink.push_text(text),
            Instruction::LiteralElement { name, attrs, body } => {
                let mut values = Vec::with_capacity(attrs.len());
                for (attr_name, avt) in attrs {
                    values.push((attr_name.clone(), self.expand_avt(avt, focus)?));
                }
                let mut inner = Sink::default();
                self.execute_body(body, focus, &mut inner)?;
                sink.push(inner.into_element(name.clone(), values));
            }
            Instruction::ValueOf(expr) => {
                let text = evaluate(expr, focus, &self.env(focus.node))?.to_text();
                sink.push_text(&text);
            }
            Instruction::ApplyTemplates {
                select: selection,
                mode,
                sorts,
                params,
            } => {
                let mut nodes = match selection {
                    Some(expr) => select(expr, focus, &self.env(focus.node))?,
                    None => axis_nodes(focus.node, Axis::Child, &self.sheet.space),
                };
                self.sort_nodes(&mut nodes, sorts)?;
                let values = self.evaluate_params(params, focus)?;
                self.apply_templates(nodes, mode.as_deref(), values, sink)?;
            }
            Instruction::CallTemplate { name, params } => {
                let values = self.evaluate_params(params, focus)?;
                let sheet = self.sheet;
                let template = sheet.named_template(name).ok_or_else(|| {
                    XvError::new(
                        "xslt.compile.unknown_template",
                        format!("no template named `{name}`"),
                    )
                })?;
                self.instantiate(template, focus, values, sink)?;
            }
            Instruction::ForEach {
                select: selection,
                sorts,
                body,
            } => {
                let mut nodes = select(selection, focus, &self.env(focus.node))?;
                self.sort_nodes(&mut nodes, sorts)?;
                let size = nodes.len();
                for (index, node) in nodes.into_iter().enumerate() {
                    let inner = Focus {
                        node,
                        position: index + 1,
                        size,
                    };
                    self.execute_body(body, &inner, sink)?;
                }
            }
            Instruction::If { test, body } => {
                if evaluate(test, focus, &self.env(focus.node))?.to_bool() {
                    self.execute_body(body, focus, sink)?;
                }
            }
            Instruction::Choose {
                branches,
                otherwise,
            } => {
                let mut chosen = otherwise;
                for (test, body) in branches {
                    if evaluate(test, focus, &self.env(focus.node))?.to_bool() {
                        chosen = body;
                        break;
                    }
                }
                self.execute_body(chosen, focus, sink)?;
            }
            Instruction::Element { name, body } => {
                let name = local_part(&self.expand_avt(name, focus)?);
                let mut inner = Sink::default();
                self.execute_body(body, focus, &mut inner)?;
                sink.push(inner.into_element(name, Vec::new()));
            }
            Instruction::Attribute { name, body } => {
                let name = local_part(&self.expand_avt(name, focus)?);
                let mut inner = Sink::default();
                self.execute_body(body, focus, &mut inner)?;
                sink.set_attr(name, inner.text());
            }
            Instruction::Comment(body) => {
                let mut inner = Sink::default();
                self.execute_body(body, focus, &mut inner)?;
                sink.push(FragmentNode::Comment(inner.text()));
            }
            Instruction::Copy(body) => self.shallow_copy(focus, body, sink)?,
            Instruction::CopyOf(expr) => match evaluate(expr, focus, &self.env(focus.node))? {
                Value::Nodes(nodes) => {
                    for node in nodes {
                        deep_copy(node, &self.sheet.space, sink);
                    }
                }
                Value::Tree(nodes) => {
                    for node in nodes {
                        sink.push(node);
                    }
                }
                other => sink.push_text(&other.to_text()),
            },
            Instruction::Variable(binding) => {
                let value = self.binding_value(binding, focus)?;
                self.locals.push((binding.name.clone(), value));
            }
            Instruction::Message { body, terminate } => {
                let mut inner = Sink::default();
                self.execute_body(body, focus, &mut inner)?;
                let text = inner.text();
                tracing::info!(text = text.as_str(), terminate = *terminate, "xsl:message");
                if *terminate {
                    return Err(XvError::new("xslt.message.terminated", text));
                }
            }
        }
        Ok(())
    }

    fn shallow_copy(
        &mut self,
        focus: &Focus<'a, 'i>,
        body: &[Instruction],
        sink: &mut Sink,
    ) -> XvResult<()> {
        match focus.node {
            XNode::Attribute(..) => {
                sink.set_attr(focus.node.local_name(), focus.node.string_value());
            }
            XNode::Node(node) => match node.node_type() {
                NodeType::Root => self.execute_body(body, focus, sink)?,
                NodeType::Element => {
                    let mut inner = Sink::default();
                    self.execute_body(body, focus, &mut inner)?;
                    sink.push(inner.into_element(focus.node.local_name(), Vec::new()));
                }
                NodeType::Text => sink.push_text(node.text().unwrap_or_default()),
                NodeType::Comment => {
                    sink.push(FragmentNode::Comment(node.text().unwrap_or_default().to_owned()));
                }
                NodeType::PI => {}
            },
        }
        Ok(())
    }

    fn expand_avt(&self, avt: &Avt, focus: &Focus<'a, 'i>) -> XvResult<String> {
        let mut out = String::new();
        for part in &avt.parts {
            match part {
                AvtPart::Literal(text) => out.push_str(text),
                AvtPart::Expr(expr) => {
                    out.push_str(&evaluate(expr, focus, &self.env(focus.node))?.to_text());
                }
            }
        }
        Ok(out)
    }

    /// Stable multi-key sort; NaN keys sort before numbers.
    fn sort_nodes(&self, nodes: &mut Vec<XNode<'a, 'i>>, sorts: &[Sort]) -> XvResult<()> {
        if sorts.is_empty() {
            return Ok(());
        }
        let size = nodes.len();
        let mut keyed = Vec::with_capacity(size);
        for (index, node) in nodes.iter().enumerate() {
            let focus = Focus {
                node: *node,
                position: index + 1,
                size,
            };
            let mut keys = Vec::with_capacity(sorts.len());
            for sort in sorts {
                keys.push(evaluate(&sort.select, &focus, &self.env(*node))?.to_text());
            }
            keyed.push((keys, *node));
        }

        keyed.sort_by(|(left, _), (right, _)| {
            for (sort, (left, right)) in sorts.iter().zip(left.iter().zip(right)) {
                let ordering = if sort.numeric {
                    compare_numbers(parse_number(left), parse_number(right))
                } else {
                    left.cmp(right)
                };
                let ordering = if sort.descending { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        *nodes = keyed.into_iter().map(|(_, node)| node).collect();
        Ok(())
    }
}

fn compare_numbers(left: f64, right: f64) -> Ordering {
    match (left.is_nan(), right.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
    }
}

fn local_part(name: &str) -> String {
    name.rsplit_once(':')
        .map_or(name, |(_, local)| local)
        .to_owned()
}

fn deep_copy(node: XNode<'_, '_>, space: &crate::eval::SpaceRules, sink: &mut Sink) {
    let source = match node {
        XNode::Attribute(..) => {
            sink.set_attr(node.local_name(), node.string_value());
            return;
        }
        XNode::Node(source) => source,
    };
    match source.node_type() {
        NodeType::Root => {
            for child in axis_nodes(node, Axis::Child, space) {
                deep_copy(child, space, sink);
            }
        }
        NodeType::Element => {
            let attrs = source
                .attributes()
                .map(|attr| (attr.name().to_owned(), attr.value().to_owned()))
                .collect();
            let mut inner = Sink::default();
            for child in axis_nodes(node, Axis::Child, space) {
                deep_copy(child, space, &mut inner);
            }
            sink.push(inner.into_element(source.tag_name().name().to_owned(), attrs));
        }
        NodeType::Text => sink.push_text(source.text().unwrap_or_default()),
        NodeType::Comment => {
            sink.push(FragmentNode::Comment(source.text().unwrap_or_default().to_owned()));
        }
        NodeType::PI => {}
    }
}
