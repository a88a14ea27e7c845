//! Stylesheet document to owned instruction tree.

use crate::eval::SpaceRules;
use crate::pattern::PatternPath;
use crate::pattern::parse_pattern;
use crate::xpath::Expr;
use crate::xpath::NodeTest;
use crate::xpath::parse_expr;
use roxmltree::Node;
use xv_core::XvError;
use xv_core::XvResult;

pub const XSL_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

/// Top-level elements this engine rejects rather than silently ignores.
const UNSUPPORTED_TOP_LEVEL: &[&str] = &[
    "import",
    "include",
    "key",
    "decimal-format",
    "attribute-set",
    "namespace-alias",
];

const UNSUPPORTED_INSTRUCTIONS: &[&str] = &[
    "number",
    "apply-imports",
    "processing-instruction",
    "fallback",
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CompiledStylesheet {
    pub templates: Vec<Template>,
    pub rules: Vec<Rule>,
    pub globals: Vec<Binding>,
    pub space: SpaceRules,
}

impl CompiledStylesheet {
    pub(crate) fn named_template(&self, name: &str) -> Option<&Template> {
        // Later declarations override earlier ones.
        self.templates
            .iter()
            .rev()
            .find(|template| template.name.as_deref() == Some(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Template {
    pub name: Option<String>,
    pub params: Vec<Binding>,
    pub body: Vec<Instruction>,
}

/// One pattern alternative of a matching template.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Rule {
    pub template: usize,
    pub pattern: PatternPath,
    pub mode: Option<String>,
    pub priority: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Binding {
    pub name: String,
    pub value: BindingValue,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BindingValue {
    Select(Expr),
    Body(Vec<Instruction>),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Sort {
    pub select: Expr,
    pub numeric: bool,
    pub descending: bool,
}

/// Attribute value template.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Avt {
    pub parts: Vec<AvtPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AvtPart {
    Literal(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Instruction {
    Text(String),
    LiteralElement {
        name: String,
        attrs: Vec<(String, Avt)>,
        body: Vec<Instruction>,
    },
    ValueOf(Expr),
    ApplyTemplates {
        select: Option<Expr>,
        mode: Option<String>,
        sorts: Vec<Sort>,
        params: Vec<Binding>,
    },
    CallTemplate {
        name: String,
        params: Vec<Binding>,
    },
    ForEach {
        select: Expr,
        sorts: Vec<Sort>,
        body: Vec<Instruction>,
    },
    If {
        test: Expr,
        body: Vec<Instruction>,
    },
    Choose {
        branches: Vec<(Expr, Vec<Instruction>)>,
        otherwise: Vec<Instruction>,
    },
    Element {
        name: Avt,
        body: Vec<Instruction>,
    },
    Attribute {
        name: Avt,
        body: Vec<Instruction>,
    },
    Comment(Vec<Instruction>),
    Copy(Vec<Instruction>),
    CopyOf(Expr),
    Variable(Binding),
    Message {
        body: Vec<Instruction>,
        terminate: bool,
    },
}

pub(crate) fn compile_stylesheet(source: &str) -> XvResult<CompiledStylesheet> {
    let doc = roxmltree::Document::parse_with_options(
        source,
        roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        },
    )
    .map_err(|error| {
        XvError::new(
            "xslt.compile.invalid_xml",
            format!("stylesheet is not well-formed XML: {error}"),
        )
    })?;
    let root = doc.root_element();

    let mut sheet = CompiledStylesheet {
        templates: Vec::new(),
        rules: Vec::new(),
        globals: Vec::new(),
        space: SpaceRules::default(),
    };

    if is_xsl(root, "stylesheet") || is_xsl(root, "transform") {
        for child in root.children().filter(|child| child.is_element()) {
            compile_top_level(child, &mut sheet)?;
        }
    } else if root.attribute((XSL_NAMESPACE, "version")).is_some() {
        // Literal result element as stylesheet.
        let body = vec![compile_literal_element(root)?];
        sheet.templates.push(Template {
            name: None,
            params: Vec::new(),
            body,
        });
        let pattern = parse_pattern("/", &|_: &str| -> Option<String> { None })?;
        add_rules(&mut sheet, 0, pattern, None, None);
    } else {
        return Err(XvError::new(
            "xslt.compile.not_a_stylesheet",
            format!(
                "root element `{}` is not xsl:stylesheet or xsl:transform",
                root.tag_name().name()
            ),
        ));
    }

    for template in &sheet.templates {
        check_call_targets(&template.body, &sheet)?;
    }
    Ok(sheet)
}

fn compile_top_level(node: Node<'_, '_>, sheet: &mut CompiledStylesheet) -> XvResult<()> {
    if node.tag_name().namespace() != Some(XSL_NAMESPACE) {
        // Foreign top-level elements carry user data.
        return Ok(());
    }
    let name = node.tag_name().name();
    match name {
        "template" => compile_template(node, sheet),
        "variable" | "param" => {
            let binding = compile_binding(node)?;
            sheet.globals.push(binding);
            Ok(())
        }
        "strip-space" => {
            let tests = element_name_tests(node)?;
            sheet.space.strip.extend(tests);
            Ok(())
        }
        "preserve-space" => {
            let tests = element_name_tests(node)?;
            sheet.space.preserve.extend(tests);
            Ok(())
        }
        "output" => Ok(()),
        unsupported if UNSUPPORTED_TOP_LEVEL.contains(&unsupported) => Err(XvError::new(
            "xslt.compile.unsupported",
            format!("xsl:{unsupported} is not supported"),
        )),
        unknown => Err(XvError::new(
            "xslt.compile.unknown_instruction",
            format!("xsl:{unknown} is not allowed at the top level"),
        )),
    }
}

fn compile_template(node: Node<'_, '_>, sheet: &mut CompiledStylesheet) -> XvResult<()> {
    let name = node.attribute("name").map(str::to_owned);
    let pattern = match node.attribute("match") {
        Some(source) => Some(parse_pattern(source, &resolver_for(node))?),
        None => None,
    };
    if name.is_none() && pattern.is_none() {
        return Err(XvError::new(
            "xslt.compile.template_without_match",
            "xsl:template needs a match or name attribute",
        ));
    }
    let priority = match node.attribute("priority") {
        Some(raw) => Some(raw.trim().parse::<f64>().map_err(|error| {
            XvError::new(
                "xslt.compile.invalid_priority",
                format!("priority `{raw}` is not a number: {error}"),
            )
        })?),
        None => None,
    };

    let mut params = Vec::new();
    let mut body_nodes = Vec::new();
    for child in node.children() {
        if is_xsl(child, "param") {
            params.push(compile_binding(child)?);
        } else {
            body_nodes.push(child);
        }
    }
    let body = compile_nodes(&body_nodes)?;

    let index = sheet.templates.len();
    sheet.templates.push(Template { name, params, body });
    if let Some(pattern) = pattern {
        let mode = node.attribute("mode").map(str::to_owned);
        add_rules(sheet, index, pattern, mode, priority);
    }
    Ok(())
}

fn add_rules(
    sheet: &mut CompiledStylesheet,
    template: usize,
    pattern: Vec<PatternPath>,
    mode: Option<String>,
    priority: Option<f64>,
) {
    for alternative in pattern {
        let priority = priority.unwrap_or_else(|| alternative.default_priority());
        sheet.rules.push(Rule {
            template,
            pattern: alternative,
            mode: mode.clone(),
            priority,
        });
    }
}

fn compile_body(node: Node<'_, '_>) -> XvResult<Vec<Instruction>> {
    let children: Vec<Node<'_, '_>> = node.children().collect();
    compile_nodes(&children)
}

fn compile_nodes(nodes: &[Node<'_, '_>]) -> XvResult<Vec<Instruction>> {
    let mut body = Vec::new();
    for node in nodes {
        if node.is_text() {
            let text = node.text().unwrap_or_default();
            if !text.trim().is_empty() {
                body.push(Instruction::Text(text.to_owned()));
            }
        } else if node.is_element() {
            if node.tag_name().namespace() == Some(XSL_NAMESPACE) {
                body.push(compile_instruction(*node)?);
            } else {
                body.push(compile_literal_element(*node)?);
            }
        }
    }
    Ok(body)
}

fn compile_literal_element(node: Node<'_, '_>) -> XvResult<Instruction> {
    let mut attrs = Vec::new();
    for attr in node.attributes() {
        if attr.namespace() == Some(XSL_NAMESPACE) {
            continue;
        }
        attrs.push((attr.name().to_owned(), compile_avt(attr.value(), node)?));
    }
    Ok(Instruction::LiteralElement {
        name: node.tag_name().name().to_owned(),
        attrs,
        body: compile_body(node)?,
    })
}

fn compile_instruction(node: Node<'_, '_>) -> XvResult<Instruction> {
    let name = node.tag_name().name();
    Ok(match name {
        "text" => Instruction::Text(
            node.children()
                .filter_map(|child| child.text())
                .collect::<String>(),
        ),
        "value-of" => Instruction::ValueOf(required_expr(node, "select")?),
        "apply-templates" => {
            let select = optional_expr(node, "select")?;
            let mode = node.attribute("mode").map(str::to_owned);
            let mut sorts = Vec::new();
            let mut params = Vec::new();
            for child in node.children().filter(|child| child.is_element()) {
                if is_xsl(child, "sort") {
                    sorts.push(compile_sort(child)?);
                } else if is_xsl(child, "with-param") {
                    params.push(compile_binding(child)?);
                } else {
                    return Err(misplaced(child, "xsl:apply-templates"));
                }
            }
            Instruction::ApplyTemplates {
                select,
                mode,
                sorts,
                params,
            }
        }
        "call-template" => {
            let target = required_attr(node, "name")?.to_owned();
            let mut params = Vec::new();
            for child in node.children().filter(|child| child.is_element()) {
                if !is_xsl(child, "with-param") {
                    return Err(misplaced(child, "xsl:call-template"));
                }
                params.push(compile_binding(child)?);
            }
            Instruction::CallTemplate {
                name: target,
                params,
            }
        }
        "for-each" => {
            let select = required_expr(node, "select")?;
            let mut sorts = Vec::new();
            let mut rest = Vec::new();
            for child in node.children() {
                if is_xsl(child, "sort") {
                    sorts.push(compile_sort(child)?);
                } else {
                    rest.push(child);
                }
            }
            Instruction::ForEach {
                select,
                sorts,
                body: compile_nodes(&rest)?,
            }
        }
        "if" => Instruction::If {
            test: required_expr(node, "test")?,
            body: compile_body(node)?,
        },
        "choose" => {
            let mut branches = Vec::new();
            let mut otherwise = Vec::new();
            for child in node.children().filter(|child| child.is_element()) {
                if is_xsl(child, "when") {
                    branches.push((required_expr(child, "test")?, compile_body(child)?));
                } else if is_xsl(child, "otherwise") {
                    otherwise = compile_body(child)?;
                } else {
                    return Err(misplaced(child, "xsl:choose"));
                }
            }
            Instruction::Choose {
                branches,
                otherwise,
            }
        }
        "element" => Instruction::Element {
            name: compile_avt(required_attr(node, "name")?, node)?,
            body: compile_body(node)?,
        },
        "attribute" => Instruction::Attribute {
            name: compile_avt(required_attr(node, "name")?, node)?,
            body: compile_body(node)?,
        },
        "comment" => Instruction::Comment(compile_body(node)?),
        "copy" => Instruction::Copy(compile_body(node)?),
        "copy-of" => Instruction::CopyOf(required_expr(node, "select")?),
        "variable" => Instruction::Variable(compile_binding(node)?),
        "message" => Instruction::Message {
            body: compile_body(node)?,
            terminate: node.attribute("terminate") == Some("yes"),
        },
        unsupported if UNSUPPORTED_INSTRUCTIONS.contains(&unsupported) => {
            return Err(XvError::new(
                "xslt.compile.unsupported",
                format!("xsl:{unsupported} is not supported"),
            ));
        }
        unknown => {
            return Err(XvError::new(
                "xslt.compile.unknown_instruction",
                format!("xsl:{unknown} is not a known instruction"),
            ));
        }
    })
}

fn compile_binding(node: Node<'_, '_>) -> XvResult<Binding> {
    let name = required_attr(node, "name")?.to_owned();
    let value = match optional_expr(node, "select")? {
        Some(expr) => BindingValue::Select(expr),
        None if node.has_children() => BindingValue::Body(compile_body(node)?),
        None => BindingValue::Empty,
    };
    Ok(Binding { name, value })
}

fn compile_sort(node: Node<'_, '_>) -> XvResult<Sort> {
    let select = match optional_expr(node, "select")? {
        Some(expr) => expr,
        None => parse_expr(".", &resolver_for(node))?,
    };
    Ok(Sort {
        select,
        numeric: node.attribute("data-type") == Some("number"),
        descending: node.attribute("order") == Some("descending"),
    })
}

/// Splits `a{expr}b` into literal and expression parts; `{{` and `}}` escape braces.
pub(crate) fn compile_avt(raw: &str, scope: Node<'_, '_>) -> XvResult<Avt> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut source = String::new();
                let mut closed = false;
                let mut quote: Option<char> = None;
                for inner in chars.by_ref() {
                    match (quote, inner) {
                        (None, '}') => {
                            closed = true;
                            break;
                        }
                        (None, '"' | '\'') => quote = Some(inner),
                        (Some(open), _) if open == inner => quote = None,
                        _ => {}
                    }
                    source.push(inner);
                }
                if !closed {
                    return Err(avt_error(raw));
                }
                if !literal.is_empty() {
                    parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(AvtPart::Expr(parse_expr(&source, &resolver_for(scope))?));
            }
            '}' => return Err(avt_error(raw)),
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        parts.push(AvtPart::Literal(literal));
    }
    Ok(Avt { parts })
}

fn avt_error(raw: &str) -> XvError {
    XvError::new(
        "xslt.compile.invalid_avt",
        format!("unbalanced braces in attribute value template `{raw}`"),
    )
}

fn element_name_tests(node: Node<'_, '_>) -> XvResult<Vec<NodeTest>> {
    let resolver = resolver_for(node);
    required_attr(node, "elements")?
        .split_whitespace()
        .map(|token| match token.split_once(':') {
            None if token == "*" => Ok(NodeTest::Any),
            None => Ok(NodeTest::Name {
                ns: None,
                local: token.to_owned(),
            }),
            Some((prefix, local)) => {
                let uri = resolver(prefix).ok_or_else(|| {
                    XvError::new(
                        "xslt.xpath.unbound_prefix",
                        format!("prefix `{prefix}` is not declared"),
                    )
                })?;
                Ok(if local == "*" {
                    NodeTest::NamespaceWildcard(uri)
                } else {
                    NodeTest::Name {
                        ns: Some(uri),
                        local: local.to_owned(),
                    }
                })
            }
        })
        .collect()
}

fn check_call_targets(body: &[Instruction], sheet: &CompiledStylesheet) -> XvResult<()> {
    for instruction in body {
        match instruction {
            Instruction::CallTemplate { name, params } => {
                if sheet.named_template(name).is_none() {
                    return Err(XvError::new(
                        "xslt.compile.unknown_template",
                        format!("xsl:call-template names `{name}` which is not declared"),
                    ));
                }
                check_binding_targets(params, sheet)?;
            }
            Instruction::LiteralElement { body, .. }
            | Instruction::ForEach { body, .. }
            | Instruction::If { body, .. }
            | Instruction::Element { body, .. }
            | Instruction::Attribute { body, .. }
            | Instruction::Comment(body)
            | Instruction::Copy(body)
            | Instruction::Message { body, .. } => check_call_targets(body, sheet)?,
            Instruction::Choose {
                branches,
                otherwise,
            } => {
                for (_, branch) in branches {
                    check_call_targets(branch, sheet)?;
                }
                check_call_targets(otherwise, sheet)?;
            }
            Instruction::ApplyTemplates { params, .. } => check_binding_targets(params, sheet)?,
            Instruction::Variable(binding) => {
                check_binding_targets(std::slice::from_ref(binding), sheet)?;
            }
            Instruction::Text(_) | Instruction::ValueOf(_) | Instruction::CopyOf(_) => {}
        }
    }
    Ok(())
}

fn check_binding_targets(bindings: &[Binding], sheet: &CompiledStylesheet) -> XvResult<()> {
    for binding in bindings {
        if let BindingValue::Body(body) = &binding.value {
            check_call_targets(body, sheet)?;
        }
    }
    Ok(())
}

fn resolver_for<'a>(node: Node<'a, '_>) -> impl Fn(&str) -> Option<String> + 'a {
    move |prefix: &str| node.lookup_namespace_uri(Some(prefix)).map(str::to_owned)
}

fn is_xsl(node: Node<'_, '_>, local: &str) -> bool {
    node.is_element()
        && node.tag_name().namespace() == Some(XSL_NAMESPACE)
        && node.tag_name().name() == local
}

fn required_attr<'a>(node: Node<'a, '_>, name: &str) -> XvResult<&'a str> {
    node.attribute(name).ok_or_else(|| {
        XvError::new(
            "xslt.compile.missing_attribute",
            format!("xsl:{} requires a `{name}` attribute", node.tag_name().name()),
        )
    })
}

fn required_expr(node: Node<'_, '_>, name: &str) -> XvResult<Expr> {
    parse_expr(required_attr(node, name)?, &resolver_for(node))
}

fn optional_expr(node: Node<'_, '_>, name: &str) -> XvResult<Option<Expr>> {
    match node.attribute(name) {
        Some(source) => Ok(Some(parse_expr(source, &resolver_for(node))?)),
        None => Ok(None),
    }
}

fn misplaced(child: Node<'_, '_>, parent: &str) -> XvError {
    XvError::new(
        "xslt.compile.misplaced_element",
        format!("<{}> is not allowed inside {parent}", child.tag_name().name()),
    )
}
