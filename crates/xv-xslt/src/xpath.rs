//! XPath 1.0 syntax tree and recursive-descent parser.

use crate::lexer::Token;
use crate::lexer::syntax_error;
use crate::lexer::tokenize;
use xv_core::XvError;
use xv_core::XvResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
    Attribute,
    SelfAxis,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Self::Child,
            "descendant" => Self::Descendant,
            "descendant-or-self" => Self::DescendantOrSelf,
            "parent" => Self::Parent,
            "ancestor" => Self::Ancestor,
            "ancestor-or-self" => Self::AncestorOrSelf,
            "following-sibling" => Self::FollowingSibling,
            "preceding-sibling" => Self::PrecedingSibling,
            "following" => Self::Following,
            "preceding" => Self::Preceding,
            "attribute" => Self::Attribute,
            "self" => Self::SelfAxis,
            _ => return None,
        })
    }

    /// Reverse axes number predicate positions from the context node outwards.
    pub(crate) fn is_reverse(self) -> bool {
        matches!(
            self,
            Self::Parent
                | Self::Ancestor
                | Self::AncestorOrSelf
                | Self::PrecedingSibling
                | Self::Preceding
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NodeTest {
    /// Expanded name; `ns` is `None` for names without a prefix.
    Name {
        ns: Option<String>,
        local: String,
    },
    NamespaceWildcard(String),
    Any,
    Node,
    Text,
    Comment,
    ProcessingInstruction(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

impl Step {
    pub(crate) fn descendant_or_self_node() -> Self {
        Self {
            axis: Axis::DescendantOrSelf,
            test: NodeTest::Node,
            predicates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PathStart {
    Root,
    Context,
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PathExpr {
    pub start: PathStart,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Function {
    Last,
    Position,
    Count,
    Name,
    LocalName,
    NamespaceUri,
    String,
    Concat,
    Contains,
    StartsWith,
    Substring,
    SubstringBefore,
    SubstringAfter,
    StringLength,
    NormalizeSpace,
    Translate,
    Not,
    True,
    False,
    Boolean,
    Number,
    Sum,
    Floor,
    Ceiling,
    Round,
    Current,
    GenerateId,
    FormatNumber,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "last" => Self::Last,
            "position" => Self::Position,
            "count" => Self::Count,
            "name" => Self::Name,
            "local-name" => Self::LocalName,
            "namespace-uri" => Self::NamespaceUri,
            "string" => Self::String,
            "concat" => Self::Concat,
            "contains" => Self::Contains,
            "starts-with" => Self::StartsWith,
            "substring" => Self::Substring,
            "substring-before" => Self::SubstringBefore,
            "substring-after" => Self::SubstringAfter,
            "string-length" => Self::StringLength,
            "normalize-space" => Self::NormalizeSpace,
            "translate" => Self::Translate,
            "not" => Self::Not,
            "true" => Self::True,
            "false" => Self::False,
            "boolean" => Self::Boolean,
            "number" => Self::Number,
            "sum" => Self::Sum,
            "floor" => Self::Floor,
            "ceiling" => Self::Ceiling,
            "round" => Self::Round,
            "current" => Self::Current,
            "generate-id" => Self::GenerateId,
            "format-number" => Self::FormatNumber,
            _ => return None,
        })
    }

    /// Minimum and maximum argument count; `None` means unbounded.
    fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::Last | Self::Position | Self::True | Self::False | Self::Current => {
                (0, Some(0))
            }
            Self::Count | Self::Not | Self::Boolean | Self::Sum | Self::Floor => (1, Some(1)),
            Self::Ceiling | Self::Round => (1, Some(1)),
            Self::Name
            | Self::LocalName
            | Self::NamespaceUri
            | Self::String
            | Self::StringLength
            | Self::NormalizeSpace
            | Self::Number
            | Self::GenerateId => (0, Some(1)),
            Self::Contains | Self::StartsWith | Self::SubstringBefore | Self::SubstringAfter => {
                (2, Some(2))
            }
            Self::Substring | Self::FormatNumber => (2, Some(3)),
            Self::Translate => (3, Some(3)),
            Self::Concat => (2, None),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Literal(String),
    Number(f64),
    Variable(String),
    Function(Function, Vec<Expr>),
    Path(PathExpr),
    Filter(Box<Expr>, Vec<Expr>),
}

/// Resolves a namespace prefix declared where the expression appears.
pub(crate) trait PrefixResolver {
    fn resolve(&self, prefix: &str) -> Option<String>;
}

impl<F> PrefixResolver for F
where
    F: Fn(&str) -> Option<String>,
{
    fn resolve(&self, prefix: &str) -> Option<String> {
        self(prefix)
    }
}

pub(crate) fn parse_expr(source: &str, resolver: &dyn PrefixResolver) -> XvResult<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        resolver,
    };
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(syntax_error(source, &format!("unexpected token {token:?}")));
    }
    Ok(expr)
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    pos: usize,
    resolver: &'s dyn PrefixResolver,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> XvResult<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {expected:?}")))
        }
    }

    fn error(&self, detail: &str) -> XvError {
        syntax_error(self.source, detail)
    }

    fn parse_or(&mut self) -> XvResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> XvResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat(&Token::And) {
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> XvResult<Expr> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => CompareOp::Eq,
                Some(Token::Neq) => CompareOp::Neq,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_relational()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_relational(&mut self) -> XvResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => CompareOp::Lt,
                Some(Token::Le) => CompareOp::Le,
                Some(Token::Gt) => CompareOp::Gt,
                Some(Token::Ge) => CompareOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_additive(&mut self) -> XvResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> XvResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Multiply) => ArithOp::Mul,
                Some(Token::Div) => ArithOp::Div,
                Some(Token::Mod) => ArithOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> XvResult<Expr> {
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Negate(Box::new(operand)));
        }
        self.parse_union()
    }

    fn parse_union(&mut self) -> XvResult<Expr> {
        let mut left = self.parse_path()?;
        while self.eat(&Token::Pipe) {
            let right = self.parse_path()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn starts_primary(&self) -> bool {
        match self.peek() {
            Some(Token::Variable(_) | Token::LParen | Token::Literal(_) | Token::Number(_)) => true,
            Some(Token::Name(name)) => {
                self.peek_at(1) == Some(&Token::LParen) && !is_node_type(name)
            }
            _ => false,
        }
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Dot | Token::DotDot | Token::At | Token::Star | Token::Name(_))
        )
    }

    fn parse_path(&mut self) -> XvResult<Expr> {
        if self.starts_primary() {
            let primary = self.parse_primary()?;
            let mut predicates = Vec::new();
            while self.peek() == Some(&Token::LBracket) {
                predicates.push(self.parse_predicate()?);
            }
            let filtered = if predicates.is_empty() {
                primary
            } else {
                Expr::Filter(Box::new(primary), predicates)
            };

            if !matches!(self.peek(), Some(Token::Slash | Token::DoubleSlash)) {
                return Ok(filtered);
            }
            let mut steps = Vec::new();
            self.parse_relative_steps(&mut steps)?;
            return Ok(Expr::Path(PathExpr {
                start: PathStart::Expr(Box::new(filtered)),
                steps,
            }));
        }

        let mut steps = Vec::new();
        let start = match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                if self.starts_step() {
                    steps.push(self.parse_step()?);
                }
                PathStart::Root
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                steps.push(Step::descendant_or_self_node());
                steps.push(self.parse_step()?);
                PathStart::Root
            }
            _ => {
                steps.push(self.parse_step()?);
                PathStart::Context
            }
        };
        if matches!(start, PathStart::Root) && steps.is_empty() {
            return Ok(Expr::Path(PathExpr { start, steps }));
        }
        self.parse_relative_steps(&mut steps)?;
        Ok(Expr::Path(PathExpr { start, steps }))
    }

    /// Consumes `(/ step | // step)*`.
    fn parse_relative_steps(&mut self, steps: &mut Vec<Step>) -> XvResult<()> {
        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.pos += 1;
                }
                Some(Token::DoubleSlash) => {
                    self.pos += 1;
                    steps.push(Step::descendant_or_self_node());
                }
                _ => return Ok(()),
            }
            steps.push(self.parse_step()?);
        }
    }

    fn parse_step(&mut self) -> XvResult<Step> {
        if self.eat(&Token::Dot) {
            return Ok(Step {
                axis: Axis::SelfAxis,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }

        let axis = if self.eat(&Token::At) {
            Axis::Attribute
        } else if let (Some(Token::Name(name)), Some(Token::ColonColon)) =
            (self.peek(), self.peek_at(1))
        {
            let name = name.clone();
            self.pos += 2;
            if name == "namespace" {
                return Err(XvError::new(
                    "xslt.compile.unsupported",
                    format!("the namespace axis is not supported in `{}`", self.source),
                ));
            }
            Axis::from_name(&name)
                .ok_or_else(|| self.error(&format!("unknown axis `{name}`")))?
        } else {
            Axis::Child
        };

        let test = self.parse_node_test()?;
        let mut predicates = Vec::new();
        while self.peek() == Some(&Token::LBracket) {
            predicates.push(self.parse_predicate()?);
        }
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_node_test(&mut self) -> XvResult<NodeTest> {
        match self.peek().cloned() {
            Some(Token::Star) => {
                self.pos += 1;
                Ok(NodeTest::Any)
            }
            Some(Token::Name(name)) => {
                self.pos += 1;
                if is_node_type(&name) && self.peek() == Some(&Token::LParen) {
                    return self.parse_node_type_test(&name);
                }
                self.resolve_name_test(&name)
            }
            other => Err(self.error(&format!("expected a node test, found {other:?}"))),
        }
    }

    fn parse_node_type_test(&mut self, name: &str) -> XvResult<NodeTest> {
        self.expect(&Token::LParen)?;
        let test = match name {
            "node" => NodeTest::Node,
            "text" => NodeTest::Text,
            "comment" => NodeTest::Comment,
            _ => {
                let target = match self.peek().cloned() {
                    Some(Token::Literal(target)) => {
                        self.pos += 1;
                        Some(target)
                    }
                    _ => None,
                };
                NodeTest::ProcessingInstruction(target)
            }
        };
        self.expect(&Token::RParen)?;
        Ok(test)
    }

    fn resolve_name_test(&self, name: &str) -> XvResult<NodeTest> {
        let Some((prefix, local)) = name.split_once(':') else {
            return Ok(NodeTest::Name {
                ns: None,
                local: name.to_owned(),
            });
        };
        let uri = self.resolve_prefix(prefix)?;
        if local == "*" {
            Ok(NodeTest::NamespaceWildcard(uri))
        } else {
            Ok(NodeTest::Name {
                ns: Some(uri),
                local: local.to_owned(),
            })
        }
    }

    fn resolve_prefix(&self, prefix: &str) -> XvResult<String> {
        self.resolver.resolve(prefix).ok_or_else(|| {
            XvError::new(
                "xslt.xpath.unbound_prefix",
                format!("prefix `{prefix}` is not declared for `{}`", self.source),
            )
        })
    }

    fn parse_predicate(&mut self) -> XvResult<Expr> {
        self.expect(&Token::LBracket)?;
        let expr = self.parse_or()?;
        self.expect(&Token::RBracket)?;
        Ok(expr)
    }

    fn parse_primary(&mut self) -> XvResult<Expr> {
        match self.peek().cloned() {
            Some(Token::Variable(name)) => {
                self.pos += 1;
                Ok(Expr::Variable(name))
            }
            Some(Token::Literal(value)) => {
                self.pos += 1;
                Ok(Expr::Literal(value))
            }
            Some(Token::Number(value)) => {
                self.pos += 1;
                Ok(Expr::Number(value))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Name(name)) => self.parse_function_call(&name),
            other => Err(self.error(&format!("expected an expression, found {other:?}"))),
        }
    }

    fn parse_function_call(&mut self, name: &str) -> XvResult<Expr> {
        let function = Function::from_name(name).ok_or_else(|| {
            XvError::new(
                "xslt.xpath.unknown_function",
                format!("function `{name}()` is not supported in `{}`", self.source),
            )
        })?;
        self.pos += 1;
        self.expect(&Token::LParen)?;

        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(&Token::Comma)?;
            }
        }

        let (min, max) = function.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            return Err(XvError::new(
                "xslt.xpath.arity",
                format!(
                    "`{name}()` called with {} argument(s) in `{}`",
                    args.len(),
                    self.source
                ),
            ));
        }
        Ok(Expr::Function(function, args))
    }
}

fn is_node_type(name: &str) -> bool {
    matches!(
        name,
        "node" | "text" | "comment" | "processing-instruction"
    )
}

#[cfg(test)]
mod tests {
    use super::ArithOp;
    use super::Axis;
    use super::Expr;
    use super::Function;
    use super::NodeTest;
    use super::PathStart;
    use super::parse_expr;

    fn no_prefixes(_: &str) -> Option<String> {
        None
    }

    fn parse(source: &str) -> Expr {
        match parse_expr(source, &no_prefixes) {
            Ok(expr) => expr,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn abbreviated_descendant_path() {
        let Expr::Path(path) = parse("//h2[@id]") else {
            panic!("expected a path");
        };
        assert_eq!(path.start, PathStart::Root);
        assert_eq!(path.steps.len(), 2);
        assert_eq!(path.steps[0].axis, Axis::DescendantOrSelf);
        assert_eq!(path.steps[1].predicates.len(), 1);
    }

    #[test]
    fn arithmetic_precedence() {
        let expr = parse("1 + 2 * 3");
        let Expr::Arith(ArithOp::Add, _, right) = expr else {
            panic!("expected addition at the root");
        };
        assert!(matches!(*right, Expr::Arith(ArithOp::Mul, _, _)));
    }

    #[test]
    fn filter_expression_with_trailing_steps() {
        let Expr::Path(path) = parse("$rows[1]/td") else {
            panic!("expected a path");
        };
        assert!(matches!(path.start, PathStart::Expr(_)));
        assert_eq!(path.steps[0].axis, Axis::Child);
    }

    #[test]
    fn prefixes_resolve_through_the_resolver() {
        let resolver = |prefix: &str| (prefix == "a").then(|| "urn:a".to_owned());
        let expr = match parse_expr("a:item/a:*", &resolver) {
            Ok(expr) => expr,
            Err(error) => panic!("{error}"),
        };
        let Expr::Path(path) = expr else {
            panic!("expected a path");
        };
        assert_eq!(
            path.steps[0].test,
            NodeTest::Name {
                ns: Some("urn:a".to_owned()),
                local: "item".to_owned()
            }
        );
        assert_eq!(path.steps[1].test, NodeTest::NamespaceWildcard("urn:a".to_owned()));

        let unbound = parse_expr("b:item", &resolver);
        if let Err(error) = unbound {
            assert_eq!(error.code, "xslt.xpath.unbound_prefix");
        } else {
            panic!("expected unbound prefix error");
        }
    }

    #[test]
    fn functions_are_checked() {
        assert!(matches!(
            parse("count(//row)"),
            Expr::Function(Function::Count, _)
        ));
        if let Err(error) = parse_expr("document('x')", &no_prefixes) {
            assert_eq!(error.code, "xslt.xpath.unknown_function");
        } else {
            panic!("expected unknown function error");
        }
        if let Err(error) = parse_expr("substring('x')", &no_prefixes) {
            assert_eq!(error.code, "xslt.xpath.arity");
        } else {
            panic!("expected arity error");
        }
    }

    #[test]
    fn root_alone_and_node_type_tests() {
        let Expr::Path(path) = parse("/") else {
            panic!("expected a path");
        };
        assert!(path.steps.is_empty());

        let Expr::Union(left, _) = parse("text() | comment()") else {
            panic!("expected a union");
        };
        let Expr::Path(left) = *left else {
            panic!("expected a path");
        };
        assert_eq!(left.steps[0].test, NodeTest::Text);
    }
}
