//! Template match patterns.

use crate::eval::EvalEnv;
use crate::eval::apply_predicate;
use crate::eval::axis_nodes;
use crate::eval::default_priority;
use crate::eval::test_matches;
use crate::value::XNode;
use crate::xpath::Axis;
use crate::xpath::Expr;
use crate::xpath::NodeTest;
use crate::xpath::PathStart;
use crate::xpath::PrefixResolver;
use crate::xpath::Step;
use crate::xpath::parse_expr;
use std::iter::successors;
use xv_core::XvError;
use xv_core::XvResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Separator {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PatternStep {
    pub step: Step,
    /// Relation to the step on the left, or to the root for the first step.
    pub separator: Separator,
}

/// One `|`-separated alternative of a pattern.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PatternPath {
    pub absolute: bool,
    pub steps: Vec<PatternStep>,
}

impl PatternPath {
    pub(crate) fn default_priority(&self) -> f64 {
        match self.steps.as_slice() {
            [only]
                if !self.absolute
                    && only.separator == Separator::Child
                    && only.step.predicates.is_empty() =>
            {
                default_priority(&only.step.test)
            }
            _ => 0.5,
        }
    }

    pub(crate) fn matches<'a, 'i: 'a>(
        &self,
        node: XNode<'a, 'i>,
        env: &EvalEnv<'_, 'a, 'i>,
    ) -> XvResult<bool> {
        let Some(last) = self.steps.len().checked_sub(1) else {
            return Ok(self.absolute && is_root(node));
        };
        self.matches_at(last, node, env)
    }

    fn matches_at<'a, 'i: 'a>(
        &self,
        index: usize,
        node: XNode<'a, 'i>,
        env: &EvalEnv<'_, 'a, 'i>,
    ) -> XvResult<bool> {
        let pattern_step = &self.steps[index];
        if !step_matches(&pattern_step.step, node, env)? {
            return Ok(false);
        }

        if index == 0 {
            if !self.absolute {
                return Ok(true);
            }
            return Ok(match pattern_step.separator {
                Separator::Child => node.parent().is_some_and(is_root),
                Separator::Descendant => true,
            });
        }

        match pattern_step.separator {
            Separator::Child => match node.parent() {
                Some(parent) => self.matches_at(index - 1, parent, env),
                None => Ok(false),
            },
            Separator::Descendant => {
                for ancestor in successors(node.parent(), XNode::parent) {
                    if self.matches_at(index - 1, ancestor, env)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

fn is_root(node: XNode<'_, '_>) -> bool {
    node.as_node().is_some_and(|node| node.parent().is_none())
}

/// Node test plus predicates, evaluated among the node's siblings on the same axis.
fn step_matches<'a, 'i: 'a>(
    step: &Step,
    node: XNode<'a, 'i>,
    env: &EvalEnv<'_, 'a, 'i>,
) -> XvResult<bool> {
    if node.is_attribute() != (step.axis == Axis::Attribute) {
        return Ok(false);
    }
    if !test_matches(&step.test, node, step.axis) {
        return Ok(false);
    }
    let Some(parent) = node.parent() else {
        return Ok(false);
    };
    if step.predicates.is_empty() {
        return Ok(true);
    }

    let mut candidates: Vec<XNode<'a, 'i>> = axis_nodes(parent, step.axis, env.space)
        .into_iter()
        .filter(|candidate| test_matches(&step.test, *candidate, step.axis))
        .collect();
    for predicate in &step.predicates {
        candidates = apply_predicate(candidates, predicate, env)?;
    }
    Ok(candidates.contains(&node))
}

pub(crate) fn parse_pattern(source: &str, resolver: &dyn PrefixResolver) -> XvResult<Vec<PatternPath>> {
    let expr = parse_expr(source, resolver)?;
    let mut alternatives = Vec::new();
    collect_alternatives(source, expr, &mut alternatives)?;
    Ok(alternatives)
}

fn collect_alternatives(source: &str, expr: Expr, out: &mut Vec<PatternPath>) -> XvResult<()> {
    match expr {
        Expr::Union(left, right) => {
            collect_alternatives(source, *left, out)?;
            collect_alternatives(source, *right, out)
        }
        Expr::Path(path) => {
            let absolute = match path.start {
                PathStart::Root => true,
                PathStart::Context => false,
                PathStart::Expr(_) => return Err(invalid_pattern(source)),
            };
            let mut steps = Vec::with_capacity(path.steps.len());
            let mut separator = Separator::Child;
            for step in path.steps {
                if is_descendant_marker(&step) {
                    separator = Separator::Descendant;
                    continue;
                }
                if !matches!(step.axis, Axis::Child | Axis::Attribute) {
                    return Err(invalid_pattern(source));
                }
                steps.push(PatternStep { step, separator });
                separator = Separator::Child;
            }
            if separator == Separator::Descendant {
                return Err(invalid_pattern(source));
            }
            out.push(PatternPath { absolute, steps });
            Ok(())
        }
        _ => Err(invalid_pattern(source)),
    }
}

fn is_descendant_marker(step: &Step) -> bool {
    step.axis == Axis::DescendantOrSelf && step.test == NodeTest::Node && step.predicates.is_empty()
}

fn invalid_pattern(source: &str) -> XvError {
    XvError::new(
        "xslt.compile.invalid_pattern",
        format!("`{source}` is not a valid match pattern"),
    )
}

#[cfg(test)]
mod tests {
    use super::PatternPath;
    use super::parse_pattern;
    use crate::eval::EvalEnv;
    use crate::eval::SpaceRules;
    use crate::value::XNode;
    use roxmltree::Document;

    fn pattern(source: &str) -> Vec<PatternPath> {
        let resolver = |_: &str| -> Option<String> { None };
        match parse_pattern(source, &resolver) {
            Ok(alternatives) => alternatives,
            Err(error) => panic!("{error}"),
        }
    }

    fn matching_texts(source: &str, xml: &str) -> Vec<String> {
        let doc = match Document::parse(xml) {
            Ok(doc) => doc,
            Err(error) => panic!("{error}"),
        };
        let alternatives = pattern(source);
        let space = SpaceRules::default();
        let root = XNode::Node(doc.root());
        let env = EvalEnv {
            locals: &[],
            globals: &[],
            space: &space,
            current: root,
        };
        let mut texts = Vec::new();
        for node in doc.descendants().filter(|node| node.is_element()) {
            let node = XNode::Node(node);
            let matched = alternatives.iter().any(|alternative| {
                match alternative.matches(node, &env) {
                    Ok(value) => value,
                    Err(error) => panic!("{error}"),
                }
            });
            if matched {
                texts.push(node.string_value());
            }
        }
        texts
    }

    #[test]
    fn default_priorities() {
        assert_eq!(pattern("row")[0].default_priority(), 0.0);
        assert_eq!(pattern("*")[0].default_priority(), -0.5);
        assert_eq!(pattern("@*")[0].default_priority(), -0.5);
        assert_eq!(pattern("table/row")[0].default_priority(), 0.5);
        assert_eq!(pattern("row[1]")[0].default_priority(), 0.5);
        assert_eq!(pattern("/")[0].default_priority(), 0.5);
        assert_eq!(pattern("a | b").len(), 2);
    }

    #[test]
    fn matches_parent_and_ancestor_chains() {
        let xml = "<r><t><row>a</row></t><row>b</row><x><y><row>c</row></y></x></r>";
        assert_eq!(matching_texts("t/row", xml), vec!["a"]);
        assert_eq!(matching_texts("x//row", xml), vec!["c"]);
        assert_eq!(matching_texts("/r/row", xml), vec!["b"]);
        assert_eq!(matching_texts("//row", xml), vec!["a", "b", "c"]);
    }

    #[test]
    fn predicates_count_siblings() {
        let xml = "<r><row>a</row><skip/><row>b</row></r>";
        assert_eq!(matching_texts("row[2]", xml), vec!["b"]);
        assert_eq!(matching_texts("row[last()]", xml), vec!["b"]);
    }

    #[test]
    fn rejects_non_patterns() {
        let resolver = |_: &str| -> Option<String> { None };
        for source in ["1 + 2", "ancestor::row", "$var"] {
            if let Err(error) = parse_pattern(source, &resolver) {
                assert_eq!(error.code, "xslt.compile.invalid_pattern");
            } else {
                panic!("`{source}` should be rejected");
            }
        }
    }
}
