// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compiles a parsed AST into a predicate over a [`SearchObject`] and
//! applies it to a sequence

use super::ast::{AstNode, SearchNode, SearchType};
use super::token::{Op, Span};

/// A thing the search DSL can be evaluated against: a log line, a parsed
/// goroutine, or a combined watch sample.
pub trait SearchObject {
    fn get_field(&self, name: &str) -> Option<String>;
    fn get_all_text(&self) -> String;
    fn get_tags(&self) -> Vec<String>;
    fn get_numeric_field(&self, name: &str) -> Option<f64>;
}

/// A query compiled once and evaluated against many objects.
pub struct CompiledSearch {
    ast: AstNode,
}

/// Result of applying a compiled search to a sequence of objects.
pub struct SearchResult<I> {
    pub matched: Vec<I>,
    pub searched_count: usize,
    pub total_count: usize,
    pub error_spans: Vec<(Span, String)>,
}

impl CompiledSearch {
    pub fn compile(query: &str) -> Self {
        Self { ast: super::parser::parse(query) }
    }

    pub fn error_spans(&self) -> Vec<(Span, String)> {
        self.ast.error_spans()
    }

    pub fn evaluate(&self, obj: &dyn SearchObject) -> bool {
        evaluate(&self.ast, obj)
    }

    /// Apply the compiled query to `items`, returning the matching subset in
    /// original order along with counters for the RPC response shape
    /// (`searchedcount`/`totalcount`).
    pub fn apply<'a, I, F>(&self, items: &'a [I], to_object: F) -> SearchResult<&'a I>
    where
        F: Fn(&'a I) -> Box<dyn SearchObject + 'a>,
    {
        let total_count = items.len();
        let mut matched = Vec::new();
        let mut searched_count = 0;
        for item in items {
            searched_count += 1;
            let obj = to_object(item);
            if evaluate(&self.ast, obj.as_ref()) {
                matched.push(item);
            }
        }
        SearchResult { matched, searched_count, total_count, error_spans: self.error_spans() }
    }
}

fn evaluate(node: &AstNode, obj: &dyn SearchObject) -> bool {
    match node {
        AstNode::Search(n) => evaluate_search(n, obj),
        AstNode::And(children, _) => children.iter().all(|c| evaluate(c, obj)),
        AstNode::Or(children, _) => children.iter().any(|c| evaluate(c, obj)),
        AstNode::Group(child, _) => evaluate(child, obj),
        AstNode::Not(child, _) => !evaluate(child, obj),
        AstNode::Error { .. } => false,
    }
}

fn evaluate_search(node: &SearchNode, obj: &dyn SearchObject) -> bool {
    let result = match node.search_type {
        SearchType::Tag => obj.get_tags().iter().any(|t| t == &node.term),
        SearchType::Presence => match &node.field {
            Some(f) => obj.get_field(f).is_some_and(|v| !v.is_empty()),
            None => false,
        },
        _ => {
            let haystack = match &node.field {
                Some(f) => obj.get_field(f).unwrap_or_default(),
                None => obj.get_all_text(),
            };
            match node.op {
                Some(op) => evaluate_op(op, &haystack, &node.term, node.field.as_deref(), obj),
                None => evaluate_term(node, &haystack),
            }
        }
    };
    if node.is_not {
        !result
    } else {
        result
    }
}

fn evaluate_term(node: &SearchNode, haystack: &str) -> bool {
    match node.search_type {
        SearchType::Exact => haystack == node.term,
        SearchType::Substr => haystack.to_lowercase().contains(&node.term.to_lowercase()),
        SearchType::Regex => regex_is_match(&node.term, node.regex_case_sensitive, haystack),
        SearchType::Fuzzy => fuzzy_is_match(&node.term, haystack),
        SearchType::Tag | SearchType::Presence => false,
    }
}

/// Comparison operators (`:`, `:>`, `:>=`, `:<`, `:<=`, `:!=`) apply
/// numerically when both sides parse as numbers, else fall back to string
/// equality/inequality.
fn evaluate_op(op: Op, haystack: &str, term: &str, field: Option<&str>, obj: &dyn SearchObject) -> bool {
    let numeric_cmp = field
        .and_then(|f| obj.get_numeric_field(f))
        .zip(term.parse::<f64>().ok())
        .map(|(lhs, rhs)| match op {
            Op::Eq => (lhs - rhs).abs() < f64::EPSILON,
            Op::Ne => (lhs - rhs).abs() >= f64::EPSILON,
            Op::Gt => lhs > rhs,
            Op::Ge => lhs >= rhs,
            Op::Lt => lhs < rhs,
            Op::Le => lhs <= rhs,
        });

    if let Some(result) = numeric_cmp {
        return result;
    }

    match op {
        Op::Eq => haystack == term,
        Op::Ne => haystack != term,
        // Ordering on non-numeric fields falls back to lexicographic compare.
        Op::Gt => haystack > term,
        Op::Ge => haystack >= term,
        Op::Lt => haystack < term,
        Op::Le => haystack <= term,
    }
}

fn regex_is_match(pattern: &str, case_sensitive: bool, haystack: &str) -> bool {
    let built = if case_sensitive {
        regex::Regex::new(pattern)
    } else {
        regex::RegexBuilder::new(pattern).case_insensitive(true).build()
    };
    match built {
        Ok(re) => re.is_match(haystack),
        Err(_) => false,
    }
}

/// Simple subsequence-based fuzzy match: every character of `term` (in
/// order, case-insensitive) must appear somewhere in `haystack`.
fn fuzzy_is_match(term: &str, haystack: &str) -> bool {
    let haystack = haystack.to_lowercase();
    let mut hay_chars = haystack.chars();
    term.to_lowercase().chars().all(|needle_ch| hay_chars.any(|h| h == needle_ch))
}
