// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AST node kinds produced by [`super::parser::parse`].
//!
//! `Error` is a tree node, not an out-of-band exception: a query with a
//! syntax problem still produces a usable predicate for the rest of the
//! tree.

use super::token::{Op, Span};

/// What kind of comparison a `search` node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    Exact,
    Substr,
    Regex,
    Fuzzy,
    Tag,
    Presence,
}

/// A leaf term: `$field:value`, `#tag`, a bare word, a quoted phrase, a
/// regex, or a fuzzy match.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchNode {
    pub search_type: SearchType,
    pub term: String,
    pub field: Option<String>,
    pub op: Option<Op>,
    pub is_not: bool,
    pub regex_case_sensitive: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Search(SearchNode),
    And(Vec<AstNode>, Span),
    Or(Vec<AstNode>, Span),
    Group(Box<AstNode>, Span),
    Not(Box<AstNode>, Span),
    Error { message: String, span: Span },
}

impl AstNode {
    pub fn span(&self) -> Span {
        match self {
            Self::Search(n) => n.span,
            Self::And(_, s) | Self::Or(_, s) | Self::Not(_, s) | Self::Error { span: s, .. } => *s,
            Self::Group(_, s) => *s,
        }
    }

    /// Collect every `Error` node's span and message, depth-first.
    pub fn error_spans(&self) -> Vec<(Span, String)> {
        let mut out = Vec::new();
        self.collect_errors(&mut out);
        out
    }

    fn collect_errors(&self, out: &mut Vec<(Span, String)>) {
        match self {
            Self::Error { message, span } => out.push((*span, message.clone())),
            Self::And(children, _) | Self::Or(children, _) => {
                for c in children {
                    c.collect_errors(out);
                }
            }
            Self::Group(child, _) | Self::Not(child, _) => child.collect_errors(out),
            Self::Search(_) => {}
        }
    }
}
