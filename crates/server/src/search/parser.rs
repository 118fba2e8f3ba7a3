// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recursive-descent parser over the token stream from [`super::token`].
//!
//! Grammar:
//! ```text
//! expr        := and_expr ( '|' and_expr )*
//! and_expr    := unary ( unary )*
//! unary       := '-'? atom
//! atom        := group | field_match | term
//! group       := '(' expr ')'
//! field_match := ( '$' NAME | '#' NAME )? op? term
//! term        := QUOTED | REGEX | FUZZY | WORD
//! ```
//!
//! Parsing never aborts on a malformed substring: unmatched parens, dangling
//! operators, and empty field matches become `Error` nodes in place, and the
//! parser picks back up right after the offending token.

use super::ast::{AstNode, SearchNode, SearchType};
use super::token::{tokenize, Op, Span, Token, TokenKind};

/// Parse `input` into an AST. Always succeeds — malformed input surfaces as
/// `Error` nodes embedded in the tree.
pub fn parse(input: &str) -> AstNode {
    let tokens: Vec<Token> =
        tokenize(input).into_iter().filter(|t| t.kind != TokenKind::Ws).collect();
    if tokens.is_empty() {
        return AstNode::And(Vec::new(), Span::new(0, input.len()));
    }
    let mut p = Parser { tokens, pos: 0 };
    let (node, _) = p.parse_expr(0);
    node
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self, pos: usize) -> Option<&Token> {
        self.tokens.get(pos)
    }

    /// `expr := and_expr ('|' and_expr)*`. Returns the node and the position
    /// right after the last token it consumed.
    fn parse_expr(&mut self, start: usize) -> (AstNode, usize) {
        let (first, mut pos) = self.parse_and(start);
        let mut children = vec![first];

        while let Some(Token { kind: TokenKind::Pipe, .. }) = self.peek(pos) {
            pos += 1;
            let (next, after) = self.parse_and(pos);
            children.push(next);
            pos = after;
        }

        if children.len() == 1 {
            (children.into_iter().next().unwrap(), pos)
        } else {
            let span = Span::new(children[0].span().start, children.last().unwrap().span().end);
            (AstNode::Or(children, span), pos)
        }
    }

    /// `and_expr := unary+`. Stops at `|`, `)`, or end of input.
    fn parse_and(&mut self, start: usize) -> (AstNode, usize) {
        let mut pos = start;
        let mut children = Vec::new();

        loop {
            match self.peek(pos) {
                None => break,
                Some(Token { kind: TokenKind::Pipe, .. }) => break,
                Some(Token { kind: TokenKind::RParen, .. }) => break,
                Some(Token { kind: TokenKind::LParen, span, .. }) => {
                    let open_span = *span;
                    // Speculatively parse the contents as a full expr and
                    // check for the matching close-paren.
                    let (inner, after_inner) = self.parse_expr(pos + 1);
                    match self.peek(after_inner) {
                        Some(Token { kind: TokenKind::RParen, span: close_span, .. }) => {
                            let group_span = Span::new(open_span.start, close_span.end);
                            children.push(AstNode::Group(Box::new(inner), group_span));
                            pos = after_inner + 1;
                        }
                        _ => {
                            // No matching ')': the '(' alone is an error node;
                            // re-parse everything after it at this same level
                            // (i.e. not nested inside a group).
                            children.push(AstNode::Error {
                                message: "unclosed group".to_owned(),
                                span: open_span,
                            });
                            pos += 1;
                        }
                    }
                }
                Some(_) => {
                    let (node, after) = self.parse_unary(pos);
                    children.push(node);
                    pos = after;
                }
            }
        }

        if children.is_empty() {
            let at = self.peek(start).map(|t| t.span).unwrap_or(Span::new(0, 0));
            return (AstNode::And(Vec::new(), at), start);
        }
        if children.len() == 1 {
            return (children.into_iter().next().unwrap(), pos);
        }
        let span = Span::new(children[0].span().start, children.last().unwrap().span().end);
        (AstNode::And(children, span), pos)
    }

    /// `unary := '-'? atom`.
    fn parse_unary(&mut self, pos: usize) -> (AstNode, usize) {
        if let Some(Token { kind: TokenKind::Not, span: not_span }) = self.peek(pos) {
            let not_span = *not_span;
            let (atom, after) = self.parse_atom(pos + 1);
            let combined = Span::new(not_span.start, atom.span().end);
            let negated = match atom {
                AstNode::Search(mut s) => {
                    s.is_not = true;
                    s.span = combined;
                    AstNode::Search(s)
                }
                other => AstNode::Not(Box::new(other), combined),
            };
            return (negated, after);
        }
        self.parse_atom(pos)
    }

    /// `atom := field_match | term` (groups are handled in `parse_and`).
    fn parse_atom(&mut self, pos: usize) -> (AstNode, usize) {
        match self.peek(pos) {
            Some(Token { kind: TokenKind::Field(name), span }) => {
                let field = name.clone();
                let field_span = *span;
                self.parse_field_match(Some(field), field_span, pos + 1)
            }
            Some(Token { kind: TokenKind::Tag(name), span }) => {
                (
                    AstNode::Search(SearchNode {
                        search_type: SearchType::Tag,
                        term: name.clone(),
                        field: None,
                        op: None,
                        is_not: false,
                        regex_case_sensitive: false,
                        span: *span,
                    }),
                    pos + 1,
                )
            }
            Some(Token { kind: TokenKind::Op(_), span }) => {
                let span = *span;
                (AstNode::Error { message: "dangling operator".to_owned(), span }, pos + 1)
            }
            Some(_) => self.parse_field_match(None, self.peek(pos).unwrap().span, pos),
            None => (
                AstNode::Error { message: "expected a term".to_owned(), span: Span::new(0, 0) },
                pos,
            ),
        }
    }

    /// `field_match := ('$' NAME | '#' NAME | '')? op? term`, entered either
    /// right after a consumed `$name` token (`prefix = Some(name)`) or at a
    /// bare term (`prefix = None`).
    fn parse_field_match(
        &mut self,
        prefix: Option<String>,
        prefix_span: Span,
        pos: usize,
    ) -> (AstNode, usize) {
        let mut pos = pos;
        let mut op = None;
        if let Some(Token { kind: TokenKind::Op(o), .. }) = self.peek(pos) {
            op = Some(*o);
            pos += 1;
        }

        match self.peek(pos) {
            Some(tok) if is_term_token(&tok.kind) => {
                let (search_type, term, case_sensitive) = term_of(&tok.kind);
                let span = Span::new(prefix_span.start, tok.span.end);
                (
                    AstNode::Search(SearchNode {
                        search_type,
                        term,
                        field: prefix,
                        op,
                        is_not: false,
                        regex_case_sensitive: case_sensitive,
                        span,
                    }),
                    pos + 1,
                )
            }
            _ if prefix.is_some() => {
                // `$field` with no following term: presence check.
                (
                    AstNode::Search(SearchNode {
                        search_type: SearchType::Presence,
                        term: String::new(),
                        field: prefix,
                        op,
                        is_not: false,
                        regex_case_sensitive: false,
                        span: prefix_span,
                    }),
                    pos,
                )
            }
            _ => (
                AstNode::Error { message: "expected a term".to_owned(), span: prefix_span },
                pos + 1,
            ),
        }
    }
}

fn is_term_token(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Word(_) | TokenKind::Quoted { .. } | TokenKind::Regex { .. } | TokenKind::Fuzzy(_))
}

fn term_of(kind: &TokenKind) -> (SearchType, String, bool) {
    match kind {
        TokenKind::Word(w) => (SearchType::Substr, w.clone(), false),
        TokenKind::Quoted { text, .. } => (SearchType::Exact, text.clone(), false),
        TokenKind::Regex { pattern, case_sensitive, .. } => {
            (SearchType::Regex, pattern.clone(), *case_sensitive)
        }
        TokenKind::Fuzzy(text) => (SearchType::Fuzzy, text.clone(), false),
        _ => unreachable!("is_term_token guards this"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_word_is_substr_search() {
        let ast = parse("hello");
        match ast {
            AstNode::Search(n) => {
                assert_eq!(n.search_type, SearchType::Substr);
                assert_eq!(n.term, "hello");
                assert_eq!(n.span, Span::new(0, 5));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn two_words_become_and() {
        let ast = parse("hello world");
        match ast {
            AstNode::And(children, _) => assert_eq!(children.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pipe_becomes_or() {
        let ast = parse("hello | world");
        match ast {
            AstNode::Or(children, _) => assert_eq!(children.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn leading_dash_negates_search_node() {
        let ast = parse("-world");
        match ast {
            AstNode::Search(n) => {
                assert!(n.is_not);
                assert_eq!(n.term, "world");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn matched_group_wraps_inner_expr() {
        let ast = parse("(hello world)");
        match ast {
            AstNode::Group(inner, span) => {
                assert_eq!(span, Span::new(0, 13));
                assert!(matches!(*inner, AstNode::And(_, _)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unclosed_group_yields_error_plus_siblings() {
        let ast = parse("(hello world");
        let AstNode::And(children, _) = ast else { panic!("expected And at top level") };
        assert_eq!(children.len(), 3);
        let AstNode::Error { message, span } = &children[0] else { panic!("expected error node") };
        assert_eq!(message, "unclosed group");
        assert_eq!(*span, Span::new(0, 1));
        let AstNode::Search(hello) = &children[1] else { panic!("expected search") };
        assert_eq!(hello.span, Span::new(1, 6));
        let AstNode::Search(world) = &children[2] else { panic!("expected search") };
        assert_eq!(world.span, Span::new(7, 12));
    }

    #[test]
    fn field_with_operator_and_term() {
        let ast = parse("$goid:>=10");
        match ast {
            AstNode::Search(n) => {
                assert_eq!(n.field.as_deref(), Some("goid"));
                assert_eq!(n.op, Some(Op::Ge));
                assert_eq!(n.term, "10");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bare_field_is_presence_check() {
        let ast = parse("$name");
        match ast {
            AstNode::Search(n) => {
                assert_eq!(n.search_type, SearchType::Presence);
                assert_eq!(n.field.as_deref(), Some("name"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn dangling_operator_is_error_node() {
        let ast = parse(":>=10");
        let AstNode::And(children, _) = ast else { panic!("expected And") };
        assert!(matches!(children[0], AstNode::Error { .. }));
    }

    #[test]
    fn empty_query_is_empty_and() {
        let ast = parse("");
        assert!(matches!(ast, AstNode::And(children, _) if children.is_empty()));
    }
}
