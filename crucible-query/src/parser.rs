//! Hand-rolled recursive-descent parser over the token stream `lexer.rs`
//! produces (spec §4.4). Operator precedence is `not()` > atom > `AND` >
//! `OR`; `clauses` is left-associative at each level.

use crate::ast::{Expression, FulltextOp, Op, OrderByClause, Value};
use crate::error::ParseError;
use crate::lexer::{Lexer, Span, Token, TokenKind};
use crucible_core::AttributeType;

const NUMERIC_PROPS: &[&str] = &[
    "labelCount",
    "ownedLabelCount",
    "relationCount",
    "ownedRelationCount",
    "targetRelationCount",
    "attributeCount",
    "ownedAttributeCount",
    "parentCount",
    "childrenCount",
];

const BASIC_PROPS: &[&str] = &["title", "type", "mime", "dateCreated", "dateModified", "content"];

/// Parses a raw query string into an Expression tree. Never panics on
/// malformed input -- every failure path returns a [`ParseError`].
pub fn parse(source: &str) -> Result<Expression, ParseError> {
    let tokens = Lexer::new(source).tokenize();
    let mut parser = Parser::new(tokens);
    parser.parse_query()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    structured_mode: bool,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            structured_mode: false,
        }
    }

    fn parse_query(&mut self) -> Result<Expression, ParseError> {
        if self.current().kind == TokenKind::Hash && !self.adjacent_to_next() {
            self.structured_mode = true;
            self.advance();
        }

        let child = if self.at_query_end() {
            Expression::True
        } else {
            self.parse_or()?
        };

        let mut order_by = Vec::new();
        if self.check(&TokenKind::OrderBy) {
            self.advance();
            loop {
                order_by.push(self.parse_order_spec()?);
                if self.check(&TokenKind::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }

        let mut limit = None;
        if self.check(&TokenKind::Limit) {
            self.advance();
            match &self.current().kind {
                TokenKind::Number(n) if *n >= 0.0 => {
                    limit = Some(*n as usize);
                    self.advance();
                }
                _ => return Err(self.error("expected an integer after 'limit'")),
            }
        }

        if self.current().kind != TokenKind::Eof {
            return Err(self.error("unexpected trailing input"));
        }

        Ok(Expression::OrderByAndLimit {
            child: Box::new(child),
            order_by,
            limit,
        })
    }

    fn at_query_end(&self) -> bool {
        matches!(
            self.current().kind,
            TokenKind::Eof | TokenKind::OrderBy | TokenKind::Limit
        )
    }

    // ---- clauses / precedence ------------------------------------------------

    fn parse_or(&mut self) -> Result<Expression, ParseError> {
        let mut children = vec![self.parse_and()?];
        while self.check(&TokenKind::Or) {
            self.advance();
            children.push(self.parse_and()?);
        }
        Ok(if children.len() == 1 {
            children.into_iter().next().unwrap()
        } else {
            Expression::Or(children)
        })
    }

    fn parse_and(&mut self) -> Result<Expression, ParseError> {
        let mut children = vec![self.parse_clause()?];
        while self.check(&TokenKind::And) {
            self.advance();
            children.push(self.parse_clause()?);
        }
        Ok(if children.len() == 1 {
            children.into_iter().next().unwrap()
        } else {
            Expression::And(children)
        })
    }

    fn parse_clause(&mut self) -> Result<Expression, ParseError> {
        match &self.current().kind {
            TokenKind::Not => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let inner = self.parse_or()?;
                self.expect(&TokenKind::RParen)?;
                Ok(Expression::Not(Box::new(inner)))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Hash => self.parse_label_atom(),
            TokenKind::HashBang => self.parse_negated_label_atom(),
            TokenKind::Tilde => self.parse_relation_atom(false),
            TokenKind::TildeBang => self.parse_relation_atom(true),
            TokenKind::Ident(name) if name == "note" && self.peek_kind(1) == Some(&TokenKind::Dot) => {
                self.parse_property_atom()
            }
            TokenKind::Ident(_) | TokenKind::Str(_) => self.parse_bare_words(),
            _ => Err(self.error("expected a clause")),
        }
    }

    fn parse_bare_words(&mut self) -> Result<Expression, ParseError> {
        if self.structured_mode {
            return Err(self.error("bare words are not allowed after a leading '#'"));
        }
        let mut tokens = Vec::new();
        while let TokenKind::Ident(s) | TokenKind::Str(s) = &self.current().kind {
            tokens.push(s.to_lowercase());
            self.advance();
        }
        Ok(Expression::NoteContentFulltext {
            tokens,
            operator: FulltextOp::ContainsAll,
        })
    }

    // ---- atoms -----------------------------------------------------------

    fn parse_label_atom(&mut self) -> Result<Expression, ParseError> {
        self.expect(&TokenKind::Hash)?;
        let name = self.expect_ident()?;
        match self.try_parse_op_value()? {
            Some((op, value)) => Ok(Expression::LabelComparison { name, op, value }),
            None => Ok(Expression::AttributeExists {
                kind: AttributeType::Label,
                name,
                negated: false,
            }),
        }
    }

    fn parse_negated_label_atom(&mut self) -> Result<Expression, ParseError> {
        self.expect(&TokenKind::HashBang)?;
        let name = self.expect_ident()?;
        Ok(Expression::AttributeExists {
            kind: AttributeType::Label,
            name,
            negated: true,
        })
    }

    fn parse_relation_atom(&mut self, negated_prefix: bool) -> Result<Expression, ParseError> {
        if negated_prefix {
            self.expect(&TokenKind::TildeBang)?;
        } else {
            self.expect(&TokenKind::Tilde)?;
        }
        let name = self.expect_ident()?;

        if negated_prefix {
            return Ok(Expression::AttributeExists {
                kind: AttributeType::Relation,
                name,
                negated: true,
            });
        }

        if self.check(&TokenKind::Dot) {
            self.advance();
            let path = self.parse_prop_path()?;
            let op_value = self.try_parse_op_value()?;
            let mut full_path = vec!["relations".to_string(), name];
            full_path.extend(path);
            return property_path_to_expression(&full_path, op_value, self);
        }

        match self.try_parse_op_value()? {
            Some((op, value)) => Ok(Expression::RelationWhere {
                name,
                sub: Box::new(Expression::PropertyComparison {
                    property: "title".to_string(),
                    op,
                    value,
                }),
            }),
            None => Ok(Expression::AttributeExists {
                kind: AttributeType::Relation,
                name,
                negated: false,
            }),
        }
    }

    fn parse_property_atom(&mut self) -> Result<Expression, ParseError> {
        self.expect_keyword_ident("note")?;
        self.expect(&TokenKind::Dot)?;
        let path = self.parse_prop_path()?;
        let op_value = self.try_parse_op_value()?;
        property_path_to_expression(&path, op_value, self)
    }

    fn parse_prop_path(&mut self) -> Result<Vec<String>, ParseError> {
        let mut segments = vec![self.expect_ident()?];
        while self.check(&TokenKind::Dot) {
            self.advance();
            segments.push(self.expect_ident()?);
        }
        Ok(segments)
    }

    fn try_parse_op_value(&mut self) -> Result<Option<(Op, Value)>, ParseError> {
        let op = match &self.current().kind {
            TokenKind::Eq => Op::Eq,
            TokenKind::NotEq => Op::NotEq,
            TokenKind::ContainsAll => Op::ContainsAll,
            TokenKind::StartsWith => Op::StartsWith,
            TokenKind::EndsWith => Op::EndsWith,
            TokenKind::RegexOp => Op::RegexOp,
            TokenKind::Gt => Op::Gt,
            TokenKind::Ge => Op::Ge,
            TokenKind::Lt => Op::Lt,
            TokenKind::Le => Op::Le,
            _ => return Ok(None),
        };
        self.advance();
        let value = match &self.current().kind {
            TokenKind::Str(s) => Value::Str(s.clone()),
            TokenKind::Ident(s) => Value::Str(s.clone()),
            TokenKind::Number(n) => Value::Num(*n),
            _ => return Err(self.error("expected a value after comparison operator")),
        };
        self.advance();
        Ok(Some((op, value)))
    }

    fn parse_order_spec(&mut self) -> Result<OrderByClause, ParseError> {
        self.expect_keyword_ident("note")?;
        self.expect(&TokenKind::Dot)?;
        let path = self.parse_prop_path()?;
        let descending = if self.check(&TokenKind::Desc) {
            self.advance();
            true
        } else if self.check(&TokenKind::Asc) {
            self.advance();
            false
        } else {
            false
        };
        Ok(OrderByClause {
            property: path.join("."),
            descending,
        })
    }

    // ---- token-stream plumbing --------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self, ahead: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + ahead).map(|t| &t.kind)
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), ParseError> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("expected {kind:?}")))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match &self.current().kind {
            TokenKind::Ident(s) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            _ => Err(self.error("expected an identifier")),
        }
    }

    fn expect_keyword_ident(&mut self, word: &str) -> Result<(), ParseError> {
        match &self.current().kind {
            TokenKind::Ident(s) if s.eq_ignore_ascii_case(word) => {
                self.advance();
                Ok(())
            }
            _ => Err(self.error(&format!("expected '{word}'"))),
        }
    }

    fn adjacent_to_next(&self) -> bool {
        match (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
            (Some(a), Some(b)) => a.span.end == b.span.start,
            _ => false,
        }
    }

    fn error(&self, message: &str) -> ParseError {
        let span: Span = self.current().span;
        ParseError::new(span.start, message.to_string())
    }
}

fn property_path_to_expression(
    segments: &[String],
    op_value: Option<(Op, Value)>,
    parser: &Parser,
) -> Result<Expression, ParseError> {
    if segments.is_empty() {
        return Err(parser.error("expected a property path after 'note.'"));
    }

    if segments.len() == 1 {
        let prop = segments[0].as_str();
        if NUMERIC_PROPS.contains(&prop) || BASIC_PROPS.contains(&prop) {
            let (op, value) = op_value
                .ok_or_else(|| parser.error(&format!("'note.{prop}' requires a comparison operator")))?;
            return Ok(Expression::PropertyComparison {
                property: prop.to_string(),
                op,
                value,
            });
        }
        return Err(parser.error(&format!("unknown property 'note.{prop}'")));
    }

    match segments[0].as_str() {
        "labels" if segments.len() == 2 => Ok(match op_value {
            Some((op, value)) => Expression::LabelComparison {
                name: segments[1].clone(),
                op,
                value,
            },
            None => Expression::AttributeExists {
                kind: AttributeType::Label,
                name: segments[1].clone(),
                negated: false,
            },
        }),
        "relations" => {
            let name = segments[1].clone();
            if segments.len() == 2 {
                Ok(match op_value {
                    Some((op, value)) => Expression::RelationWhere {
                        name,
                        sub: Box::new(Expression::PropertyComparison {
                            property: "title".to_string(),
                            op,
                            value,
                        }),
                    },
                    None => Expression::AttributeExists {
                        kind: AttributeType::Relation,
                        name,
                        negated: false,
                    },
                })
            } else {
                let inner = property_path_to_expression(&segments[2..], op_value, parser)?;
                Ok(Expression::RelationWhere {
                    name,
                    sub: Box::new(inner),
                })
            }
        }
        "parents" => {
            let inner = property_path_to_expression(&segments[1..], op_value, parser)?;
            Ok(Expression::AnyParent(Box::new(inner)))
        }
        "children" => {
            let inner = property_path_to_expression(&segments[1..], op_value, parser)?;
            Ok(Expression::AnyChild(Box::new(inner)))
        }
        "ancestors" => {
            let inner = property_path_to_expression(&segments[1..], op_value, parser)?;
            Ok(Expression::AnyAncestor(Box::new(inner)))
        }
        other => Err(parser.error(&format!("unsupported property path segment '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_bare_words_as_fulltext() {
        let expr = parse("search term").unwrap();
        match expr {
            Expression::OrderByAndLimit { child, .. } => match *child {
                Expression::NoteContentFulltext { tokens, operator } => {
                    assert_eq!(tokens, vec!["search".to_string(), "term".to_string()]);
                    assert_eq!(operator, FulltextOp::ContainsAll);
                }
                other => panic!("unexpected child: {other:?}"),
            },
            other => panic!("unexpected root: {other:?}"),
        }
    }

    #[test]
    fn parses_label_comparison() {
        let expr = parse("#author = Tolkien").unwrap();
        let Expression::OrderByAndLimit { child, .. } = expr else {
            panic!("expected wrapper")
        };
        assert_eq!(
            *child,
            Expression::LabelComparison {
                name: "author".to_string(),
                op: Op::Eq,
                value: Value::Str("Tolkien".to_string()),
            }
        );
    }

    #[test]
    fn parses_relation_chain() {
        let expr = parse("~author.relations.son.title = 'Christopher Tolkien'").unwrap();
        let Expression::OrderByAndLimit { child, .. } = expr else {
            panic!("expected wrapper")
        };
        match *child {
            Expression::RelationWhere { name, sub } => {
                assert_eq!(name, "author");
                match *sub {
                    Expression::RelationWhere { name, sub } => {
                        assert_eq!(name, "son");
                        assert_eq!(
                            *sub,
                            Expression::PropertyComparison {
                                property: "title".to_string(),
                                op: Op::Eq,
                                value: Value::Str("Christopher Tolkien".to_string()),
                            }
                        );
                    }
                    other => panic!("unexpected inner: {other:?}"),
                }
            }
            other => panic!("unexpected child: {other:?}"),
        }
    }

    #[test]
    fn parses_not_and_and_or_precedence() {
        let expr = parse("#a AND #b OR not(#c)").unwrap();
        let Expression::OrderByAndLimit { child, .. } = expr else {
            panic!("expected wrapper")
        };
        match *child {
            Expression::Or(children) => assert_eq!(children.len(), 2),
            other => panic!("expected top-level OR, got {other:?}"),
        }
    }

    #[test]
    fn parses_order_by_and_limit() {
        let expr = parse("#author orderBy note.title desc limit 10").unwrap();
        let Expression::OrderByAndLimit { order_by, limit, .. } = expr else {
            panic!("expected wrapper")
        };
        assert_eq!(order_by.len(), 1);
        assert!(order_by[0].descending);
        assert_eq!(limit, Some(10));
    }

    #[test]
    fn structured_mode_rejects_bare_words() {
        let err = parse("# search term").unwrap_err();
        assert!(err.message.contains("bare words"));
    }

    #[test]
    fn reports_offset_on_malformed_input() {
        let err = parse("#author =").unwrap_err();
        assert_eq!(err.offset, 9);
    }
}
