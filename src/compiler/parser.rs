//! Statement parser: one statement per token line.

use std::ops::Range;

use chumsky::error::{Simple, SimpleReason};
use chumsky::prelude::*;
use chumsky::stream::Stream;

use crate::table::NameId;
use crate::table::rules::PassKind;

use super::lexer::{Line, Token, TokenKind};

/// A numeric item as written, so each side can check it against its form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Value {
    /// `0x41` or `65`
    Number(u32),
    /// `U+0391`
    CodePoint(u32),
    /// One character of a quoted string
    Char(u32),
}

impl Value {
    pub fn raw(self) -> u32 {
        match self {
            Value::Number(v) | Value::CodePoint(v) | Value::Char(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ItemKind {
    Value(Value),
    Class(String),
    Boundary,
}

/// One element of a rule side, with the text it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Item {
    pub kind: ItemKind,
    pub text: String,
}

/// Items of one side and its optional `/ pre _ post` context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Side {
    pub items: Vec<Item>,
    pub pre: Vec<Item>,
    pub post: Vec<Item>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Both,
    Forward,
    Backward,
}

impl Direction {
    pub fn forward(self) -> bool {
        matches!(self, Direction::Both | Direction::Forward)
    }

    pub fn backward(self) -> bool {
        matches!(self, Direction::Both | Direction::Backward)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RuleDecl {
    pub lhs: Side,
    pub rhs: Side,
    pub direction: Direction,
}

/// Class member: a single value or an inclusive range
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Member {
    pub first: Value,
    pub last: Option<Value>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StatementKind {
    Header { id: NameId, keyword: String, value: Vec<u32> },
    Flags { lhs: bool, names: Vec<String> },
    Pass(PassKind),
    Class { unicode: bool, name: String, members: Vec<Member> },
    Default { unicode: bool, value: Value, text: String },
    PassThrough(Vec<Member>),
    Rule(RuleDecl),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Statement {
    pub kind: StatementKind,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParseError {
    pub message: String,
    pub token: Option<String>,
    pub line: u32,
}

const HEADERS: [(&str, NameId); 9] = [
    ("LHSName", NameId::SOURCE_NAME),
    ("RHSName", NameId::TARGET_NAME),
    ("LHSDescription", NameId::SOURCE_DESCRIPTION),
    ("RHSDescription", NameId::TARGET_DESCRIPTION),
    ("Version", NameId::VERSION),
    ("Contact", NameId::CONTACT),
    ("RegistrationAuthority", NameId::REGISTRATION_AUTHORITY),
    ("RegistrationName", NameId::REGISTRATION_NAME),
    ("Copyright", NameId::COPYRIGHT),
];

type ParseResult<T> = std::result::Result<T, ParseError>;

type Error = Simple<Token>;

/// Parse every line, collecting one error per bad line
pub(crate) fn parse(lines: &[Line]) -> (Vec<Statement>, Vec<ParseError>) {
    let mut statements = Vec::new();
    let mut errors = Vec::new();
    for line in lines {
        match statement(line) {
            Ok(kind) => statements.push(Statement {
                kind,
                line: line.number,
            }),
            Err(e) => errors.push(e),
        }
    }
    (statements, errors)
}

/// Pick the grammar by the leading keyword, or parse a rule
fn statement(line: &Line) -> ParseResult<StatementKind> {
    let fail = |message: &str, token: Option<&Token>| ParseError {
        message: message.to_string(),
        token: token.map(|t| t.text.clone()),
        line: line.number,
    };
    let first = line.tokens.first();
    let keyword = match first.map(|t| &t.kind) {
        Some(TokenKind::Word(word)) => word.as_str(),
        _ => {
            let arrow = line.tokens.iter().any(|t| {
                matches!(
                    t.kind,
                    TokenKind::Both | TokenKind::Forward | TokenKind::Backward
                )
            });
            if !arrow {
                return Err(fail("expected '<>', '>' or '<'", first));
            }
            return run(rule(), line, 0).map(StatementKind::Rule);
        }
    };
    let is = |name: &str| keyword.eq_ignore_ascii_case(name);

    if let Some(&(_, id)) = HEADERS.iter().find(|(name, _)| is(name)) {
        run(header(id, keyword.to_string()), line, 1)
    } else if is("LHSFlags") || is("RHSFlags") {
        run(flags(is("LHSFlags")), line, 1)
    } else if is("Pass") {
        run(pass(), line, 1)
    } else if is("ByteClass") || is("UniClass") {
        run(class(is("UniClass")), line, 1)
    } else if is("ByteDefault") || is("UniDefault") {
        run(default(is("UniDefault")), line, 1)
    } else if is("PassThrough") {
        run(pass_through(), line, 1)
    } else {
        Err(fail("unknown keyword", first))
    }
}

/// Run `parser` over the line's tokens from `skip` on, requiring it to
/// use them all. Spans are token indices within the line.
fn run<T>(
    parser: impl Parser<Token, T, Error = Error>,
    line: &Line,
    skip: usize,
) -> ParseResult<T> {
    let end = line.tokens.len();
    let tokens = line
        .tokens
        .iter()
        .cloned()
        .enumerate()
        .skip(skip)
        .map(|(i, token)| (token, i..i + 1));
    parser
        .then_ignore(finish())
        .parse(Stream::from_iter(end..end, tokens))
        .map_err(|errors| {
            let error = errors.into_iter().next();
            let message = match error.as_ref().map(|e| e.reason()) {
                Some(SimpleReason::Custom(message)) => message.clone(),
                Some(SimpleReason::Unclosed { .. }) => "missing ')'".to_string(),
                Some(SimpleReason::Unexpected) | None => "unexpected token".to_string(),
            };
            ParseError {
                message,
                token: error
                    .and_then(|e| line.tokens.get(e.span().start))
                    .map(|t| t.text.clone()),
                line: line.number,
            }
        })
}

/// One token picked out by `pick`, else `message` at that position.
/// Also fails with `message` at the end of the line.
fn expect<T>(
    message: &'static str,
    pick: impl Fn(&TokenKind) -> Option<T> + Clone,
) -> impl Parser<Token, T, Error = Error> + Clone {
    any()
        .or_not()
        .try_map(move |token: Option<Token>, span: Range<usize>| {
            token
                .and_then(|t| pick(&t.kind))
                .ok_or_else(|| Simple::custom(span, message))
        })
}

fn punct(kind: TokenKind, message: &'static str) -> impl Parser<Token, (), Error = Error> + Clone {
    expect(message, move |found| (*found == kind).then_some(()))
}

fn finish() -> impl Parser<Token, (), Error = Error> + Clone {
    any()
        .or_not()
        .try_map(|token: Option<Token>, span: Range<usize>| match token {
            None => Ok(()),
            Some(_) => Err(Simple::custom(span, "unexpected token after statement")),
        })
}

fn number(kind: &TokenKind) -> Option<Value> {
    match kind {
        TokenKind::Number(v) => Some(Value::Number(*v)),
        TokenKind::CodePoint(v) => Some(Value::CodePoint(*v)),
        _ => None,
    }
}

fn header(id: NameId, keyword: String) -> impl Parser<Token, StatementKind, Error = Error> {
    expect("expected a quoted string", |kind| match kind {
        TokenKind::Str(value) => Some(value.clone()),
        _ => None,
    })
    .map(move |value| StatementKind::Header {
        id,
        keyword: keyword.clone(),
        value,
    })
}

fn flags(lhs: bool) -> impl Parser<Token, StatementKind, Error = Error> {
    let name = expect("expected a flag name", |kind| match kind {
        TokenKind::Word(name) => Some(name.clone()),
        _ => None,
    });
    punct(TokenKind::LParen, "expected '('")
        .ignore_then(name.repeated())
        .then_ignore(punct(TokenKind::RParen, "expected a flag name or ')'"))
        .map(move |names| StatementKind::Flags { lhs, names })
}

fn pass() -> impl Parser<Token, StatementKind, Error = Error> {
    let kind = any()
        .or_not()
        .try_map(|token: Option<Token>, span: Range<usize>| match token.map(|t| t.kind) {
            Some(TokenKind::Word(name)) => {
                PassKind::from_name(&name).ok_or_else(|| Simple::custom(span, "unknown pass type"))
            }
            _ => Err(Simple::custom(span, "expected a pass type")),
        });
    punct(TokenKind::LParen, "expected '('")
        .ignore_then(kind)
        .then_ignore(punct(TokenKind::RParen, "expected ')'"))
        .map(StatementKind::Pass)
}

/// Values and `lo..hi` ranges; a string gives one member per character
fn members() -> impl Parser<Token, Vec<Member>, Error = Error> + Clone {
    let single = any().try_map(|token: Token, span: Range<usize>| match &token.kind {
        TokenKind::Str(chars) => Ok(chars
            .iter()
            .map(|&c| Member {
                first: Value::Char(c),
                last: None,
                text: token.text.clone(),
            })
            .collect()),
        kind => number(kind)
            .map(|first| {
                vec![Member {
                    first,
                    last: None,
                    text: token.text.clone(),
                }]
            })
            .ok_or_else(|| Simple::custom(span, "expected a value")),
    });
    let range_end = punct(TokenKind::DotDot, "expected '..'").ignore_then(
        any()
            .or_not()
            .try_map(|token: Option<Token>, span: Range<usize>| {
                token
                    .and_then(|t| number(&t.kind).map(|v| (v, t.text)))
                    .ok_or_else(|| Simple::custom(span, "expected the end of a range"))
            }),
    );
    single
        .then(range_end.or_not())
        .try_map(|(mut members, end), span: Range<usize>| {
            let Some((last, text)) = end else {
                return Ok(members);
            };
            if members.len() != 1 || matches!(members[0].first, Value::Char(_)) {
                return Err(Simple::custom(span, "a string cannot start a range"));
            }
            let member = &mut members[0];
            member.last = Some(last);
            member.text = format!("{}..{}", member.text, text);
            Ok(members)
        })
        .repeated()
        .flatten()
}

/// `)` closing a member list
fn close_members() -> impl Parser<Token, (), Error = Error> + Clone {
    any()
        .or_not()
        .try_map(|token: Option<Token>, span: Range<usize>| match token.map(|t| t.kind) {
            Some(TokenKind::RParen) => Ok(()),
            Some(_) => Err(Simple::custom(span, "expected a value or ')'")),
            None => Err(Simple::custom(span, "missing ')'")),
        })
}

fn class(unicode: bool) -> impl Parser<Token, StatementKind, Error = Error> {
    expect("expected a class name in brackets", |kind| match kind {
        TokenKind::ClassRef(name) => Some(name.clone()),
        _ => None,
    })
    .then_ignore(punct(TokenKind::Equals, "expected '='"))
    .then_ignore(punct(TokenKind::LParen, "expected '('"))
    .then(members())
    .then_ignore(close_members())
    .map(move |(name, members)| StatementKind::Class {
        unicode,
        name,
        members,
    })
}

fn default(unicode: bool) -> impl Parser<Token, StatementKind, Error = Error> {
    any()
        .or_not()
        .try_map(move |token: Option<Token>, span: Range<usize>| {
            let token = token.ok_or_else(|| Simple::custom(span.clone(), "expected a single value"))?;
            let value = match &token.kind {
                TokenKind::Str(chars) if chars.len() == 1 => Some(Value::Char(chars[0])),
                kind => number(kind),
            };
            value
                .map(|value| StatementKind::Default {
                    unicode,
                    value,
                    text: token.text,
                })
                .ok_or_else(|| Simple::custom(span, "expected a single value"))
        })
}

fn pass_through() -> impl Parser<Token, StatementKind, Error = Error> {
    let parenthesized = punct(TokenKind::LParen, "expected '('")
        .ignore_then(members())
        .then_ignore(close_members());
    parenthesized
        .or(members())
        .try_map(|ranges, span: Range<usize>| {
            if ranges.is_empty() {
                Err(Simple::custom(span, "PassThrough needs at least one range"))
            } else {
                Ok(StatementKind::PassThrough(ranges))
            }
        })
}

/// Rule elements; strings expand to one item per character
fn items() -> impl Parser<Token, Vec<Item>, Error = Error> + Clone {
    any()
        .try_map(|token: Token, span: Range<usize>| {
            let kind = match &token.kind {
                TokenKind::ClassRef(name) => ItemKind::Class(name.clone()),
                TokenKind::Boundary => ItemKind::Boundary,
                TokenKind::Str(chars) => {
                    return Ok(chars
                        .iter()
                        .map(|&c| Item {
                            kind: ItemKind::Value(Value::Char(c)),
                            text: token.text.clone(),
                        })
                        .collect());
                }
                kind => ItemKind::Value(
                    number(kind).ok_or_else(|| Simple::custom(span, "unexpected token in rule"))?,
                ),
            };
            Ok(vec![Item {
                kind,
                text: token.text,
            }])
        })
        .repeated()
        .flatten()
}

/// Items with an optional `/ pre _ post` context
fn side() -> impl Parser<Token, Side, Error = Error> + Clone {
    let context = punct(TokenKind::Slash, "expected '/'")
        .ignore_then(items())
        .then_ignore(punct(
            TokenKind::Underscore,
            "context needs '_' to mark the match position",
        ))
        .then(items());
    items()
        .then(context.or_not())
        .map(|(items, context)| {
            let (pre, post) = context.unwrap_or_default();
            Side { items, pre, post }
        })
}

fn rule() -> impl Parser<Token, RuleDecl, Error = Error> {
    let direction = expect("expected '<>', '>' or '<'", |kind| match kind {
        TokenKind::Both => Some(Direction::Both),
        TokenKind::Forward => Some(Direction::Forward),
        TokenKind::Backward => Some(Direction::Backward),
        _ => None,
    });
    side()
        .then(direction)
        .then(side())
        .map(|((lhs, direction), rhs)| RuleDecl {
            lhs,
            rhs,
            direction,
        })
}
