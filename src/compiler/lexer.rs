//! Line-oriented tokenizer for mapping rule sources.

use logos::{Lexer, Logos};

/// Why a line could not be tokenized
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) enum LexFault {
    #[default]
    UnexpectedCharacter,
    MalformedNumber,
    MalformedCodePoint,
    CodePointOutOfRange,
    MalformedClassRef,
    UnterminatedString,
    /// A bad escape inside a string, with the escape as written
    BadEscape { message: &'static str, text: String },
}

impl LexFault {
    fn message(&self) -> &'static str {
        match self {
            LexFault::UnexpectedCharacter => "unexpected character",
            LexFault::MalformedNumber => "malformed number",
            LexFault::MalformedCodePoint => "malformed Unicode escape",
            LexFault::CodePointOutOfRange => "code point is a surrogate or beyond U+10FFFF",
            LexFault::MalformedClassRef => "malformed class reference",
            LexFault::UnterminatedString => "unterminated string",
            LexFault::BadEscape { message, .. } => *message,
        }
    }
}

/// Token categories of the rule language
#[derive(Logos, Debug, Clone, PartialEq, Eq, Hash)]
#[logos(error = LexFault)]
#[logos(skip r"[ \t\r,]+|;[^\n]*")]
pub(crate) enum TokenKind {
    /// Keyword or bare name
    #[regex(r"[\p{L}_][\p{L}\p{N}_]*", |lex| lex.slice().to_string())]
    Word(String),
    /// `0x41` or `65`
    #[regex(r"[0-9][0-9A-Za-z]*", number)]
    Number(u32),
    /// `U+0391`
    #[regex(r"[Uu]\+[0-9A-Za-z]*", code_point)]
    CodePoint(u32),
    /// Quoted string with escapes applied
    #[token("\"", |lex| string(lex, '"'))]
    #[token("'", |lex| string(lex, '\''))]
    Str(Vec<u32>),
    /// `[name]`
    #[regex(r"\[[^\]\s]*\]?", class_ref)]
    ClassRef(String),
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("=")]
    Equals,
    #[token("/")]
    Slash,
    /// `_` placeholder inside a context
    #[token("_", priority = 4)]
    Underscore,
    #[token("#")]
    Boundary,
    #[token("..")]
    DotDot,
    #[token("<>")]
    Both,
    #[token(">")]
    Forward,
    #[token("<")]
    Backward,
}

fn number(lex: &mut Lexer<TokenKind>) -> Result<u32, LexFault> {
    let text = lex.slice();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    }
    .map_err(|_| LexFault::MalformedNumber)
}

fn code_point(lex: &mut Lexer<TokenKind>) -> Result<u32, LexFault> {
    let digits = &lex.slice()[2..];
    if digits.is_empty() || digits.len() > 6 {
        return Err(LexFault::MalformedCodePoint);
    }
    let value = u32::from_str_radix(digits, 16).map_err(|_| LexFault::MalformedCodePoint)?;
    char::from_u32(value)
        .map(u32::from)
        .ok_or(LexFault::CodePointOutOfRange)
}

fn class_ref(lex: &mut Lexer<TokenKind>) -> Result<String, LexFault> {
    lex.slice()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .filter(|name| !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_'))
        .map(str::to_string)
        .ok_or(LexFault::MalformedClassRef)
}

/// Scan the string body after the opening `quote`
fn string(lex: &mut Lexer<TokenKind>, quote: char) -> Result<Vec<u32>, LexFault> {
    let rest = lex.remainder();
    let mut values = Vec::new();
    let mut pos = 0;
    while let Some(c) = rest[pos..].chars().next() {
        if c == quote {
            lex.bump(pos + c.len_utf8());
            return Ok(values);
        }
        if c == '\\' {
            let (value, len) = escape(&rest[pos..])?;
            values.push(value);
            pos += len;
        } else {
            values.push(u32::from(c));
            pos += c.len_utf8();
        }
    }
    lex.bump(rest.len());
    Err(LexFault::UnterminatedString)
}

/// Decode the escape at the start of `text`, giving its value and length
fn escape(text: &str) -> Result<(u32, usize), LexFault> {
    let bad = |message: &'static str, len: usize| LexFault::BadEscape {
        message,
        text: text[..len].to_string(),
    };
    let body = &text[1..];
    match body.chars().next() {
        None => Err(bad("unterminated escape", 1)),
        Some(c @ ('\\' | '"' | '\'')) => Ok((u32::from(c), 2)),
        Some('u') if body[1..].starts_with('{') => {
            let digits = body[2..].bytes().take_while(u8::is_ascii_hexdigit).count();
            let len = 3 + digits;
            if digits == 0 || digits > 6 || !body[2 + digits..].starts_with('}') {
                return Err(bad("malformed Unicode escape", len));
            }
            scalar(&body[2..2 + digits])
                .map(|v| (v, len + 1))
                .ok_or_else(|| bad("malformed Unicode escape", len + 1))
        }
        Some('u') => {
            let digits = body[1..].bytes().take(4).take_while(u8::is_ascii_hexdigit).count();
            let len = 2 + digits;
            if digits != 4 {
                return Err(bad("malformed Unicode escape", len));
            }
            scalar(&body[1..5])
                .map(|v| (v, len))
                .ok_or_else(|| bad("malformed Unicode escape", len))
        }
        Some(c) => Err(bad("unknown escape", 1 + c.len_utf8())),
    }
}

fn scalar(digits: &str) -> Option<u32> {
    u32::from_str_radix(digits, 16)
        .ok()
        .filter(|&v| char::from_u32(v).is_some())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub text: String,
}

/// Tokens of one source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Line {
    pub number: u32,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LexError {
    pub message: String,
    pub token: String,
    pub line: u32,
}

/// Split `source` into token lines.
///
/// Blank and comment-only lines are dropped. A line with a lexical error
/// is reported and left out so it cannot cause follow-up errors.
pub(crate) fn tokenize(source: &str) -> (Vec<Line>, Vec<LexError>) {
    let mut lines = Vec::new();
    let mut errors = Vec::new();
    for (index, text) in source.lines().enumerate() {
        let number = u32::try_from(index + 1).unwrap_or(u32::MAX);
        match lex_line(text) {
            Ok(tokens) if tokens.is_empty() => {}
            Ok(tokens) => lines.push(Line { number, tokens }),
            Err((fault, slice)) => {
                let token = match &fault {
                    LexFault::BadEscape { text, .. } => text.clone(),
                    _ => slice,
                };
                errors.push(LexError {
                    message: fault.message().to_string(),
                    token,
                    line: number,
                });
            }
        }
    }
    (lines, errors)
}

fn lex_line(text: &str) -> Result<Vec<Token>, (LexFault, String)> {
    let mut lexer = TokenKind::lexer(text);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        match result {
            Ok(kind) => tokens.push(Token {
                kind,
                text: lexer.slice().to_string(),
            }),
            Err(fault) => return Err((fault, lexer.slice().to_string())),
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (lines, errors) = tokenize(source);
        assert!(errors.is_empty(), "{:?}", errors);
        lines
            .into_iter()
            .flat_map(|l| l.tokens)
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_rule_tokens() {
        assert_eq!(
            kinds("0xC1 0x80 <> U+00C0 / # _ [vowel] ; comment"),
            vec![
                TokenKind::Number(0xC1),
                TokenKind::Number(0x80),
                TokenKind::Both,
                TokenKind::CodePoint(0xC0),
                TokenKind::Slash,
                TokenKind::Boundary,
                TokenKind::Underscore,
                TokenKind::ClassRef("vowel".to_string()),
            ]
        );
    }

    #[test]
    fn test_words_and_separators() {
        assert_eq!(
            kinds("Pass(Byte_Unicode) 65, u+3b1 _x"),
            vec![
                TokenKind::Word("Pass".to_string()),
                TokenKind::LParen,
                TokenKind::Word("Byte_Unicode".to_string()),
                TokenKind::RParen,
                TokenKind::Number(65),
                TokenKind::CodePoint(0x3B1),
                TokenKind::Word("_x".to_string()),
            ]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            kinds(r#"RHSName "aΑ\u{1F600}\"\\" 'b' "é;""#),
            vec![
                TokenKind::Word("RHSName".to_string()),
                TokenKind::Str(vec![0x61, 0x391, 0x1F600, 0x22, 0x5C]),
                TokenKind::Str(vec![0x62]),
                TokenKind::Str(vec![0xE9, 0x3B]),
            ]
        );
    }

    #[test]
    fn test_ranges_and_lines() {
        let (lines, errors) = tokenize("\n; only a comment\nPassThrough 0x20..0x7E\n");
        assert!(errors.is_empty());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].number, 3);
        assert_eq!(lines[0].tokens[2].kind, TokenKind::DotDot);
        assert_eq!(lines[0].tokens[3].text, "0x7E");
    }

    #[test]
    fn test_malformed_escapes() {
        for (source, token) in [
            ("U+D800 > 0x41", "U+D800"),
            ("U+110000 > 0x41", "U+110000"),
            ("U+12G4 > 0x41", "U+12G4"),
            (r#""\u12" > 0x41"#, r"\u12"),
            (r#""\u{DFFF}" > 0x41"#, r"\u{DFFF}"),
            (r#""\q" > 0x41"#, r"\q"),
        ] {
            let (lines, errors) = tokenize(source);
            assert!(lines.is_empty(), "{}", source);
            assert_eq!(errors.len(), 1, "{}", source);
            assert_eq!(errors[0].token, token);
            assert_eq!(errors[0].line, 1);
        }
    }

    #[test]
    fn test_lexical_error_messages() {
        let (_, errors) = tokenize("0x4G > U+0041\n[bad name] > U+0041\n\"open > U+0041");
        let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "malformed number",
                "malformed class reference",
                "unterminated string"
            ]
        );
        assert_eq!(errors[0].token, "0x4G");
        assert_eq!(errors[1].token, "[bad");
    }

    #[test]
    fn test_unexpected_character() {
        let (_, errors) = tokenize("0x41 > U+0041\n0x42 ! U+0042");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 2);
        assert_eq!(errors[0].token, "!");
        assert_eq!(errors[0].message, "unexpected character");
    }
}
