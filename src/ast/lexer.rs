//! Tokenizer for the strict-contract expression grammar (spec §4.1).
//!
//! Two-stage like the teacher's `parser/lexer.rs`: this produces a flat
//! token stream with byte-offset spans; [crate::ast::parser] turns byte
//! offsets into [crate::error::Loc] line numbers via [line_of_offset].

use chumsky::prelude::*;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(String),
    Decimal(String),
    Str(String),
    Ident(String),
    Kw(Kw),
    /// Punctuation and operators, always one of a fixed set of literal
    /// strings (`"=="`, `"<="`, `"("`, `","`, ...).
    Ctrl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kw {
    And,
    Or,
    Not,
    True,
    False,
    Null,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Int(s) | Token::Decimal(s) => write!(f, "{s}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Kw(k) => write!(f, "{k:?}"),
            Token::Ctrl(s) => write!(f, "{s}"),
        }
    }
}

pub type Spanned<T> = (T, Range<usize>);

/// Lexes an expression source string into a token stream.
pub fn lex(source: &str) -> Result<Vec<Spanned<Token>>, Vec<Simple<char>>> {
    lexer().parse(source)
}

fn lexer() -> impl Parser<char, Vec<Spanned<Token>>, Error = Simple<char>> {
    let whitespace = filter(|c: &char| c.is_whitespace()).repeated().at_least(1);

    let comment = just('#').then(filter(|c: &char| *c != '\n').repeated());

    let ident = filter(|c: &char| c.is_ascii_alphabetic() || *c == '_')
        .chain(filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_').repeated())
        .collect::<String>()
        .map(|s: String| match s.as_str() {
            "and" => Token::Kw(Kw::And),
            "or" => Token::Kw(Kw::Or),
            "not" => Token::Kw(Kw::Not),
            "true" => Token::Kw(Kw::True),
            "false" => Token::Kw(Kw::False),
            "null" => Token::Kw(Kw::Null),
            _ => Token::Ident(s),
        });

    let digits = filter(|c: &char| c.is_ascii_digit()).repeated().at_least(1);

    let number = digits
        .clone()
        .collect::<String>()
        .then(just('.').ignore_then(digits.collect::<String>()).or_not())
        .map(|(int_part, frac): (String, Option<String>)| match frac {
            Some(f) => Token::Decimal(format!("{int_part}.{f}")),
            None => Token::Int(int_part),
        });

    let escape = just('\\').ignore_then(
        just('\\')
            .or(just('\''))
            .or(just('"'))
            .or(just('n').to('\n'))
            .or(just('t').to('\t'))
            .or(just('r').to('\r')),
    );

    let single_quoted = just('\'')
        .ignore_then(filter(|c| *c != '\\' && *c != '\'').or(escape).repeated())
        .then_ignore(just('\''))
        .collect::<String>();

    let double_quoted = just('"')
        .ignore_then(filter(|c| *c != '\\' && *c != '"').or(escape).repeated())
        .then_ignore(just('"'))
        .collect::<String>();

    let string = single_quoted.or(double_quoted).map(Token::Str);

    // Multi-char control tokens must be attempted before single-char ones.
    let ctrl_multi = choice((
        just("=="),
        just("!="),
        just("<="),
        just(">="),
    ))
    .map(|s: &str| Token::Ctrl(s.to_string()));

    let ctrl_single = one_of("+-*/<>=(),.")
        .map(|c: char| Token::Ctrl(c.to_string()));

    let token = choice((string, number, ctrl_multi, ctrl_single, ident));

    token
        .map_with_span(|tok, span| (tok, span))
        .padded_by(choice((whitespace.ignored(), comment.ignored())).repeated())
        .repeated()
        .then_ignore(end())
}

/// Builds a lookup from byte offset to 1-based line number.
pub struct LineIndex {
    /// Byte offset of the start of each line (line 0 starts at offset 0).
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut starts = vec![0];
        for (i, c) in source.char_indices() {
            if c == '\n' {
                starts.push(i + 1);
            }
        }
        LineIndex { starts }
    }

    /// 1-based line number containing the given byte offset.
    pub fn line_of_offset(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i, // i-1 is the containing line (0-based) -> +1 for 1-based
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_operators_and_idents() {
        let toks = lex("a == 2 or b.c < 0").unwrap();
        let kinds: Vec<_> = toks.into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            kinds,
            vec![
                Token::Ident("a".into()),
                Token::Ctrl("==".into()),
                Token::Int("2".into()),
                Token::Kw(Kw::Or),
                Token::Ident("b".into()),
                Token::Ctrl(".".into()),
                Token::Ident("c".into()),
                Token::Ctrl("<".into()),
                Token::Int("0".into()),
            ]
        );
    }

    #[test]
    fn lexes_decimal_and_string() {
        let toks = lex("x = 1.50 and y = 'hi\\''").unwrap();
        let kinds: Vec<_> = toks.into_iter().map(|(t, _)| t).collect();
        assert!(kinds.contains(&Token::Decimal("1.50".into())));
        assert!(kinds.contains(&Token::Str("hi'".into())));
    }

    #[test]
    fn comment_is_stripped() {
        let toks = lex("a + 1 # trailing comment").unwrap();
        assert_eq!(toks.len(), 3);
    }

    #[test]
    fn line_index_tracks_newlines() {
        let idx = LineIndex::new("a\nbb\nccc");
        assert_eq!(idx.line_of_offset(0), 1);
        assert_eq!(idx.line_of_offset(2), 2);
        assert_eq!(idx.line_of_offset(5), 3);
    }
}
