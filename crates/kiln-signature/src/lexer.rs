//! Tokenization of predictor source text using `nom`.
//!
//! Produces a flat stream of [`Token`]s. Whitespace, newlines and `#`
//! comments are discarded; any punctuation the parser does not care about
//! becomes [`Token::Symbol`], so arbitrary method bodies never fail to lex.

use kiln_common::error::{KilnError, Result};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1, take_while_m_n},
    character::complete::{anychar, char, multispace1, not_line_ending},
    combinator::{map, opt, recognize, value},
    multi::many0,
    sequence::preceded,
};

/// A token of the predictor source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `class` keyword.
    Class,
    /// `def` keyword.
    Def,
    /// `True` literal.
    True,
    /// `False` literal.
    False,
    /// `None` literal.
    None,
    /// An identifier.
    Identifier(String),
    /// A string literal (any quote style), with escapes resolved.
    StringLiteral(String),
    /// A numeric literal, kept as written (underscores removed).
    Number(String),
    /// `(`
    ParenOpen,
    /// `)`
    ParenClose,
    /// `[`
    BracketOpen,
    /// `]`
    BracketClose,
    /// `:`
    Colon,
    /// `,`
    Comma,
    /// `=`
    Equals,
    /// `->`
    Arrow,
    /// `.`
    Dot,
    /// Any other punctuation or operator character.
    Symbol(char),
}

/// Skippable items: whitespace, line continuations, or `#` comments.
fn skip_trivia(input: &str) -> IResult<&str, ()> {
    let comment = value((), preceded(char('#'), not_line_ending));
    let continuation = value((), char('\\'));
    let ws = value((), multispace1);
    let (input, _) = many0(alt((ws, comment, continuation))).parse(input)?;
    Ok((input, ()))
}

const fn is_string_prefix(c: char) -> bool {
    matches!(c, 'r' | 'R' | 'b' | 'B' | 'f' | 'F' | 'u' | 'U')
}

/// Parses a string literal: optional prefix, then `'`, `"`, `'''` or `"""`.
fn string_literal(input: &str) -> IResult<&str, Token> {
    let (rest, prefix) = take_while_m_n(0, 2, is_string_prefix)(input)?;
    let (rest, quote) = alt((tag("\"\"\""), tag("'''"), tag("\""), tag("'"))).parse(rest)?;
    let raw = prefix.contains(['r', 'R']);
    let triple = quote.len() == 3;

    let mut result = String::new();
    let mut chars = rest.char_indices();
    loop {
        match chars.next() {
            Some((idx, _)) if rest[idx..].starts_with(quote) => {
                let remaining = &rest[idx + quote.len()..];
                return Ok((remaining, Token::StringLiteral(result)));
            }
            Some((_, '\n')) if !triple => return Err(unterminated(rest)),
            Some((_, '\\')) => match chars.next() {
                Some((_, c)) if raw => {
                    result.push('\\');
                    result.push(c);
                }
                Some((_, 'n')) => result.push('\n'),
                Some((_, 't')) => result.push('\t'),
                Some((_, '\n')) => {}
                Some((_, c)) => result.push(c),
                None => return Err(unterminated(rest)),
            },
            Some((_, c)) => result.push(c),
            None => return Err(unterminated(rest)),
        }
    }
}

fn unterminated(input: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Char))
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || c == '_'
}

/// Parses a numeric literal: digits, optional fraction, optional exponent.
fn number_literal(input: &str) -> IResult<&str, Token> {
    let exponent = (
        alt((char('e'), char('E'))),
        opt(alt((char('+'), char('-')))),
        take_while1(is_number_char),
    );
    let (rest, text) = recognize((
        take_while1(|c: char| c.is_ascii_digit()),
        take_while(is_number_char),
        opt((char('.'), take_while(is_number_char))),
        opt(exponent),
    ))
    .parse(input)?;
    Ok((rest, Token::Number(text.replace('_', ""))))
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Parses an identifier or keyword.
fn identifier_or_keyword(input: &str) -> IResult<&str, Token> {
    let (input, word) =
        recognize((take_while1(is_ident_start), take_while(is_ident_continue))).parse(input)?;
    let token = match word {
        "class" => Token::Class,
        "def" => Token::Def,
        "True" => Token::True,
        "False" => Token::False,
        "None" => Token::None,
        _ => Token::Identifier(word.to_string()),
    };
    Ok((input, token))
}

/// Parses a symbol token; anything unrecognized becomes [`Token::Symbol`].
fn symbol(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::Arrow, tag("->")),
        value(Token::ParenOpen, char('(')),
        value(Token::ParenClose, char(')')),
        value(Token::BracketOpen, char('[')),
        value(Token::BracketClose, char(']')),
        value(Token::Colon, char(':')),
        value(Token::Comma, char(',')),
        value(Token::Equals, char('=')),
        value(Token::Dot, char('.')),
        map(anychar, Token::Symbol),
    ))
    .parse(input)
}

/// Parses a single token (after trivia has been skipped).
fn single_token(input: &str) -> IResult<&str, Token> {
    alt((string_literal, number_literal, identifier_or_keyword, symbol)).parse(input)
}

/// Tokenizes predictor source text into a vector of tokens.
///
/// # Errors
///
/// Returns an error if a string literal is not terminated.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut remaining = input;

    loop {
        let (rest, ()) = skip_trivia(remaining).map_err(|e| {
            KilnError::config("predict", format!("lexer error skipping whitespace: {e}"))
        })?;
        remaining = rest;

        if remaining.is_empty() {
            break;
        }

        let (rest, token) = single_token(remaining).map_err(|e| {
            KilnError::config(
                "predict",
                format!(
                    "cannot read predictor source at: \"{}\" ({e})",
                    remaining.chars().take(20).collect::<String>()
                ),
            )
        })?;
        tokens.push(token);
        remaining = rest;
    }

    Ok(tokens)
}
