//! Recursive-descent reader for predictor declarations.
//!
//! Only class headers, leading annotated attributes, and the `predict`
//! signature are understood; every other token is skipped. Nothing is
//! evaluated.

use kiln_common::error::{KilnError, Result};
use serde_json::{Number, Value};

use crate::ast::{
    ClassDecl, DefaultExpr, InputCall, ParamDecl, PredictDecl, SkippedClass, SourceFile, TypeExpr,
};
use crate::lexer::{self, Token};

/// Name of the prediction method.
const PREDICT_METHOD: &str = "predict";

/// Cursor into a token stream for recursive-descent parsing.
struct TokenCursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> TokenCursor<'a> {
    const fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.advance() {
            Some(Token::Identifier(s)) => Ok(s.clone()),
            other => Err(parse_err(format!("expected identifier, got {other:?}"))),
        }
    }

    fn expect_token(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(tok) if tok == expected => Ok(()),
            other => Err(parse_err(format!("expected {expected:?}, got {other:?}"))),
        }
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    const fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}

fn parse_err(message: String) -> KilnError {
    KilnError::config("predict", message)
}

fn is_identifier(tok: Option<&Token>, name: &str) -> bool {
    matches!(tok, Some(Token::Identifier(s)) if s == name)
}

/// Parses predictor source text into its class declarations.
///
/// A class whose header, fields or `predict` signature cannot be read is
/// recorded in [`SourceFile::skipped`] and reading resumes after its
/// `class` keyword, so helper classes never block the entry point.
///
/// # Errors
///
/// Returns an error if the source cannot be tokenized.
pub fn parse_source(input: &str) -> Result<SourceFile> {
    tracing::debug!("parsing predictor source");
    let tokens = lexer::tokenize(input)?;
    let mut cursor = TokenCursor::new(&tokens);
    let mut file = SourceFile::default();

    while let Some(tok) = cursor.peek() {
        if *tok != Token::Class {
            let _ = cursor.advance();
            continue;
        }
        let start = cursor.pos;
        match parse_class(&mut cursor) {
            Ok(class) => file.classes.push(class),
            Err(e) => {
                let name = match cursor.tokens.get(start + 1) {
                    Some(Token::Identifier(name)) => Some(name.clone()),
                    _ => None,
                };
                let reason = match e {
                    KilnError::Config { message, .. } => message,
                    other => other.to_string(),
                };
                tracing::debug!(class = ?name, reason = %reason, "skipping unreadable class");
                file.skipped.push(SkippedClass { name, reason });
                cursor.pos = start + 1;
            }
        }
    }

    Ok(file)
}

fn parse_class(cursor: &mut TokenCursor<'_>) -> Result<ClassDecl> {
    cursor.expect_token(&Token::Class)?;
    let name = cursor.expect_identifier()?;
    let bases = if cursor.peek() == Some(&Token::ParenOpen) {
        parse_bases(cursor)?
    } else {
        Vec::new()
    };
    cursor.expect_token(&Token::Colon)?;

    if matches!(cursor.peek(), Some(Token::StringLiteral(_))) {
        let _ = cursor.advance();
    }
    let fields = parse_annotated_fields(cursor)?;

    let mut predict = None;
    while let Some(tok) = cursor.peek() {
        match tok {
            Token::Class => break,
            Token::Def if is_identifier(cursor.peek_at(1), PREDICT_METHOD) => {
                predict = Some(parse_predict(cursor)?);
            }
            _ => {
                let _ = cursor.advance();
            }
        }
    }

    Ok(ClassDecl {
        name,
        bases,
        fields,
        predict,
    })
}

fn parse_bases(cursor: &mut TokenCursor<'_>) -> Result<Vec<String>> {
    cursor.expect_token(&Token::ParenOpen)?;
    let mut bases = Vec::new();

    while cursor.peek() != Some(&Token::ParenClose) {
        if cursor.at_end() {
            return Err(parse_err("unexpected end of input inside class bases".into()));
        }
        if matches!(cursor.peek(), Some(Token::Identifier(_)))
            && cursor.peek_at(1) == Some(&Token::Equals)
        {
            let _ = cursor.advance();
            let _ = cursor.advance();
            skip_expression(cursor);
        } else {
            bases.push(parse_type(cursor)?.name);
        }
        let _ = cursor.eat(&Token::Comma);
    }

    cursor.expect_token(&Token::ParenClose)?;
    Ok(bases)
}

/// Reads `name: type [= default]` statements at the top of a class body.
fn parse_annotated_fields(cursor: &mut TokenCursor<'_>) -> Result<Vec<ParamDecl>> {
    let mut fields = Vec::new();
    while let (Some(Token::Identifier(name)), Some(Token::Colon)) =
        (cursor.peek(), cursor.peek_at(1))
    {
        let name = name.clone();
        let _ = cursor.advance();
        let _ = cursor.advance();
        let annotation = Some(parse_type(cursor)?);
        let default = if cursor.eat(&Token::Equals) {
            Some(parse_default(cursor)?)
        } else {
            None
        };
        fields.push(ParamDecl {
            name,
            annotation,
            default,
        });
    }
    Ok(fields)
}

fn parse_predict(cursor: &mut TokenCursor<'_>) -> Result<PredictDecl> {
    cursor.expect_token(&Token::Def)?;
    let _ = cursor.expect_identifier()?;
    cursor.expect_token(&Token::ParenOpen)?;

    let mut params = Vec::new();
    let mut first = true;
    while cursor.peek() != Some(&Token::ParenClose) {
        if cursor.at_end() {
            return Err(parse_err("unexpected end of input inside predict signature".into()));
        }
        match cursor.peek() {
            Some(Token::Symbol('*' | '/')) => skip_star_param(cursor)?,
            Some(Token::Identifier(_)) => {
                let param = parse_param(cursor)?;
                let is_receiver = first && param.annotation.is_none() && param.name == "self";
                if !is_receiver {
                    params.push(param);
                }
            }
            other => {
                return Err(parse_err(format!(
                    "unexpected {other:?} in predict signature"
                )));
            }
        }
        first = false;
        if !cursor.eat(&Token::Comma) && cursor.peek() != Some(&Token::ParenClose) {
            return Err(parse_err(format!(
                "expected ',' or ')' in predict signature, got {:?}",
                cursor.peek()
            )));
        }
    }
    cursor.expect_token(&Token::ParenClose)?;

    let returns = if cursor.eat(&Token::Arrow) {
        Some(parse_type(cursor)?)
    } else {
        None
    };
    cursor.expect_token(&Token::Colon)?;

    Ok(PredictDecl { params, returns })
}

fn parse_param(cursor: &mut TokenCursor<'_>) -> Result<ParamDecl> {
    let name = cursor.expect_identifier()?;
    let annotation = if cursor.eat(&Token::Colon) {
        Some(parse_type(cursor)?)
    } else {
        None
    };
    let default = if cursor.eat(&Token::Equals) {
        Some(parse_default(cursor)?)
    } else {
        None
    };
    Ok(ParamDecl {
        name,
        annotation,
        default,
    })
}

/// Skips `*`, `/`, `*args[: T]` and `**kwargs[: T]`.
fn skip_star_param(cursor: &mut TokenCursor<'_>) -> Result<()> {
    while matches!(cursor.peek(), Some(Token::Symbol('*' | '/'))) {
        let _ = cursor.advance();
    }
    if matches!(cursor.peek(), Some(Token::Identifier(_))) {
        let _ = parse_param(cursor)?;
    }
    Ok(())
}

/// Parses a type annotation, folding `T | None` into `Optional[T]`.
fn parse_type(cursor: &mut TokenCursor<'_>) -> Result<TypeExpr> {
    let mut expr = parse_single_type(cursor)?;
    while cursor.eat(&Token::Symbol('|')) {
        let other = parse_single_type(cursor)?;
        expr = if other.name == "None" {
            optional(expr)
        } else if expr.name == "None" {
            optional(other)
        } else {
            TypeExpr {
                name: "Union".to_string(),
                args: vec![expr, other],
            }
        };
    }
    Ok(expr)
}

fn optional(inner: TypeExpr) -> TypeExpr {
    TypeExpr {
        name: "Optional".to_string(),
        args: vec![inner],
    }
}

fn parse_single_type(cursor: &mut TokenCursor<'_>) -> Result<TypeExpr> {
    let mut name = match cursor.advance() {
        Some(Token::Identifier(s)) => s.clone(),
        Some(Token::None) => "None".to_string(),
        Some(Token::StringLiteral(s)) => {
            s.rsplit('.').next().unwrap_or(s.as_str()).trim().to_string()
        }
        other => return Err(parse_err(format!("expected a type, got {other:?}"))),
    };
    while cursor.eat(&Token::Dot) {
        name = cursor.expect_identifier()?;
    }

    let mut args = Vec::new();
    if cursor.eat(&Token::BracketOpen) {
        while cursor.peek() != Some(&Token::BracketClose) {
            if cursor.at_end() {
                return Err(parse_err("unexpected end of input inside type arguments".into()));
            }
            args.push(parse_type(cursor)?);
            let _ = cursor.eat(&Token::Comma);
        }
        cursor.expect_token(&Token::BracketClose)?;
    }
    Ok(TypeExpr { name, args })
}

fn parse_default(cursor: &mut TokenCursor<'_>) -> Result<DefaultExpr> {
    if !matches!(cursor.peek(), Some(Token::Identifier(_))) {
        return Ok(DefaultExpr::Literal(parse_literal(cursor)?));
    }
    let mut callee = cursor.expect_identifier()?;
    while cursor.eat(&Token::Dot) {
        callee = cursor.expect_identifier()?;
    }
    match callee.as_str() {
        "Input" | "Field" if cursor.peek() == Some(&Token::ParenOpen) => {
            Ok(DefaultExpr::Input(parse_input_call(cursor)?))
        }
        _ => Err(parse_err(format!(
            "unsupported default expression starting with \"{callee}\""
        ))),
    }
}

fn parse_input_call(cursor: &mut TokenCursor<'_>) -> Result<InputCall> {
    cursor.expect_token(&Token::ParenOpen)?;
    let mut call = InputCall::default();

    while cursor.peek() != Some(&Token::ParenClose) {
        if cursor.at_end() {
            return Err(parse_err("unexpected end of input inside Input(...)".into()));
        }
        let key = cursor.expect_identifier()?;
        cursor.expect_token(&Token::Equals)?;
        match key.as_str() {
            "default" => call.default = Some(parse_literal(cursor)?),
            "description" => call.description = Some(expect_text(cursor)?),
            "ge" => call.ge = Some(expect_number(cursor, "ge")?),
            "le" => call.le = Some(expect_number(cursor, "le")?),
            "choices" => match parse_literal(cursor)? {
                Value::Array(items) => call.choices = items,
                other => {
                    return Err(parse_err(format!("choices must be a list, got {other}")));
                }
            },
            _ => {
                tracing::debug!(key = %key, "ignoring Input argument");
                skip_expression(cursor);
            }
        }
        if !cursor.eat(&Token::Comma) && cursor.peek() != Some(&Token::ParenClose) {
            return Err(parse_err(format!(
                "expected ',' or ')' in Input(...), got {:?}",
                cursor.peek()
            )));
        }
    }

    cursor.expect_token(&Token::ParenClose)?;
    Ok(call)
}

fn expect_text(cursor: &mut TokenCursor<'_>) -> Result<String> {
    match parse_literal(cursor)? {
        Value::String(s) => Ok(s),
        other => Err(parse_err(format!("expected a string, got {other}"))),
    }
}

fn expect_number(cursor: &mut TokenCursor<'_>, key: &str) -> Result<Number> {
    match parse_literal(cursor)? {
        Value::Number(n) => Ok(n),
        other => Err(parse_err(format!("{key} must be a number, got {other}"))),
    }
}

/// Parses a literal: string, number, bool, `None`, list or tuple of literals.
fn parse_literal(cursor: &mut TokenCursor<'_>) -> Result<Value> {
    match cursor.advance().cloned() {
        Some(Token::StringLiteral(mut text)) => {
            while let Some(Token::StringLiteral(next)) = cursor.peek() {
                text.push_str(next);
                let _ = cursor.advance();
            }
            Ok(Value::String(text))
        }
        Some(Token::Number(text)) => number_value(&text, false),
        Some(Token::Symbol('-')) => match cursor.advance() {
            Some(Token::Number(text)) => number_value(text, true),
            other => Err(parse_err(format!("expected a number after '-', got {other:?}"))),
        },
        Some(Token::True) => Ok(Value::Bool(true)),
        Some(Token::False) => Ok(Value::Bool(false)),
        Some(Token::None) => Ok(Value::Null),
        Some(Token::BracketOpen) => parse_sequence(cursor, &Token::BracketClose),
        Some(Token::ParenOpen) => parse_sequence(cursor, &Token::ParenClose),
        other => Err(parse_err(format!("expected a literal value, got {other:?}"))),
    }
}

fn parse_sequence(cursor: &mut TokenCursor<'_>, close: &Token) -> Result<Value> {
    let mut items = Vec::new();
    while cursor.peek() != Some(close) {
        if cursor.at_end() {
            return Err(parse_err("unexpected end of input inside list".into()));
        }
        items.push(parse_literal(cursor)?);
        let _ = cursor.eat(&Token::Comma);
    }
    cursor.expect_token(close)?;
    Ok(Value::Array(items))
}

fn number_value(text: &str, negative: bool) -> Result<Value> {
    let invalid = || parse_err(format!("invalid number literal: {text}"));
    if text.contains(['.', 'e', 'E']) {
        let value: f64 = text.parse().map_err(|_| invalid())?;
        let value = if negative { -value } else { value };
        Number::from_f64(value).map(Value::Number).ok_or_else(invalid)
    } else {
        let value: i64 = text.parse().map_err(|_| invalid())?;
        Ok(Value::from(if negative { -value } else { value }))
    }
}

/// Skips one expression, stopping at a top-level `,` or closing `)`.
fn skip_expression(cursor: &mut TokenCursor<'_>) {
    let mut depth = 0usize;
    while let Some(tok) = cursor.peek() {
        match tok {
            Token::Comma | Token::ParenClose | Token::BracketClose | Token::Symbol('}')
                if depth == 0 =>
            {
                return;
            }
            Token::ParenOpen | Token::BracketOpen | Token::Symbol('{') => depth += 1,
            Token::ParenClose | Token::BracketClose | Token::Symbol('}') => depth -= 1,
            _ => {}
        }
        let _ = cursor.advance();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const PREDICTOR: &str = r#"
from kiln import BasePredictor, Input, Path


class Predictor(BasePredictor):
    """Echoes text back."""

    def setup(self):
        self.model = load("weights.bin")

    def predict(
        self,
        text: str = Input(description="Text to echo"),
        path: Path = Input(description="A file"),
        count: int = Input(default=3, ge=1, le=10),
        mode: str = Input(default="fast", choices=["fast", "slow"]),
        scale: float = 0.5,
    ) -> str:
        return text * count
"#;

    #[test]
    fn parse_predictor_signature() {
        let file = parse_source(PREDICTOR).expect("should parse");
        let class = file.class("Predictor").expect("predictor class");
        assert_eq!(class.bases, vec!["BasePredictor"]);
        let predict = class.predict.as_ref().expect("predict method");
        let names: Vec<&str> = predict.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["text", "path", "count", "mode", "scale"]);
        assert_eq!(predict.returns, Some(TypeExpr::named("str")));
    }

    #[test]
    fn parse_input_call_arguments() {
        let file = parse_source(PREDICTOR).expect("should parse");
        let predict = file.class("Predictor").and_then(|c| c.predict.clone()).expect("predict");
        let Some(DefaultExpr::Input(count)) = &predict.params[2].default else {
            panic!("count should use Input(...)");
        };
        assert_eq!(count.default, Some(json!(3)));
        assert_eq!(count.ge, Some(Number::from(1)));
        assert_eq!(count.le, Some(Number::from(10)));

        let Some(DefaultExpr::Input(mode)) = &predict.params[3].default else {
            panic!("mode should use Input(...)");
        };
        assert_eq!(mode.choices, vec![json!("fast"), json!("slow")]);

        assert_eq!(
            predict.params[4].default,
            Some(DefaultExpr::Literal(json!(0.5)))
        );
    }

    #[test]
    fn parse_model_fields() {
        let input = r#"
class Output(BaseModel):
    text: str
    score: float = 0.0
    files: list[Path]
    extra: Optional[str] = None
"#;
        let file = parse_source(input).expect("should parse");
        let class = file.class("Output").expect("output class");
        assert!(class.is_model());
        assert_eq!(class.fields.len(), 4);
        assert_eq!(
            class.fields[2].annotation,
            Some(TypeExpr {
                name: "list".into(),
                args: vec![TypeExpr::named("Path")],
            })
        );
        assert_eq!(class.fields[3].default, Some(DefaultExpr::Literal(Value::Null)));
    }

    #[test]
    fn parse_dotted_and_union_types() {
        let input = "class P:\n    def predict(self, a: kiln.Path, b: str | None = None) -> typing.Iterator[str]:\n        pass\n";
        let file = parse_source(input).expect("should parse");
        let predict = file.class("P").and_then(|c| c.predict.clone()).expect("predict");
        assert_eq!(predict.params[0].annotation, Some(TypeExpr::named("Path")));
        assert_eq!(
            predict.params[1].annotation,
            Some(TypeExpr {
                name: "Optional".into(),
                args: vec![TypeExpr::named("str")],
            })
        );
        assert_eq!(
            predict.returns,
            Some(TypeExpr {
                name: "Iterator".into(),
                args: vec![TypeExpr::named("str")],
            })
        );
    }

    #[test]
    fn parse_negative_and_unknown_input_arguments() {
        let input = "class P:\n    def predict(self, t: float = Input(default=-0.5, ge=-1, min_length=len(x))) -> str:\n        pass\n";
        let file = parse_source(input).expect("should parse");
        let predict = file.class("P").and_then(|c| c.predict.clone()).expect("predict");
        let Some(DefaultExpr::Input(call)) = &predict.params[0].default else {
            panic!("expected Input(...)");
        };
        assert_eq!(call.default, Some(json!(-0.5)));
        assert_eq!(call.ge, Some(Number::from(-1)));
    }

    #[test]
    fn parse_skips_star_parameters() {
        let input = "class P:\n    def predict(self, *, a: int, **kwargs) -> int:\n        pass\n";
        let file = parse_source(input).expect("should parse");
        let predict = file.class("P").and_then(|c| c.predict.clone()).expect("predict");
        assert_eq!(predict.params.len(), 1);
        assert_eq!(predict.params[0].name, "a");
    }

    #[test]
    fn parse_class_without_predict() {
        let file = parse_source("class Helper:\n    pass\n").expect("should parse");
        assert!(file.class("Helper").expect("class").predict.is_none());
    }

    #[test]
    fn parse_skips_non_literal_default() {
        let input = "class P:\n    def predict(self, a: int = compute()) -> int:\n        pass\n";
        let file = parse_source(input).expect("should parse");
        assert!(file.class("P").is_none());
        let skipped = file.skipped("P").expect("skipped");
        assert!(skipped.reason.contains("unsupported default expression"));
    }

    #[test]
    fn parse_skips_truncated_signature() {
        let file = parse_source("class P:\n    def predict(self, a: int").expect("should parse");
        let skipped = file.skipped("P").expect("skipped");
        assert!(skipped.reason.contains("predict signature"), "got: {}", skipped.reason);
    }

    #[test]
    fn parse_recovers_after_unreadable_helper() {
        let input = "class Cache(dict[str, int]):\n    def predict(self, key = lookup()):\n        pass\n\n\
                     class Predictor:\n    def predict(self, text: str) -> str:\n        pass\n";
        let file = parse_source(input).expect("should parse");
        assert_eq!(file.skipped.len(), 1);
        assert_eq!(file.skipped[0].name.as_deref(), Some("Cache"));
        let predict = file
            .class("Predictor")
            .and_then(|c| c.predict.clone())
            .expect("predict");
        assert_eq!(predict.params[0].name, "text");
    }
}
