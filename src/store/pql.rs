//! PQL: infix query expressions
//!
//! Translates expressions such as
//! `record_id == regex("abc.*") and start_timestamp > 1500000000`
//! into the native query form understood by [`crate::store::query::Filter`].
//!
//! Grammar:
//!
//! ```text
//! expr       := and_expr ("or" and_expr)*
//! and_expr   := unary ("and" unary)*
//! unary      := "not" unary | "(" expr ")" | comparison
//! comparison := field OP literal
//! OP         := == | != | < | <= | > | >= | like
//! field      := identifier | dotted.path | "quoted/path"
//! literal    := string | number | True | False | None
//!             | regex(string [, flags]) | exists(bool)
//! ```

use crate::error::StorageError;
use serde_json::{json, Map, Number, Value};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(Number),
    Op(CompareOp),
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    position: usize,
}

fn syntax_error(position: usize, message: impl Into<String>) -> StorageError {
    StorageError::PqlSyntax {
        position,
        message: message.into(),
    }
}

fn tokenize(input: &str) -> Result<Vec<Spanned>, StorageError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (position, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let token = match c {
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            ',' => {
                i += 1;
                Token::Comma
            }
            '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).map(|(_, c)| *c);
                let (op, width) = match (c, next) {
                    ('=', Some('=')) => (CompareOp::Eq, 2),
                    ('!', Some('=')) => (CompareOp::Ne, 2),
                    ('<', Some('=')) => (CompareOp::Le, 2),
                    ('>', Some('=')) => (CompareOp::Ge, 2),
                    ('<', _) => (CompareOp::Lt, 1),
                    ('>', _) => (CompareOp::Gt, 1),
                    _ => return Err(syntax_error(position, format!("unexpected '{}'", c))),
                };
                i += width;
                Token::Op(op)
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    let Some(&(_, ch)) = chars.get(i) else {
                        return Err(syntax_error(position, "unterminated string"));
                    };
                    i += 1;
                    match ch {
                        '\\' => {
                            let Some(&(_, escaped)) = chars.get(i) else {
                                return Err(syntax_error(position, "unterminated string"));
                            };
                            i += 1;
                            match escaped {
                                'n' => text.push('\n'),
                                't' => text.push('\t'),
                                '\\' | '"' | '\'' => text.push(escaped),
                                // Keep regex escapes such as \d intact
                                other => {
                                    text.push('\\');
                                    text.push(other);
                                }
                            }
                        }
                        ch if ch == quote => break,
                        ch => text.push(ch),
                    }
                }
                Token::Str(text)
            }
            c if c.is_ascii_digit()
                || (c == '-'
                    && chars
                        .get(i + 1)
                        .map(|(_, n)| n.is_ascii_digit() || *n == '.')
                        .unwrap_or(false)) =>
            {
                let start = i;
                i += 1;
                while let Some(&(_, ch)) = chars.get(i) {
                    if ch.is_ascii_digit() || matches!(ch, '.' | 'e' | 'E' | '_') {
                        i += 1;
                    } else if matches!(ch, '+' | '-')
                        && matches!(chars.get(i - 1).map(|(_, p)| *p), Some('e' | 'E'))
                    {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i]
                    .iter()
                    .map(|(_, ch)| *ch)
                    .filter(|ch| *ch != '_')
                    .collect();
                Token::Number(parse_number(&text).ok_or_else(|| {
                    syntax_error(position, format!("invalid number '{}'", text))
                })?)
            }
            c if c.is_alphabetic() || c == '_' || c == '/' => {
                let start = i;
                while let Some(&(_, ch)) = chars.get(i) {
                    if ch.is_alphanumeric() || matches!(ch, '_' | '.' | '/' | '-') {
                        i += 1;
                    } else {
                        break;
                    }
                }
                Token::Ident(chars[start..i].iter().map(|(_, ch)| *ch).collect())
            }
            other => return Err(syntax_error(position, format!("unexpected '{}'", other))),
        };
        tokens.push(Spanned { token, position });
    }

    Ok(tokens)
}

fn parse_number(text: &str) -> Option<Number> {
    if !text.contains(['.', 'e', 'E']) {
        if let Ok(i) = text.parse::<i64>() {
            return Some(Number::from(i));
        }
    }
    text.parse::<f64>().ok().and_then(Number::from_f64)
}

/// Right-hand side of a comparison
enum Literal {
    Value(Value),
    Regex { pattern: String, flags: String },
    Exists(bool),
}

struct Parser {
    tokens: Vec<Spanned>,
    cursor: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.cursor)
            .map(|s| s.position)
            .unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).map(|s| s.token.clone());
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word == keyword)
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), StorageError> {
        let position = self.position();
        match self.next() {
            Some(token) if token == expected => Ok(()),
            _ => Err(syntax_error(position, format!("expected {}", what))),
        }
    }

    fn parse_or(&mut self) -> Result<Value, StorageError> {
        let mut clauses = vec![self.parse_and()?];
        while self.peek_keyword("or") {
            self.cursor += 1;
            clauses.push(self.parse_and()?);
        }
        Ok(combine("$or", clauses))
    }

    fn parse_and(&mut self) -> Result<Value, StorageError> {
        let mut clauses = vec![self.parse_unary()?];
        while self.peek_keyword("and") {
            self.cursor += 1;
            clauses.push(self.parse_unary()?);
        }
        Ok(combine("$and", clauses))
    }

    fn parse_unary(&mut self) -> Result<Value, StorageError> {
        if self.peek_keyword("not") {
            self.cursor += 1;
            let inner = self.parse_unary()?;
            return Ok(json!({ "$nor": [inner] }));
        }
        if self.peek() == Some(&Token::LParen) {
            self.cursor += 1;
            let inner = self.parse_or()?;
            self.expect(Token::RParen, "')'")?;
            return Ok(inner);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Value, StorageError> {
        let position = self.position();
        let field = match self.next() {
            Some(Token::Ident(name)) if !is_reserved_word(&name) => name,
            Some(Token::Str(name)) => name,
            _ => return Err(syntax_error(position, "expected a field name")),
        };

        let position = self.position();
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            Some(Token::Ident(word)) if word == "like" => CompareOp::Like,
            _ => return Err(syntax_error(position, "expected a comparison operator")),
        };

        let literal = self.parse_literal()?;
        translate(field, op, literal).map_err(|message| syntax_error(position, message))
    }

    fn parse_literal(&mut self) -> Result<Literal, StorageError> {
        let position = self.position();
        match self.next() {
            Some(Token::Str(s)) => Ok(Literal::Value(Value::String(s))),
            Some(Token::Number(n)) => Ok(Literal::Value(Value::Number(n))),
            Some(Token::Ident(word)) => match word.as_str() {
                "True" | "true" => Ok(Literal::Value(Value::Bool(true))),
                "False" | "false" => Ok(Literal::Value(Value::Bool(false))),
                "None" | "null" => Ok(Literal::Value(Value::Null)),
                "regex" => {
                    self.expect(Token::LParen, "'(' after regex")?;
                    let pattern = self.expect_string("regex pattern")?;
                    let flags = if self.peek() == Some(&Token::Comma) {
                        self.cursor += 1;
                        self.expect_string("regex flags")?
                    } else {
                        String::new()
                    };
                    self.expect(Token::RParen, "')' after regex")?;
                    Ok(Literal::Regex { pattern, flags })
                }
                "exists" => {
                    self.expect(Token::LParen, "'(' after exists")?;
                    let position = self.position();
                    let flag = match self.next() {
                        Some(Token::Ident(w)) if w == "True" || w == "true" => true,
                        Some(Token::Ident(w)) if w == "False" || w == "false" => false,
                        _ => return Err(syntax_error(position, "exists expects a boolean")),
                    };
                    self.expect(Token::RParen, "')' after exists")?;
                    Ok(Literal::Exists(flag))
                }
                other => Err(syntax_error(
                    position,
                    format!("unexpected identifier '{}' in literal position", other),
                )),
            },
            _ => Err(syntax_error(position, "expected a literal")),
        }
    }

    fn expect_string(&mut self, what: &str) -> Result<String, StorageError> {
        let position = self.position();
        match self.next() {
            Some(Token::Str(s)) => Ok(s),
            _ => Err(syntax_error(position, format!("expected {}", what))),
        }
    }
}

fn is_reserved_word(word: &str) -> bool {
    matches!(word, "and" | "or" | "not" | "like")
}

/// Merge clauses under a logical operator, flattening nested uses of the same operator
fn combine(op: &str, clauses: Vec<Value>) -> Value {
    if clauses.len() == 1 {
        return clauses.into_iter().next().unwrap_or(Value::Null);
    }
    let mut flat = Vec::with_capacity(clauses.len());
    for clause in clauses {
        match clause {
            Value::Object(mut map) if map.len() == 1 && map.contains_key(op) => {
                if let Some(Value::Array(items)) = map.remove(op) {
                    flat.extend(items);
                }
            }
            other => flat.push(other),
        }
    }
    let mut map = Map::new();
    map.insert(op.to_string(), Value::Array(flat));
    Value::Object(map)
}

fn translate(field: String, op: CompareOp, literal: Literal) -> Result<Value, String> {
    let condition = match (op, literal) {
        (CompareOp::Eq, Literal::Value(v)) => v,
        (CompareOp::Eq, Literal::Regex { pattern, flags }) => regex_condition(pattern, flags),
        (CompareOp::Eq, Literal::Exists(flag)) => json!({ "$exists": flag }),
        (CompareOp::Ne, Literal::Value(v)) => json!({ "$ne": v }),
        (CompareOp::Ne, Literal::Regex { pattern, flags }) => {
            json!({ "$not": regex_condition(pattern, flags) })
        }
        (CompareOp::Ne, Literal::Exists(flag)) => json!({ "$exists": !flag }),
        (CompareOp::Like, Literal::Value(Value::String(pattern))) => {
            json!({ "$regex": like_to_regex(&pattern) })
        }
        (CompareOp::Like, _) => return Err("like expects a string pattern".to_string()),
        (op, Literal::Value(v)) => {
            let key = match op {
                CompareOp::Lt => "$lt",
                CompareOp::Le => "$lte",
                CompareOp::Gt => "$gt",
                _ => "$gte",
            };
            json!({ key: v })
        }
        (_, _) => {
            return Err("regex() and exists() only support == and !=".to_string());
        }
    };
    let mut map = Map::new();
    map.insert(field, condition);
    Ok(Value::Object(map))
}

fn regex_condition(pattern: String, flags: String) -> Value {
    if flags.is_empty() {
        json!({ "$regex": pattern })
    } else {
        json!({ "$regex": pattern, "$options": flags })
    }
}

/// SQL wildcards to an anchored regex: `%` is any run, `_` is any single character
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

/// Translate a PQL expression into a native query object
pub fn translate_pql(input: &str) -> Result<Value, StorageError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(syntax_error(0, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        cursor: 0,
        end: input.len(),
    };
    let query = parser.parse_or()?;
    if parser.cursor < parser.tokens.len() {
        return Err(syntax_error(parser.position(), "unexpected trailing input"));
    }
    Ok(query)
}
