//! Key-condition and filter expression engine.
//!
//! Expressions use the store's conventional grammar: attribute names
//! (or `#name` placeholders), `:value` placeholders, comparators,
//! `BETWEEN ... AND ...`, `begins_with(...)`, `contains(...)`, and
//! `AND`/`OR` conjunctions. The validator uses [`ExpressionRefs`] to
//! check placeholder resolution and key usage without evaluating; the
//! in-memory store parses to a [`Condition`] and evaluates per item.

use std::collections::BTreeMap;
use tabletalk_core::{Item, TypedValue};
use thiserror::Error;

/// Expression parse/evaluation errors. The memory store maps these to
/// the `ExpressionError` execution kind, matching how the real store
/// rejects malformed expressions server-side.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("Unexpected character '{0}' in expression")]
    UnexpectedChar(char),

    #[error("Unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Name placeholder {0} is not defined")]
    UnresolvedName(String),

    #[error("Value placeholder {0} is not defined")]
    UnresolvedValue(String),
}

// ============================================================================
// TOKENS
// ============================================================================

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Bare attribute name (possibly a dotted path).
    Ident(String),
    /// `#placeholder`
    NamePlaceholder(String),
    /// `:placeholder`
    ValuePlaceholder(String),
    Compare(Comparator),
    And,
    Or,
    Between,
    LParen,
    RParen,
    Comma,
}

/// Tokenize an expression string.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Compare(Comparator::Eq));
            }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('>') => {
                        chars.next();
                        tokens.push(Token::Compare(Comparator::Ne));
                    }
                    Some('=') => {
                        chars.next();
                        tokens.push(Token::Compare(Comparator::Le));
                    }
                    _ => tokens.push(Token::Compare(Comparator::Lt)),
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Compare(Comparator::Ge));
                } else {
                    tokens.push(Token::Compare(Comparator::Gt));
                }
            }
            '#' | ':' => {
                let sigil = c;
                chars.next();
                let word = take_word(&mut chars);
                if word.is_empty() {
                    return Err(ExprError::UnexpectedChar(sigil));
                }
                if sigil == '#' {
                    tokens.push(Token::NamePlaceholder(format!("#{word}")));
                } else {
                    tokens.push(Token::ValuePlaceholder(format!(":{word}")));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let word = take_word(&mut chars);
                match word.to_ascii_uppercase().as_str() {
                    "AND" => tokens.push(Token::And),
                    "OR" => tokens.push(Token::Or),
                    "BETWEEN" => tokens.push(Token::Between),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            other => return Err(ExprError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

fn take_word(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }
    word
}

// ============================================================================
// REFERENCE EXTRACTION (validator support)
// ============================================================================

/// Names and placeholders referenced by an expression, for structural
/// validation. Function names are excluded from `attribute_names`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpressionRefs {
    /// Bare attribute names referenced as operands.
    pub attribute_names: Vec<String>,
    /// `#name` placeholders.
    pub name_placeholders: Vec<String>,
    /// `:value` placeholders.
    pub value_placeholders: Vec<String>,
}

/// Extract references without parsing a full condition, so projection
/// expressions (bare comma-separated names) are handled too.
pub fn extract_refs(input: &str) -> Result<ExpressionRefs, ExprError> {
    let tokens = tokenize(input)?;
    let mut refs = ExpressionRefs::default();

    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Ident(name) => {
                // An ident directly followed by '(' is a function name.
                if tokens.get(i + 1) == Some(&Token::LParen) {
                    continue;
                }
                if !refs.attribute_names.contains(name) {
                    refs.attribute_names.push(name.clone());
                }
            }
            Token::NamePlaceholder(p) => {
                if !refs.name_placeholders.contains(p) {
                    refs.name_placeholders.push(p.clone());
                }
            }
            Token::ValuePlaceholder(p) => {
                if !refs.value_placeholders.contains(p) {
                    refs.value_placeholders.push(p.clone());
                }
            }
            _ => {}
        }
    }

    Ok(refs)
}

// ============================================================================
// CONDITION AST
// ============================================================================

/// An attribute operand: bare name or `#placeholder`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Name(String),
    Placeholder(String),
}

impl Operand {
    fn resolve<'a>(
        &'a self,
        names: Option<&'a BTreeMap<String, String>>,
    ) -> Result<&'a str, ExprError> {
        match self {
            Self::Name(n) => Ok(n),
            Self::Placeholder(p) => names
                .and_then(|m| m.get(p))
                .map(String::as_str)
                .ok_or_else(|| ExprError::UnresolvedName(p.clone())),
        }
    }
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        operand: Operand,
        comparator: Comparator,
        value: String,
    },
    Between {
        operand: Operand,
        low: String,
        high: String,
    },
    BeginsWith {
        operand: Operand,
        value: String,
    },
    Contains {
        operand: Operand,
        value: String,
    },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

/// Parse a condition expression (key condition or filter).
pub fn parse(input: &str) -> Result<Condition, ExprError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let condition = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::UnexpectedToken(format!(
            "{:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(condition)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, ExprError> {
        let token = self.tokens.get(self.pos).cloned().ok_or(ExprError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExprError> {
        let token = self.next()?;
        if &token == expected {
            Ok(())
        } else {
            Err(ExprError::UnexpectedToken(format!("{:?}", token)))
        }
    }

    fn or_expr(&mut self) -> Result<Condition, ExprError> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Condition, ExprError> {
        let mut left = self.primary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.primary()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Condition, ExprError> {
        match self.next()? {
            Token::LParen => {
                let inner = self.or_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                // Function call, or comparison on a bare attribute name.
                if self.peek() == Some(&Token::LParen) {
                    self.function(name)
                } else {
                    self.comparison(Operand::Name(name))
                }
            }
            Token::NamePlaceholder(p) => self.comparison(Operand::Placeholder(p)),
            other => Err(ExprError::UnexpectedToken(format!("{:?}", other))),
        }
    }

    fn function(&mut self, name: String) -> Result<Condition, ExprError> {
        self.expect(&Token::LParen)?;
        let operand = match self.next()? {
            Token::Ident(n) => Operand::Name(n),
            Token::NamePlaceholder(p) => Operand::Placeholder(p),
            other => return Err(ExprError::UnexpectedToken(format!("{:?}", other))),
        };
        self.expect(&Token::Comma)?;
        let value = match self.next()? {
            Token::ValuePlaceholder(v) => v,
            other => return Err(ExprError::UnexpectedToken(format!("{:?}", other))),
        };
        self.expect(&Token::RParen)?;

        match name.to_ascii_lowercase().as_str() {
            "begins_with" => Ok(Condition::BeginsWith { operand, value }),
            "contains" => Ok(Condition::Contains { operand, value }),
            _ => Err(ExprError::UnknownFunction(name)),
        }
    }

    fn comparison(&mut self, operand: Operand) -> Result<Condition, ExprError> {
        match self.next()? {
            Token::Compare(comparator) => {
                let value = match self.next()? {
                    Token::ValuePlaceholder(v) => v,
                    other => return Err(ExprError::UnexpectedToken(format!("{:?}", other))),
                };
                Ok(Condition::Compare {
                    operand,
                    comparator,
                    value,
                })
            }
            Token::Between => {
                let low = match self.next()? {
                    Token::ValuePlaceholder(v) => v,
                    other => return Err(ExprError::UnexpectedToken(format!("{:?}", other))),
                };
                self.expect(&Token::And)?;
                let high = match self.next()? {
                    Token::ValuePlaceholder(v) => v,
                    other => return Err(ExprError::UnexpectedToken(format!("{:?}", other))),
                };
                Ok(Condition::Between { operand, low, high })
            }
            other => Err(ExprError::UnexpectedToken(format!("{:?}", other))),
        }
    }
}

// ============================================================================
// EVALUATION
// ============================================================================

impl Condition {
    /// Evaluate against an item. Missing attributes and type-mismatched
    /// comparisons fail the condition without error, matching store
    /// semantics; missing placeholders are errors.
    pub fn eval(
        &self,
        item: &Item,
        names: Option<&BTreeMap<String, String>>,
        values: &BTreeMap<String, TypedValue>,
    ) -> Result<bool, ExprError> {
        match self {
            Self::And(l, r) => Ok(l.eval(item, names, values)? && r.eval(item, names, values)?),
            Self::Or(l, r) => Ok(l.eval(item, names, values)? || r.eval(item, names, values)?),
            Self::Compare {
                operand,
                comparator,
                value,
            } => {
                let bound = lookup_value(values, value)?;
                let attr = operand.resolve(names)?;
                match item.get(attr) {
                    Some(actual) => Ok(compare(actual, *comparator, bound)),
                    None => Ok(false),
                }
            }
            Self::Between { operand, low, high } => {
                let low = lookup_value(values, low)?;
                let high = lookup_value(values, high)?;
                let attr = operand.resolve(names)?;
                match item.get(attr) {
                    Some(actual) => Ok(compare(actual, Comparator::Ge, low)
                        && compare(actual, Comparator::Le, high)),
                    None => Ok(false),
                }
            }
            Self::BeginsWith { operand, value } => {
                let bound = lookup_value(values, value)?;
                let attr = operand.resolve(names)?;
                match (item.get(attr), bound) {
                    (Some(TypedValue::S(s)), TypedValue::S(prefix)) => Ok(s.starts_with(prefix)),
                    _ => Ok(false),
                }
            }
            Self::Contains { operand, value } => {
                let bound = lookup_value(values, value)?;
                let attr = operand.resolve(names)?;
                let matched = match (item.get(attr), bound) {
                    (Some(TypedValue::S(s)), TypedValue::S(needle)) => {
                        s.contains(needle.as_str())
                    }
                    (Some(TypedValue::SS(set)), TypedValue::S(needle)) => set.contains(needle),
                    (Some(TypedValue::NS(set)), TypedValue::N(needle)) => set.contains(needle),
                    (Some(TypedValue::L(list)), bound) => list.contains(bound),
                    _ => false,
                };
                Ok(matched)
            }
        }
    }
}

fn lookup_value<'a>(
    values: &'a BTreeMap<String, TypedValue>,
    placeholder: &str,
) -> Result<&'a TypedValue, ExprError> {
    values
        .get(placeholder)
        .ok_or_else(|| ExprError::UnresolvedValue(placeholder.to_string()))
}

fn compare(left: &TypedValue, comparator: Comparator, right: &TypedValue) -> bool {
    use std::cmp::Ordering;

    let ordering = match (left, right) {
        (TypedValue::S(a), TypedValue::S(b)) => Some(a.cmp(b)),
        (TypedValue::N(a), TypedValue::N(b)) => match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(a), Ok(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (TypedValue::B(a), TypedValue::B(b)) => Some(a.cmp(b)),
        _ => None,
    };

    match ordering {
        Some(ordering) => match comparator {
            Comparator::Eq => ordering == Ordering::Equal,
            Comparator::Ne => ordering != Ordering::Equal,
            Comparator::Lt => ordering == Ordering::Less,
            Comparator::Le => ordering != Ordering::Greater,
            Comparator::Gt => ordering == Ordering::Greater,
            Comparator::Ge => ordering != Ordering::Less,
        },
        // Mismatched or unordered types support only (in)equality.
        None => match comparator {
            Comparator::Eq => left == right,
            Comparator::Ne => left != right,
            _ => false,
        },
    }
}

// ============================================================================
// TESTS
// ============================================================================
