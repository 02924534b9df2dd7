//! Attribute predicate evaluation for the in-memory store
//!
//! Supports the subset of SQL `WHERE` syntax used by dataset filters:
//! comparisons between a column and a literal (`=`, `<>`, `!=`, `<`, `<=`,
//! `>`, `>=`), `IS [NOT] NULL`, joined with `AND`. Evaluation is
//! three-valued like SQL: a comparison against NULL is unknown.

use crate::domain::{Feature, FieldType, FieldValue};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Compare {
        column: String,
        op: Op,
        literal: Literal,
    },
    IsNull {
        column: String,
        negated: bool,
    },
}

/// A parsed conjunction of terms
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    terms: Vec<Term>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Text(String),
    Op(Op),
}

impl Predicate {
    pub fn parse(input: &str) -> Result<Self, String> {
        let tokens = tokenize(input)?;
        let mut terms = Vec::new();
        let mut pos = 0;

        loop {
            let column = match tokens.get(pos) {
                Some(Token::Ident(name)) => name.to_lowercase(),
                other => return Err(format!("expected column name, found {other:?}")),
            };
            pos += 1;

            match tokens.get(pos) {
                Some(Token::Op(op)) => {
                    let literal = match tokens.get(pos + 1) {
                        Some(Token::Number(n)) => Literal::Number(*n),
                        Some(Token::Text(s)) => Literal::Text(s.clone()),
                        other => return Err(format!("expected literal, found {other:?}")),
                    };
                    terms.push(Term::Compare {
                        column,
                        op: *op,
                        literal,
                    });
                    pos += 2;
                }
                Some(Token::Ident(kw)) if kw.eq_ignore_ascii_case("is") => {
                    pos += 1;
                    let negated = matches!(tokens.get(pos), Some(Token::Ident(k)) if k.eq_ignore_ascii_case("not"));
                    if negated {
                        pos += 1;
                    }
                    match tokens.get(pos) {
                        Some(Token::Ident(k)) if k.eq_ignore_ascii_case("null") => pos += 1,
                        other => return Err(format!("expected NULL, found {other:?}")),
                    }
                    terms.push(Term::IsNull { column, negated });
                }
                other => return Err(format!("expected operator, found {other:?}")),
            }

            match tokens.get(pos) {
                None => break,
                Some(Token::Ident(kw)) if kw.eq_ignore_ascii_case("and") => pos += 1,
                Some(other) => return Err(format!("expected AND, found {other:?}")),
            }
        }

        Ok(Self { terms })
    }

    /// `Some(true)` only when every term holds
    pub fn evaluate(&self, feature: &Feature) -> Option<bool> {
        let mut result = Some(true);
        for term in &self.terms {
            result = match (result, evaluate_term(term, feature)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            };
        }
        result
    }
}

fn evaluate_term(term: &Term, feature: &Feature) -> Option<bool> {
    match term {
        Term::IsNull { column, negated } => {
            let is_null = feature.get(column).map_or(true, FieldValue::is_null);
            Some(is_null != *negated)
        }
        Term::Compare {
            column,
            op,
            literal,
        } => {
            let value = feature.get(column)?;
            let ordering = compare(value, literal)?;
            Some(match op {
                Op::Eq => ordering == Ordering::Equal,
                Op::Ne => ordering != Ordering::Equal,
                Op::Lt => ordering == Ordering::Less,
                Op::Le => ordering != Ordering::Greater,
                Op::Gt => ordering == Ordering::Greater,
                Op::Ge => ordering != Ordering::Less,
            })
        }
    }
}

fn compare(value: &FieldValue, literal: &Literal) -> Option<Ordering> {
    match (value, literal) {
        (FieldValue::Null, _) => None,
        (FieldValue::Text(s), Literal::Text(l)) => Some(s.as_str().cmp(l.as_str())),
        (FieldValue::Date(d), Literal::Text(l)) => {
            let other = FieldValue::Text(l.clone()).coerce_to(FieldType::Date).ok()?;
            match other {
                FieldValue::Date(o) => Some(d.cmp(&o)),
                _ => None,
            }
        }
        (v, Literal::Number(n)) => {
            let v = match v.coerce_to(FieldType::Double).ok()? {
                FieldValue::Double(v) => v,
                _ => return None,
            };
            v.partial_cmp(n)
        }
        (v, Literal::Text(l)) => {
            let v = match v.coerce_to(FieldType::Double).ok()? {
                FieldValue::Double(v) => v,
                _ => return None,
            };
            v.partial_cmp(&l.trim().parse::<f64>().ok()?)
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' || c == ')' {
            // Grouping parentheses around a conjunction carry no meaning here.
            i += 1;
        } else if c == '\'' {
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                        text.push('\'');
                        i += 2;
                    }
                    Some('\'') => {
                        i += 1;
                        break;
                    }
                    Some(ch) => {
                        text.push(*ch);
                        i += 1;
                    }
                    None => return Err("unterminated string literal".to_string()),
                }
            }
            tokens.push(Token::Text(text));
        } else if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let raw: String = chars[start..i].iter().collect();
            let number = raw
                .parse::<f64>()
                .map_err(|_| format!("invalid number '{raw}'"))?;
            tokens.push(Token::Number(number));
        } else if c.is_alphabetic() || c == '_' || c == '"' {
            let quoted = c == '"';
            if quoted {
                i += 1;
            }
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            if quoted {
                if chars.get(i) != Some(&'"') {
                    return Err("unterminated quoted identifier".to_string());
                }
                i += 1;
            }
            tokens.push(Token::Ident(ident));
        } else {
            let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let (op, width) = match two.as_str() {
                "<=" => (Op::Le, 2),
                ">=" => (Op::Ge, 2),
                "<>" | "!=" => (Op::Ne, 2),
                _ => match c {
                    '=' => (Op::Eq, 1),
                    '<' => (Op::Lt, 1),
                    '>' => (Op::Gt, 1),
                    _ => return Err(format!("unexpected character '{c}'")),
                },
            };
            tokens.push(Token::Op(op));
            i += width;
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parcel(status: &str, area: f64) -> Feature {
        Feature::default()
            .with("status", FieldValue::Text(status.into()))
            .with("area", FieldValue::Double(area))
    }

    #[test]
    fn test_simple_equality() {
        let p = Predicate::parse("status = 'Current'").unwrap();
        assert_eq!(p.evaluate(&parcel("Current", 1.0)), Some(true));
        assert_eq!(p.evaluate(&parcel("Historic", 1.0)), Some(false));
    }

    #[test]
    fn test_conjunction_with_numbers() {
        let p = Predicate::parse("status <> 'Historic' AND area >= 10").unwrap();
        assert_eq!(p.evaluate(&parcel("Current", 12.5)), Some(true));
        assert_eq!(p.evaluate(&parcel("Current", 9.0)), Some(false));
    }

    #[test]
    fn test_null_is_unknown() {
        let p = Predicate::parse("area > 1").unwrap();
        let feature = Feature::default().with("area", FieldValue::Null);
        assert_eq!(p.evaluate(&feature), None);

        let is_null = Predicate::parse("area IS NULL").unwrap();
        assert_eq!(is_null.evaluate(&feature), Some(true));
        let not_null = Predicate::parse("area is not null").unwrap();
        assert_eq!(not_null.evaluate(&feature), Some(false));
    }

    #[test]
    fn test_quoted_literal_escape() {
        let p = Predicate::parse("status = 'O''Brien'").unwrap();
        assert_eq!(p.evaluate(&parcel("O'Brien", 0.0)), Some(true));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Predicate::parse("status =").is_err());
        assert!(Predicate::parse("status ~ 'x'").is_err());
        assert!(Predicate::parse("status = 'x' OR area > 1").is_err());
    }
}
