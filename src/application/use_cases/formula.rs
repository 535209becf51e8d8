//! Whitelisted arithmetic for calculated questions.
//!
//! Accepts numeric literals, known input identifiers, `+ - * /`, unary minus
//! and parentheses. Anything else is rejected at parse time.
//!
//! An identifier that would not read as one on its own (`Q-1`, `2A`) is
//! written in brackets: `[Q-1] * 2`.

use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum FormulaError {
    UnexpectedCharacter(char),
    UnexpectedToken(String),
    UnexpectedEnd,
    UnknownIdentifier(String),
    MissingInput(String),
    DivisionByZero,
    NonFinite,
}

impl fmt::Display for FormulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaError::UnexpectedCharacter(ch) => write!(f, "unexpected character '{}'", ch),
            FormulaError::UnexpectedToken(token) => write!(f, "unexpected token '{}'", token),
            FormulaError::UnexpectedEnd => write!(f, "unexpected end of formula"),
            FormulaError::UnknownIdentifier(name) => write!(f, "unknown identifier '{}'", name),
            FormulaError::MissingInput(name) => write!(f, "input '{}' is missing or not numeric", name),
            FormulaError::DivisionByZero => write!(f, "division by zero"),
            FormulaError::NonFinite => write!(f, "result is not a finite number"),
        }
    }
}

/// True when `id` can appear in a formula without brackets.
pub fn is_bare_identifier(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|ch| ch.is_alphanumeric() || ch == '_' || ch == '.')
        }
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(value) => write!(f, "{}", value),
            Token::Ident(name) => f.write_str(name),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Star => f.write_str("*"),
            Token::Slash => f.write_str("/"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Input(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn evaluate<F>(&self, lookup: &F) -> Result<f64, FormulaError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let value = match self {
            Expr::Number(value) => *value,
            Expr::Input(name) => {
                lookup(name).ok_or_else(|| FormulaError::MissingInput(name.clone()))?
            }
            Expr::Neg(inner) => -inner.evaluate(lookup)?,
            Expr::Add(left, right) => left.evaluate(lookup)? + right.evaluate(lookup)?,
            Expr::Sub(left, right) => left.evaluate(lookup)? - right.evaluate(lookup)?,
            Expr::Mul(left, right) => left.evaluate(lookup)? * right.evaluate(lookup)?,
            Expr::Div(left, right) => {
                let divisor = right.evaluate(lookup)?;
                if divisor == 0.0 {
                    return Err(FormulaError::DivisionByZero);
                }
                left.evaluate(lookup)? / divisor
            }
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(FormulaError::NonFinite)
        }
    }

    /// Identifiers referenced by the expression, in first-seen order.
    pub fn inputs(&self) -> Vec<String> {
        let mut seen = Vec::new();
        self.collect_inputs(&mut seen);
        seen
    }

    fn collect_inputs(&self, seen: &mut Vec<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Input(name) => {
                if !seen.contains(name) {
                    seen.push(name.clone());
                }
            }
            Expr::Neg(inner) => inner.collect_inputs(seen),
            Expr::Add(left, right)
            | Expr::Sub(left, right)
            | Expr::Mul(left, right)
            | Expr::Div(left, right) => {
                left.collect_inputs(seen);
                right.collect_inputs(seen);
            }
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        match ch {
            c if c.is_whitespace() => index += 1,
            '+' => {
                tokens.push(Token::Plus);
                index += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                index += 1;
            }
            '*' | '×' => {
                tokens.push(Token::Star);
                index += 1;
            }
            '/' | '÷' => {
                tokens.push(Token::Slash);
                index += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                index += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                index += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = index;
                while index < chars.len() && (chars[index].is_ascii_digit() || chars[index] == '.')
                {
                    index += 1;
                }
                let literal: String = chars[start..index].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| FormulaError::UnexpectedToken(literal.clone()))?;
                tokens.push(Token::Number(value));
            }
            '[' => {
                let start = index + 1;
                let close = chars[start..]
                    .iter()
                    .position(|ch| *ch == ']')
                    .ok_or(FormulaError::UnexpectedEnd)?;
                let name: String = chars[start..start + close].iter().collect();
                let name = name.trim();
                if name.is_empty() {
                    return Err(FormulaError::UnexpectedToken("[]".to_string()));
                }
                tokens.push(Token::Ident(name.to_string()));
                index = start + close + 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = index;
                while index < chars.len()
                    && (chars[index].is_alphanumeric() || chars[index] == '_' || chars[index] == '.')
                {
                    index += 1;
                }
                tokens.push(Token::Ident(chars[start..index].iter().collect()));
            }
            other => return Err(FormulaError::UnexpectedCharacter(other)),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    known: &'a HashSet<String>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    // expr := term (('+' | '-') term)*
    fn expression(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.position += 1;
                    left = Expr::Add(Box::new(left), Box::new(self.term()?));
                }
                Some(Token::Minus) => {
                    self.position += 1;
                    left = Expr::Sub(Box::new(left), Box::new(self.term()?));
                }
                _ => return Ok(left),
            }
        }
    }

    // term := unary (('*' | '/') unary)*
    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.position += 1;
                    left = Expr::Mul(Box::new(left), Box::new(self.unary()?));
                }
                Some(Token::Slash) => {
                    self.position += 1;
                    left = Expr::Div(Box::new(left), Box::new(self.unary()?));
                }
                _ => return Ok(left),
            }
        }
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.position += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Plus) => {
                self.position += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::Ident(name)) => {
                if self.known.contains(&name) {
                    Ok(Expr::Input(name))
                } else {
                    Err(FormulaError::UnknownIdentifier(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(FormulaError::UnexpectedToken(other.to_string())),
                    None => Err(FormulaError::UnexpectedEnd),
                }
            }
            Some(other) => Err(FormulaError::UnexpectedToken(other.to_string())),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }
}

/// Parses `source`, accepting only identifiers contained in `known`.
pub fn parse_formula(source: &str, known: &HashSet<String>) -> Result<Expr, FormulaError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        position: 0,
        known,
    };
    let expr = parser.expression()?;
    match parser.next() {
        None => Ok(expr),
        Some(token) => Err(FormulaError::UnexpectedToken(token.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn known(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_precedence_and_parentheses() {
        let expr = parse_formula("2 + 3 * 4", &known(&[])).unwrap();
        assert_eq!(expr.evaluate(&|_| None).unwrap(), 14.0);

        let expr = parse_formula("(2 + 3) * 4", &known(&[])).unwrap();
        assert_eq!(expr.evaluate(&|_| None).unwrap(), 20.0);

        let expr = parse_formula("-2 * -(3 - 5)", &known(&[])).unwrap();
        assert_eq!(expr.evaluate(&|_| None).unwrap(), -4.0);
    }

    #[test]
    fn test_inputs_substituted() {
        let values: HashMap<&str, f64> = [("Q10", 7.5), ("Q11", 2.5)].into_iter().collect();
        let expr = parse_formula("Q10 / Q11 + 1", &known(&["Q10", "Q11"])).unwrap();
        assert_eq!(expr.inputs(), vec!["Q10", "Q11"]);
        assert_eq!(expr.evaluate(&|name| values.get(name).copied()).unwrap(), 4.0);
    }

    #[test]
    fn test_rejects_unknown_identifiers_and_syntax() {
        assert_eq!(
            parse_formula("Q1 + process", &known(&["Q1"])),
            Err(FormulaError::UnknownIdentifier("process".to_string()))
        );
        assert_eq!(
            parse_formula("Q1; drop", &known(&["Q1"])),
            Err(FormulaError::UnexpectedCharacter(';'))
        );
        assert_eq!(parse_formula("(1 + 2", &known(&[])), Err(FormulaError::UnexpectedEnd));
        assert!(matches!(
            parse_formula("1 2", &known(&[])),
            Err(FormulaError::UnexpectedToken(_))
        ));
    }

    #[test]
    fn test_bracketed_identifiers() {
        let values: HashMap<&str, f64> = [("Q-1", 10.0), ("2A", 3.0)].into_iter().collect();
        let ids = known(&["Q-1", "2A"]);
        let expr = parse_formula("[Q-1] - [ 2A ] * 2", &ids).unwrap();
        assert_eq!(expr.inputs(), vec!["Q-1", "2A"]);
        assert_eq!(expr.evaluate(&|name| values.get(name).copied()).unwrap(), 4.0);

        // unbracketed, the hyphen is subtraction
        assert_eq!(
            parse_formula("Q-1", &ids),
            Err(FormulaError::UnknownIdentifier("Q".to_string()))
        );
        assert_eq!(parse_formula("[Q-1 * 2", &ids), Err(FormulaError::UnexpectedEnd));
        assert!(matches!(parse_formula("[] + 1", &ids), Err(FormulaError::UnexpectedToken(_))));
    }

    #[test]
    fn test_bare_identifier_check() {
        assert!(is_bare_identifier("Q10"));
        assert!(is_bare_identifier("pit_depth.mm"));
        assert!(!is_bare_identifier("Q-1"));
        assert!(!is_bare_identifier("2A"));
        assert!(!is_bare_identifier(""));
    }

    #[test]
    fn test_missing_input_and_division_by_zero() {
        let expr = parse_formula("A / B", &known(&["A", "B"])).unwrap();
        assert_eq!(
            expr.evaluate(&|name| if name == "A" { Some(1.0) } else { None }),
            Err(FormulaError::MissingInput("B".to_string()))
        );
        assert_eq!(
            expr.evaluate(&|name| if name == "A" { Some(1.0) } else { Some(0.0) }),
            Err(FormulaError::DivisionByZero)
        );
    }
}
