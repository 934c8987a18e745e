//! Restricted scoring expressions for "function" selection methods.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr    := sum (( "<" | "<=" | ">" | ">=" | "==" | "!=" ) sum)?
//! sum     := product (( "+" | "-" ) product)*
//! product := unary (( "*" | "/" ) unary)*
//! unary   := "-" unary | atom
//! atom    := number | column | func "(" expr ("," expr)* ")" | "(" expr ")"
//! column  := "df[" name "]" | "df[\"" name "\"]" | identifier
//! func    := "abs" | "min" | "max"
//! ```
//!
//! Comparisons evaluate to `1.0` or `0.0`. Columns resolve against a row
//! through [`ColumnSource`]; names are checked when the expression is built.
//! Parentheses and signs nest at most [`MAX_DEPTH`] levels and an expression
//! holds at most [`MAX_TOKENS`] tokens.

use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use leadopt_common::{LeadOptError, Result};

/// Deepest allowed nesting of parentheses, signs and function calls.
pub const MAX_DEPTH: usize = 64;

/// Longest allowed expression, in tokens.
pub const MAX_TOKENS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Func {
    Abs,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Column(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

/// Anything that can hand out a numeric column value by name.
pub trait ColumnSource {
    fn column(&self, name: &str) -> Option<f64>;
}

impl ColumnSource for BTreeMap<String, f64> {
    fn column(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl ColumnSource for HashMap<String, f64> {
    fn column(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

/// A parsed scoring expression together with its source text.
#[derive(Debug, Clone)]
pub struct ScoreExpr {
    source: String,
    ast: Expr,
}

impl PartialEq for ScoreExpr {
    fn eq(&self, other: &Self) -> bool {
        self.ast == other.ast
    }
}

impl Serialize for ScoreExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl fmt::Display for ScoreExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl ScoreExpr {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        if tokens.len() > MAX_TOKENS {
            return Err(LeadOptError::Config(format!(
                "Expression has {} tokens, more than {}",
                tokens.len(),
                MAX_TOKENS
            )));
        }
        let mut parser = Parser { tokens, pos: 0, depth: 0 };
        let ast = parser.expression()?;
        if let Some(tok) = parser.peek() {
            return Err(LeadOptError::Config(format!(
                "Unexpected token {:?} in expression `{}`",
                tok, source
            )));
        }
        Ok(Self { source: source.trim().to_string(), ast })
    }

    /// Parses and checks that every referenced column is in `allowed`.
    pub fn parse_with_columns(source: &str, allowed: &[&str]) -> Result<Self> {
        let expr = Self::parse(source)?;
        expr.validate(allowed)?;
        Ok(expr)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_columns(&self.ast, &mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn validate(&self, allowed: &[&str]) -> Result<()> {
        for column in self.columns() {
            if !allowed.contains(&column) {
                return Err(LeadOptError::Config(format!(
                    "Unknown column `{}` in expression `{}`; allowed: {}",
                    column,
                    self.source,
                    allowed.join(", ")
                )));
            }
        }
        Ok(())
    }

    pub fn eval<R: ColumnSource + ?Sized>(&self, row: &R) -> Result<f64> {
        eval(&self.ast, row)
    }
}

fn collect_columns<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Column(name) => out.push(name),
        Expr::Neg(inner) => collect_columns(inner, out),
        Expr::Binary(_, l, r) => {
            collect_columns(l, out);
            collect_columns(r, out);
        }
        Expr::Call(_, args) => args.iter().for_each(|a| collect_columns(a, out)),
    }
}

fn eval<R: ColumnSource + ?Sized>(expr: &Expr, row: &R) -> Result<f64> {
    Ok(match expr {
        Expr::Number(n) => *n,
        Expr::Column(name) => row
            .column(name)
            .ok_or_else(|| LeadOptError::Parse(format!("Column `{}` missing from row", name)))?,
        Expr::Neg(inner) => -eval(inner, row)?,
        Expr::Binary(op, l, r) => {
            let (a, b) = (eval(l, row)?, eval(r, row)?);
            let truth = |c: bool| if c { 1.0 } else { 0.0 };
            match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Lt => truth(a < b),
                BinOp::Le => truth(a <= b),
                BinOp::Gt => truth(a > b),
                BinOp::Ge => truth(a >= b),
                BinOp::Eq => truth(a == b),
                BinOp::Ne => truth(a != b),
            }
        }
        Expr::Call(func, args) => {
            let values = args.iter().map(|a| eval(a, row)).collect::<Result<Vec<_>>>()?;
            match func {
                Func::Abs => values[0].abs(),
                Func::Min => values.into_iter().fold(f64::INFINITY, f64::min),
                Func::Max => values.into_iter().fold(f64::NEG_INFINITY, f64::max),
            }
        }
    })
}

// ── Tokenizer ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Column(String),
    Op(BinOp),
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let err = |msg: String| LeadOptError::Config(format!("{} in expression `{}`", msg, source));

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => { tokens.push(Token::LParen); i += 1; }
            ')' => { tokens.push(Token::RParen); i += 1; }
            ',' => { tokens.push(Token::Comma); i += 1; }
            '+' => { tokens.push(Token::Op(BinOp::Add)); i += 1; }
            '-' => { tokens.push(Token::Op(BinOp::Sub)); i += 1; }
            '*' => { tokens.push(Token::Op(BinOp::Mul)); i += 1; }
            '/' => { tokens.push(Token::Op(BinOp::Div)); i += 1; }
            '<' | '>' | '=' | '!' => {
                let next_is_eq = chars.get(i + 1) == Some(&'=');
                let op = match (c, next_is_eq) {
                    ('<', true) => BinOp::Le,
                    ('<', false) => BinOp::Lt,
                    ('>', true) => BinOp::Ge,
                    ('>', false) => BinOp::Gt,
                    ('=', true) => BinOp::Eq,
                    ('!', true) => BinOp::Ne,
                    _ => return Err(err(format!("Unexpected character `{}`", c))),
                };
                tokens.push(Token::Op(op));
                i += if next_is_eq { 2 } else { 1 };
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| err(format!("Invalid number `{}`", text)))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if ident == "df" && chars.get(j) == Some(&'[') {
                    let close = chars[j + 1..]
                        .iter()
                        .position(|&ch| ch == ']')
                        .ok_or_else(|| err("Unclosed `df[`".to_string()))?;
                    let raw: String = chars[j + 1..j + 1 + close].iter().collect();
                    let name = raw.trim().trim_matches(|ch| ch == '"' || ch == '\'').trim();
                    if name.is_empty() {
                        return Err(err("Empty column reference".to_string()));
                    }
                    tokens.push(Token::Column(name.to_string()));
                    i = j + close + 2;
                } else {
                    tokens.push(Token::Ident(ident));
                }
            }
            other => return Err(err(format!("Unexpected character `{}`", other))),
        }
    }
    Ok(tokens)
}

// ── Parser ───────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            other => Err(LeadOptError::Config(format!("Expected {:?}, found {:?}", expected, other))),
        }
    }

    fn expression(&mut self) -> Result<Expr> {
        let left = self.sum()?;
        if let Some(Token::Op(op @ (BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne))) =
            self.peek().cloned()
        {
            self.pos += 1;
            let right = self.sum()?;
            return Ok(Expr::Binary(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn sum(&mut self) -> Result<Expr> {
        let mut left = self.product()?;
        while let Some(Token::Op(op @ (BinOp::Add | BinOp::Sub))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.product()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn product(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        while let Some(Token::Op(op @ (BinOp::Mul | BinOp::Div))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// Every nested group passes through here, so this is where depth is counted.
    fn unary(&mut self) -> Result<Expr> {
        if self.depth >= MAX_DEPTH {
            return Err(LeadOptError::Config(format!(
                "Expression nests deeper than {} levels",
                MAX_DEPTH
            )));
        }
        self.depth += 1;
        let parsed = self.signed();
        self.depth -= 1;
        parsed
    }

    fn signed(&mut self) -> Result<Expr> {
        if let Some(Token::Op(BinOp::Sub)) = self.peek() {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if let Some(Token::Op(BinOp::Add)) = self.peek() {
            self.pos += 1;
            return self.unary();
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Column(name)) => Ok(Expr::Column(name)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() != Some(&Token::LParen) {
                    return Ok(Expr::Column(name));
                }
                let func = match name.as_str() {
                    "abs" => Func::Abs,
                    "min" => Func::Min,
                    "max" => Func::Max,
                    other => {
                        return Err(LeadOptError::Config(format!("Unknown function `{}`", other)))
                    }
                };
                self.pos += 1;
                let mut args = vec![self.expression()?];
                while self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    args.push(self.expression()?);
                }
                self.expect(Token::RParen)?;
                if func == Func::Abs && args.len() != 1 {
                    return Err(LeadOptError::Config("abs() takes exactly one argument".into()));
                }
                Ok(Expr::Call(func, args))
            }
            other => Err(LeadOptError::Config(format!("Unexpected token {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_default_pocket_function() {
        let expr = ScoreExpr::parse("(df[drugScore] + df[simpleScore]) / df[volume]").unwrap();
        let r = row(&[("drugScore", 0.8), ("simpleScore", 0.6), ("volume", 700.0)]);
        assert!((expr.eval(&r).unwrap() - 0.002).abs() < 1e-12);
        assert_eq!(expr.columns(), vec!["drugScore", "simpleScore", "volume"]);
    }

    #[test]
    fn test_default_ligand_function_precedence() {
        let expr = ScoreExpr::parse("-2*df[affinity] + df[total_num_interactions] * df[drug_score_total]").unwrap();
        let r = row(&[("affinity", -9.5), ("total_num_interactions", 10.0), ("drug_score_total", 0.5)]);
        assert_eq!(expr.eval(&r).unwrap(), 24.0);
    }

    #[test]
    fn test_quoted_and_bare_columns() {
        let expr = ScoreExpr::parse("df[\"surf/vol\"] + df['ell c/a'] * depth").unwrap();
        let r = row(&[("surf/vol", 1.0), ("ell c/a", 2.0), ("depth", 3.0)]);
        assert_eq!(expr.eval(&r).unwrap(), 7.0);
    }

    #[test]
    fn test_comparison_and_functions() {
        let expr = ScoreExpr::parse("abs(affinity) * (h_bond >= 2) + max(1, 2, 3) - min(4, 5)").unwrap();
        let r = row(&[("affinity", -8.0), ("h_bond", 2.0)]);
        assert_eq!(expr.eval(&r).unwrap(), 7.0);
        let r = row(&[("affinity", -8.0), ("h_bond", 1.0)]);
        assert_eq!(expr.eval(&r).unwrap(), -1.0);
    }

    #[test]
    fn test_rejects_code_and_unknown_columns() {
        assert!(ScoreExpr::parse("__import__('os').system('ls')").is_err());
        assert!(ScoreExpr::parse("df[volume] +").is_err());
        assert!(ScoreExpr::parse("exp(2)").is_err());
        assert!(ScoreExpr::parse_with_columns("df[nonsense] * 2", &["volume"]).is_err());
        assert!(ScoreExpr::parse_with_columns("df[volume] * 2", &["volume"]).is_ok());
    }

    #[test]
    fn test_missing_column_at_eval_is_error() {
        let expr = ScoreExpr::parse("df[volume]").unwrap();
        assert!(expr.eval(&row(&[])).is_err());
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let parens = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        let signs = format!("{}1", "-".repeat(500));
        for source in [parens, signs] {
            match ScoreExpr::parse(&source) {
                Err(LeadOptError::Config(msg)) => assert!(msg.contains("deeper than 64"), "{}", msg),
                other => panic!("accepted deep nesting: {:?}", other.map(|e| e.to_string())),
            }
        }
        // huge inputs hit the token cap before the parser recurses
        let huge = format!("{}1", "-".repeat(100_000));
        assert!(matches!(ScoreExpr::parse(&huge), Err(LeadOptError::Config(_))));
    }

    #[test]
    fn test_moderate_nesting_accepted() {
        let source = format!("{}df[volume]{}", "(".repeat(20), ")".repeat(20));
        let expr = ScoreExpr::parse(&source).unwrap();
        assert_eq!(expr.eval(&row(&[("volume", 3.0)])).unwrap(), 3.0);
        let negated = ScoreExpr::parse("--abs(-(-2))").unwrap();
        assert_eq!(negated.eval(&row(&[])).unwrap(), 2.0);
    }

    #[test]
    fn test_overlong_expression_rejected() {
        let chain = vec!["1"; 600].join(" + ");
        assert!(matches!(ScoreExpr::parse(&chain), Err(LeadOptError::Config(_))));
        let short = vec!["1"; 100].join(" + ");
        assert_eq!(ScoreExpr::parse(&short).unwrap().eval(&row(&[])).unwrap(), 100.0);
    }

    #[test]
    fn test_scientific_notation() {
        let expr = ScoreExpr::parse("1.5e2 + 2E-1").unwrap();
        assert!((expr.eval(&row(&[])).unwrap() - 150.2).abs() < 1e-9);
    }
}
