/*
 * expr.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Expression grammar for variable spans and tag arguments.
//!
//! Supports literal values (strings, numbers, booleans, null, lists, maps
//! with quoted or unquoted keys), variable paths with dotted and bracket
//! access, unary and binary operators with conventional precedence, and
//! left-associative filter chains (`expression | filter(args)`).
//!
//! Control keywords (`and`, `or`, `not`, `in`, `true`, `false`, `null`)
//! are recognized per whole token only: an identifier that merely starts
//! with a keyword is an ordinary identifier.

use serde::{Deserialize, Serialize};

use crate::error::{TemplateError, TemplateResult};

/// A parsed expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Ordered list literal: `[1, "two", x]`
    List(Vec<Expr>),
    /// Map literal: `{key: 1, "other key": 2}`. Entry order is preserved.
    Map(Vec<(String, Expr)>),
    /// A variable path: `user.name`, `items[0]`, `row[key]`
    Var(Vec<PathSeg>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Filter application: `expr | name(args...)`
    Filter {
        name: String,
        input: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Macro invocation: `header(title)` or `forms.input("x")`
    Call {
        path: Vec<String>,
        args: Vec<Expr>,
    },
}

/// One segment of a variable path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PathSeg {
    /// Dotted or root access by name.
    Key(String),
    /// Numeric index access: `items.0`
    Index(i64),
    /// Bracket access with a computed key: `row[key]`
    Dynamic(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

/// A lexed expression token.
#[derive(Debug, Clone, PartialEq)]
enum ExprToken {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Op(&'static str),
}

impl ExprToken {
    fn describe(&self) -> String {
        match self {
            ExprToken::Ident(s) => format!("\"{s}\""),
            ExprToken::Str(s) => format!("string \"{s}\""),
            ExprToken::Int(n) => format!("number {n}"),
            ExprToken::Float(f) => format!("number {f}"),
            ExprToken::Op(op) => format!("\"{op}\""),
        }
    }
}

const MULTI_CHAR_OPS: &[&str] = &["==", "!=", "<=", ">=", "//"];
const SINGLE_CHAR_OPS: &[char] = &[
    '+', '-', '*', '/', '%', '|', '.', ',', ':', '(', ')', '[', ']', '{', '}', '<', '>', '=', '!',
];

fn lex_expr(input: &str, line: usize) -> TemplateResult<Vec<ExprToken>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        // Multi-character operators first.
        if let Some(op) = MULTI_CHAR_OPS.iter().find(|op| input[i..].starts_with(**op)) {
            tokens.push(ExprToken::Op(op));
            chars.next();
            chars.next();
            continue;
        }

        if c == '"' || c == '\'' {
            chars.next();
            let mut s = String::new();
            let mut closed = false;
            while let Some((_, ch)) = chars.next() {
                if ch == '\\' {
                    match chars.next() {
                        Some((_, 'n')) => s.push('\n'),
                        Some((_, 't')) => s.push('\t'),
                        Some((_, 'r')) => s.push('\r'),
                        Some((_, other)) => s.push(other),
                        None => break,
                    }
                } else if ch == c {
                    closed = true;
                    break;
                } else {
                    s.push(ch);
                }
            }
            if !closed {
                return Err(TemplateError::parse("unterminated string literal", line));
            }
            tokens.push(ExprToken::Str(s));
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            let mut end = i;
            let mut seen_dot = false;
            while let Some(&(j, ch)) = chars.peek() {
                if ch.is_ascii_digit() {
                    end = j + ch.len_utf8();
                    chars.next();
                } else if ch == '.' && !seen_dot {
                    // Only a digit after the dot makes this a float; `1.x`
                    // is index/member access on the number 1.
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    match lookahead.peek() {
                        Some(&(_, d)) if d.is_ascii_digit() => {
                            seen_dot = true;
                            end = j + 1;
                            chars.next();
                        }
                        _ => break,
                    }
                } else {
                    break;
                }
            }
            let text = &input[start..end];
            if seen_dot {
                let f: f64 = text
                    .parse()
                    .map_err(|_| TemplateError::parse(format!("invalid number \"{text}\""), line))?;
                tokens.push(ExprToken::Float(f));
            } else {
                let n: i64 = text
                    .parse()
                    .map_err(|_| TemplateError::parse(format!("invalid number \"{text}\""), line))?;
                tokens.push(ExprToken::Int(n));
            }
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            let mut end = i;
            while let Some(&(j, ch)) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    end = j + ch.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(ExprToken::Ident(input[start..end].to_string()));
            continue;
        }

        if SINGLE_CHAR_OPS.contains(&c) {
            let op = SINGLE_CHAR_OPS
                .iter()
                .position(|&x| x == c)
                .map(|idx| {
                    // Map back to a static str for the token.
                    const NAMES: &[&str] = &[
                        "+", "-", "*", "/", "%", "|", ".", ",", ":", "(", ")", "[", "]", "{",
                        "}", "<", ">", "=", "!",
                    ];
                    NAMES[idx]
                })
                .expect("operator is in table");
            tokens.push(ExprToken::Op(op));
            chars.next();
            continue;
        }

        return Err(TemplateError::parse(
            format!("unexpected character \"{c}\" in expression"),
            line,
        ));
    }

    Ok(tokens)
}

/// A cursor over lexed expression tokens.
///
/// Used directly by the template parser for fixed tag grammars (`for x in
/// expr`, `import "file" as name`, ...) and by [`parse_expr`] for
/// free-form expressions.
pub(crate) struct ArgParser {
    tokens: Vec<ExprToken>,
    pos: usize,
    line: usize,
}

impl ArgParser {
    pub fn new(input: &str, line: usize) -> TemplateResult<Self> {
        Ok(ArgParser {
            tokens: lex_expr(input, line)?,
            pos: 0,
            line,
        })
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&ExprToken> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<ExprToken> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::parse(message, self.line)
    }

    fn unexpected(&self, wanted: &str) -> TemplateError {
        match self.peek() {
            Some(tok) => self.error(format!("expected {wanted}, found {}", tok.describe())),
            None => self.error(format!("expected {wanted}, found end of expression")),
        }
    }

    /// Consume an operator token if it is next.
    pub fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(ExprToken::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect_op(&mut self, op: &str) -> TemplateResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("\"{op}\"")))
        }
    }

    /// Consume an identifier token equal to `word` (whole-token match).
    pub fn eat_keyword(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(ExprToken::Ident(s)) if s == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect_keyword(&mut self, word: &str) -> TemplateResult<()> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("\"{word}\"")))
        }
    }

    pub fn expect_ident(&mut self) -> TemplateResult<String> {
        match self.peek() {
            Some(ExprToken::Ident(_)) => match self.next() {
                Some(ExprToken::Ident(s)) => Ok(s),
                _ => unreachable!(),
            },
            _ => Err(self.unexpected("an identifier")),
        }
    }

    pub fn expect_str_literal(&mut self) -> TemplateResult<String> {
        match self.peek() {
            Some(ExprToken::Str(_)) => match self.next() {
                Some(ExprToken::Str(s)) => Ok(s),
                _ => unreachable!(),
            },
            Some(tok) => Err(self.error(format!("expected a quoted string, found {}", tok.describe()))),
            None => Err(self.error("expected a quoted string, found end of expression")),
        }
    }

    pub fn expect_end(&mut self) -> TemplateResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(tok) => Err(self.error(format!("unexpected {}", tok.describe()))),
        }
    }

    // ------------------------------------------------------------------
    // Expression grammar (precedence climbing)
    // ------------------------------------------------------------------

    /// Parse a full expression including filter chains.
    pub fn parse_expression(&mut self) -> TemplateResult<Expr> {
        let mut expr = self.parse_or()?;
        while self.eat_op("|") {
            let name = self.expect_ident()?;
            let mut args = Vec::new();
            if self.eat_op("(") {
                if !self.eat_op(")") {
                    loop {
                        args.push(self.parse_or()?);
                        if self.eat_op(",") {
                            continue;
                        }
                        self.expect_op(")")?;
                        break;
                    }
                }
            }
            expr = Expr::Filter {
                name,
                input: Box::new(expr),
                args,
            };
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> TemplateResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> TemplateResult<Expr> {
        let mut lhs = self.parse_not()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_not()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> TemplateResult<Expr> {
        if self.eat_keyword("not") {
            let expr = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> TemplateResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = if self.eat_op("==") {
                BinOp::Eq
            } else if self.eat_op("!=") {
                BinOp::Ne
            } else if self.eat_op("<=") {
                BinOp::Le
            } else if self.eat_op(">=") {
                BinOp::Ge
            } else if self.eat_op("<") {
                BinOp::Lt
            } else if self.eat_op(">") {
                BinOp::Gt
            } else if self.eat_keyword("in") {
                BinOp::In
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_additive(&mut self) -> TemplateResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> TemplateResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_unary(&mut self) -> TemplateResult<Expr> {
        if self.eat_op("-") {
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> TemplateResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_op(".") {
                let seg = match self.next() {
                    Some(ExprToken::Ident(name)) => PathSeg::Key(name),
                    Some(ExprToken::Int(n)) => PathSeg::Index(n),
                    Some(tok) => {
                        return Err(self.error(format!(
                            "expected a property name after \".\", found {}",
                            tok.describe()
                        )));
                    }
                    None => {
                        return Err(self.error("expected a property name after \".\""));
                    }
                };
                expr = push_path_segment(expr, seg, self.line)?;
            } else if self.eat_op("[") {
                let index = self.parse_expression()?;
                self.expect_op("]")?;
                let seg = match index {
                    Expr::Str(s) => PathSeg::Key(s),
                    Expr::Int(n) => PathSeg::Index(n),
                    other => PathSeg::Dynamic(Box::new(other)),
                };
                expr = push_path_segment(expr, seg, self.line)?;
            } else if self.eat_op("(") {
                // A call is only valid on a plain dotted path (macro or
                // imported macro); anything else is a parse failure.
                let path = match &expr {
                    Expr::Var(segs) => {
                        let mut path = Vec::with_capacity(segs.len());
                        for seg in segs {
                            match seg {
                                PathSeg::Key(k) => path.push(k.clone()),
                                _ => {
                                    return Err(
                                        self.error("only named macros can be called")
                                    );
                                }
                            }
                        }
                        path
                    }
                    _ => return Err(self.error("only named macros can be called")),
                };
                let mut args = Vec::new();
                if !self.eat_op(")") {
                    loop {
                        args.push(self.parse_or()?);
                        if self.eat_op(",") {
                            continue;
                        }
                        self.expect_op(")")?;
                        break;
                    }
                }
                expr = Expr::Call { path, args };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> TemplateResult<Expr> {
        match self.next() {
            Some(ExprToken::Int(n)) => Ok(Expr::Int(n)),
            Some(ExprToken::Float(f)) => Ok(Expr::Float(f)),
            Some(ExprToken::Str(s)) => Ok(Expr::Str(s)),
            Some(ExprToken::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                _ => Ok(Expr::Var(vec![PathSeg::Key(name)])),
            },
            Some(ExprToken::Op("(")) => {
                let expr = self.parse_expression()?;
                self.expect_op(")")?;
                Ok(expr)
            }
            Some(ExprToken::Op("[")) => {
                let mut items = Vec::new();
                if !self.eat_op("]") {
                    loop {
                        items.push(self.parse_or()?);
                        if self.eat_op(",") {
                            if self.eat_op("]") {
                                break;
                            }
                            continue;
                        }
                        self.expect_op("]")?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            Some(ExprToken::Op("{")) => {
                let mut entries = Vec::new();
                if !self.eat_op("}") {
                    loop {
                        let key = match self.next() {
                            Some(ExprToken::Ident(k)) => k,
                            Some(ExprToken::Str(k)) => k,
                            Some(tok) => {
                                return Err(self.error(format!(
                                    "expected a map key, found {}",
                                    tok.describe()
                                )));
                            }
                            None => return Err(self.error("expected a map key")),
                        };
                        self.expect_op(":")?;
                        let value = self.parse_or()?;
                        entries.push((key, value));
                        if self.eat_op(",") {
                            if self.eat_op("}") {
                                break;
                            }
                            continue;
                        }
                        self.expect_op("}")?;
                        break;
                    }
                }
                Ok(Expr::Map(entries))
            }
            Some(tok) => Err(self.error(format!(
                "expected an expression, found {}",
                tok.describe()
            ))),
            None => Err(self.error("expected an expression, found end of input")),
        }
    }
}

/// Append a path segment to a variable path, or reject access on
/// non-path expressions.
fn push_path_segment(expr: Expr, seg: PathSeg, line: usize) -> TemplateResult<Expr> {
    match expr {
        Expr::Var(mut segs) => {
            segs.push(seg);
            Ok(Expr::Var(segs))
        }
        Expr::Int(n) => {
            // `1.x` style access makes no sense; report it clearly.
            Err(TemplateError::parse(
                format!("cannot access a property of the number {n}"),
                line,
            ))
        }
        other => {
            // Property access on literal lists/maps/strings is permitted:
            // rewrite as a dynamic lookup on the literal.
            Ok(Expr::Var(vec![
                PathSeg::Dynamic(Box::new(other)),
                seg,
            ]))
        }
    }
}

/// Parse a complete expression from a span interior.
pub fn parse_expr(input: &str, line: usize) -> TemplateResult<Expr> {
    let mut parser = ArgParser::new(input, line)?;
    let expr = parser.parse_expression()?;
    parser.expect_end()?;
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> Expr {
        parse_expr(input, 1).unwrap_or_else(|e| panic!("{input:?} should parse: {e}"))
    }

    fn var(path: &[&str]) -> Expr {
        Expr::Var(path.iter().map(|s| PathSeg::Key(s.to_string())).collect())
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse("42"), Expr::Int(42));
        assert_eq!(parse("2.5"), Expr::Float(2.5));
        assert_eq!(parse("\"hi\""), Expr::Str("hi".to_string()));
        assert_eq!(parse("'hi'"), Expr::Str("hi".to_string()));
        assert_eq!(parse("true"), Expr::Bool(true));
        assert_eq!(parse("false"), Expr::Bool(false));
        assert_eq!(parse("null"), Expr::Null);
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(parse(r#""a\nb""#), Expr::Str("a\nb".to_string()));
        assert_eq!(parse(r#""say \"hi\"""#), Expr::Str("say \"hi\"".to_string()));
    }

    #[test]
    fn test_variable_paths() {
        assert_eq!(parse("name"), var(&["name"]));
        assert_eq!(parse("user.name"), var(&["user", "name"]));
        assert_eq!(
            parse("items.0"),
            Expr::Var(vec![PathSeg::Key("items".to_string()), PathSeg::Index(0)])
        );
        assert_eq!(
            parse("items[2]"),
            Expr::Var(vec![PathSeg::Key("items".to_string()), PathSeg::Index(2)])
        );
        assert_eq!(
            parse("row[key]"),
            Expr::Var(vec![
                PathSeg::Key("row".to_string()),
                PathSeg::Dynamic(Box::new(var(&["key"]))),
            ])
        );
        assert_eq!(
            parse("row[\"the key\"]"),
            Expr::Var(vec![
                PathSeg::Key("row".to_string()),
                PathSeg::Key("the key".to_string()),
            ])
        );
    }

    #[test]
    fn test_keyword_prefix_is_plain_identifier() {
        // "andif" starts with the keyword "and" but must be an identifier.
        assert_eq!(parse("andif"), var(&["andif"]));
        assert_eq!(parse("order"), var(&["order"]));
        assert_eq!(parse("notable"), var(&["notable"]));
        assert_eq!(parse("interior"), var(&["interior"]));
    }

    #[test]
    fn test_operator_precedence() {
        // a or b and c  =>  a or (b and c)
        assert_eq!(
            parse("a or b and c"),
            Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(var(&["a"])),
                rhs: Box::new(Expr::Binary {
                    op: BinOp::And,
                    lhs: Box::new(var(&["b"])),
                    rhs: Box::new(var(&["c"])),
                }),
            }
        );

        // 1 + 2 * 3  =>  1 + (2 * 3)
        assert_eq!(
            parse("1 + 2 * 3"),
            Expr::Binary {
                op: BinOp::Add,
                lhs: Box::new(Expr::Int(1)),
                rhs: Box::new(Expr::Binary {
                    op: BinOp::Mul,
                    lhs: Box::new(Expr::Int(2)),
                    rhs: Box::new(Expr::Int(3)),
                }),
            }
        );
    }

    #[test]
    fn test_comparison_and_membership() {
        assert_eq!(
            parse("x in items"),
            Expr::Binary {
                op: BinOp::In,
                lhs: Box::new(var(&["x"])),
                rhs: Box::new(var(&["items"])),
            }
        );
        assert_eq!(
            parse("count >= 10"),
            Expr::Binary {
                op: BinOp::Ge,
                lhs: Box::new(var(&["count"])),
                rhs: Box::new(Expr::Int(10)),
            }
        );
    }

    #[test]
    fn test_unary() {
        assert_eq!(
            parse("not ok"),
            Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(var(&["ok"])),
            }
        );
        assert_eq!(
            parse("-n"),
            Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(var(&["n"])),
            }
        );
    }

    #[test]
    fn test_filter_chain_is_left_associative() {
        let parsed = parse("name | trim | pad(10, \"-\")");
        match parsed {
            Expr::Filter { name, input, args } => {
                assert_eq!(name, "pad");
                assert_eq!(args, vec![Expr::Int(10), Expr::Str("-".to_string())]);
                match *input {
                    Expr::Filter { name, input, args } => {
                        assert_eq!(name, "trim");
                        assert!(args.is_empty());
                        assert_eq!(*input, var(&["name"]));
                    }
                    other => panic!("expected inner filter, got {other:?}"),
                }
            }
            other => panic!("expected filter, got {other:?}"),
        }
    }

    #[test]
    fn test_filter_applies_to_whole_expression() {
        let parsed = parse("a + b | join(\", \")");
        assert!(matches!(parsed, Expr::Filter { ref name, .. } if name == "join"));
    }

    #[test]
    fn test_list_literal() {
        assert_eq!(
            parse("[1, \"two\", x]"),
            Expr::List(vec![Expr::Int(1), Expr::Str("two".to_string()), var(&["x"])])
        );
        assert_eq!(parse("[]"), Expr::List(vec![]));
    }

    #[test]
    fn test_map_literal_nested_braces_and_commas() {
        assert_eq!(
            parse("{a: 1, \"b key\": {inner: [1, 2]}, c: \"x,y\"}"),
            Expr::Map(vec![
                ("a".to_string(), Expr::Int(1)),
                (
                    "b key".to_string(),
                    Expr::Map(vec![(
                        "inner".to_string(),
                        Expr::List(vec![Expr::Int(1), Expr::Int(2)]),
                    )])
                ),
                ("c".to_string(), Expr::Str("x,y".to_string())),
            ])
        );
    }

    #[test]
    fn test_macro_call() {
        assert_eq!(
            parse("input(\"name\", 3)"),
            Expr::Call {
                path: vec!["input".to_string()],
                args: vec![Expr::Str("name".to_string()), Expr::Int(3)],
            }
        );
        assert_eq!(
            parse("forms.input(x)"),
            Expr::Call {
                path: vec!["forms".to_string(), "input".to_string()],
                args: vec![var(&["x"])],
            }
        );
    }

    #[test]
    fn test_parse_failures_carry_line() {
        let err = parse_expr("1 +", 4).unwrap_err();
        assert!(matches!(err, TemplateError::Parse { line: 4, .. }));

        let err = parse_expr("{a 1}", 2).unwrap_err();
        assert!(matches!(err, TemplateError::Parse { line: 2, .. }));

        let err = parse_expr("\"unterminated", 9).unwrap_err();
        assert!(matches!(err, TemplateError::Parse { line: 9, .. }));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(parse_expr("a b", 1).is_err());
    }

    #[test]
    fn test_floor_division() {
        assert_eq!(
            parse("7 // 2"),
            Expr::Binary {
                op: BinOp::FloorDiv,
                lhs: Box::new(Expr::Int(7)),
                rhs: Box::new(Expr::Int(2)),
            }
        );
    }
}
