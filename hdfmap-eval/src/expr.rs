//! Restricted expression language over [`Value`]s.
//!
//! Supports arithmetic, comparisons (chained), boolean logic, the
//! `a if cond else b` conditional, tuples and list literals, indexing and
//! slicing, and calls into the whitelisted [`crate::functions`] namespace.
//! There is no assignment, no attribute access beyond `shape`/`size`/`ndim`
//! and no way to call anything outside the whitelist.

use std::fmt;

use hdfmap_core::{Data, Error, Result, SelectItem, Selection, SliceSpec, Value};
use ndarray::{ArrayD, IxDyn, Zip};

use crate::functions;

// ── AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

/// Parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
    None,
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `a < b <= c`: every adjacent pair must hold.
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        function: String,
        args: Vec<Expr>,
    },
    Method {
        target: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Property {
        target: Box<Expr>,
        name: String,
    },
    Index {
        target: Box<Expr>,
        items: Vec<IndexExpr>,
    },
}

/// One item inside `[...]`.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexExpr {
    Single(Expr),
    Slice {
        start: Option<Expr>,
        stop: Option<Expr>,
        step: Option<Expr>,
    },
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Float(f64),
    Int(i64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Eof,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(x) => write!(f, "{x}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Ident(s) => write!(f, "'{s}'"),
            Self::Op(op) => write!(f, "'{op}'"),
            Self::LParen => write!(f, "'('"),
            Self::RParen => write!(f, "')'"),
            Self::LBracket => write!(f, "'['"),
            Self::RBracket => write!(f, "']'"),
            Self::Comma => write!(f, "','"),
            Self::Colon => write!(f, "':'"),
            Self::Dot => write!(f, "'.'"),
            Self::Eof => write!(f, "end of expression"),
        }
    }
}

/// Two-character operators come first so they win over their prefixes.
const OPERATORS: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "<", ">", "!",
];

const KEYWORDS: &[&str] = &["and", "or", "not", "if", "else", "in"];

fn tokenize(source: &str) -> Result<Vec<Tok>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let single = match c {
            '(' => Some(Tok::LParen),
            ')' => Some(Tok::RParen),
            '[' => Some(Tok::LBracket),
            ']' => Some(Tok::RBracket),
            ',' => Some(Tok::Comma),
            ':' => Some(Tok::Colon),
            '.' if !chars.get(i + 1).is_some_and(char::is_ascii_digit) => Some(Tok::Dot),
            _ => None,
        };
        if let Some(tok) = single {
            tokens.push(tok);
            i += 1;
        } else if c == '\'' || c == '"' {
            let (text, end) = string_literal(source, &chars, i)?;
            tokens.push(Tok::Str(text));
            i = end;
        } else if c.is_ascii_digit() || c == '.' {
            let (tok, end) = number(source, &chars, i)?;
            tokens.push(tok);
            i = end;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Tok::Ident(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let op = OPERATORS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or_else(|| Error::syntax(source, format!("unexpected character '{c}'")))?;
            tokens.push(Tok::Op(*op));
            i += op.len();
        }
    }
    tokens.push(Tok::Eof);
    Ok(tokens)
}

fn string_literal(source: &str, chars: &[char], start: usize) -> Result<(String, usize)> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                text.push(match chars[i + 1] {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((text, i + 1)),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    Err(Error::syntax(source, "unterminated string literal"))
}

fn number(source: &str, chars: &[char], start: usize) -> Result<(Tok, usize)> {
    let mut i = start;
    let mut is_float = false;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        is_float = true;
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < chars.len() && matches!(chars[i], 'e' | 'E') {
        let mut j = i + 1;
        if j < chars.len() && matches!(chars[j], '+' | '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].is_ascii_digit() {
            is_float = true;
            i = j;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    let text: String = chars[start..i].iter().collect();
    if i < chars.len() && (chars[i].is_ascii_alphabetic() || chars[i] == '_') {
        return Err(Error::syntax(source, format!("invalid number literal '{text}{}'", chars[i])));
    }
    if !is_float {
        if let Ok(value) = text.parse::<i64>() {
            return Ok((Tok::Int(value), i));
        }
    }
    text.parse::<f64>()
        .map(|value| (Tok::Float(value), i))
        .map_err(|_| Error::syntax(source, format!("invalid number literal '{text}'")))
}

// ── Parser (recursive descent) ─────────────────────────────────

/// Parses an expression.
///
/// # Errors
/// Returns [`Error::ExpressionSyntax`] on malformed input.
pub fn parse(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
    };
    if parser.peek() == &Tok::Eof {
        return Err(parser.error("empty expression"));
    }
    let expr = parser.parse_tuple()?;
    if parser.peek() != &Tok::Eof {
        return Err(parser.error(format!("unexpected {}", parser.peek())));
    }
    Ok(expr)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> &Tok {
        self.tokens.get(self.pos).unwrap_or(&Tok::Eof)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::syntax(self.source, message)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op) && {
            self.pos += 1;
            true
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        matches!(self.peek(), Tok::Ident(w) if w == word) && {
            self.pos += 1;
            true
        }
    }

    fn expect(&mut self, tok: &Tok) -> Result<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {tok}, found {}", self.peek())))
        }
    }

    fn parse_tuple(&mut self) -> Result<Expr> {
        let first = self.parse_ternary()?;
        if self.peek() != &Tok::Comma {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if matches!(self.peek(), Tok::Eof | Tok::RParen) {
                break;
            }
            items.push(self.parse_ternary()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_ternary(&mut self) -> Result<Expr> {
        let then = self.parse_or()?;
        if !self.eat_keyword("if") {
            return Ok(then);
        }
        let cond = self.parse_or()?;
        if !self.eat_keyword("else") {
            return Err(self.error("expected 'else' in conditional expression"));
        }
        let otherwise = self.parse_ternary()?;
        Ok(Expr::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") || self.eat_op("||") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("and") || self.eat_op("&&") {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_keyword("not") || self.eat_op("!") {
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let first = self.parse_additive()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::Ne,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::Le,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::Ge,
                Tok::Ident(w) if w == "in" => CmpOp::In,
                _ => break,
            };
            self.advance();
            rest.push((op, self.parse_additive()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
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
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat_op("-") {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        if self.eat_op("+") {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Pos, Box::new(inner)));
        }
        self.parse_power()
    }

    /// `**` binds tighter than a unary minus on its left, and is right-associative.
    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_postfix()?;
        if self.eat_op("**") {
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Tok::LParen => {
                    self.advance();
                    let args = self.parse_args(&Tok::RParen)?;
                    expr = match expr {
                        Expr::Name(function) => Expr::Call { function, args },
                        _ => return Err(self.error("object is not callable")),
                    };
                }
                Tok::LBracket => {
                    self.advance();
                    let items = self.parse_index_items()?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        items,
                    };
                }
                Tok::Dot => {
                    self.advance();
                    let Tok::Ident(name) = self.advance() else {
                        return Err(self.error("expected a name after '.'"));
                    };
                    let is_call = self.eat(&Tok::LParen);
                    expr = match (expr, is_call) {
                        (Expr::Name(module), true) if module == "np" => Expr::Call {
                            function: name,
                            args: self.parse_args(&Tok::RParen)?,
                        },
                        (target, true) => Expr::Method {
                            target: Box::new(target),
                            method: name,
                            args: self.parse_args(&Tok::RParen)?,
                        },
                        (Expr::Name(module), false) if module == "np" => Expr::Name(name),
                        (target, false) => Expr::Property {
                            target: Box::new(target),
                            name,
                        },
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Comma-separated expressions up to `close`, which is consumed.
    fn parse_args(&mut self, close: &Tok) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        while !self.eat(close) {
            args.push(self.parse_ternary()?);
            if !self.eat(&Tok::Comma) {
                self.expect(close)?;
                break;
            }
        }
        Ok(args)
    }

    fn parse_index_items(&mut self) -> Result<Vec<IndexExpr>> {
        let mut items = Vec::new();
        loop {
            items.push(self.parse_index_item()?);
            if self.eat(&Tok::Comma) {
                continue;
            }
            self.expect(&Tok::RBracket)?;
            return Ok(items);
        }
    }

    fn parse_index_item(&mut self) -> Result<IndexExpr> {
        let start = if self.peek() == &Tok::Colon {
            None
        } else {
            Some(self.parse_ternary()?)
        };
        if !self.eat(&Tok::Colon) {
            return start
                .map(IndexExpr::Single)
                .ok_or_else(|| self.error("empty index"));
        }
        let stop = self.parse_slice_part()?;
        let step = if self.eat(&Tok::Colon) {
            self.parse_slice_part()?
        } else {
            None
        };
        Ok(IndexExpr::Slice { start, stop, step })
    }

    fn parse_slice_part(&mut self) -> Result<Option<Expr>> {
        if matches!(self.peek(), Tok::Colon | Tok::Comma | Tok::RBracket) {
            Ok(None)
        } else {
            self.parse_ternary().map(Some)
        }
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Int(i)),
            Tok::Float(x) => Ok(Expr::Float(x)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Ident(name) => match name.as_str() {
                "True" => Ok(Expr::Bool(true)),
                "False" => Ok(Expr::Bool(false)),
                "None" => Ok(Expr::None),
                word if KEYWORDS.contains(&word) => {
                    Err(self.error(format!("unexpected keyword '{word}'")))
                }
                _ => Ok(Expr::Name(name)),
            },
            Tok::LParen => {
                if self.eat(&Tok::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let inner = self.parse_tuple()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            Tok::LBracket => Ok(Expr::List(self.parse_args(&Tok::RBracket)?)),
            tok => Err(self.error(format!("unexpected {tok}"))),
        }
    }
}

// ── Evaluation ─────────────────────────────────────────────────

/// Evaluates `expr`, resolving free names through `lookup`.
///
/// # Errors
/// Returns whatever `lookup` returns for unknown names, and
/// [`Error::Evaluation`] for type mismatches, math errors and bad indices.
pub fn evaluate(expr: &Expr, lookup: &dyn Fn(&str) -> Result<Value>) -> Result<Value> {
    Interpreter { lookup }.eval(expr)
}

/// Reads a dataset handle in full; other values pass through.
///
/// # Errors
/// Returns the reader error if the read fails.
pub fn materialize(value: Value) -> Result<Value> {
    match value {
        Value::Dataset(dataset) => Ok(Value::from_data(dataset.read_all()?)),
        other => Ok(other),
    }
}

struct Interpreter<'a> {
    lookup: &'a dyn Fn(&str) -> Result<Value>,
}

impl Interpreter<'_> {
    fn eval(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Float(x) => Ok(Value::Float(*x)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::None => Ok(Value::None),
            Expr::Name(name) => (self.lookup)(name),
            Expr::List(items) => items
                .iter()
                .map(|e| self.value(e))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Expr::Tuple(items) => items
                .iter()
                .map(|e| self.eval(e))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Expr::Unary(op, inner) => unary(*op, self.value(inner)?),
            Expr::Binary(op, left, right) => binary(*op, self.value(left)?, self.value(right)?),
            Expr::Compare(first, rest) => {
                let mut left = self.value(first)?;
                for (i, (op, expr)) in rest.iter().enumerate() {
                    let right = self.value(expr)?;
                    let outcome = compare(*op, &left, &right)?;
                    if rest.len() == 1 {
                        return Ok(outcome);
                    }
                    if !outcome.truthy() || i + 1 == rest.len() {
                        return Ok(Value::Bool(outcome.truthy()));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::And(left, right) => {
                let left = self.value(left)?;
                if left.truthy() {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = self.value(left)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if self.value(cond)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call { function, args } => {
                if !functions::is_function(function) {
                    return Err(Error::Evaluation(format!("unknown function: '{function}'")));
                }
                let args = args.iter().map(|a| self.value(a)).collect::<Result<Vec<_>>>()?;
                functions::call(function, args)
            }
            Expr::Method {
                target,
                method,
                args,
            } => {
                if !functions::is_function(method) {
                    return Err(Error::Evaluation(format!("unknown method: '{method}'")));
                }
                let mut all = vec![self.value(target)?];
                for arg in args {
                    all.push(self.value(arg)?);
                }
                functions::call(method, all)
            }
            Expr::Property { target, name } => property(&self.eval(target)?, name),
            Expr::Index { target, items } => {
                let target = self.eval(target)?;
                let selection = items
                    .iter()
                    .map(|item| self.select_item(item))
                    .collect::<Result<Vec<_>>>()?;
                index(target, selection)
            }
        }
    }

    /// Evaluates and reads any dataset handle.
    fn value(&self, expr: &Expr) -> Result<Value> {
        materialize(self.eval(expr)?)
    }

    fn select_item(&self, item: &IndexExpr) -> Result<SelectItem> {
        match item {
            IndexExpr::Single(expr) => Ok(SelectItem::Index(self.position(expr)?)),
            IndexExpr::Slice { start, stop, step } => {
                let part = |e: &Option<Expr>| -> Result<Option<isize>> {
                    match e {
                        Some(Expr::None) | None => Ok(None),
                        Some(expr) => self.position(expr).map(Some),
                    }
                };
                Ok(SelectItem::Slice(SliceSpec {
                    start: part(start)?,
                    stop: part(stop)?,
                    step: part(step)?,
                }))
            }
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn position(&self, expr: &Expr) -> Result<isize> {
        let value = self.value(expr)?;
        let index = match value {
            Value::Int(i) => i,
            Value::Float(x) if x.fract() == 0.0 && x.is_finite() => x as i64,
            other => {
                return Err(Error::Evaluation(format!(
                    "indices must be integers, not {}",
                    other.type_name()
                )))
            }
        };
        isize::try_from(index).map_err(|_| Error::Evaluation(format!("index {index} out of range")))
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn operand_error(what: &str, left: &Value, right: &Value) -> Error {
    Error::Evaluation(format!(
        "unsupported operand types for {what}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value> {
    match (op, value) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.truthy())),
        (UnaryOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| Error::Evaluation("integer overflow".into())),
        (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-i64::from(b))),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Neg, Value::Array(a)) => Ok(Value::Array(a.mapv(|x| -x))),
        (UnaryOp::Pos, value @ (Value::Int(_) | Value::Float(_) | Value::Array(_))) => Ok(value),
        (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(i64::from(b))),
        (op, value) => Err(Error::Evaluation(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOp::Neg { "-" } else { "+" },
            value.type_name()
        ))),
    }
}

/// Largest string, in bytes, that `str * int` may build.
pub const MAX_REPEAT_LEN: usize = 1 << 24;

fn repeat_text(text: &str, times: i64) -> Result<String> {
    let times = usize::try_from(times).unwrap_or(0);
    match text.len().checked_mul(times) {
        Some(len) if len <= MAX_REPEAT_LEN => Ok(text.repeat(times)),
        _ => Err(Error::Evaluation(format!(
            "repeated string longer than {MAX_REPEAT_LEN} bytes"
        ))),
    }
}

fn binary(op: BinOp, left: Value, right: Value) -> Result<Value> {
    match (&left, &right, op) {
        (Value::Str(a), Value::Str(b), BinOp::Add) => return Ok(Value::Str(format!("{a}{b}"))),
        (Value::Str(s), Value::Int(n), BinOp::Mul) | (Value::Int(n), Value::Str(s), BinOp::Mul) => {
            return repeat_text(s, *n).map(Value::Str);
        }
        (Value::List(a), Value::List(b), BinOp::Add) => {
            return Ok(Value::List(a.iter().chain(b).cloned().collect()));
        }
        _ => {}
    }
    if let (Some(a), Some(b)) = (as_int(&left), as_int(&right)) {
        if let Some(value) = int_binary(op, a, b)? {
            return Ok(value);
        }
    }
    if left.is_numeric_scalar() && right.is_numeric_scalar() {
        let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
            return Err(operand_error(op_symbol(op), &left, &right));
        };
        return float_binary(op, a, b).map(Value::Float);
    }
    let (Some(a), Some(b)) = (left.to_array(), right.to_array()) else {
        return Err(operand_error(op_symbol(op), &left, &right));
    };
    let f: fn(f64, f64) -> f64 = match op {
        BinOp::Add => |x, y| x + y,
        BinOp::Sub => |x, y| x - y,
        BinOp::Mul => |x, y| x * y,
        BinOp::Div => |x, y| x / y,
        BinOp::FloorDiv => |x, y| (x / y).floor(),
        BinOp::Mod => |x, y| x - y * (x / y).floor(),
        BinOp::Pow => f64::powf,
    };
    zip_with(&a, &b, f).map(Value::Array)
}

/// Integer arithmetic; `None` means "use floating point instead".
fn int_binary(op: BinOp, a: i64, b: i64) -> Result<Option<Value>> {
    let overflow = || Error::Evaluation("integer overflow".into());
    let zero = || Error::Evaluation("integer division or modulo by zero".into());
    let value = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero());
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero());
            }
            let r = a.checked_rem(b).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => match u32::try_from(b) {
            Ok(exp) => a.checked_pow(exp).ok_or_else(overflow)?,
            Err(_) => return Ok(None),
        },
        BinOp::Div => return Ok(None),
    };
    Ok(Some(Value::Int(value)))
}

fn float_binary(op: BinOp, a: f64, b: f64) -> Result<f64> {
    if b == 0.0 && matches!(op, BinOp::Div | BinOp::FloorDiv | BinOp::Mod) {
        return Err(Error::Evaluation("division by zero".into()));
    }
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => a - b * (a / b).floor(),
        BinOp::Pow => {
            let value = a.powf(b);
            if value.is_nan() && !a.is_nan() && !b.is_nan() {
                return Err(Error::Evaluation("math domain error in power".into()));
            }
            value
        }
    };
    Ok(value)
}

/// Broadcast shape of two operands, following the trailing-axis rule.
fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let ndim = a.len().max(b.len());
    let axis = |shape: &[usize], i: usize| {
        let offset = ndim - shape.len();
        if i < offset {
            1
        } else {
            shape[i - offset]
        }
    };
    (0..ndim)
        .map(|i| match (axis(a, i), axis(b, i)) {
            (x, y) if x == y || y == 1 => Some(x),
            (1, y) => Some(y),
            _ => None,
        })
        .collect()
}

fn zip_with(a: &ArrayD<f64>, b: &ArrayD<f64>, f: impl Fn(f64, f64) -> f64) -> Result<ArrayD<f64>> {
    let mismatch = || {
        Error::Evaluation(format!(
            "operands could not be broadcast together with shapes {:?} {:?}",
            a.shape(),
            b.shape()
        ))
    };
    let shape = broadcast_shape(a.shape(), b.shape()).ok_or_else(mismatch)?;
    let dim = IxDyn(&shape);
    let (Some(av), Some(bv)) = (a.broadcast(dim.clone()), b.broadcast(dim)) else {
        return Err(mismatch());
    };
    Ok(Zip::from(av).and(bv).map_collect(|&x, &y| f(x, y)))
}

fn compare_f64(op: CmpOp, a: f64, b: f64) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
        CmpOp::In => false,
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<Value> {
    let unordered = || operand_error("comparison", left, right);
    if op == CmpOp::In {
        return contains(right, left).map(Value::Bool);
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::Bool(match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::In => false,
        })),
        (Value::None, _) | (_, Value::None) | (Value::Str(_), _) | (_, Value::Str(_)) => match op {
            CmpOp::Eq => Ok(Value::Bool(left == right)),
            CmpOp::Ne => Ok(Value::Bool(left != right)),
            _ => Err(unordered()),
        },
        _ if left.is_numeric_scalar() && right.is_numeric_scalar() => {
            let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
                return Err(unordered());
            };
            Ok(Value::Bool(compare_f64(op, a, b)))
        }
        _ => {
            let (Some(a), Some(b)) = (left.to_array(), right.to_array()) else {
                return Err(unordered());
            };
            zip_with(&a, &b, |x, y| if compare_f64(op, x, y) { 1.0 } else { 0.0 })
                .map(Value::Array)
        }
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool> {
    match (container, item) {
        (Value::Str(text), Value::Str(part)) => Ok(text.contains(part.as_str())),
        (Value::List(items), _) => Ok(items.iter().any(|v| {
            v == item || matches!((v.as_f64(), item.as_f64()), (Some(a), Some(b)) if a == b)
        })),
        (Value::TextArray(items), Value::Str(s)) => Ok(items.iter().any(|v| v == s)),
        (Value::Array(values), _) => {
            let x = item.as_f64().ok_or_else(|| operand_error("in", item, container))?;
            Ok(values.iter().any(|v| *v == x))
        }
        _ => Err(operand_error("in", item, container)),
    }
}

#[allow(clippy::cast_possible_wrap)]
fn property(value: &Value, name: &str) -> Result<Value> {
    let shape: Vec<usize> = match value {
        Value::Dataset(d) => d.shape().to_vec(),
        Value::Array(a) => a.shape().to_vec(),
        Value::TextArray(a) => a.shape().to_vec(),
        Value::List(items) => vec![items.len()],
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => Vec::new(),
        other => {
            return Err(Error::Evaluation(format!(
                "'{}' has no attribute '{name}'",
                other.type_name()
            )))
        }
    };
    match name {
        "shape" => Ok(Value::List(shape.iter().map(|&n| Value::Int(n as i64)).collect())),
        "size" => Ok(Value::Int(shape.iter().product::<usize>() as i64)),
        "ndim" => Ok(Value::Int(shape.len() as i64)),
        _ => Err(Error::Evaluation(format!(
            "'{}' has no attribute '{name}'",
            value.type_name()
        ))),
    }
}

/// Converts selected data without squeezing the kept axes.
fn from_selected(data: Data) -> Result<Value> {
    if data.shape().is_empty() {
        return Ok(Value::from_data(data));
    }
    match data {
        Data::Text(array) => Ok(Value::TextArray(array)),
        other => other
            .to_f64()
            .map(Value::Array)
            .ok_or_else(|| Error::Evaluation("selection is not numeric".into())),
    }
}

fn index(target: Value, items: Vec<SelectItem>) -> Result<Value> {
    let selection = Selection::from_items(items);
    match target {
        // Only the selected region is read from the container.
        Value::Dataset(dataset) => from_selected(dataset.read(&selection)?),
        Value::Array(array) => from_selected(Data::Numeric(selection.apply(&array)?)),
        Value::TextArray(array) => from_selected(Data::Text(selection.apply(&array)?)),
        Value::List(values) => match selection.items() {
            [SelectItem::Index(_)] => {
                let resolved = selection.resolve(&[values.len()])?;
                match resolved.first() {
                    Some(hdfmap_core::AxisSelection::Index(i)) => Ok(values[*i].clone()),
                    _ => Err(Error::Evaluation("invalid tuple index".into())),
                }
            }
            _ => Err(Error::Evaluation("tuple indices must be integers".into())),
        },
        Value::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            let array = ArrayD::from_shape_vec(IxDyn(&[chars.len()]), chars)
                .map_err(|e| Error::Evaluation(e.to_string()))?;
            let picked = selection.apply(&array)?;
            Ok(Value::Str(picked.iter().collect()))
        }
        other => Err(Error::Evaluation(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashMap;

    fn run_with(source: &str, names: &HashMap<&str, Value>) -> Result<Value> {
        let expr = parse(source)?;
        evaluate(&expr, &|name| {
            names
                .get(name)
                .cloned()
                .ok_or_else(|| Error::NotFound(name.to_string()))
        })
    }

    fn run(source: &str) -> Result<Value> {
        run_with(source, &HashMap::new())
    }

    fn array(values: &[f64]) -> Value {
        Value::from(values.to_vec())
    }

    #[test]
    fn test_precedence() {
        assert_eq!(run("1 + 2 * 3").unwrap(), Value::Int(7));
        assert_eq!(run("(1 + 2) * 3").unwrap(), Value::Int(9));
        assert_eq!(run("-2 ** 2").unwrap(), Value::Int(-4));
        assert_eq!(run("2 ** 3 ** 2").unwrap(), Value::Int(512));
        assert_eq!(run("7 // 2 + 7 % 3").unwrap(), Value::Int(4));
        assert_eq!(run("-7 // 2").unwrap(), Value::Int(-4));
        assert_eq!(run("7 / 2").unwrap(), Value::Float(3.5));
        assert_eq!(run("2 ** -1").unwrap(), Value::Float(0.5));
    }

    #[test]
    fn test_numbers() {
        assert_relative_eq!(run("1e3").unwrap().as_f64().unwrap(), 1000.0);
        assert_eq!(run(".5 + 1.").unwrap(), Value::Float(1.5));
        assert!(matches!(run("1x"), Err(Error::ExpressionSyntax { .. })));
    }

    #[test]
    fn test_logic_and_ternary() {
        assert_eq!(run("1 < 2 < 3").unwrap(), Value::Bool(true));
        assert_eq!(run("1 < 3 < 2").unwrap(), Value::Bool(false));
        assert_eq!(run("0 or 5").unwrap(), Value::Int(5));
        assert_eq!(run("1 && 0").unwrap(), Value::Int(0));
        assert_eq!(run("not 0").unwrap(), Value::Bool(true));
        assert_eq!(run("'a' if 1 > 2 else 'b'").unwrap(), Value::Str("b".into()));
        assert_eq!(run("'eta' in 'scan eta 1 2'").unwrap(), Value::Bool(true));
        assert_eq!(run("None == None").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_short_circuit_skips_lookup() {
        assert_eq!(run("1 or missing").unwrap(), Value::Int(1));
        assert!(run("0 or missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_arrays_broadcast() {
        let names = HashMap::from([("x", array(&[1.0, 2.0, 3.0]))]);
        assert_eq!(run_with("x * 2", &names).unwrap(), array(&[2.0, 4.0, 6.0]));
        assert_eq!(run_with("x + x", &names).unwrap(), array(&[2.0, 4.0, 6.0]));
        assert_eq!(run_with("x > 1", &names).unwrap(), array(&[0.0, 1.0, 1.0]));
        let bad = HashMap::from([("x", array(&[1.0, 2.0])), ("y", array(&[1.0, 2.0, 3.0]))]);
        assert!(matches!(run_with("x + y", &bad), Err(Error::Evaluation(_))));
    }

    #[test]
    fn test_broadcast_shape() {
        assert_eq!(broadcast_shape(&[3, 1], &[4]), Some(vec![3, 4]));
        assert_eq!(broadcast_shape(&[], &[5]), Some(vec![5]));
        assert_eq!(broadcast_shape(&[2], &[3]), None);
    }

    #[test]
    fn test_functions_and_methods() {
        let names = HashMap::from([("x", array(&[1.0, 4.0, 9.0]))]);
        assert_eq!(run_with("np.max(x)", &names).unwrap(), Value::Float(9.0));
        assert_eq!(run_with("x.sum()", &names).unwrap(), Value::Float(14.0));
        assert_eq!(run_with("sqrt(x)[1]", &names).unwrap(), Value::Float(2.0));
        assert!(matches!(run("system(1)"), Err(Error::Evaluation(_))));
        assert!(matches!(run_with("x.open()", &names), Err(Error::Evaluation(_))));
    }

    #[test]
    fn test_indexing_and_properties() {
        let grid = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let names = HashMap::from([("g", Value::Array(grid))]);
        assert_eq!(run_with("g[1, 2]", &names).unwrap(), Value::Float(5.0));
        assert_eq!(run_with("g[-1]", &names).unwrap(), array(&[3.0, 4.0, 5.0]));
        assert_eq!(run_with("g[:, 1:]", &names).unwrap().to_string(), "[[1.0, 2.0], [4.0, 5.0]]");
        assert_eq!(run_with("g.shape", &names).unwrap().to_string(), "(2, 3)");
        assert_eq!(run_with("g.size", &names).unwrap(), Value::Int(6));
        assert_eq!(run("'abcdef'[1:3]").unwrap(), Value::Str("bc".into()));
        assert_eq!(run("(1, 'a')[1]").unwrap(), Value::Str("a".into()));
        assert!(matches!(run_with("g[5]", &names), Err(Error::Evaluation(_))));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(run("1 / 0"), Err(Error::Evaluation(_))));
        assert!(matches!(run("1 // 0"), Err(Error::Evaluation(_))));
        assert!(matches!(run("'a' - 1"), Err(Error::Evaluation(_))));
        assert!(matches!(run("(-8) ** 0.5"), Err(Error::Evaluation(_))));
        assert!(matches!(run("1 +"), Err(Error::ExpressionSyntax { .. })));
        assert!(matches!(run("(1"), Err(Error::ExpressionSyntax { .. })));
        assert!(matches!(run(""), Err(Error::ExpressionSyntax { .. })));
        assert!(matches!(run("a if b"), Err(Error::ExpressionSyntax { .. })));
    }

    #[test]
    fn test_tuples_and_lists() {
        assert_eq!(run("1, 2.5, 'x'").unwrap().to_string(), "(1, 2.5, x)");
        assert_eq!(run("sum([1, 2, 3])").unwrap(), Value::Float(6.0));
        assert_eq!(run("()").unwrap(), Value::List(Vec::new()));
    }
}
