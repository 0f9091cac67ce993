//! Expression engine for projection assignments, join filters and predicates.
//!
//! Supports column references, literals, arithmetic/comparison/logical
//! operators and a small set of named scalar functions (`multiIf`, `if`,
//! `coalesce`, ...). Expressions can be parsed from text, printed back,
//! typed against an input schema, renamed through a symbol map and evaluated
//! against a single row.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::DataType;
use crate::types::{scalar_cmp, Scalar};

/// Binary operators for expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    // Comparison operators
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logical operators
    And,
    Or,
    // Arithmetic operators
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    /// Parse a binary operator from a string.
    pub fn parse(op: &str) -> Result<Self> {
        match op {
            "==" | "=" => Ok(BinOp::Eq),
            "!=" | "<>" => Ok(BinOp::Ne),
            "<" => Ok(BinOp::Lt),
            "<=" => Ok(BinOp::Le),
            ">" => Ok(BinOp::Gt),
            ">=" => Ok(BinOp::Ge),
            "AND" | "and" | "&&" => Ok(BinOp::And),
            "OR" | "or" | "||" => Ok(BinOp::Or),
            "+" => Ok(BinOp::Add),
            "-" => Ok(BinOp::Sub),
            "*" => Ok(BinOp::Mul),
            "/" => Ok(BinOp::Div),
            _ => Err(Error::Parse(format!("unknown binary operator: {}", op))),
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    fn symbol(self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        }
    }
}

/// Unary operators for expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    IsNull,
    IsNotNull,
}

impl UnaryOp {
    /// Parse a unary operator from a string.
    pub fn parse(op: &str) -> Result<Self> {
        match op.to_uppercase().as_str() {
            "NOT" | "!" => Ok(UnaryOp::Not),
            "ISNULL" | "IS NULL" => Ok(UnaryOp::IsNull),
            "ISNOTNULL" | "IS NOT NULL" => Ok(UnaryOp::IsNotNull),
            _ => Err(Error::Parse(format!("unknown unary operator: {}", op))),
        }
    }
}

/// Expression AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Column reference: "column_name"
    Column(String),
    /// Literal value: 42, 'hello', true, etc.
    Literal(Scalar),
    /// Binary operation: left OP right
    BinaryOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation: OP arg
    UnaryOp { op: UnaryOp, arg: Box<Expr> },
    /// Scalar function call: name(args...)
    Function { name: String, args: Vec<Expr> },
}

/// Case-insensitive function name comparison.
pub fn is_function_named(name: &str, expected: &str) -> bool {
    name.eq_ignore_ascii_case(expected)
}

impl Expr {
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    pub fn lit(value: Scalar) -> Self {
        Expr::Literal(value)
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// The referenced column when this expression is a bare column reference.
    pub fn as_column(&self) -> Option<&str> {
        match self {
            Expr::Column(name) => Some(name),
            _ => None,
        }
    }

    /// True when the expression is exactly a reference to `name`.
    pub fn is_identity_of(&self, name: &str) -> bool {
        self.as_column() == Some(name)
    }

    /// All column symbols referenced anywhere in the expression.
    pub fn symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Column(name) => {
                out.insert(name.clone());
            }
            Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_symbols(out);
                right.collect_symbols(out);
            }
            Expr::UnaryOp { arg, .. } => arg.collect_symbols(out),
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.collect_symbols(out);
                }
            }
        }
    }

    /// Rewrite column references through `map`; unmapped columns are kept.
    pub fn rename(&self, map: &HashMap<String, String>) -> Expr {
        match self {
            Expr::Column(name) => Expr::Column(map.get(name).unwrap_or(name).clone()),
            Expr::Literal(v) => Expr::Literal(v.clone()),
            Expr::BinaryOp { op, left, right } => Expr::BinaryOp {
                op: *op,
                left: Box::new(left.rename(map)),
                right: Box::new(right.rename(map)),
            },
            Expr::UnaryOp { op, arg } => Expr::UnaryOp {
                op: *op,
                arg: Box::new(arg.rename(map)),
            },
            Expr::Function { name, args } => Expr::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.rename(map)).collect(),
            },
        }
    }

    /// Infer the result type against the given input column types.
    pub fn data_type(&self, input: &HashMap<String, DataType>) -> Result<DataType> {
        match self {
            Expr::Column(name) => input
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Schema(format!("unknown symbol '{}' in expression", name))),
            Expr::Literal(v) => v
                .data_type()
                .ok_or_else(|| Error::Schema("cannot infer the type of a bare NULL".into())),
            Expr::BinaryOp { op, left, right } => {
                if op.is_comparison() || op.is_logical() {
                    // operands must still resolve
                    left.symbols_resolve(input)?;
                    right.symbols_resolve(input)?;
                    return Ok(DataType::Boolean);
                }
                match left.as_ref() {
                    Expr::Literal(Scalar::Null) => right.data_type(input),
                    l => l.data_type(input),
                }
            }
            Expr::UnaryOp { arg, .. } => {
                arg.symbols_resolve(input)?;
                Ok(DataType::Boolean)
            }
            Expr::Function { name, args } => function_return_type(name, args, input),
        }
    }

    fn symbols_resolve(&self, input: &HashMap<String, DataType>) -> Result<()> {
        for s in self.symbols() {
            if !input.contains_key(&s) {
                return Err(Error::Schema(format!(
                    "unknown symbol '{}' in expression",
                    s
                )));
            }
        }
        Ok(())
    }

    /// Evaluate the expression against a single row keyed by column name.
    pub fn evaluate(&self, row: &HashMap<String, Scalar>) -> Result<Scalar> {
        match self {
            Expr::Column(name) => row.get(name).cloned().ok_or_else(|| {
                let mut available: Vec<&String> = row.keys().collect();
                available.sort();
                Error::Plan(format!(
                    "column '{}' not found. Available columns: {:?}",
                    name, available
                ))
            }),
            Expr::Literal(scalar) => Ok(scalar.clone()),
            Expr::BinaryOp { op, left, right } => {
                let left_val = left.evaluate(row)?;
                let right_val = right.evaluate(row)?;
                evaluate_binary_op(*op, &left_val, &right_val)
            }
            Expr::UnaryOp { op, arg } => {
                let arg_val = arg.evaluate(row)?;
                Ok(evaluate_unary_op(*op, &arg_val))
            }
            Expr::Function { name, args } => evaluate_function(name, args, row),
        }
    }

    /// Evaluate an expression to a boolean (for predicates). NULL is false.
    pub fn evaluate_bool(&self, row: &HashMap<String, Scalar>) -> Result<bool> {
        Ok(scalar_to_bool(&self.evaluate(row)?))
    }

    /// Parse an expression from text.
    ///
    /// Grammar, loosest binding first: `OR`, `AND`, comparisons, `+ -`,
    /// `* /`, prefix `NOT`/`-`, postfix `IS [NOT] NULL`, then primaries
    /// (literals, identifiers, function calls and parenthesized expressions).
    pub fn parse(src: &str) -> Result<Expr> {
        let tokens = tokenize(src)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(Error::Parse(format!(
                "unexpected trailing token {:?} in '{}'",
                tok, src
            )));
        }
        Ok(expr)
    }
}

fn function_return_type(
    name: &str,
    args: &[Expr],
    input: &HashMap<String, DataType>,
) -> Result<DataType> {
    let arity = |min: usize| -> Result<()> {
        if args.len() < min {
            return Err(Error::Function(format!(
                "{} expects at least {} argument(s), got {}",
                name,
                min,
                args.len()
            )));
        }
        Ok(())
    };
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "multiif" | "if" => {
            arity(2)?;
            for arg in args {
                arg.symbols_resolve(input)?;
            }
            match &args[1] {
                Expr::Literal(Scalar::Null) => args
                    .iter()
                    .skip(2)
                    .find(|a| !matches!(a, Expr::Literal(Scalar::Null)))
                    .map(|a| a.data_type(input))
                    .unwrap_or_else(|| {
                        Err(Error::Schema(format!("cannot infer the type of {}", name)))
                    }),
                second => second.data_type(input),
            }
        }
        "coalesce" | "ifnull" => {
            arity(1)?;
            args.iter()
                .find(|a| !matches!(a, Expr::Literal(Scalar::Null)))
                .map(|a| a.data_type(input))
                .unwrap_or_else(|| Err(Error::Schema(format!("cannot infer the type of {}", name))))
        }
        "abs" => {
            arity(1)?;
            args[0].data_type(input)
        }
        "lower" | "upper" | "concat" => {
            arity(1)?;
            for arg in args {
                arg.symbols_resolve(input)?;
            }
            Ok(DataType::Utf8)
        }
        "length" => {
            arity(1)?;
            args[0].symbols_resolve(input)?;
            Ok(DataType::UInt64)
        }
        _ => Err(Error::Function(format!("unknown scalar function '{}'", name))),
    }
}

fn evaluate_function(name: &str, args: &[Expr], row: &HashMap<String, Scalar>) -> Result<Scalar> {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "multiif" | "if" => {
            let mut i = 0;
            while i + 1 < args.len() {
                if args[i].evaluate_bool(row)? {
                    return args[i + 1].evaluate(row);
                }
                i += 2;
            }
            match args.get(i) {
                Some(otherwise) => otherwise.evaluate(row),
                None => Ok(Scalar::Null),
            }
        }
        "coalesce" | "ifnull" => {
            for arg in args {
                let v = arg.evaluate(row)?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            Ok(Scalar::Null)
        }
        "abs" => match args.first().map(|a| a.evaluate(row)).transpose()? {
            Some(Scalar::I32(v)) => Ok(Scalar::I32(v.abs())),
            Some(Scalar::I64(v)) => Ok(Scalar::I64(v.abs())),
            Some(Scalar::F32(v)) => Ok(Scalar::F32(v.abs())),
            Some(Scalar::F64(v)) => Ok(Scalar::F64(v.abs())),
            Some(Scalar::Null) | None => Ok(Scalar::Null),
            Some(other) => Err(Error::Plan(format!("abs of non-numeric {:?}", other))),
        },
        "lower" | "upper" => match args.first().map(|a| a.evaluate(row)).transpose()? {
            Some(Scalar::Str(s)) if lower == "lower" => Ok(Scalar::Str(s.to_lowercase())),
            Some(Scalar::Str(s)) => Ok(Scalar::Str(s.to_uppercase())),
            Some(Scalar::Null) | None => Ok(Scalar::Null),
            Some(other) => Err(Error::Plan(format!("{} of non-string {:?}", name, other))),
        },
        "concat" => {
            let mut out = String::new();
            for arg in args {
                match arg.evaluate(row)? {
                    Scalar::Null => return Ok(Scalar::Null),
                    Scalar::Str(s) => out.push_str(&s),
                    other => out.push_str(&other.to_string()),
                }
            }
            Ok(Scalar::Str(out))
        }
        "length" => match args.first().map(|a| a.evaluate(row)).transpose()? {
            Some(Scalar::Str(s)) => Ok(Scalar::I64(s.len() as i64)),
            Some(Scalar::Bin(b)) => Ok(Scalar::I64(b.len() as i64)),
            _ => Ok(Scalar::Null),
        },
        _ => Err(Error::Function(format!("unknown scalar function '{}'", name))),
    }
}

/// Evaluate a binary operation.
fn evaluate_binary_op(op: BinOp, left: &Scalar, right: &Scalar) -> Result<Scalar> {
    use Scalar::*;

    match op {
        BinOp::Eq => Ok(Bool(scalar_eq(left, right))),
        BinOp::Ne => Ok(Bool(!scalar_eq(left, right) && !left.is_null() && !right.is_null())),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            if left.is_null() || right.is_null() {
                return Ok(Bool(false));
            }
            let ord = scalar_cmp(left, right);
            Ok(Bool(match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        BinOp::And => Ok(Bool(scalar_to_bool(left) && scalar_to_bool(right))),
        BinOp::Or => Ok(Bool(scalar_to_bool(left) || scalar_to_bool(right))),
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
            if left.is_null() || right.is_null() {
                return Ok(Null);
            }
            evaluate_arithmetic(op, left, right)
        }
    }
}

fn evaluate_arithmetic(op: BinOp, left: &Scalar, right: &Scalar) -> Result<Scalar> {
    use Scalar::*;

    let unsupported = || {
        Error::Plan(format!(
            "unsupported arithmetic: {:?} {} {:?}",
            left,
            op.symbol(),
            right
        ))
    };
    match (left, right) {
        (I32(a), I32(b)) => int_op(op, *a as i64, *b as i64).map(|v| match i32::try_from(v) {
            Ok(n) => I32(n),
            Err(_) => I64(v),
        }),
        (I32(_) | I64(_), I32(_) | I64(_)) => {
            int_op(op, as_i64(left).ok_or_else(unsupported)?, as_i64(right).ok_or_else(unsupported)?)
                .map(I64)
        }
        (F32(a), F32(b)) => float_op(op, *a as f64, *b as f64).map(|v| F32(v as f32)),
        (I32(_) | I64(_) | F32(_) | F64(_), I32(_) | I64(_) | F32(_) | F64(_)) => float_op(
            op,
            as_f64(left).ok_or_else(unsupported)?,
            as_f64(right).ok_or_else(unsupported)?,
        )
        .map(F64),
        (Str(a), Str(b)) if op == BinOp::Add => Ok(Str(format!("{}{}", a, b))),
        _ => Err(unsupported()),
    }
}

fn int_op(op: BinOp, a: i64, b: i64) -> Result<i64> {
    match op {
        BinOp::Add => Ok(a.wrapping_add(b)),
        BinOp::Sub => Ok(a.wrapping_sub(b)),
        BinOp::Mul => Ok(a.wrapping_mul(b)),
        _ => {
            if b == 0 {
                return Err(Error::Plan("division by zero".to_string()));
            }
            Ok(a / b)
        }
    }
}

fn float_op(op: BinOp, a: f64, b: f64) -> Result<f64> {
    match op {
        BinOp::Add => Ok(a + b),
        BinOp::Sub => Ok(a - b),
        BinOp::Mul => Ok(a * b),
        _ => {
            if b == 0.0 {
                return Err(Error::Plan("division by zero".to_string()));
            }
            Ok(a / b)
        }
    }
}

fn as_i64(s: &Scalar) -> Option<i64> {
    match s {
        Scalar::I32(v) => Some(*v as i64),
        Scalar::I64(v) => Some(*v),
        _ => None,
    }
}

fn as_f64(s: &Scalar) -> Option<f64> {
    match s {
        Scalar::I32(v) => Some(*v as f64),
        Scalar::I64(v) => Some(*v as f64),
        Scalar::F32(v) => Some(*v as f64),
        Scalar::F64(v) => Some(*v),
        _ => None,
    }
}

/// Evaluate a unary operation.
fn evaluate_unary_op(op: UnaryOp, arg: &Scalar) -> Scalar {
    match op {
        UnaryOp::Not => Scalar::Bool(!scalar_to_bool(arg)),
        UnaryOp::IsNull => Scalar::Bool(arg.is_null()),
        UnaryOp::IsNotNull => Scalar::Bool(!arg.is_null()),
    }
}

/// Compare two scalars for equality. NULL never equals anything.
fn scalar_eq(a: &Scalar, b: &Scalar) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    scalar_cmp(a, b).is_eq()
}

/// Convert a scalar to a boolean value.
fn scalar_to_bool(scalar: &Scalar) -> bool {
    use Scalar::*;
    match scalar {
        Null => false,
        Bool(b) => *b,
        I32(i) => *i != 0,
        I64(i) => *i != 0,
        F32(f) => *f != 0.0,
        F64(f) => *f != 0.0,
        Str(s) => !s.is_empty(),
        Bin(b) => !b.is_empty(),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(name) => write!(f, "{}", name),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::BinaryOp { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::UnaryOp { op, arg } => match op {
                UnaryOp::Not => write!(f, "NOT {}", arg),
                UnaryOp::IsNull => write!(f, "({} IS NULL)", arg),
                UnaryOp::IsNotNull => write!(f, "({} IS NOT NULL)", arg),
            },
            Expr::Function { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Str(String),
    Op(String),
    LParen,
    RParen,
    Comma,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '#' | '$')
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Number(chars[start..i].iter().collect()));
        } else if c == '\'' || c == '"' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(Error::Parse(format!("unterminated string in '{}'", src)))
                    }
                    Some('\\') if chars.get(i + 1) == Some(&quote) => {
                        s.push(quote);
                        i += 2;
                    }
                    Some(&ch) if ch == quote => {
                        i += 1;
                        break;
                    }
                    Some(&ch) => {
                        s.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(s));
        } else {
            match c {
                '(' => tokens.push(Token::LParen),
                ')' => tokens.push(Token::RParen),
                ',' => tokens.push(Token::Comma),
                _ => {
                    let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                    let op = match two.as_str() {
                        "==" | "!=" | "<>" | "<=" | ">=" | "&&" | "||" => two,
                        _ if "=<>+-*/!".contains(c) => c.to_string(),
                        _ => {
                            return Err(Error::Parse(format!(
                                "unexpected character '{}' in '{}'",
                                c, src
                            )))
                        }
                    };
                    i += op.len();
                    tokens.push(Token::Op(op));
                    continue;
                }
            }
            i += 1;
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
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

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(kw))
    }

    fn peek_op(&self, ops: &[&str]) -> Option<String> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(&op.as_str()) => Some(op.clone()),
            _ => None,
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            other => Err(Error::Parse(format!(
                "expected {:?}, found {:?}",
                expected, other
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") || self.peek_op(&["||"]).is_some() {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::binary(BinOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_cmp()?;
        while self.peek_keyword("and") || self.peek_op(&["&&"]).is_some() {
            self.pos += 1;
            let right = self.parse_cmp()?;
            left = Expr::binary(BinOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let left = self.parse_add()?;
        if let Some(op) = self.peek_op(&["=", "==", "!=", "<>", "<", "<=", ">", ">="]) {
            self.pos += 1;
            let right = self.parse_add()?;
            return Ok(Expr::binary(BinOp::parse(&op)?, left, right));
        }
        Ok(left)
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut left = self.parse_mul()?;
        while let Some(op) = self.peek_op(&["+", "-"]) {
            self.pos += 1;
            let right = self.parse_mul()?;
            left = Expr::binary(BinOp::parse(&op)?, left, right);
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.peek_op(&["*", "/"]) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::binary(BinOp::parse(&op)?, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek_keyword("not") || self.peek_op(&["!"]).is_some() {
            self.pos += 1;
            let arg = self.parse_unary()?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                arg: Box::new(arg),
            });
        }
        if self.peek_op(&["-"]).is_some() {
            self.pos += 1;
            return match self.parse_unary()? {
                Expr::Literal(Scalar::I32(v)) => Ok(Expr::Literal(Scalar::I32(-v))),
                Expr::Literal(Scalar::I64(v)) => Ok(Expr::Literal(Scalar::I64(-v))),
                Expr::Literal(Scalar::F64(v)) => Ok(Expr::Literal(Scalar::F64(-v))),
                other => Ok(Expr::binary(
                    BinOp::Sub,
                    Expr::Literal(Scalar::I32(0)),
                    other,
                )),
            };
        }
        let mut expr = self.parse_primary()?;
        while self.peek_keyword("is") {
            self.pos += 1;
            let negated = if self.peek_keyword("not") {
                self.pos += 1;
                true
            } else {
                false
            };
            if !self.peek_keyword("null") {
                return Err(Error::Parse("expected NULL after IS".into()));
            }
            self.pos += 1;
            expr = Expr::UnaryOp {
                op: if negated {
                    UnaryOp::IsNotNull
                } else {
                    UnaryOp::IsNull
                },
                arg: Box::new(expr),
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Number(n)) => parse_number(&n).map(Expr::Literal),
            Some(Token::Str(s)) => Ok(Expr::Literal(Scalar::Str(s))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if name.eq_ignore_ascii_case("null") {
                    return Ok(Expr::Literal(Scalar::Null));
                }
                if name.eq_ignore_ascii_case("true") {
                    return Ok(Expr::Literal(Scalar::Bool(true)));
                }
                if name.eq_ignore_ascii_case("false") {
                    return Ok(Expr::Literal(Scalar::Bool(false)));
                }
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_or()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.pos += 1;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    return Ok(Expr::Function { name, args });
                }
                Ok(Expr::Column(name))
            }
            other => Err(Error::Parse(format!("unexpected token {:?}", other))),
        }
    }
}

/// Parse a numeric literal (i32 first, then i64, then f64).
fn parse_number(literal: &str) -> Result<Scalar> {
    if let Ok(i) = literal.parse::<i32>() {
        return Ok(Scalar::I32(i));
    }
    if let Ok(i) = literal.parse::<i64>() {
        return Ok(Scalar::I64(i));
    }
    if let Ok(f) = literal.parse::<f64>() {
        return Ok(Scalar::F64(f));
    }
    Err(Error::Parse(format!("cannot parse '{}' as literal", literal)))
}
