//! Algebraic expression front-end
//!
//! Parses expressions such as `(Q @ K) @ V` or `A * B + C` into a typed
//! tree, resolves identifiers against an explicit symbol table, and either
//! evaluates the tree numerically or lowers a pure product into a matmul
//! configuration tree.
//!
//! Grammar (`@` and `*` are synonyms, both left-associative and binding
//! tighter than `+`):
//!
//! ```text
//! expr   := term ('+' term)*
//! term   := factor (('@' | '*') factor)*
//! factor := ident | '(' expr ')'
//! ```
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::algorithm::init::{derive_seed, leaf_grid};
use crate::algorithm::kernel;
use crate::config::{LeafConfig, MatMulConfig, NodeConfig};
use crate::data_structures::grid::{GridError, NumericGrid};

/// Error types for parsing and evaluating expressions
#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("unexpected character {ch:?} at {pos}")]
    UnexpectedChar { pos: usize, ch: char },

    #[error("expected {expected} at {pos}, found {found}")]
    UnexpectedToken {
        pos: usize,
        found: String,
        expected: &'static str,
    },

    #[error("unknown symbol {0:?}")]
    UnknownSymbol(String),

    #[error("cannot {op} {left:?} and {right:?}")]
    ShapeMismatch {
        op: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("{0} cannot be shown as a matmul tree")]
    Unsupported(String),

    #[error(transparent)]
    Grid(#[from] GridError),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    MatMul,
    Plus,
    Open,
    Close,
    End,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "identifier {:?}", name),
            Token::MatMul => f.write_str("'@'"),
            Token::Plus => f.write_str("'+'"),
            Token::Open => f.write_str("'('"),
            Token::Close => f.write_str("')'"),
            Token::End => f.write_str("end of input"),
        }
    }
}

fn lex(src: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();
    while let Some(&(pos, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '@' | '*' => {
                chars.next();
                tokens.push((pos, Token::MatMul));
            }
            '+' => {
                chars.next();
                tokens.push((pos, Token::Plus));
            }
            '(' => {
                chars.next();
                tokens.push((pos, Token::Open));
            }
            ')' => {
                chars.next();
                tokens.push((pos, Token::Close));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '\'' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((pos, Token::Ident(name)));
            }
            ch => return Err(ExprError::UnexpectedChar { pos, ch }),
        }
    }
    tokens.push((src.len(), Token::End));
    Ok(tokens)
}

/// Typed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var(String),
    MatMul(Box<Expr>, Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].1
    }

    fn bump(&mut self) -> (usize, Token) {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.term()?;
        while *self.peek() == Token::Plus {
            self.bump();
            let rhs = self.term()?;
            lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.factor()?;
        while *self.peek() == Token::MatMul {
            self.bump();
            let rhs = self.factor()?;
            lhs = Expr::MatMul(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, ExprError> {
        match self.bump() {
            (_, Token::Ident(name)) => Ok(Expr::Var(name)),
            (_, Token::Open) => {
                let inner = self.expr()?;
                match self.bump() {
                    (_, Token::Close) => Ok(inner),
                    (pos, found) => Err(ExprError::UnexpectedToken {
                        pos,
                        found: found.to_string(),
                        expected: "')'",
                    }),
                }
            }
            (pos, found) => Err(ExprError::UnexpectedToken {
                pos,
                found: found.to_string(),
                expected: "identifier or '('",
            }),
        }
    }
}

/// Leaf definitions available to expressions
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: BTreeMap<String, LeafConfig>,
    seed: u64,
}

impl SymbolTable {
    pub fn new(seed: u64) -> Self {
        Self { symbols: BTreeMap::new(), seed }
    }

    pub fn define(&mut self, name: impl Into<String>, leaf: LeafConfig) -> &mut Self {
        self.symbols.insert(name.into(), leaf);
        self
    }

    pub fn get(&self, name: &str) -> Option<&LeafConfig> {
        self.symbols.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    fn lookup(&self, name: &str) -> Result<&LeafConfig, ExprError> {
        self.get(name).ok_or_else(|| ExprError::UnknownSymbol(name.to_owned()))
    }

    /// Stable per-name seed for leaves that do not pin one
    fn seed_for(&self, name: &str) -> u64 {
        derive_seed(self.seed, name)
    }
}

impl Expr {
    pub fn parse(src: &str) -> Result<Self, ExprError> {
        let mut parser = Parser { tokens: lex(src)?, pos: 0 };
        let expr = parser.expr()?;
        match parser.bump() {
            (_, Token::End) => Ok(expr),
            (pos, found) => Err(ExprError::UnexpectedToken {
                pos,
                found: found.to_string(),
                expected: "end of input",
            }),
        }
    }

    /// Identifiers in order of first appearance
    pub fn free_vars(&self) -> Vec<String> {
        fn walk(e: &Expr, out: &mut Vec<String>) {
            match e {
                Expr::Var(name) => {
                    if !out.iter().any(|n| n == name) {
                        out.push(name.clone());
                    }
                }
                Expr::MatMul(a, b) | Expr::Add(a, b) => {
                    walk(a, out);
                    walk(b, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }

    /// Identifiers the symbol table cannot resolve
    pub fn unresolved(&self, symbols: &SymbolTable) -> Vec<String> {
        self.free_vars()
            .into_iter()
            .filter(|name| !symbols.contains(name))
            .collect()
    }

    /// Output shape, checking operand compatibility
    pub fn shape(&self, symbols: &SymbolTable) -> Result<(usize, usize), ExprError> {
        match self {
            Expr::Var(name) => {
                let leaf = symbols.lookup(name)?;
                Ok((leaf.h, leaf.w))
            }
            Expr::MatMul(a, b) => {
                let (left, right) = (a.shape(symbols)?, b.shape(symbols)?);
                if left.1 != right.0 {
                    return Err(ExprError::ShapeMismatch { op: "multiply", left, right });
                }
                Ok((left.0, right.1))
            }
            Expr::Add(a, b) => {
                let (left, right) = (a.shape(symbols)?, b.shape(symbols)?);
                if left != right {
                    return Err(ExprError::ShapeMismatch { op: "add", left, right });
                }
                Ok(left)
            }
        }
    }

    /// Evaluates the expression by structural recursion
    pub fn eval(&self, symbols: &SymbolTable) -> Result<NumericGrid, ExprError> {
        self.shape(symbols)?;
        self.eval_checked(symbols)
    }

    fn eval_checked(&self, symbols: &SymbolTable) -> Result<NumericGrid, ExprError> {
        match self {
            Expr::Var(name) => {
                let leaf = symbols.lookup(name)?;
                Ok(leaf_grid(leaf, symbols.seed_for(name))?)
            }
            Expr::MatMul(a, b) => Ok(kernel::matmul(&a.eval_checked(symbols)?, &b.eval_checked(symbols)?)?),
            Expr::Add(a, b) => Ok(kernel::add(&a.eval_checked(symbols)?, &b.eval_checked(symbols)?)?),
        }
    }

    /// Lowers a pure product into a matmul configuration tree
    ///
    /// Leaves inherit their symbol name and a pinned seed, so the tree
    /// renders the same numbers `eval` computes. Every repeat of a symbol
    /// shares the grid of its first occurrence.
    pub fn to_config(&self, symbols: &SymbolTable) -> Result<NodeConfig, ExprError> {
        self.shape(symbols)?;
        self.lower(symbols, &mut Vec::new())
    }

    fn lower(&self, symbols: &SymbolTable, seen: &mut Vec<String>) -> Result<NodeConfig, ExprError> {
        match self {
            Expr::Var(name) => {
                let mut leaf = symbols.lookup(name)?.clone();
                let display = leaf.name.get_or_insert_with(|| name.clone()).clone();
                if leaf.seed.is_none() {
                    leaf.seed = Some(symbols.seed_for(name));
                }
                if seen.contains(name) {
                    leaf.shares = Some(display);
                } else {
                    seen.push(name.clone());
                }
                Ok(leaf.into())
            }
            Expr::MatMul(a, b) => {
                let left = a.lower(symbols, seen)?;
                let right = b.lower(symbols, seen)?;
                Ok(MatMulConfig::new(left, right).named(self.to_string()).into())
            }
            Expr::Add(..) => Err(ExprError::Unsupported(format!("sum {}", self))),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Var(_) => 3,
            Expr::MatMul(..) => 2,
            Expr::Add(..) => 1,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operand = |f: &mut fmt::Formatter<'_>, e: &Expr, min: u8| {
            if e.precedence() < min {
                write!(f, "({})", e)
            } else {
                write!(f, "{}", e)
            }
        };
        match self {
            Expr::Var(name) => f.write_str(name),
            Expr::MatMul(a, b) => {
                operand(f, a, 2)?;
                f.write_str(" @ ")?;
                operand(f, b, 3)
            }
            Expr::Add(a, b) => {
                operand(f, a, 1)?;
                f.write_str(" + ")?;
                operand(f, b, 2)
            }
        }
    }
}
