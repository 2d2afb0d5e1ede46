//! Elementwise expression compiler for the `expr` backend
//!
//! Expressions such as `x + y`, `sin(x)` or `1/sqrt(x)` are parsed once into a
//! register program. Evaluation walks the output in fixed-size blocks and runs
//! every instruction over a block before moving on, so temporaries stay in
//! cache regardless of the array length.

use crate::error::{BenchError, Result};

use super::func::{BinaryOp, Operand, UnaryFunc};

/// Elements processed per block
pub const BLOCK_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    Open,
    Close,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();
    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            },
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                chars.next();
            },
            '(' => {
                tokens.push(Token::Open);
                chars.next();
            },
            ')' => {
                tokens.push(Token::Close);
                chars.next();
            },
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = pos;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = src[pos..end].parse().map_err(|_| BenchError::ExpressionError {
                    expr: src.to_string(),
                    reason: format!("bad number '{}'", &src[pos..end]),
                })?;
                tokens.push(Token::Num(value));
            },
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = pos;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(src[pos..end].to_string()));
            },
            other => {
                return Err(BenchError::ExpressionError {
                    expr: src.to_string(),
                    reason: format!("unexpected character '{other}' at {pos}"),
                })
            },
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Node {
    Var(usize),
    Const(f64),
    Neg(Box<Node>),
    Call(UnaryFunc, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    vars: &'a [&'a str],
}

impl Parser<'_> {
    fn error(&self, reason: impl Into<String>) -> BenchError {
        BenchError::ExpressionError {
            expr: self.src.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expr(&mut self) -> Result<Node> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(c @ ('+' | '-'))) = self.peek() {
            let op = if *c == '+' { BinaryOp::Add } else { BinaryOp::Sub };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Node> {
        let mut lhs = self.factor()?;
        while let Some(Token::Op(c @ ('*' | '/'))) = self.peek() {
            let op = if *c == '*' { BinaryOp::Mul } else { BinaryOp::Div };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Node> {
        match self.next() {
            Some(Token::Op('-')) => Ok(Node::Neg(Box::new(self.factor()?))),
            Some(Token::Num(v)) => Ok(Node::Const(v)),
            Some(Token::Open) => {
                let inner = self.expr()?;
                self.expect_close()?;
                Ok(inner)
            },
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::Open) {
                    self.pos += 1;
                    let func = self.function(&name)?;
                    let arg = self.expr()?;
                    self.expect_close()?;
                    Ok(Node::Call(func, Box::new(arg)))
                } else {
                    self.vars
                        .iter()
                        .position(|v| *v == name)
                        .map(Node::Var)
                        .ok_or_else(|| self.error(format!("unknown variable '{name}'")))
                }
            },
            Some(tok) => Err(self.error(format!("unexpected token {tok:?}"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn function(&self, name: &str) -> Result<UnaryFunc> {
        match name.parse::<UnaryFunc>() {
            Ok(UnaryFunc::Copyto) | Err(_) => {
                Err(self.error(format!("'{name}' is not an expression function")))
            },
            Ok(func) => Ok(func),
        }
    }

    fn expect_close(&mut self) -> Result<()> {
        match self.next() {
            Some(Token::Close) => Ok(()),
            _ => Err(self.error("missing ')'")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Src {
    Reg(usize),
    Var(usize),
    Const(f64),
}

#[derive(Debug, Clone, Copy)]
enum Instr {
    Neg { dst: usize, a: Src },
    Call { dst: usize, f: fn(f64) -> f64, a: Src },
    Bin { dst: usize, op: BinaryOp, a: Src, b: Src },
}

/// Block-resolved instruction input
#[derive(Clone, Copy)]
enum Lane<'a> {
    Slice(&'a [f64]),
    Scalar(f64),
}

impl Lane<'_> {
    #[inline]
    fn get(&self, i: usize) -> f64 {
        match self {
            Lane::Slice(s) => s[i],
            Lane::Scalar(v) => *v,
        }
    }
}

/// Compiled elementwise expression
#[derive(Debug, Clone)]
pub struct Program {
    source: String,
    num_vars: usize,
    instrs: Vec<Instr>,
    result: Src,
    registers: Vec<Vec<f64>>,
}

impl Program {
    /// Compile `src` with the given variable names
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::ExpressionError`] for syntax errors, unknown
    /// variables and unknown functions.
    pub fn compile(src: &str, vars: &[&str]) -> Result<Self> {
        let mut parser = Parser {
            src,
            tokens: tokenize(src)?,
            pos: 0,
            vars,
        };
        let root = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("trailing input"));
        }

        let mut instrs = Vec::new();
        let result = lower(&root, &mut instrs);
        let registers = vec![vec![0.0; BLOCK_SIZE]; instrs.len()];
        Ok(Self {
            source: src.to_string(),
            num_vars: vars.len(),
            instrs,
            result,
            registers,
        })
    }

    /// Expression text
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate into `out`; array inputs must be at least `out.len()` long
    ///
    /// # Panics
    ///
    /// Panics when the number of inputs differs from the compiled variables.
    pub fn eval(&mut self, inputs: &[Operand<'_>], out: &mut [f64]) {
        assert_eq!(inputs.len(), self.num_vars, "operand count mismatch for '{}'", self.source);
        let n = out.len();
        let mut start = 0;
        while start < n {
            let end = (start + BLOCK_SIZE).min(n);
            self.eval_block(inputs, start, end);
            let len = end - start;
            let dst = &mut out[start..end];
            match self.result {
                Src::Reg(r) => dst.copy_from_slice(&self.registers[r][..len]),
                Src::Var(v) => match inputs[v] {
                    Operand::Array(a) => dst.copy_from_slice(&a[start..end]),
                    Operand::Scalar(s) => dst.fill(s),
                },
                Src::Const(c) => dst.fill(c),
            }
            start = end;
        }
    }

    fn eval_block(&mut self, inputs: &[Operand<'_>], start: usize, end: usize) {
        let len = end - start;
        for idx in 0..self.instrs.len() {
            let instr = self.instrs[idx];
            let dst_reg = match instr {
                Instr::Neg { dst, .. } | Instr::Call { dst, .. } | Instr::Bin { dst, .. } => dst,
            };
            let mut dst = std::mem::take(&mut self.registers[dst_reg]);
            {
                let registers = &self.registers;
                let lane = |src: Src| match src {
                    Src::Reg(r) => Lane::Slice(&registers[r][..len]),
                    Src::Var(v) => match inputs[v] {
                        Operand::Array(a) => Lane::Slice(&a[start..end]),
                        Operand::Scalar(s) => Lane::Scalar(s),
                    },
                    Src::Const(c) => Lane::Scalar(c),
                };
                let out = &mut dst[..len];
                match instr {
                    Instr::Neg { a, .. } => {
                        let a = lane(a);
                        for (i, o) in out.iter_mut().enumerate() {
                            *o = -a.get(i);
                        }
                    },
                    Instr::Call { f, a, .. } => match lane(a) {
                        Lane::Slice(s) => {
                            for (o, &v) in out.iter_mut().zip(s) {
                                *o = f(v);
                            }
                        },
                        Lane::Scalar(v) => out.fill(f(v)),
                    },
                    Instr::Bin { op, a, b, .. } => match (lane(a), lane(b)) {
                        (Lane::Slice(l), Lane::Slice(r)) => {
                            for ((o, &p), &q) in out.iter_mut().zip(l).zip(r) {
                                *o = op.apply(p, q);
                            }
                        },
                        (Lane::Slice(l), Lane::Scalar(q)) => {
                            for (o, &p) in out.iter_mut().zip(l) {
                                *o = op.apply(p, q);
                            }
                        },
                        (Lane::Scalar(p), Lane::Slice(r)) => {
                            for (o, &q) in out.iter_mut().zip(r) {
                                *o = op.apply(p, q);
                            }
                        },
                        (Lane::Scalar(p), Lane::Scalar(q)) => out.fill(op.apply(p, q)),
                    },
                }
            }
            self.registers[dst_reg] = dst;
        }
    }
}

fn lower(node: &Node, instrs: &mut Vec<Instr>) -> Src {
    match node {
        Node::Var(v) => Src::Var(*v),
        Node::Const(c) => Src::Const(*c),
        Node::Neg(inner) => {
            let a = lower(inner, instrs);
            let dst = instrs.len();
            instrs.push(Instr::Neg { dst, a });
            Src::Reg(dst)
        },
        Node::Call(func, arg) => {
            let a = lower(arg, instrs);
            let dst = instrs.len();
            instrs.push(Instr::Call {
                dst,
                f: func.scalar_fn(),
                a,
            });
            Src::Reg(dst)
        },
        Node::Binary(op, lhs, rhs) => {
            let a = lower(lhs, instrs);
            let b = lower(rhs, instrs);
            let dst = instrs.len();
            instrs.push(Instr::Bin { dst, op: *op, a, b });
            Src::Reg(dst)
        },
    }
}
