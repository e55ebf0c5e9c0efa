//! Analytic fit formulas.
//!
//! Formulas use the notation calibration tooling has always accepted:
//!
//! - `x` is the reference voltage, `[i]` is the i-th fit parameter
//! - `+ - * /`, `^` (or `**`) for powers, parentheses, unary minus
//! - `sin cos tan exp log log10 sqrt abs` and `pow(a, b)`; the constant `pi`
//! - shortcuts `polN`, `expo` and `gaus`, optionally followed by `(k)` to start
//!   their parameters at index `k`
//!
//! The parameter count is the highest parameter index plus one.

use crate::error::FormulaError;

/// A parsed formula, immutable and safe to share across fitting threads.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
    param_count: usize,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(FormulaError::Empty);
        }

        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            end: source.len(),
        };
        let expr = parser.expr()?;
        if let Some((tok, offset)) = parser.peek() {
            return Err(FormulaError::UnexpectedToken {
                found: tok.describe(),
                offset,
            });
        }

        let param_count = expr.max_param().map(|m| m + 1).unwrap_or(0);
        if param_count == 0 {
            return Err(FormulaError::NoParameters);
        }

        Ok(Self {
            source: source.to_string(),
            expr,
            param_count,
        })
    }

    /// The formula text exactly as given.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Evaluate at `x`. Missing parameters evaluate as `0`.
    pub fn eval(&self, x: f64, params: &[f64]) -> f64 {
        self.expr.eval(x, params)
    }

    /// True when the formula is affine in its parameters, i.e. it can be solved
    /// as an ordinary linear least squares problem.
    pub fn is_linear(&self) -> bool {
        self.expr.param_degree().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Log10,
    Sqrt,
    Abs,
    Pow,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "log10" => Func::Log10,
            "sqrt" => Func::Sqrt,
            "abs" => Func::Abs,
            "pow" => Func::Pow,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Func::Pow => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Const(f64),
    X,
    Param(usize),
    Neg(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

impl Expr {
    fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Bin(op, Box::new(lhs), Box::new(rhs))
    }

    fn eval(&self, x: f64, params: &[f64]) -> f64 {
        match self {
            Expr::Const(v) => *v,
            Expr::X => x,
            Expr::Param(i) => params.get(*i).copied().unwrap_or(0.0),
            Expr::Neg(e) => -e.eval(x, params),
            Expr::Bin(op, a, b) => {
                let a = a.eval(x, params);
                let b = b.eval(x, params);
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Pow => a.powf(b),
                }
            }
            Expr::Call(func, args) => {
                let a = args[0].eval(x, params);
                match func {
                    Func::Sin => a.sin(),
                    Func::Cos => a.cos(),
                    Func::Tan => a.tan(),
                    Func::Exp => a.exp(),
                    Func::Log => a.ln(),
                    Func::Log10 => a.log10(),
                    Func::Sqrt => a.sqrt(),
                    Func::Abs => a.abs(),
                    Func::Pow => a.powf(args[1].eval(x, params)),
                }
            }
        }
    }

    fn max_param(&self) -> Option<usize> {
        match self {
            Expr::Const(_) | Expr::X => None,
            Expr::Param(i) => Some(*i),
            Expr::Neg(e) => e.max_param(),
            Expr::Bin(_, a, b) => a.max_param().max(b.max_param()),
            Expr::Call(_, args) => args.iter().filter_map(Expr::max_param).max(),
        }
    }

    /// `Some(0)` for parameter-free subtrees, `Some(1)` for affine ones,
    /// `None` once a parameter enters non-linearly.
    fn param_degree(&self) -> Option<u8> {
        match self {
            Expr::Const(_) | Expr::X => Some(0),
            Expr::Param(_) => Some(1),
            Expr::Neg(e) => e.param_degree(),
            Expr::Bin(op, a, b) => {
                let (da, db) = (a.param_degree()?, b.param_degree()?);
                match op {
                    BinOp::Add | BinOp::Sub => Some(da.max(db)),
                    BinOp::Mul if da + db <= 1 => Some(da + db),
                    BinOp::Div if db == 0 => Some(da),
                    BinOp::Pow if da == 0 && db == 0 => Some(0),
                    _ => None,
                }
            }
            Expr::Call(_, args) => {
                for arg in args {
                    if arg.param_degree()? != 0 {
                        return None;
                    }
                }
                Some(0)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Param(usize),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(v) => format!("number {v}"),
            Token::Ident(name) => format!("identifier '{name}'"),
            Token::Param(i) => format!("parameter [{i}]"),
            Token::Plus => "'+'".to_string(),
            Token::Minus => "'-'".to_string(),
            Token::Star => "'*'".to_string(),
            Token::Slash => "'/'".to_string(),
            Token::Caret => "'^'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, FormulaError> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
                continue;
            }
            b'+' => out.push((Token::Plus, start)),
            b'-' => out.push((Token::Minus, start)),
            b'/' => out.push((Token::Slash, start)),
            b'^' => out.push((Token::Caret, start)),
            b'(' => out.push((Token::LParen, start)),
            b')' => out.push((Token::RParen, start)),
            b',' => out.push((Token::Comma, start)),
            b'*' => {
                if bytes.get(i + 1) == Some(&b'*') {
                    i += 1;
                    out.push((Token::Caret, start));
                } else {
                    out.push((Token::Star, start));
                }
            }
            b'[' => {
                let digits_start = i + 1;
                let mut j = digits_start;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j == digits_start || bytes.get(j) != Some(&b']') {
                    return Err(FormulaError::UnexpectedChar { ch: '[', offset: start });
                }
                let text = &src[digits_start..j];
                let idx = text
                    .parse::<usize>()
                    .map_err(|_| FormulaError::InvalidNumber { text: text.to_string() })?;
                check_param_index(idx)?;
                out.push((Token::Param(idx), start));
                i = j;
            }
            b'0'..=b'9' | b'.' => {
                let mut j = i;
                while j < bytes.len() && (bytes[j].is_ascii_digit() || bytes[j] == b'.') {
                    j += 1;
                }
                // Exponent part, only when followed by digits (so `2e` stays an error).
                if j < bytes.len() && (bytes[j] == b'e' || bytes[j] == b'E') {
                    let mut k = j + 1;
                    if k < bytes.len() && (bytes[k] == b'+' || bytes[k] == b'-') {
                        k += 1;
                    }
                    if k < bytes.len() && bytes[k].is_ascii_digit() {
                        while k < bytes.len() && bytes[k].is_ascii_digit() {
                            k += 1;
                        }
                        j = k;
                    }
                }
                let text = &src[i..j];
                let value = text
                    .parse::<f64>()
                    .map_err(|_| FormulaError::InvalidNumber { text: text.to_string() })?;
                out.push((Token::Number(value), start));
                i = j;
                continue;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let mut j = i;
                while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                    j += 1;
                }
                out.push((Token::Ident(src[i..j].to_string()), start));
                i = j;
                continue;
            }
            _ => {
                let ch = src[i..].chars().next().unwrap_or('?');
                return Err(FormulaError::UnexpectedChar { ch, offset: start });
            }
        }
        i += 1;
    }

    Ok(out)
}

struct Parser<'a> {
    tokens: &'a [(Token, usize)],
    pos: usize,
    end: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.pos).map(|(t, o)| (t, *o))
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if matches!(self.peek(), Some((t, _)) if t == expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), FormulaError> {
        match self.next() {
            Some((tok, _)) if tok == expected => Ok(()),
            Some((tok, offset)) => Err(FormulaError::UnexpectedToken {
                found: tok.describe(),
                offset,
            }),
            None => Err(self.unexpected_end()),
        }
    }

    fn unexpected_end(&self) -> FormulaError {
        FormulaError::UnexpectedToken {
            found: "end of formula".to_string(),
            offset: self.end,
        }
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        loop {
            let op = if self.eat(&Token::Plus) {
                BinOp::Add
            } else if self.eat(&Token::Minus) {
                BinOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.term()?;
            lhs = Expr::bin(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat(&Token::Star) {
                BinOp::Mul
            } else if self.eat(&Token::Slash) {
                BinOp::Div
            } else {
                return Ok(lhs);
            };
            let rhs = self.unary()?;
            lhs = Expr::bin(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.power()
    }

    // Right associative: `2^3^2 == 2^(3^2)`, and `-x^2 == -(x^2)`.
    fn power(&mut self) -> Result<Expr, FormulaError> {
        let base = self.primary()?;
        if self.eat(&Token::Caret) {
            let exponent = self.unary()?;
            return Ok(Expr::bin(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        let Some((tok, offset)) = self.next() else {
            return Err(self.unexpected_end());
        };
        match tok {
            Token::Number(v) => Ok(Expr::Const(v)),
            Token::Param(i) => Ok(Expr::Param(i)),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => self.identifier(&name),
            other => Err(FormulaError::UnexpectedToken {
                found: other.describe(),
                offset,
            }),
        }
    }

    fn identifier(&mut self, name: &str) -> Result<Expr, FormulaError> {
        match name {
            "x" => return Ok(Expr::X),
            "pi" => return Ok(Expr::Const(std::f64::consts::PI)),
            "expo" => {
                let k = self.shortcut_offset()?;
                check_param_index(k + 1)?;
                return Ok(expo(k));
            }
            "gaus" => {
                let k = self.shortcut_offset()?;
                check_param_index(k + 2)?;
                return Ok(gaus(k));
            }
            _ => {}
        }

        if let Some(degree) = name.strip_prefix("pol").and_then(|d| d.parse::<usize>().ok()) {
            check_param_index(degree)?;
            let k = self.shortcut_offset()?;
            check_param_index(k + degree)?;
            return Ok(polynomial(degree, k));
        }

        let Some(func) = Func::lookup(name) else {
            return Err(FormulaError::UnknownIdentifier {
                name: name.to_string(),
            });
        };

        self.expect(Token::LParen)?;
        let mut args = vec![self.expr()?];
        while self.eat(&Token::Comma) {
            args.push(self.expr()?);
        }
        self.expect(Token::RParen)?;

        if args.len() != func.arity() {
            return Err(FormulaError::UnexpectedToken {
                found: format!("{} argument(s) to '{name}'", args.len()),
                offset: self.peek().map(|(_, o)| o).unwrap_or(self.end),
            });
        }
        Ok(Expr::Call(func, args))
    }

    /// Optional `(k)` after a shortcut.
    fn shortcut_offset(&mut self) -> Result<usize, FormulaError> {
        let is_offset = matches!(
            (self.tokens.get(self.pos), self.tokens.get(self.pos + 1), self.tokens.get(self.pos + 2)),
            (Some((Token::LParen, _)), Some((Token::Number(_), _)), Some((Token::RParen, _)))
        );
        if !is_offset {
            return Ok(0);
        }
        let Some((Token::Number(v), offset)) = self.tokens.get(self.pos + 1).cloned() else {
            return Ok(0);
        };
        if v < 0.0 || v.fract() != 0.0 {
            return Err(FormulaError::UnexpectedToken {
                found: format!("parameter offset {v}"),
                offset,
            });
        }
        if v >= MAX_PARAMETERS as f64 {
            return Err(FormulaError::TooManyParameters {
                index: MAX_PARAMETERS,
                max: MAX_PARAMETERS,
            });
        }
        self.pos += 3;
        Ok(v as usize)
    }
}

/// Parameter indices must stay below this.
pub const MAX_PARAMETERS: usize = 1024;

fn check_param_index(index: usize) -> Result<(), FormulaError> {
    if index >= MAX_PARAMETERS {
        return Err(FormulaError::TooManyParameters {
            index,
            max: MAX_PARAMETERS,
        });
    }
    Ok(())
}

/// `[k] + [k+1]*x + ... + [k+n]*x^n`
fn polynomial(degree: usize, k: usize) -> Expr {
    let mut expr = Expr::Param(k);
    for i in 1..=degree {
        let power = if i == 1 {
            Expr::X
        } else {
            Expr::bin(BinOp::Pow, Expr::X, Expr::Const(i as f64))
        };
        expr = Expr::bin(BinOp::Add, expr, Expr::bin(BinOp::Mul, Expr::Param(k + i), power));
    }
    expr
}

/// `exp([k] + [k+1]*x)`
fn expo(k: usize) -> Expr {
    Expr::Call(Func::Exp, vec![polynomial(1, k)])
}

/// `[k]*exp(-0.5*((x-[k+1])/[k+2])^2)`
fn gaus(k: usize) -> Expr {
    let z = Expr::bin(
        BinOp::Div,
        Expr::bin(BinOp::Sub, Expr::X, Expr::Param(k + 1)),
        Expr::Param(k + 2),
    );
    let arg = Expr::bin(
        BinOp::Mul,
        Expr::Const(-0.5),
        Expr::bin(BinOp::Pow, z, Expr::Const(2.0)),
    );
    Expr::bin(BinOp::Mul, Expr::Param(k), Expr::Call(Func::Exp, vec![arg]))
}
