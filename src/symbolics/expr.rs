//! Symbolic expressions for stencil equations.
//!
//! An expression is a tree over numbers, scalar symbols and indexed array
//! accesses. Array indices are affine in a single dimension with a constant
//! offset (`u[t + 1, x - 2]`), which is exactly what finite-difference
//! stencils produce.
//!
//! The canonical constructors ([`Expr::add`], [`Expr::mul`], [`Expr::pow`])
//! flatten nested operators, fold numeric constants, drop neutral elements
//! and sort commutative arguments, so two structurally equivalent sums or
//! products compare equal. The `*_raw` constructors build nodes verbatim and
//! are used once an expression has been frozen.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Kind of an iteration dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DimensionKind {
    /// The time-marching dimension
    Time,
    /// A spatial dimension
    Space,
}

/// A named iteration dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dimension {
    /// Name
    pub name: String,
    /// Time or space
    pub kind: DimensionKind,
}

impl Dimension {
    /// A time dimension
    pub fn time(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: DimensionKind::Time }
    }

    /// A space dimension
    pub fn space(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: DimensionKind::Space }
    }

    /// Whether this is a time dimension
    pub fn is_time(&self) -> bool {
        self.kind == DimensionKind::Time
    }

    /// Name of the runtime argument holding the lower iteration bound.
    pub fn min_name(&self) -> String {
        format!("{}_m", self.name)
    }

    /// Name of the runtime argument holding the upper iteration bound.
    pub fn max_name(&self) -> String {
        format!("{}_M", self.name)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A single array subscript.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Index {
    /// A fixed position, e.g. `a[0]`
    Const(i64),
    /// `dim + offset`
    Affine {
        /// Indexed dimension
        dim: Dimension,
        /// Constant shift
        offset: i64,
    },
}

impl Index {
    /// `dim + offset`
    pub fn at(dim: &Dimension, offset: i64) -> Self {
        Index::Affine { dim: dim.clone(), offset }
    }

    /// Dimension, unless the index is constant
    pub fn dim(&self) -> Option<&Dimension> {
        match self {
            Index::Const(_) => None,
            Index::Affine { dim, .. } => Some(dim),
        }
    }

    /// Constant part
    pub fn offset(&self) -> i64 {
        match self {
            Index::Const(c) => *c,
            Index::Affine { offset, .. } => *offset,
        }
    }

    /// Shift an affine index by `delta`; constant indices are left alone.
    pub fn shifted(&self, delta: i64) -> Self {
        match self {
            Index::Const(c) => Index::Const(*c),
            Index::Affine { dim, offset } => Index::Affine { dim: dim.clone(), offset: offset + delta },
        }
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Const(c) => write!(f, "{}", c),
            Index::Affine { dim, offset } => match offset.cmp(&0) {
                Ordering::Equal => write!(f, "{}", dim),
                Ordering::Greater => write!(f, "{} + {}", dim, offset),
                Ordering::Less => write!(f, "{} - {}", dim, -offset),
            },
        }
    }
}

/// What an array symbol stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FunctionKind {
    /// User-visible data, living outside the kernel
    Input,
    /// A temporary introduced by a rewrite pass; `halo` is the
    /// (left, right) padding per dimension
    Array {
        /// Extra points below and above the domain, per dimension
        halo: Vec<(u64, u64)>,
    },
}

/// A named array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Function {
    /// Name
    pub name: String,
    /// User-supplied or temporary
    pub kind: FunctionKind,
}

impl Function {
    /// A user-supplied array
    pub fn input(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FunctionKind::Input }
    }

    /// A temporary array with the given halo
    pub fn array(name: impl Into<String>, halo: Vec<(u64, u64)>) -> Self {
        Self { name: name.into(), kind: FunctionKind::Array { halo } }
    }

    /// Whether the array is user-supplied
    pub fn is_input(&self) -> bool {
        self.kind == FunctionKind::Input
    }

    /// Build an access `self[indices]`.
    pub fn at(&self, indices: Vec<Index>) -> Expr {
        Expr::Indexed(Indexed { function: self.clone(), indices })
    }
}

/// An array access.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Indexed {
    /// Accessed array
    pub function: Function,
    /// One index per array dimension
    pub indices: Vec<Index>,
}

impl Indexed {
    /// Whether any subscript walks the time dimension.
    pub fn is_time_dependent(&self) -> bool {
        self.indices.iter().any(|i| i.dim().map_or(false, Dimension::is_time))
    }
}

impl fmt::Display for Indexed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indices: Vec<String> = self.indices.iter().map(|i| i.to_string()).collect();
        write!(f, "{}[{}]", self.function.name, indices.join(", "))
    }
}

/// A floating point literal with total ordering and bitwise hashing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Float(pub f64);

impl Float {
    fn normalized(self) -> u64 {
        // -0.0 and 0.0 are the same literal
        if self.0 == 0.0 { 0 } else { self.0.to_bits() }
    }
}

impl PartialEq for Float {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for Float {}

impl Hash for Float {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl PartialOrd for Float {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Float {
    fn cmp(&self, other: &Self) -> Ordering {
        if self == other {
            Ordering::Equal
        } else {
            self.0.total_cmp(&other.0)
        }
    }
}

/// Intrinsic functions that may appear in a stencil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Func {
    /// Sine
    Sin,
    /// Cosine
    Cos,
    /// Square root
    Sqrt,
    /// Exponential
    Exp,
    /// Natural logarithm
    Log,
}

impl Func {
    /// Name as rendered
    pub fn name(&self) -> &'static str {
        match self {
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Sqrt => "sqrt",
            Func::Exp => "exp",
            Func::Log => "log",
        }
    }

    /// Evaluate on `x`
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Sqrt => x.sqrt(),
            Func::Exp => x.exp(),
            Func::Log => x.ln(),
        }
    }
}

/// A symbolic expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Expr {
    /// Numeric constant
    Number(Float),
    /// Scalar symbol
    Symbol(String),
    /// Array access
    Indexed(Indexed),
    /// Sum
    Add(Vec<Expr>),
    /// Product
    Mul(Vec<Expr>),
    /// Power
    Pow(Box<Expr>, Box<Expr>),
    /// Function call
    Call(Func, Vec<Expr>),
}

impl Expr {
    /// Numeric constant
    pub fn num(value: f64) -> Self {
        Expr::Number(Float(value))
    }

    /// The constant 0
    pub fn zero() -> Self {
        Expr::num(0.0)
    }

    /// The constant 1
    pub fn one() -> Self {
        Expr::num(1.0)
    }

    /// Scalar symbol
    pub fn symbol(name: impl Into<String>) -> Self {
        Expr::Symbol(name.into())
    }

    /// Canonical sum.
    pub fn add(args: Vec<Expr>) -> Self {
        let mut terms = Vec::with_capacity(args.len());
        let mut constant = 0.0;
        let mut has_constant = false;
        for arg in args {
            match arg {
                Expr::Add(inner) => {
                    for a in inner {
                        match a {
                            Expr::Number(Float(v)) => {
                                constant += v;
                                has_constant = true;
                            }
                            other => terms.push(other),
                        }
                    }
                }
                Expr::Number(Float(v)) => {
                    constant += v;
                    has_constant = true;
                }
                other => terms.push(other),
            }
        }
        if has_constant && constant != 0.0 {
            terms.push(Expr::num(constant));
        }
        terms.sort();
        match terms.len() {
            0 => Expr::zero(),
            1 => terms.pop().unwrap_or_else(Expr::zero),
            _ => Expr::Add(terms),
        }
    }

    /// Canonical product.
    pub fn mul(args: Vec<Expr>) -> Self {
        let mut factors = Vec::with_capacity(args.len());
        let mut coeff = 1.0;
        let push = |e: Expr, factors: &mut Vec<Expr>, coeff: &mut f64| match e {
            Expr::Number(Float(v)) => *coeff *= v,
            other => factors.push(other),
        };
        for arg in args {
            match arg {
                Expr::Mul(inner) => {
                    for a in inner {
                        push(a, &mut factors, &mut coeff);
                    }
                }
                other => push(other, &mut factors, &mut coeff),
            }
        }
        if coeff == 0.0 {
            return Expr::zero();
        }
        if coeff != 1.0 || factors.is_empty() {
            factors.push(Expr::num(coeff));
        }
        factors.sort();
        match factors.len() {
            1 => factors.pop().unwrap_or_else(Expr::one),
            _ => Expr::Mul(factors),
        }
    }

    /// Canonical power.
    pub fn pow(base: Expr, exp: Expr) -> Self {
        match (&base, &exp) {
            (_, Expr::Number(Float(e))) if *e == 1.0 => base,
            (_, Expr::Number(Float(e))) if *e == 0.0 => Expr::one(),
            (Expr::Number(Float(b)), Expr::Number(Float(e))) => Expr::num(b.powf(*e)),
            _ => Expr::Pow(Box::new(base), Box::new(exp)),
        }
    }

    /// Function call
    pub fn call(func: Func, args: Vec<Expr>) -> Self {
        Expr::Call(func, args)
    }

    /// Sum node built verbatim.
    pub fn add_raw(args: Vec<Expr>) -> Self {
        Expr::Add(args)
    }

    /// Product node built verbatim.
    pub fn mul_raw(args: Vec<Expr>) -> Self {
        Expr::Mul(args)
    }

    /// Power node built verbatim.
    pub fn pow_raw(base: Expr, exp: Expr) -> Self {
        Expr::Pow(Box::new(base), Box::new(exp))
    }

    /// `sin(self)`
    pub fn sin(self) -> Self {
        Expr::call(Func::Sin, vec![self])
    }

    /// `cos(self)`
    pub fn cos(self) -> Self {
        Expr::call(Func::Cos, vec![self])
    }

    /// `self**n`
    pub fn powi(self, n: i64) -> Self {
        Expr::pow(self, Expr::num(n as f64))
    }

    /// Whether this is a numeric constant
    pub fn is_number(&self) -> bool {
        matches!(self, Expr::Number(_))
    }

    /// Whether this is a symbol
    pub fn is_symbol(&self) -> bool {
        matches!(self, Expr::Symbol(_))
    }

    /// Whether this is an array access
    pub fn is_indexed(&self) -> bool {
        matches!(self, Expr::Indexed(_))
    }

    /// Numeric value, if constant
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Expr::Number(Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// Integer value of a numeric literal, if it has one.
    pub fn as_integer(&self) -> Option<i64> {
        self.as_number()
            .filter(|v| v.fract() == 0.0 && v.abs() < i64::MAX as f64)
            .map(|v| v as i64)
    }

    /// Operands of this node (empty for leaves).
    pub fn args(&self) -> Vec<&Expr> {
        match self {
            Expr::Number(_) | Expr::Symbol(_) | Expr::Indexed(_) => Vec::new(),
            Expr::Add(args) | Expr::Mul(args) | Expr::Call(_, args) => args.iter().collect(),
            Expr::Pow(base, exp) => vec![base.as_ref(), exp.as_ref()],
        }
    }

    /// Rebuild this node with new operands using the canonical constructors.
    /// Leaves are returned unchanged.
    pub fn with_args(&self, mut args: Vec<Expr>) -> Expr {
        match self {
            Expr::Number(_) | Expr::Symbol(_) | Expr::Indexed(_) => self.clone(),
            Expr::Add(_) => Expr::add(args),
            Expr::Mul(_) => Expr::mul(args),
            Expr::Call(f, _) => Expr::call(*f, args),
            Expr::Pow(..) => {
                let exp = args.pop().unwrap_or_else(Expr::one);
                let base = args.pop().unwrap_or_else(Expr::one);
                Expr::pow(base, exp)
            }
        }
    }

    /// Rebuild this node with new operands, verbatim.
    pub fn with_args_raw(&self, mut args: Vec<Expr>) -> Expr {
        match self {
            Expr::Number(_) | Expr::Symbol(_) | Expr::Indexed(_) => self.clone(),
            Expr::Add(_) => Expr::add_raw(args),
            Expr::Mul(_) => Expr::mul_raw(args),
            Expr::Call(f, _) => Expr::call(*f, args),
            Expr::Pow(..) => {
                let exp = args.pop().unwrap_or_else(Expr::one);
                let base = args.pop().unwrap_or_else(Expr::one);
                Expr::pow_raw(base, exp)
            }
        }
    }

    /// Apply `f` to every operand and rebuild.
    pub fn map_args<F: FnMut(&Expr) -> Expr>(&self, mut f: F, raw: bool) -> Expr {
        let args: Vec<Expr> = self.args().into_iter().map(|a| f(a)).collect();
        if raw {
            self.with_args_raw(args)
        } else {
            self.with_args(args)
        }
    }

    /// Pre-order walk over every node.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        for arg in self.args() {
            arg.walk(visit);
        }
    }

    /// All array accesses, in pre-order.
    pub fn indexeds(&self) -> Vec<&Indexed> {
        let mut found = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Indexed(i) = e {
                found.push(i);
            }
        });
        found
    }

    /// Names of the scalar symbols read by this expression.
    pub fn free_symbols(&self) -> BTreeSet<&str> {
        let mut found = BTreeSet::new();
        self.walk(&mut |e| {
            if let Expr::Symbol(s) = e {
                found.insert(s.as_str());
            }
        });
        found
    }

    /// Dimensions appearing in any array subscript.
    pub fn dimensions(&self) -> BTreeSet<Dimension> {
        self.indexeds()
            .into_iter()
            .flat_map(|i| i.indices.iter().filter_map(|x| x.dim().cloned()))
            .collect()
    }

    /// Whether `needle` occurs anywhere in this tree.
    pub fn contains(&self, needle: &Expr) -> bool {
        if self == needle {
            return true;
        }
        self.args().into_iter().any(|a| a.contains(needle))
    }

    /// Multiplicative coefficient and remaining factors, e.g. `3*a*b` -> `(3, [a, b])`.
    pub fn as_coeff_factors(&self) -> (f64, Vec<Expr>) {
        match self {
            Expr::Number(Float(v)) => (*v, Vec::new()),
            Expr::Mul(args) => {
                let mut coeff = 1.0;
                let mut rest = Vec::with_capacity(args.len());
                for a in args {
                    match a {
                        Expr::Number(Float(v)) => coeff *= v,
                        other => rest.push(other.clone()),
                    }
                }
                (coeff, rest)
            }
            other => (1.0, vec![other.clone()]),
        }
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Expr::num(v)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::num(v as f64)
    }
}

impl From<Indexed> for Expr {
    fn from(i: Indexed) -> Self {
        Expr::Indexed(i)
    }
}

impl Add for Expr {
    type Output = Expr;

    fn add(self, other: Expr) -> Expr {
        Expr::add(vec![self, other])
    }
}

impl Sub for Expr {
    type Output = Expr;

    fn sub(self, other: Expr) -> Expr {
        Expr::add(vec![self, -other])
    }
}

impl Mul for Expr {
    type Output = Expr;

    fn mul(self, other: Expr) -> Expr {
        Expr::mul(vec![self, other])
    }
}

impl Div for Expr {
    type Output = Expr;

    fn div(self, other: Expr) -> Expr {
        Expr::mul(vec![self, Expr::pow(other, Expr::num(-1.0))])
    }
}

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::mul(vec![Expr::num(-1.0), self])
    }
}

fn fmt_operand(e: &Expr, parent_prec: u8, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let prec = match e {
        Expr::Add(_) => 1,
        Expr::Mul(_) => 2,
        Expr::Number(Float(v)) if *v < 0.0 => 2,
        _ => 3,
    };
    if prec < parent_prec {
        write!(f, "({})", e)
    } else {
        write!(f, "{}", e)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(Float(v)) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Expr::Symbol(s) => write!(f, "{}", s),
            Expr::Indexed(i) => write!(f, "{}", i),
            Expr::Add(args) => {
                for (n, arg) in args.iter().enumerate() {
                    let (coeff, rest) = arg.as_coeff_factors();
                    if n > 0 && coeff < 0.0 {
                        write!(f, " - ")?;
                        let negated = Expr::mul(std::iter::once(Expr::num(-coeff)).chain(rest).collect());
                        fmt_operand(&negated, 2, f)?;
                    } else {
                        if n > 0 {
                            write!(f, " + ")?;
                        }
                        fmt_operand(arg, 1, f)?;
                    }
                }
                Ok(())
            }
            Expr::Mul(args) => {
                for (n, arg) in args.iter().enumerate() {
                    if n > 0 {
                        write!(f, "*")?;
                    }
                    fmt_operand(arg, 2, f)?;
                }
                Ok(())
            }
            Expr::Pow(base, exp) => write!(f, "pow({}, {})", base, exp),
            Expr::Call(func, args) => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", func.name(), args.join(", "))
            }
        }
    }
}

/// A symbolic assignment `lhs = rhs`.
///
/// With `increment` set the assignment accumulates into its target:
/// `lhs += rhs`. An increment may also be spelled in its expanded
/// reduction form `lhs = lhs + s`; both denote the accumulation of `s`
/// (see [`Assignment::increment_term`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    /// Target
    pub lhs: Expr,
    /// Value
    pub rhs: Expr,
    /// Whether this is `lhs += rhs`
    pub increment: bool,
    /// Frozen assignments are never re-canonicalized.
    pub frozen: bool,
}

impl Assignment {
    /// `lhs = rhs`
    pub fn new(lhs: Expr, rhs: Expr) -> Self {
        Self { lhs, rhs, increment: false, frozen: false }
    }

    /// `lhs += rhs`
    pub fn increment(lhs: Expr, rhs: Expr) -> Self {
        Self { lhs, rhs, increment: true, frozen: false }
    }

    /// Same assignment with a different right-hand side.
    pub fn with_rhs(&self, rhs: Expr) -> Self {
        Self { rhs, ..self.clone() }
    }

    /// The quantity accumulated by an increment: the right-hand side with
    /// any additive occurrence of the target removed.
    pub fn increment_term(&self) -> Expr {
        match &self.rhs {
            Expr::Number(_) | Expr::Symbol(_) => self.rhs.clone(),
            Expr::Add(args) if args.contains(&self.lhs) => {
                Expr::add(args.iter().filter(|a| **a != self.lhs).cloned().collect())
            }
            other => other.clone(),
        }
    }

    /// Whether the target is user-visible data.
    pub fn writes_input(&self) -> bool {
        matches!(&self.lhs, Expr::Indexed(i) if i.function.is_input())
    }

    /// Name of the scalar written by this assignment, if any.
    pub fn scalar_target(&self) -> Option<&str> {
        match &self.lhs {
            Expr::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = if self.increment { "+=" } else { "=" };
        write!(f, "{} {} {}", self.lhs, op, self.rhs)
    }
}
