//! Expression AST, constructors, and evaluation.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    fn precedence(self) -> u8 {
        match self {
            BinOp::Add | BinOp::Sub => 1,
            BinOp::Mul | BinOp::Div => 2,
            BinOp::Pow => 4,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => " + ",
            BinOp::Sub => " - ",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "^",
        }
    }

    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinOp::Add => lhs + rhs,
            BinOp::Sub => lhs - rhs,
            BinOp::Mul => lhs * rhs,
            BinOp::Div => lhs / rhs,
            BinOp::Pow => lhs.powf(rhs),
        }
    }
}

/// Builtin functions callable from formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Func {
    Min,
    Max,
    Abs,
    Exp,
    Log,
    Sqrt,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "min" => Some(Func::Min),
            "max" => Some(Func::Max),
            "abs" => Some(Func::Abs),
            "exp" => Some(Func::Exp),
            "log" => Some(Func::Log),
            "sqrt" => Some(Func::Sqrt),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::Min => "min",
            Func::Max => "max",
            Func::Abs => "abs",
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Sqrt => "sqrt",
        }
    }

    /// `min`/`max` are variadic (at least one argument); the rest are unary.
    pub fn accepts(self, argc: usize) -> bool {
        match self {
            Func::Min | Func::Max => argc >= 1,
            Func::Abs | Func::Exp | Func::Log | Func::Sqrt => argc == 1,
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        match self {
            Func::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Func::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Func::Abs => args[0].abs(),
            Func::Exp => args[0].exp(),
            Func::Log => args[0].ln(),
            Func::Sqrt => args[0].sqrt(),
        }
    }
}

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum Expr {
    Num {
        value: f64,
    },
    Sym {
        name: String,
    },
    Neg {
        arg: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("unbound symbol `{0}`")]
    UnboundSymbol(String),
    #[error("function `{func}` does not accept {argc} argument(s)")]
    Arity { func: &'static str, argc: usize },
}

impl Expr {
    pub fn num(value: f64) -> Self {
        Expr::Num { value }
    }

    pub fn one() -> Self {
        Expr::num(1.0)
    }

    pub fn sym(name: impl Into<String>) -> Self {
        Expr::Sym { name: name.into() }
    }

    pub fn neg(arg: Expr) -> Self {
        Expr::Neg { arg: Box::new(arg) }
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call(func: Func, args: Vec<Expr>) -> Self {
        Expr::Call { func, args }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Expr::Num { value } => Some(*value),
            _ => None,
        }
    }

    pub fn is_one(&self) -> bool {
        self.as_num() == Some(1.0)
    }

    /// `self + rhs`, folding constants and dropping zero terms.
    pub fn sum(self, rhs: Expr) -> Expr {
        match (self.as_num(), rhs.as_num()) {
            (Some(a), Some(b)) => Expr::num(a + b),
            (Some(a), None) if a == 0.0 => rhs,
            (None, Some(b)) if b == 0.0 => self,
            _ => Expr::binary(BinOp::Add, self, rhs),
        }
    }

    /// `self - rhs`, folding constants.
    pub fn difference(self, rhs: Expr) -> Expr {
        match (self.as_num(), rhs.as_num()) {
            (Some(a), Some(b)) => Expr::num(a - b),
            (None, Some(b)) if b == 0.0 => self,
            _ => Expr::binary(BinOp::Sub, self, rhs),
        }
    }

    /// `self * rhs`, folding constants and dropping unit factors.
    pub fn product(self, rhs: Expr) -> Expr {
        match (self.as_num(), rhs.as_num()) {
            (Some(a), Some(b)) => Expr::num(a * b),
            (Some(a), None) if a == 1.0 => rhs,
            (None, Some(b)) if b == 1.0 => self,
            _ => Expr::binary(BinOp::Mul, self, rhs),
        }
    }

    /// `self / rhs`, folding constants (a zero divisor is left symbolic).
    pub fn quotient(self, rhs: Expr) -> Expr {
        match (self.as_num(), rhs.as_num()) {
            (Some(a), Some(b)) if b != 0.0 => Expr::num(a / b),
            (None, Some(b)) if b == 1.0 => self,
            _ => Expr::binary(BinOp::Div, self, rhs),
        }
    }

    /// Every symbol name referenced by the expression, sorted.
    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Num { .. } => {}
            Expr::Sym { name } => {
                out.insert(name.clone());
            }
            Expr::Neg { arg } => arg.collect_symbols(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_symbols(out);
                rhs.collect_symbols(out);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_symbols(out);
                }
            }
        }
    }

    pub fn eval(&self, bindings: &HashMap<String, f64>) -> Result<f64, EvalError> {
        self.eval_with(&|name| bindings.get(name).copied())
    }

    /// Evaluate with an arbitrary symbol lookup.
    pub fn eval_with(&self, lookup: &dyn Fn(&str) -> Option<f64>) -> Result<f64, EvalError> {
        match self {
            Expr::Num { value } => Ok(*value),
            Expr::Sym { name } => {
                lookup(name).ok_or_else(|| EvalError::UnboundSymbol(name.clone()))
            }
            Expr::Neg { arg } => Ok(-arg.eval_with(lookup)?),
            Expr::Binary { op, lhs, rhs } => {
                Ok(op.apply(lhs.eval_with(lookup)?, rhs.eval_with(lookup)?))
            }
            Expr::Call { func, args } => {
                if !func.accepts(args.len()) {
                    return Err(EvalError::Arity {
                        func: func.name(),
                        argc: args.len(),
                    });
                }
                let values = args
                    .iter()
                    .map(|a| a.eval_with(lookup))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(func.apply(&values))
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Num { value } if *value < 0.0 => 3,
            Expr::Num { .. } | Expr::Sym { .. } | Expr::Call { .. } => 5,
            Expr::Neg { .. } => 3,
            Expr::Binary { op, .. } => op.precedence(),
        }
    }

    fn fmt_wrapped(&self, f: &mut fmt::Formatter<'_>, wrap: bool) -> fmt::Result {
        if wrap {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::num(value)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Num { value } => write!(f, "{value}"),
            Expr::Sym { name } => f.write_str(name),
            Expr::Neg { arg } => {
                f.write_str("-")?;
                arg.fmt_wrapped(f, arg.precedence() < 3)
            }
            Expr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                if *op == BinOp::Pow {
                    // base is an atom, exponent a unary expression
                    lhs.fmt_wrapped(f, lhs.precedence() < 5)?;
                    f.write_str(op.symbol())?;
                    rhs.fmt_wrapped(f, rhs.precedence() < 3)
                } else {
                    lhs.fmt_wrapped(f, lhs.precedence() < prec)?;
                    f.write_str(op.symbol())?;
                    rhs.fmt_wrapped(f, rhs.precedence() <= prec)
                }
            }
            Expr::Call { func, args } => {
                write!(f, "{}(", func.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_drops_unit_factors() {
        let x = Expr::sym("x");
        assert_eq!(Expr::one().product(x.clone()), x);
        assert_eq!(x.clone().product(Expr::one()), x);
        assert_eq!(Expr::num(2.0).product(Expr::num(3.0)), Expr::num(6.0));
    }

    #[test]
    fn sum_folds_constants() {
        assert_eq!(Expr::num(2.0).sum(Expr::num(0.5)), Expr::num(2.5));
        let x = Expr::sym("x");
        assert_eq!(Expr::num(0.0).sum(x.clone()), x);
    }

    #[test]
    fn free_symbols_are_sorted_and_unique() {
        let e = Expr::sym("b")
            .product(Expr::sym("a"))
            .sum(Expr::call(Func::Max, vec![Expr::sym("a"), Expr::num(0.0)]));
        let syms: Vec<_> = e.free_symbols().into_iter().collect();
        assert_eq!(syms, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn eval_reports_unbound_symbol() {
        let e = Expr::sym("x").product(Expr::num(2.0));
        let err = e.eval(&HashMap::new()).expect_err("x is unbound");
        assert_eq!(err, EvalError::UnboundSymbol("x".to_string()));
    }

    #[test]
    fn eval_min_max() {
        let e = Expr::call(
            Func::Max,
            vec![
                Expr::num(0.0),
                Expr::call(Func::Min, vec![Expr::num(1.0), Expr::sym("t")]),
            ],
        );
        let mut env = HashMap::new();
        env.insert("t".to_string(), 3.0);
        assert_eq!(e.eval(&env).unwrap(), 1.0);
        env.insert("t".to_string(), -3.0);
        assert_eq!(e.eval(&env).unwrap(), 0.0);
    }

    #[test]
    fn display_parenthesizes_by_precedence() {
        let e = Expr::binary(
            BinOp::Mul,
            Expr::binary(BinOp::Add, Expr::sym("a"), Expr::sym("b")),
            Expr::sym("c"),
        );
        assert_eq!(e.to_string(), "(a + b)*c");

        let e = Expr::binary(
            BinOp::Sub,
            Expr::sym("a"),
            Expr::binary(BinOp::Sub, Expr::sym("b"), Expr::sym("c")),
        );
        assert_eq!(e.to_string(), "a - (b - c)");
    }
}
