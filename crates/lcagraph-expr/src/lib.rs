//! Exchange-weight expressions
//!
//! Every edge of a compiled model carries a symbolic weight: a number, a
//! parameter symbol, or a small arithmetic formula over parameter symbols
//! (`2 * mass`, `max(0, min(1, (year - 2020) / 10))`).
//!
//! This crate provides:
//! - the typed AST (`expr::Expr`) with constant-folding constructors,
//! - a nom parser for the textual formula syntax (`parser::parse_expr`),
//! - free-variable extraction and evaluation against a binding map.
//!
//! Parameter bookkeeping lives in `lcagraph-model`; this crate knows nothing
//! about where symbols come from.

pub mod expr;
pub mod parser;

pub use expr::{BinOp, EvalError, Expr, Func};
pub use parser::{parse_expr, ExprParseError};
