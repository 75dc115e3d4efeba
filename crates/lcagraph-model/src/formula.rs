//! Exchange amounts: formula compilation with implicit parameter declaration.

use std::collections::BTreeSet;

use lcagraph_expr::{parse_expr, Expr};

use crate::config::WeightSpec;
use crate::error::CompileError;
use crate::params::{ParamError, ParamKind, ParamRegistry};

/// Compile an exchange amount, registering its free symbols.
///
/// `path` locates the entry in the configuration for error messages.
pub fn compile_weight(
    spec: &WeightSpec,
    registry: &mut ParamRegistry,
    path: &str,
) -> Result<Expr, CompileError> {
    compile_replacement_weight(spec, registry, path)?.ok_or_else(|| {
        CompileError::config(path, "`keep` is only valid inside an update replacement")
    })
}

/// Like [`compile_weight`], but `keep` yields `None`.
pub fn compile_replacement_weight(
    spec: &WeightSpec,
    registry: &mut ParamRegistry,
    path: &str,
) -> Result<Option<Expr>, CompileError> {
    if spec.is_keep() {
        return Ok(None);
    }
    let expr = match spec {
        WeightSpec::Number(value) => Expr::num(*value),
        WeightSpec::Formula(text) => parse_expr(text).map_err(|source| CompileError::Formula {
            path: path.to_string(),
            source,
        })?,
    };
    register_free_variables(&expr, registry)?;
    Ok(Some(expr))
}

pub fn free_variables(expr: &Expr) -> BTreeSet<String> {
    expr.free_symbols()
}

/// Declare every unbound symbol of `expr` as a fixed float parameter
/// (default = min = max = 1.0).
pub fn register_free_variables(expr: &Expr, registry: &mut ParamRegistry) -> Result<(), ParamError> {
    for symbol in free_variables(expr) {
        if registry.binds(&symbol) {
            continue;
        }
        if registry.enum_param(&symbol).is_some() {
            return Err(ParamError::KindMismatch {
                name: symbol,
                existing: ParamKind::Enum,
            });
        }
        registry.get_or_create_float(&symbol, 1.0, 1.0, 1.0)?;
    }
    Ok(())
}
