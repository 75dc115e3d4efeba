//! Parameter registry
//!
//! Two kinds of parameters drive edge weights:
//! - **float** parameters: a named symbol with a default and a `[min, max]` range,
//! - **enum** parameters: a finite, ordered set of labels. Each label owns an
//!   indicator symbol `"{param}_{label}"` that evaluates to `1.0` when the label
//!   is selected and `0.0` otherwise.
//!
//! Registration is idempotent on the name: asking twice returns the first
//! definition unchanged, whatever bounds or labels the second caller requested.

use std::collections::HashMap;
use std::fmt;

use lcagraph_expr::Expr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Strip every character that cannot appear in a symbol suffix.
///
/// Underscores are removed too: indicator symbols are `"{param}_{label}"`, and
/// the label must not contain the separator.
pub fn sanitize_label(label: &str) -> String {
    label.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Turn an activity name into the stem of a parameter name: characters that
/// cannot appear in an identifier become `_`, and a leading digit gets a `_`
/// prefix.
pub fn symbol_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    match stem.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => stem,
        _ => format!("_{stem}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Float,
    Enum,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Float => f.write_str("float"),
            ParamKind::Enum => f.write_str("enum"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("parameter `{name}` already exists as a {existing} parameter")]
    KindMismatch { name: String, existing: ParamKind },
    #[error("enum parameter `{name}` has no values")]
    EmptyEnum { name: String },
    #[error("enum parameter `{name}`: labels `{first}` and `{second}` both sanitize to `{label}`")]
    LabelCollision {
        name: String,
        first: String,
        second: String,
        label: String,
    },
    #[error("enum parameter `{name}`: default `{default}` is not one of {values:?}")]
    UnknownDefault {
        name: String,
        default: String,
        values: Vec<String>,
    },
    #[error("float parameter `{name}`: min {min} exceeds max {max}")]
    InvalidBounds { name: String, min: f64, max: f64 },
    #[error("invalid value `{value}` for parameter `{name}`; expected one of {allowed:?}")]
    InvalidParameterValue {
        name: String,
        value: String,
        allowed: Vec<String>,
    },
    #[error("enum parameter `{name}` already exists without labels {missing:?}")]
    MissingLabels { name: String, missing: Vec<String> },
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatParam {
    pub name: String,
    pub default: f64,
    pub min: f64,
    pub max: f64,
}

impl FloatParam {
    pub fn symbol(&self) -> Expr {
        Expr::sym(self.name.clone())
    }

    /// A parameter whose range collapses to its default.
    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumParam {
    pub name: String,
    /// Sanitized labels, in declaration order.
    pub values: Vec<String>,
    /// Sanitized default label.
    pub default: String,
}

impl EnumParam {
    pub fn symbol_name(&self, label: &str) -> String {
        format!("{}_{}", self.name, sanitize_label(label))
    }

    /// Indicator symbol for `label` (sanitized before use).
    pub fn symbol(&self, label: &str) -> Expr {
        Expr::sym(self.symbol_name(label))
    }

    pub fn contains(&self, label: &str) -> bool {
        let label = sanitize_label(label);
        self.values.iter().any(|v| *v == label)
    }

    /// Labels from `labels` this parameter does not declare.
    pub fn missing_labels<S: AsRef<str>>(&self, labels: &[S]) -> Vec<String> {
        labels
            .iter()
            .map(|l| sanitize_label(l.as_ref()))
            .filter(|l| !self.values.contains(l))
            .collect()
    }

    /// Indicator values for selecting `label`: exactly one `1.0`, the rest `0.0`.
    pub fn indicators(&self, label: &str) -> Result<Vec<(String, f64)>, ParamError> {
        if !self.contains(label) {
            return Err(ParamError::InvalidParameterValue {
                name: self.name.clone(),
                value: label.to_string(),
                allowed: self.values.clone(),
            });
        }
        let selected = sanitize_label(label);
        Ok(self
            .values
            .iter()
            .map(|v| {
                let on = if *v == selected { 1.0 } else { 0.0 };
                (format!("{}_{}", self.name, v), on)
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Param {
    Float(FloatParam),
    Enum(EnumParam),
}

impl Param {
    pub fn name(&self) -> &str {
        match self {
            Param::Float(p) => &p.name,
            Param::Enum(p) => &p.name,
        }
    }

    pub fn kind(&self) -> ParamKind {
        match self {
            Param::Float(_) => ParamKind::Float,
            Param::Enum(_) => ParamKind::Enum,
        }
    }
}

/// A value supplied for one parameter at selection time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Float(f64),
    Label(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Label(l) => f.write_str(l),
        }
    }
}

/// Insertion-ordered, name-deduplicated parameter store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParamRegistry {
    params: Vec<Param>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    /// indicator symbol -> owning enum parameter
    #[serde(skip)]
    indicators: HashMap<String, usize>,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.index.get(name).map(|&idx| &self.params[idx])
    }

    pub fn float(&self, name: &str) -> Option<&FloatParam> {
        match self.get(name) {
            Some(Param::Float(p)) => Some(p),
            _ => None,
        }
    }

    pub fn enum_param(&self, name: &str) -> Option<&EnumParam> {
        match self.get(name) {
            Some(Param::Enum(p)) => Some(p),
            _ => None,
        }
    }

    /// Whether `symbol` evaluates to something at default values: a float
    /// parameter name or an enum indicator symbol.
    pub fn binds(&self, symbol: &str) -> bool {
        self.float(symbol).is_some() || self.indicators.contains_key(symbol)
    }

    pub fn clear(&mut self) {
        self.params.clear();
        self.index.clear();
        self.indicators.clear();
    }

    fn insert(&mut self, param: Param) -> usize {
        let idx = self.params.len();
        if let Param::Enum(p) = &param {
            for value in &p.values {
                self.indicators.insert(format!("{}_{}", p.name, value), idx);
            }
        }
        self.index.insert(param.name().to_string(), idx);
        self.params.push(param);
        idx
    }

    pub fn get_or_create_float(
        &mut self,
        name: &str,
        default: f64,
        min: f64,
        max: f64,
    ) -> Result<&FloatParam, ParamError> {
        let idx = match self.index.get(name) {
            Some(&idx) => idx,
            None => {
                if min > max {
                    return Err(ParamError::InvalidBounds {
                        name: name.to_string(),
                        min,
                        max,
                    });
                }
                tracing::debug!(param = name, default, min, max, "registered float parameter");
                self.insert(Param::Float(FloatParam {
                    name: name.to_string(),
                    default,
                    min,
                    max,
                }))
            }
        };
        match &self.params[idx] {
            Param::Float(p) => Ok(p),
            Param::Enum(_) => Err(ParamError::KindMismatch {
                name: name.to_string(),
                existing: ParamKind::Enum,
            }),
        }
    }

    pub fn get_or_create_enum<S: AsRef<str>>(
        &mut self,
        name: &str,
        values: &[S],
        default: &str,
    ) -> Result<&EnumParam, ParamError> {
        let idx = match self.index.get(name) {
            Some(&idx) => idx,
            None => {
                let param = Self::new_enum(name, values, default)?;
                tracing::debug!(param = name, values = ?param.values, "registered enum parameter");
                self.insert(Param::Enum(param))
            }
        };
        match &self.params[idx] {
            Param::Enum(p) => Ok(p),
            Param::Float(_) => Err(ParamError::KindMismatch {
                name: name.to_string(),
                existing: ParamKind::Float,
            }),
        }
    }

    fn new_enum<S: AsRef<str>>(
        name: &str,
        values: &[S],
        default: &str,
    ) -> Result<EnumParam, ParamError> {
        if values.is_empty() {
            return Err(ParamError::EmptyEnum {
                name: name.to_string(),
            });
        }

        let mut labels: Vec<String> = Vec::with_capacity(values.len());
        for (i, raw) in values.iter().enumerate() {
            let label = sanitize_label(raw.as_ref());
            if let Some(j) = labels.iter().position(|l| *l == label) {
                return Err(ParamError::LabelCollision {
                    name: name.to_string(),
                    first: values[j].as_ref().to_string(),
                    second: values[i].as_ref().to_string(),
                    label,
                });
            }
            labels.push(label);
        }

        let default_label = sanitize_label(default);
        if !labels.contains(&default_label) {
            return Err(ParamError::UnknownDefault {
                name: name.to_string(),
                default: default.to_string(),
                values: labels,
            });
        }

        Ok(EnumParam {
            name: name.to_string(),
            values: labels,
            default: default_label,
        })
    }

    /// Widen the range of an existing float parameter (e.g. one fixed by a
    /// formula) so it can vary.
    pub fn broaden_float(&mut self, name: &str, min: f64, max: f64) -> Result<(), ParamError> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| ParamError::UnknownParameter(name.to_string()))?;
        match &mut self.params[idx] {
            Param::Float(p) => {
                p.min = p.min.min(min);
                p.max = p.max.max(max);
                Ok(())
            }
            Param::Enum(_) => Err(ParamError::KindMismatch {
                name: name.to_string(),
                existing: ParamKind::Enum,
            }),
        }
    }

    /// Every symbol bound at its default: floats at their default value, enum
    /// indicators at `1.0` for the default label and `0.0` otherwise.
    pub fn default_bindings(&self) -> HashMap<String, f64> {
        let mut out = HashMap::new();
        for param in &self.params {
            match param {
                Param::Float(p) => {
                    out.insert(p.name.clone(), p.default);
                }
                Param::Enum(p) => {
                    for value in &p.values {
                        let on = if *value == p.default { 1.0 } else { 0.0 };
                        out.insert(format!("{}_{}", p.name, value), on);
                    }
                }
            }
        }
        out
    }

    /// Expand user-supplied values into symbol bindings.
    ///
    /// Missing parameters fall back to their default (with a warning), enum
    /// selections expand into indicator symbols, and names that are not
    /// registered are ignored. Float values outside `[min, max]` are accepted.
    pub fn bindings(
        &self,
        values: &HashMap<String, ParamValue>,
    ) -> Result<HashMap<String, f64>, ParamError> {
        for name in values.keys() {
            if !self.index.contains_key(name) {
                tracing::debug!(param = %name, "ignoring value for unknown parameter");
            }
        }

        let mut out = HashMap::new();
        for param in &self.params {
            let value = values.get(param.name());
            if value.is_none() {
                tracing::warn!(
                    param = param.name(),
                    "required parameter missing, using its default value"
                );
            }
            match (param, value) {
                (Param::Float(p), None) => {
                    out.insert(p.name.clone(), p.default);
                }
                (Param::Float(p), Some(ParamValue::Float(v))) => {
                    out.insert(p.name.clone(), *v);
                }
                (Param::Float(p), Some(ParamValue::Label(l))) => {
                    let v = l.trim().parse::<f64>().map_err(|_| {
                        ParamError::InvalidParameterValue {
                            name: p.name.clone(),
                            value: l.clone(),
                            allowed: vec!["<number>".to_string()],
                        }
                    })?;
                    out.insert(p.name.clone(), v);
                }
                (Param::Enum(p), None) => {
                    out.extend(p.indicators(&p.default)?);
                }
                (Param::Enum(p), Some(ParamValue::Label(l))) => {
                    out.extend(p.indicators(l)?);
                }
                // numeric switch keys such as `2030` arrive as floats
                (Param::Enum(p), Some(ParamValue::Float(v))) => {
                    out.extend(p.indicators(&v.to_string())?);
                }
            }
        }
        Ok(out)
    }
}
