//! Configuration document
//!
//! A model is described by a YAML document:
//!
//! ```yaml
//! project: bike
//! background: { version: "3.9", system_model: cutoff }
//! methods:
//!   - ["IPCC 2013", "climate change", "GWP 100a"]
//! model:
//!   frame:
//!     is_switch: true
//!     carbon_fibre: { name: "carbon fibre", exchange: "mass" }
//!     aluminium: { name: "aluminium", loc: GLO, exchange: "1.2 * mass" }
//! ```
//!
//! Any nested mapping under `model` is an entry: it is a *leaf* when it carries
//! a `name` (a background activity) and a *group* otherwise. The model tree is
//! kept as an ordered [`Mapping`] and typed views are extracted per entry.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{CompileError, LoadError};
use crate::reference::ActivityQuery;
use crate::scenario::ScenarioRecord;

pub const KEY_NAME: &str = "name";
pub const KEY_UNIT: &str = "unit";
pub const KEY_LOCATION: &str = "loc";
pub const KEY_CATEGORIES: &str = "categories";
pub const KEY_EXCHANGE: &str = "exchange";
pub const KEY_SWITCH: &str = "is_switch";
pub const KEY_CUSTOM_ATTRIBUTES: &str = "custom_attributes";
pub const KEY_UPDATE: &str = "update";

pub const RESERVED_KEYS: [&str; 8] = [
    KEY_NAME,
    KEY_UNIT,
    KEY_LOCATION,
    KEY_CATEGORIES,
    KEY_EXCHANGE,
    KEY_SWITCH,
    KEY_CUSTOM_ATTRIBUTES,
    KEY_UPDATE,
];

pub const TOP_LEVEL_KEYS: [&str; 7] = [
    "project",
    "background",
    "ecoinvent",
    "model",
    "methods",
    "scenarios",
    "parameters",
];

/// Exchange value meaning "retain the amount of the replaced exchange".
pub const KEEP_PREVIOUS_AMOUNT: &str = "keep";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Database name reported for activities owned by the namespace.
    pub foreground: String,
    /// Name of the root activity.
    pub root_name: String,
    /// Separator between base name and coordinates in scenario database names.
    pub scenario_separator: String,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            foreground: "Foreground DB".to_string(),
            root_name: "model".to_string(),
            scenario_separator: "_".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(alias = "ecoinvent")]
    pub background: BackgroundConfig,
    pub model: Mapping,
    #[serde(default)]
    pub methods: Vec<MethodRef>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioRecord>,
    #[serde(default)]
    pub parameters: Vec<ParameterDecl>,
    #[serde(skip)]
    pub unknown_keys: Vec<String>,
}

impl ModelConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, LoadError> {
        let document: Value = serde_yaml::from_str(text)?;
        let unknown_keys: Vec<String> = document
            .as_mapping()
            .map(|m| {
                m.keys()
                    .filter_map(key_string)
                    .filter(|k| !TOP_LEVEL_KEYS.contains(&k.as_str()))
                    .collect()
            })
            .unwrap_or_default();
        for key in &unknown_keys {
            tracing::warn!(key = %key, "unknown configuration key");
        }

        let mut config: ModelConfig = serde_yaml::from_value(document)?;
        config.unknown_keys = unknown_keys;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }
}

/// Background database descriptor. An explicit `database` wins; otherwise the
/// name is derived from `version` and `system_model`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackgroundConfig {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: Option<String>,
    #[serde(default)]
    pub system_model: Option<String>,
}

impl BackgroundConfig {
    pub fn database_name(&self) -> Result<String, CompileError> {
        match (&self.database, &self.version, &self.system_model) {
            (Some(db), _, _) => Ok(db.clone()),
            (None, Some(version), Some(model)) => Ok(format!("ecoinvent-{version}-{model}")),
            _ => Err(CompileError::config(
                "background",
                "expected `database` or both `version` and `system_model`",
            )),
        }
    }
}

fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {other:?}"
        ))),
    }
}

/// Mapping keys as strings; numbers and booleans are stringified.
pub fn key_string(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// An impact assessment method, e.g. `("IPCC 2013", "climate change", "GWP 100a")`.
///
/// Accepts a YAML list of strings or a tuple literal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MethodSpec", into = "Vec<String>")]
pub struct MethodRef(pub Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum MethodSpec {
    Parts(Vec<String>),
    Literal(String),
}

impl TryFrom<MethodSpec> for MethodRef {
    type Error = String;

    fn try_from(spec: MethodSpec) -> Result<Self, Self::Error> {
        let parts = match spec {
            MethodSpec::Parts(parts) => parts,
            MethodSpec::Literal(text) => parse_method_literal(&text),
        };
        if parts.is_empty() {
            return Err("empty method".to_string());
        }
        Ok(MethodRef(parts))
    }
}

impl From<MethodRef> for Vec<String> {
    fn from(method: MethodRef) -> Self {
        method.0
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "'{part}'")?;
        }
        f.write_str(")")
    }
}

fn parse_method_literal(text: &str) -> Vec<String> {
    let inner = text.trim();
    let inner = inner
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(inner);
    inner
        .split(',')
        .map(|part| part.trim().trim_matches(|c| c == '\'' || c == '"').trim())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Explicitly declared parameter, registered before the model walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterDecl {
    Float {
        name: String,
        default: f64,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Enum {
        name: String,
        values: Vec<String>,
        #[serde(default)]
        default: Option<String>,
    },
}

/// Exchange amount: a number or a formula string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeightSpec {
    Number(f64),
    Formula(String),
}

impl Default for WeightSpec {
    fn default() -> Self {
        WeightSpec::Number(1.0)
    }
}

impl WeightSpec {
    pub fn is_keep(&self) -> bool {
        matches!(self, WeightSpec::Formula(f) if f.trim() == KEEP_PREVIOUS_AMOUNT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAttribute {
    pub attribute: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateDirective {
    pub input_activity: String,
    pub new_value: Value,
}

/// Background activity entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LeafSpec {
    pub name: String,
    #[serde(default, rename = "loc")]
    pub location: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub exchange: WeightSpec,
    #[serde(default)]
    pub custom_attributes: Vec<CustomAttribute>,
    #[serde(default)]
    pub update: Vec<UpdateDirective>,
}

impl LeafSpec {
    pub fn query(&self) -> ActivityQuery {
        ActivityQuery {
            name: self.name.clone(),
            location: self.location.clone(),
            unit: self.unit.clone(),
            categories: self.categories.clone(),
        }
    }
}

#[derive(Deserialize)]
struct GroupControls {
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    exchange: WeightSpec,
    #[serde(default)]
    is_switch: bool,
    #[serde(default)]
    custom_attributes: Vec<CustomAttribute>,
    #[serde(default)]
    update: Vec<UpdateDirective>,
}

/// Foreground group entry: control keys plus child entries, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub unit: Option<String>,
    pub exchange: WeightSpec,
    pub is_switch: bool,
    pub custom_attributes: Vec<CustomAttribute>,
    pub update: Vec<UpdateDirective>,
    pub children: Vec<(String, Mapping)>,
}

impl GroupSpec {
    pub fn from_mapping(path: &str, table: &Mapping) -> Result<Self, CompileError> {
        let controls: GroupControls = serde_yaml::from_value(Value::Mapping(reserved_only(table)))
            .map_err(|e| CompileError::config(path, e.to_string()))?;

        let mut children = Vec::new();
        for (key, value) in table {
            let Value::Mapping(child) = value else {
                continue;
            };
            let key = key_string(key)
                .ok_or_else(|| CompileError::config(path, format!("unsupported key {key:?}")))?;
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            children.push((key, child.clone()));
        }

        Ok(Self {
            unit: controls.unit,
            exchange: controls.exchange,
            is_switch: controls.is_switch,
            custom_attributes: controls.custom_attributes,
            update: controls.update,
            children,
        })
    }

    pub fn child_keys(&self) -> Vec<&str> {
        self.children.iter().map(|(k, _)| k.as_str()).collect()
    }
}

fn reserved_only(table: &Mapping) -> Mapping {
    table
        .iter()
        .filter(|(k, _)| {
            k.as_str()
                .map_or(false, |k| RESERVED_KEYS.contains(&k))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntrySpec {
    Leaf(LeafSpec),
    Group(GroupSpec),
}

impl EntrySpec {
    pub fn from_mapping(path: &str, table: &Mapping) -> Result<Self, CompileError> {
        if table.contains_key(KEY_NAME) {
            let leaf = serde_yaml::from_value(Value::Mapping(table.clone()))
                .map_err(|e| CompileError::config(path, e.to_string()))?;
            Ok(EntrySpec::Leaf(leaf))
        } else {
            GroupSpec::from_mapping(path, table).map(EntrySpec::Group)
        }
    }
}
