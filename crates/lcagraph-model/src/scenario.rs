//! Scenario resolver
//!
//! In scenario mode a technosphere leaf is not copied from the base database
//! once; it becomes a selector over every declared `(model, pathway, year)`
//! combination, each resolved in its own scenario database
//! (`"{base}_{model}_{pathway}_{year}"`).
//!
//! ```text
//!   key (multi-switch)
//!    ├─ model_a * pathway_x ──► key_a_x (interpolation) ─┬─ w(year) ──► key_a_x_2020
//!    │                                                   └─ w(year) ──► key_a_x_2030
//!    └─ model_b * pathway_y ──► key_b_y_2020 (single sample, no interpolation)
//! ```
//!
//! Notes:
//! - Only declared combinations are wired, never the full cross product.
//! - Interpolation weights are piecewise-linear hat functions of `year`,
//!   clamped outside the sampled range.

use serde::{Deserialize, Serialize};

use lcagraph_expr::{Expr, Func};

use crate::builder::claim_name;
use crate::error::{CompileError, Diagnostic};
use crate::namespace::{ActivityId, ActivityKind, ExchangeInput, Namespace};
use crate::params::{sanitize_label, EnumParam, FloatParam, ParamError, ParamRegistry};
use crate::reference::{ActivityLookup, ActivityQuery};

pub const MODEL_PARAM: &str = "model";
pub const PATHWAY_PARAM: &str = "pathway";
pub const YEAR_PARAM: &str = "year";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub model: String,
    pub pathway: String,
    pub year: i32,
}

/// Scenario combinations sharing the discrete coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioGroup {
    pub model: String,
    pub pathway: String,
    /// Sorted, deduplicated.
    pub years: Vec<i32>,
}

/// Non-empty, deduplicated set of declared scenarios, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ScenarioSet {
    records: Vec<ScenarioRecord>,
}

impl ScenarioSet {
    pub fn new(records: impl IntoIterator<Item = ScenarioRecord>) -> Option<Self> {
        let mut unique: Vec<ScenarioRecord> = Vec::new();
        for record in records {
            if !unique.contains(&record) {
                unique.push(record);
            }
        }
        if unique.is_empty() {
            None
        } else {
            Some(Self { records: unique })
        }
    }

    pub fn records(&self) -> &[ScenarioRecord] {
        &self.records
    }

    fn distinct<T: PartialEq + Clone>(&self, f: impl Fn(&ScenarioRecord) -> T) -> Vec<T> {
        let mut out: Vec<T> = Vec::new();
        for record in &self.records {
            let value = f(record);
            if !out.contains(&value) {
                out.push(value);
            }
        }
        out
    }

    pub fn models(&self) -> Vec<String> {
        self.distinct(|r| r.model.clone())
    }

    pub fn pathways(&self) -> Vec<String> {
        self.distinct(|r| r.pathway.clone())
    }

    /// Years in first-seen order.
    pub fn years(&self) -> Vec<i32> {
        self.distinct(|r| r.year)
    }

    pub fn groups(&self) -> Vec<ScenarioGroup> {
        let mut groups: Vec<ScenarioGroup> = Vec::new();
        for record in &self.records {
            match groups
                .iter_mut()
                .find(|g| g.model == record.model && g.pathway == record.pathway)
            {
                Some(group) => group.years.push(record.year),
                None => groups.push(ScenarioGroup {
                    model: record.model.clone(),
                    pathway: record.pathway.clone(),
                    years: vec![record.year],
                }),
            }
        }
        for group in &mut groups {
            group.years.sort_unstable();
            group.years.dedup();
        }
        groups
    }
}

/// The three parameters driving scenario selection.
#[derive(Debug, Clone)]
pub struct ScenarioParams {
    pub model: EnumParam,
    pub pathway: EnumParam,
    pub year: FloatParam,
}

impl ScenarioParams {
    /// Register (or reuse) `model`, `pathway` and `year`. A reused enum must
    /// declare every label the scenario set uses.
    pub fn register(registry: &mut ParamRegistry, set: &ScenarioSet) -> Result<Self, ParamError> {
        let model = Self::register_enum(registry, MODEL_PARAM, &set.models())?;
        let pathway = Self::register_enum(registry, PATHWAY_PARAM, &set.pathways())?;

        let years = set.years();
        let first = years.first().copied().unwrap_or_default() as f64;
        let min = years.iter().copied().min().unwrap_or_default() as f64;
        let max = years.iter().copied().max().unwrap_or_default() as f64;
        let year = registry.get_or_create_float(YEAR_PARAM, first, min, max)?.clone();

        Ok(Self {
            model,
            pathway,
            year,
        })
    }

    fn register_enum(
        registry: &mut ParamRegistry,
        name: &str,
        labels: &[String],
    ) -> Result<EnumParam, ParamError> {
        let default = labels.first().map(String::as_str).unwrap_or_default();
        let param = registry.get_or_create_enum(name, labels, default)?.clone();
        let missing = param.missing_labels(labels);
        if !missing.is_empty() {
            return Err(ParamError::MissingLabels {
                name: name.to_string(),
                missing,
            });
        }
        Ok(param)
    }
}

/// Weights selecting each sample of `samples` (sorted ascending) as a function
/// of `t`: 1 at its own sample, 0 at its neighbours, linear in between and
/// constant beyond the first and last samples.
pub fn interpolation_weights(t: &Expr, samples: &[f64]) -> Vec<Expr> {
    let n = samples.len();
    if n <= 1 {
        return vec![Expr::one(); n];
    }

    let rising = |i: usize| {
        t.clone()
            .difference(Expr::num(samples[i - 1]))
            .quotient(Expr::num(samples[i] - samples[i - 1]))
    };
    let falling = |i: usize| {
        Expr::num(samples[i + 1])
            .difference(t.clone())
            .quotient(Expr::num(samples[i + 1] - samples[i]))
    };
    let clamp = |inner: Vec<Expr>| {
        Expr::call(
            Func::Max,
            vec![Expr::num(0.0), Expr::call(Func::Min, inner)],
        )
    };

    (0..n)
        .map(|i| {
            if i == 0 {
                clamp(vec![Expr::one(), falling(i)])
            } else if i == n - 1 {
                clamp(vec![Expr::one(), rising(i)])
            } else {
                clamp(vec![rising(i), falling(i)])
            }
        })
        .collect()
}

/// Builds scenario selectors for background leaves.
#[derive(Debug, Clone)]
pub struct ScenarioResolver {
    base: String,
    separator: String,
    set: ScenarioSet,
    params: ScenarioParams,
}

impl ScenarioResolver {
    /// Fails with [`CompileError::MissingScenarioBase`] before registering
    /// anything when the base database is unknown to `lookup`.
    pub fn new<L: ActivityLookup + ?Sized>(
        lookup: &L,
        base: &str,
        separator: &str,
        set: ScenarioSet,
        registry: &mut ParamRegistry,
    ) -> Result<Self, CompileError> {
        if !lookup.has_database(base) {
            return Err(CompileError::MissingScenarioBase {
                database: base.to_string(),
            });
        }
        let params = ScenarioParams::register(registry, &set)?;
        Ok(Self {
            base: base.to_string(),
            separator: separator.to_string(),
            set,
            params,
        })
    }

    pub fn set(&self) -> &ScenarioSet {
        &self.set
    }

    pub fn params(&self) -> &ScenarioParams {
        &self.params
    }

    pub fn database_name(&self, model: &str, pathway: &str, year: i32) -> String {
        let sep = &self.separator;
        format!("{}{sep}{model}{sep}{pathway}{sep}{year}", self.base)
    }

    /// Build the selector for the leaf `key` and return the multi-switch node.
    pub fn resolve<L: ActivityLookup + ?Sized>(
        &self,
        namespace: &mut Namespace,
        lookup: &L,
        key: &str,
        query: &ActivityQuery,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<ActivityId, CompileError> {
        let name = claim_name(namespace, key, diagnostics);
        let selector = namespace.create(name, query.unit.clone(), ActivityKind::MultiSwitch)?;

        for group in self.set.groups() {
            let prefix = format!(
                "{key}_{}_{}",
                sanitize_label(&group.model),
                sanitize_label(&group.pathway)
            );

            let target = if let [year] = group.years.as_slice() {
                self.copy_sample(namespace, lookup, &prefix, &group, *year, query, diagnostics)?
            } else {
                let name = claim_name(namespace, &prefix, diagnostics);
                let blend =
                    namespace.create(name, query.unit.clone(), ActivityKind::Interpolation)?;
                let samples: Vec<f64> = group.years.iter().map(|&y| y as f64).collect();
                let weights = interpolation_weights(&self.params.year.symbol(), &samples);
                for (&year, weight) in group.years.iter().zip(weights) {
                    let copy =
                        self.copy_sample(namespace, lookup, &prefix, &group, year, query, diagnostics)?;
                    namespace.add_exchange(blend, ExchangeInput::activity(copy), weight)?;
                }
                blend
            };

            let gate = self
                .params
                .model
                .symbol(&group.model)
                .product(self.params.pathway.symbol(&group.pathway));
            namespace.add_exchange(selector, ExchangeInput::activity(target), gate)?;
        }

        tracing::debug!(activity = key, groups = self.set.groups().len(), "built scenario selector");
        Ok(selector)
    }

    #[allow(clippy::too_many_arguments)]
    fn copy_sample<L: ActivityLookup + ?Sized>(
        &self,
        namespace: &mut Namespace,
        lookup: &L,
        prefix: &str,
        group: &ScenarioGroup,
        year: i32,
        query: &ActivityQuery,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<ActivityId, CompileError> {
        let database = self.database_name(&group.model, &group.pathway, year);
        let source = lookup.find_technosphere(&database, query).map_err(|err| {
            CompileError::ActivityNotFound {
                query: query.to_string(),
                database: database.clone(),
                reason: err.to_string(),
            }
        })?;
        let name = claim_name(namespace, &format!("{prefix}_{year}"), diagnostics);
        Ok(namespace.copy_external(name, &source)?)
    }
}
