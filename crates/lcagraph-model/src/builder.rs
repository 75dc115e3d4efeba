//! Model graph builder
//!
//! Walks the `model` tree of a [`ModelConfig`] depth-first and turns it into
//! activities and exchanges in a [`Namespace`]:
//!
//! - a **leaf** entry (it has a `name`) is resolved in the background. A
//!   technosphere match is copied into the namespace (or replaced by a scenario
//!   selector in scenario mode); a biosphere match is referenced directly.
//! - a **group** entry becomes a regular activity, or a switch activity when
//!   `is_switch` is set. A switch registers `"{name}_switch_param"` (with the
//!   name reduced to identifier characters) over its children's sanitized keys and gates each child edge with the matching
//!   indicator symbol.
//!
//! The walk uses an explicit work stack, so deep configurations do not grow
//! the call stack.

use std::collections::HashMap;

use lcagraph_expr::{EvalError, Expr};
use serde::Serialize;
use serde_yaml::Mapping;

use crate::config::{
    CompilerOptions, CustomAttribute, EntrySpec, GroupSpec, LeafSpec, MethodRef, ModelConfig,
    ParameterDecl, KEY_NAME,
};
use crate::error::{CompileError, Diagnostic};
use crate::formula::compile_weight;
use crate::namespace::{Activity, ActivityId, ActivityKind, ExchangeInput, Namespace};
use crate::params::{symbol_stem, EnumParam, ParamError, ParamRegistry};
use crate::reference::{ActivityLookup, Resolution};
use crate::scenario::{ScenarioResolver, ScenarioSet};
use crate::update::leaf_targets;

/// Mutable state shared by successive builds.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub namespace: Namespace,
    pub registry: ParamRegistry,
}

impl Workspace {
    pub fn new(options: &CompilerOptions) -> Self {
        Self {
            namespace: Namespace::new(options.foreground.clone()),
            registry: ParamRegistry::new(),
        }
    }

    /// Forget every activity and parameter.
    pub fn reset(&mut self) {
        self.namespace.reset();
        self.registry.clear();
    }
}

/// Result of one build into a [`Workspace`].
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub root: ActivityId,
    pub background: String,
    pub scenarios: Option<ScenarioSet>,
    pub diagnostics: Vec<Diagnostic>,
}

/// A compiled model: the graph, its parameters and the impact methods.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledModel {
    pub project: Option<String>,
    pub root: ActivityId,
    pub background: String,
    pub namespace: Namespace,
    pub parameters: ParamRegistry,
    pub methods: Vec<MethodRef>,
    pub scenarios: Option<ScenarioSet>,
    pub diagnostics: Vec<Diagnostic>,
}

/// One weighted edge of the compiled graph, by activity name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeWeight<'a> {
    pub consumer: &'a str,
    pub input: &'a str,
    pub amount: &'a Expr,
}

impl CompiledModel {
    pub fn root_activity(&self) -> Option<&Activity> {
        self.namespace.get(self.root)
    }

    pub fn set_methods(&mut self, methods: Vec<MethodRef>) {
        if !self.methods.is_empty() {
            tracing::warn!(
                previous = self.methods.len(),
                "replacing existing impact methods"
            );
        }
        self.methods = methods;
    }

    /// Activities reachable from the root, depth-first.
    pub fn reachable(&self) -> Vec<&Activity> {
        self.namespace
            .reachable(self.root)
            .into_iter()
            .filter_map(|id| self.namespace.get(id))
            .collect()
    }

    pub fn is_acyclic(&self) -> bool {
        self.namespace.is_acyclic()
    }

    pub fn edge_weights(&self) -> Vec<EdgeWeight<'_>> {
        self.reachable()
            .into_iter()
            .flat_map(|activity| {
                activity.exchanges.iter().map(move |ex| EdgeWeight {
                    consumer: &activity.name,
                    input: self.namespace.input_name(&ex.input),
                    amount: &ex.amount,
                })
            })
            .collect()
    }

    /// Evaluate every reachable edge with `bindings`.
    pub fn evaluate_edges(
        &self,
        bindings: &HashMap<String, f64>,
    ) -> Result<Vec<(String, String, f64)>, EvalError> {
        self.edge_weights()
            .into_iter()
            .map(|edge| {
                Ok((
                    edge.consumer.to_string(),
                    edge.input.to_string(),
                    edge.amount.eval(bindings)?,
                ))
            })
            .collect()
    }
}

/// Compile `config` into a fresh workspace.
pub fn compile_model<L: ActivityLookup + ?Sized>(
    config: &ModelConfig,
    lookup: &L,
    options: &CompilerOptions,
) -> Result<CompiledModel, CompileError> {
    let mut workspace = Workspace::new(options);
    let output = compile_into(&mut workspace, config, lookup, options)?;
    Ok(CompiledModel {
        project: config.project.clone(),
        root: output.root,
        background: output.background,
        namespace: workspace.namespace,
        parameters: workspace.registry,
        methods: config.methods.clone(),
        scenarios: output.scenarios,
        diagnostics: output.diagnostics,
    })
}

/// Compile `config` into an existing workspace. Names already taken by an
/// earlier build are renamed, never merged.
pub fn compile_into<L: ActivityLookup + ?Sized>(
    workspace: &mut Workspace,
    config: &ModelConfig,
    lookup: &L,
    options: &CompilerOptions,
) -> Result<BuildOutput, CompileError> {
    let background = config.background.database_name()?;
    let diagnostics: Vec<Diagnostic> = config
        .unknown_keys
        .iter()
        .map(|key| Diagnostic::UnknownConfigKey { key: key.clone() })
        .collect();

    let scenario_set = ScenarioSet::new(config.scenarios.iter().cloned());
    if scenario_set.is_some() && !lookup.has_database(&background) {
        return Err(CompileError::MissingScenarioBase {
            database: background,
        });
    }

    declare_parameters(&mut workspace.registry, &config.parameters)?;
    let scenarios = match scenario_set.clone() {
        Some(set) => Some(ScenarioResolver::new(
            lookup,
            &background,
            &options.scenario_separator,
            set,
            &mut workspace.registry,
        )?),
        None => None,
    };

    let mut builder = ModelBuilder {
        namespace: &mut workspace.namespace,
        registry: &mut workspace.registry,
        lookup,
        background: background.clone(),
        scenarios,
        diagnostics,
    };
    let root = builder.build_root(&options.root_name, &config.model)?;
    builder.check_bound_symbols()?;

    tracing::debug!(
        root = %root,
        activities = builder.namespace.len(),
        parameters = builder.registry.len(),
        "compiled model"
    );
    Ok(BuildOutput {
        root,
        background,
        scenarios: scenario_set,
        diagnostics: builder.diagnostics,
    })
}

fn declare_parameters(
    registry: &mut ParamRegistry,
    declared: &[ParameterDecl],
) -> Result<(), ParamError> {
    for decl in declared {
        match decl {
            ParameterDecl::Float {
                name,
                default,
                min,
                max,
            } => {
                registry.get_or_create_float(
                    name,
                    *default,
                    min.unwrap_or(*default),
                    max.unwrap_or(*default),
                )?;
            }
            ParameterDecl::Enum {
                name,
                values,
                default,
            } => {
                let default = default
                    .as_deref()
                    .or_else(|| values.first().map(String::as_str))
                    .unwrap_or_default();
                registry.get_or_create_enum(name, values, default)?;
            }
        }
    }
    Ok(())
}

/// Reserve `requested`, or the first free `requested_N`, recording a rename.
pub(crate) fn claim_name(
    namespace: &Namespace,
    requested: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> String {
    let assigned = namespace.rename_on_conflict(requested);
    if assigned != requested {
        diagnostics.push(Diagnostic::Renamed {
            requested: requested.to_string(),
            assigned: assigned.clone(),
        });
    }
    assigned
}

fn gated(weight: Expr, gate: Option<&EnumParam>, key: &str) -> Expr {
    match gate {
        Some(param) => weight.product(param.symbol(key)),
        None => weight,
    }
}

/// An entry waiting to be attached to `parent`.
pub(crate) struct Pending {
    pub parent: ActivityId,
    pub key: String,
    pub path: String,
    pub table: Mapping,
    pub gate: Option<EnumParam>,
}

pub(crate) struct ModelBuilder<'a, L: ActivityLookup + ?Sized> {
    pub namespace: &'a mut Namespace,
    pub registry: &'a mut ParamRegistry,
    pub lookup: &'a L,
    pub background: String,
    pub scenarios: Option<ScenarioResolver>,
    pub diagnostics: Vec<Diagnostic>,
}

impl<L: ActivityLookup + ?Sized> ModelBuilder<'_, L> {
    fn build_root(&mut self, root_name: &str, model: &Mapping) -> Result<ActivityId, CompileError> {
        let name = claim_name(self.namespace, root_name, &mut self.diagnostics);
        if model.contains_key(KEY_NAME) {
            // the whole model is a single background activity
            let root = self.namespace.create(name, None, ActivityKind::Regular)?;
            let leaf: LeafSpec = serde_yaml::from_value(serde_yaml::Value::Mapping(model.clone()))
                .map_err(|e| CompileError::config(root_name, e.to_string()))?;
            let key = leaf.name.clone();
            self.compile_leaf(root, &key, root_name, &leaf, None)?;
            return Ok(root);
        }

        let spec = GroupSpec::from_mapping(root_name, model)?;
        let (root, gate) = self.create_group(&name, root_name, &spec)?;
        let children = self.children_of(root, root_name, &spec, gate);
        self.build(children)?;
        Ok(root)
    }

    /// Drain the work stack in depth-first pre-order.
    pub(crate) fn build(&mut self, mut stack: Vec<Pending>) -> Result<(), CompileError> {
        stack.reverse();
        while let Some(entry) = stack.pop() {
            let children = self.compile_entry(entry)?;
            stack.extend(children.into_iter().rev());
        }
        Ok(())
    }

    pub(crate) fn children_of(
        &self,
        parent: ActivityId,
        path: &str,
        spec: &GroupSpec,
        gate: Option<EnumParam>,
    ) -> Vec<Pending> {
        spec.children
            .iter()
            .map(|(key, table)| Pending {
                parent,
                key: key.clone(),
                path: format!("{path}.{key}"),
                table: table.clone(),
                gate: gate.clone(),
            })
            .collect()
    }

    fn compile_entry(&mut self, entry: Pending) -> Result<Vec<Pending>, CompileError> {
        match EntrySpec::from_mapping(&entry.path, &entry.table)? {
            EntrySpec::Leaf(leaf) => {
                self.compile_leaf(
                    entry.parent,
                    &entry.key,
                    &entry.path,
                    &leaf,
                    entry.gate.as_ref(),
                )?;
                Ok(Vec::new())
            }
            EntrySpec::Group(group) => self.compile_group(&entry, &group),
        }
    }

    fn compile_leaf(
        &mut self,
        parent: ActivityId,
        key: &str,
        path: &str,
        leaf: &LeafSpec,
        gate: Option<&EnumParam>,
    ) -> Result<(), CompileError> {
        let weight = compile_weight(&leaf.exchange, self.registry, path)?;
        let query = leaf.query();

        let input = match self.lookup.resolve(&self.background, &query) {
            Resolution::Primary(source) => {
                let id = match &self.scenarios {
                    Some(resolver) => resolver.resolve(
                        self.namespace,
                        self.lookup,
                        key,
                        &query,
                        &mut self.diagnostics,
                    )?,
                    None => {
                        let name = claim_name(self.namespace, key, &mut self.diagnostics);
                        self.namespace.copy_external(name, &source)?
                    }
                };
                for target in leaf_targets(self.namespace, id)? {
                    self.apply_attributes(target, &leaf.custom_attributes)?;
                }
                self.apply_updates(id, path, &leaf.update)?;
                ExchangeInput::activity(id)
            }
            Resolution::Secondary(source) => {
                if !leaf.custom_attributes.is_empty() || !leaf.update.is_empty() {
                    tracing::warn!(
                        activity = %source.name,
                        "biosphere flows cannot carry attributes or updates"
                    );
                    self.diagnostics.push(Diagnostic::IgnoredAttributes {
                        activity: source.name.clone(),
                        reason: "biosphere flows are referenced, not copied".to_string(),
                    });
                }
                ExchangeInput::reference(source.key())
            }
            Resolution::NotFound { primary, secondary } => {
                return Err(CompileError::ActivityNotFound {
                    query: query.to_string(),
                    database: self.background.clone(),
                    reason: format!("{primary}; {secondary}"),
                });
            }
        };

        tracing::debug!(entry = path, input = self.namespace.input_name(&input), "linked leaf");
        self.namespace
            .add_exchange(parent, input, gated(weight, gate, key))?;
        Ok(())
    }

    fn compile_group(
        &mut self,
        entry: &Pending,
        spec: &GroupSpec,
    ) -> Result<Vec<Pending>, CompileError> {
        let weight = compile_weight(&spec.exchange, self.registry, &entry.path)?;
        let name = claim_name(self.namespace, &entry.key, &mut self.diagnostics);
        let (id, gate) = self.create_group(&name, &entry.path, spec)?;
        self.namespace.add_exchange(
            entry.parent,
            ExchangeInput::activity(id),
            gated(weight, entry.gate.as_ref(), &entry.key),
        )?;
        Ok(self.children_of(id, &entry.path, spec, gate))
    }

    /// Create the node of a group entry under an already claimed `name`.
    pub(crate) fn create_group(
        &mut self,
        name: &str,
        path: &str,
        spec: &GroupSpec,
    ) -> Result<(ActivityId, Option<EnumParam>), CompileError> {
        let gate = if spec.is_switch {
            let labels = spec.child_keys();
            let Some(default) = labels.first() else {
                return Err(CompileError::EmptySwitch {
                    path: path.to_string(),
                });
            };
            let param_name = format!("{}_switch_param", symbol_stem(name));
            let param = self
                .registry
                .get_or_create_enum(&param_name, &labels, default)?
                .clone();
            let missing = param.missing_labels(&labels);
            if !missing.is_empty() {
                return Err(ParamError::MissingLabels {
                    name: param.name,
                    missing,
                }
                .into());
            }
            Some(param)
        } else {
            None
        };

        let kind = if gate.is_some() {
            ActivityKind::Switch
        } else {
            ActivityKind::Regular
        };
        let id = self.namespace.create(name, spec.unit.clone(), kind)?;
        self.apply_attributes(id, &spec.custom_attributes)?;

        for directive in &spec.update {
            let error = crate::update::UpdateError::NotUpdatable {
                activity: name.to_string(),
            };
            tracing::warn!(activity = name, input = %directive.input_activity, "{error}");
            self.diagnostics.push(Diagnostic::SkippedUpdate {
                activity: name.to_string(),
                error,
            });
        }
        Ok((id, gate))
    }

    fn apply_attributes(
        &mut self,
        id: ActivityId,
        attributes: &[CustomAttribute],
    ) -> Result<(), CompileError> {
        for attr in attributes {
            self.namespace
                .set_metadata(id, attr.attribute.clone(), attr.value.clone())?;
        }
        Ok(())
    }

    fn check_bound_symbols(&self) -> Result<(), CompileError> {
        for activity in self.namespace.iter() {
            for exchange in &activity.exchanges {
                if let Some(symbol) = exchange
                    .amount
                    .free_symbols()
                    .into_iter()
                    .find(|s| !self.registry.binds(s))
                {
                    return Err(CompileError::UnboundSymbol {
                        symbol,
                        activity: activity.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{ExternalActivity, ReferenceDb};

    fn db() -> ReferenceDb {
        let mut db = ReferenceDb::new();
        for name in ["steel", "aluminium"] {
            db.add_technosphere(
                "ei",
                ExternalActivity {
                    database: String::new(),
                    name: name.to_string(),
                    location: Some("GLO".to_string()),
                    unit: Some("kilogram".to_string()),
                    categories: Vec::new(),
                    exchanges: Vec::new(),
                },
            );
        }
        db
    }

    fn config(model: &str) -> ModelConfig {
        ModelConfig::from_yaml_str(&format!("background: {{ database: ei }}\nmodel:\n{model}"))
            .unwrap()
    }

    #[test]
    fn group_and_leaf_are_linked() {
        let cfg = config("  frame:\n    exchange: 2\n    tube: { name: steel, exchange: mass }\n");
        let model = compile_model(&cfg, &db(), &CompilerOptions::default()).unwrap();
        let names: Vec<_> = model.reachable().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, vec!["model", "frame", "tube"]);
        let edges: Vec<_> = model
            .edge_weights()
            .iter()
            .map(|e| format!("{} -> {}: {}", e.consumer, e.input, e.amount))
            .collect();
        assert_eq!(edges, vec!["model -> frame: 2", "frame -> tube: mass"]);
        assert!(model.parameters.float("mass").is_some());
    }

    #[test]
    fn empty_switch_is_fatal() {
        let cfg = config("  frame:\n    is_switch: true\n");
        let err = compile_model(&cfg, &db(), &CompilerOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::EmptySwitch { .. }));
    }

    #[test]
    fn unknown_activity_is_fatal() {
        let cfg = config("  wheel: { name: rubber }\n");
        let err = compile_model(&cfg, &db(), &CompilerOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::ActivityNotFound { .. }), "err={err}");
    }

    #[test]
    fn single_leaf_model_hangs_under_the_root() {
        let cfg = config("  name: steel\n  exchange: 3\n");
        let model = compile_model(&cfg, &db(), &CompilerOptions::default()).unwrap();
        let root = model.root_activity().unwrap();
        assert_eq!(root.name, "model");
        assert_eq!(root.exchanges.len(), 1);
        assert_eq!(root.exchanges[0].amount, Expr::num(3.0));
    }

    #[test]
    fn set_methods_replaces() {
        let cfg = config("  tube: { name: steel }\n");
        let mut model = compile_model(&cfg, &db(), &CompilerOptions::default()).unwrap();
        model.set_methods(vec![MethodRef(vec!["a".to_string()])]);
        model.set_methods(vec![MethodRef(vec!["b".to_string()])]);
        assert_eq!(model.methods, vec![MethodRef(vec!["b".to_string()])]);
    }
}
