//! Exchange updater
//!
//! Rewrites input exchanges of copied background activities after they have
//! been linked:
//!
//! ```yaml
//! steel:
//!   name: market for steel
//!   update:
//!     - input_activity: electricity, medium voltage
//!       new_value: { name: electricity, from wind, exchange: keep }
//! ```
//!
//! `new_value` is a leaf spec, a single-entry group spec built in place, or
//! `keep` (nothing changes). Inside a replacement, `exchange: keep` retains the
//! replaced exchange's amount.
//!
//! In scenario mode the directive applies to every scenario copy behind the
//! selector. A directive that cannot be applied to all of them is skipped as a
//! whole and reported as a [`Diagnostic::SkippedUpdate`].

use serde::Serialize;
use serde_yaml::Value;
use thiserror::Error;

use crate::builder::{claim_name, ModelBuilder};
use crate::config::{
    key_string, EntrySpec, GroupSpec, LeafSpec, UpdateDirective, WeightSpec, KEEP_PREVIOUS_AMOUNT,
    RESERVED_KEYS,
};
use crate::error::{CompileError, Diagnostic};
use crate::formula::compile_replacement_weight;
use crate::namespace::{
    ActivityId, ActivityKind, Exchange, ExchangeInput, Namespace, NamespaceError, Origin,
};
use crate::reference::{ActivityLookup, Resolution};

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateError {
    #[error("update of `{input}` on `{activity}` has {count} replacement entries, expected one")]
    AmbiguousUpdateDirective {
        activity: String,
        input: String,
        count: usize,
    },
    #[error("`{activity}` has no input named `{input}`")]
    InputNotFound { activity: String, input: String },
    #[error("`{activity}` has {count} inputs named `{input}`")]
    AmbiguousInput {
        activity: String,
        input: String,
        count: usize,
    },
    #[error("`{activity}` is not a copied background activity")]
    NotUpdatable { activity: String },
    #[error("invalid replacement for `{input}` on `{activity}`: {reason}")]
    InvalidReplacement {
        activity: String,
        input: String,
        reason: String,
    },
}

/// Parsed `new_value` of an update directive.
#[derive(Debug, Clone, PartialEq)]
pub enum Replacement {
    Keep,
    Leaf(LeafSpec),
    Group { key: String, spec: GroupSpec },
}

impl Replacement {
    pub fn parse(activity: &str, directive: &UpdateDirective) -> Result<Self, UpdateError> {
        let invalid = |reason: String| UpdateError::InvalidReplacement {
            activity: activity.to_string(),
            input: directive.input_activity.clone(),
            reason,
        };

        let table = match &directive.new_value {
            Value::String(s) if s.trim() == KEEP_PREVIOUS_AMOUNT => return Ok(Replacement::Keep),
            Value::Mapping(table) => table,
            other => return Err(invalid(format!("expected a mapping or `keep`, got {other:?}"))),
        };

        let path = format!("{activity}.update.{}", directive.input_activity);
        if let EntrySpec::Leaf(leaf) =
            EntrySpec::from_mapping(&path, table).map_err(|e| invalid(e.to_string()))?
        {
            return Ok(Replacement::Leaf(leaf));
        }

        let entries: Vec<_> = table
            .iter()
            .filter_map(|(k, v)| Some((key_string(k)?, v.as_mapping()?)))
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .collect();
        match entries.as_slice() {
            [] => Err(invalid("no replacement entry".to_string())),
            [(key, inner)] => match EntrySpec::from_mapping(&path, inner) {
                Ok(EntrySpec::Leaf(leaf)) => Ok(Replacement::Leaf(leaf)),
                Ok(EntrySpec::Group(spec)) => Ok(Replacement::Group {
                    key: key.clone(),
                    spec,
                }),
                Err(e) => Err(invalid(e.to_string())),
            },
            many => Err(UpdateError::AmbiguousUpdateDirective {
                activity: activity.to_string(),
                input: directive.input_activity.clone(),
                count: many.len(),
            }),
        }
    }

    fn exchange(&self) -> Option<&WeightSpec> {
        match self {
            Replacement::Keep => None,
            Replacement::Leaf(leaf) => Some(&leaf.exchange),
            Replacement::Group { spec, .. } => Some(&spec.exchange),
        }
    }
}

/// Activities an update on `id` applies to: the scenario copies behind a
/// multi-switch (through interpolation nodes), otherwise `id` itself.
pub fn leaf_targets(namespace: &Namespace, id: ActivityId) -> Result<Vec<ActivityId>, NamespaceError> {
    let activity = namespace.activity(id)?;
    if activity.kind != ActivityKind::MultiSwitch {
        return Ok(vec![id]);
    }

    let mut targets = Vec::new();
    for branch in activity.exchanges.iter().filter_map(|ex| ex.input.as_activity()) {
        let node = namespace.activity(branch)?;
        if node.kind == ActivityKind::Interpolation {
            targets.extend(node.exchanges.iter().filter_map(|ex| ex.input.as_activity()));
        } else {
            targets.push(branch);
        }
    }
    Ok(targets)
}

impl<L: ActivityLookup + ?Sized> ModelBuilder<'_, L> {
    /// Apply `directives` in order to the activity linked for a leaf entry.
    pub(crate) fn apply_updates(
        &mut self,
        owner: ActivityId,
        path: &str,
        directives: &[UpdateDirective],
    ) -> Result<(), CompileError> {
        for directive in directives {
            if let Err(error) = self.apply_update(owner, path, directive)? {
                let activity = self.namespace.activity(owner)?.name.clone();
                tracing::warn!(activity = %activity, error = %error, "skipping update directive");
                self.diagnostics
                    .push(Diagnostic::SkippedUpdate { activity, error });
            }
        }
        Ok(())
    }

    /// Outer error aborts the build; inner error skips the directive.
    fn apply_update(
        &mut self,
        owner: ActivityId,
        path: &str,
        directive: &UpdateDirective,
    ) -> Result<Result<(), UpdateError>, CompileError> {
        let owner_name = self.namespace.activity(owner)?.name.clone();
        let replacement = match Replacement::parse(&owner_name, directive) {
            Ok(Replacement::Keep) => {
                tracing::warn!(
                    activity = %owner_name,
                    input = %directive.input_activity,
                    "update keeps the existing exchange"
                );
                self.diagnostics.push(Diagnostic::KeptExchange {
                    activity: owner_name,
                    input: directive.input_activity.clone(),
                });
                return Ok(Ok(()));
            }
            Ok(replacement) => replacement,
            Err(error) => return Ok(Err(error)),
        };

        // every target must have exactly one matching input before anything changes
        let mut edits: Vec<(ActivityId, Exchange)> = Vec::new();
        for target in leaf_targets(self.namespace, owner)? {
            let activity = self.namespace.activity(target)?;
            if activity.kind != ActivityKind::LeafReference {
                return Ok(Err(UpdateError::NotUpdatable {
                    activity: activity.name.clone(),
                }));
            }
            let hits: Vec<&Exchange> = activity
                .exchanges
                .iter()
                .filter(|ex| self.namespace.input_name(&ex.input) == directive.input_activity)
                .collect();
            match hits.as_slice() {
                [] => {
                    return Ok(Err(UpdateError::InputNotFound {
                        activity: activity.name.clone(),
                        input: directive.input_activity.clone(),
                    }))
                }
                [hit] => edits.push((target, (*hit).clone())),
                many => {
                    return Ok(Err(UpdateError::AmbiguousInput {
                        activity: activity.name.clone(),
                        input: directive.input_activity.clone(),
                        count: many.len(),
                    }))
                }
            }
        }

        let update_path = format!("{path}.update.{}", directive.input_activity);
        let amount = match replacement.exchange() {
            Some(spec) => compile_replacement_weight(spec, self.registry, &update_path)?,
            None => None,
        };

        let shared_input = match &replacement {
            Replacement::Group { key, spec } => {
                let group_path = format!("{update_path}.{key}");
                let name = claim_name(self.namespace, key, &mut self.diagnostics);
                let (id, gate) = self.create_group(&name, &group_path, spec)?;
                let children = self.children_of(id, &group_path, spec, gate);
                self.build(children)?;
                Some(ExchangeInput::activity(id))
            }
            Replacement::Leaf(_) | Replacement::Keep => None,
        };

        for (target, previous) in edits {
            let input = match (&shared_input, &replacement) {
                (Some(input), _) => input.clone(),
                (None, Replacement::Leaf(leaf)) => self.resolve_replacement(target, leaf)?,
                (None, _) => continue,
            };
            self.namespace.remove_exchange(target, &previous.input)?;
            let amount = amount.clone().unwrap_or(previous.amount);
            tracing::debug!(
                target_activity = %target,
                replaced = %directive.input_activity,
                "updated exchange"
            );
            self.namespace.add_exchange(target, input, amount)?;
        }
        Ok(Ok(()))
    }

    /// Resolve a replacement leaf in the target's own database, so scenario
    /// copies pick scenario-consistent replacements.
    fn resolve_replacement(
        &self,
        target: ActivityId,
        leaf: &LeafSpec,
    ) -> Result<ExchangeInput, CompileError> {
        let database = match &self.namespace.activity(target)?.origin {
            Origin::Reference { database } => database.clone(),
            Origin::Working => self.background.clone(),
        };
        let query = leaf.query();
        match self.lookup.resolve(&database, &query) {
            Resolution::Primary(source) | Resolution::Secondary(source) => {
                Ok(ExchangeInput::reference(source.key()))
            }
            Resolution::NotFound { primary, secondary } => Err(CompileError::ActivityNotFound {
                query: query.to_string(),
                database,
                reason: format!("{primary}; {secondary}"),
            }),
        }
    }
}
