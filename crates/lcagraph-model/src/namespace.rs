//! Activity namespace
//!
//! The working namespace owns every node created during a build: groups,
//! switches, scenario selectors and editable copies of background activities.
//! Names are unique; edges point from the consuming activity to its input and
//! carry a symbolic amount.
//!
//! Notes:
//! - Edges between the same pair accumulate (amounts are summed).
//! - An edge that would close a cycle is refused, so the graph stays a DAG no
//!   matter how the builder or the updater wire it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use lcagraph_expr::Expr;
use serde::Serialize;
use thiserror::Error;

use crate::reference::{ExternalActivity, ReferenceKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ActivityId(pub u32);

impl ActivityId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Regular,
    /// Editable copy of a background activity.
    LeafReference,
    Switch,
    MultiSwitch,
    /// Blends scenario samples along the ordered coordinate.
    Interpolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum Origin {
    Working,
    Reference { database: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExchangeInput {
    Activity { id: ActivityId },
    Reference { key: ReferenceKey },
}

impl ExchangeInput {
    pub fn activity(id: ActivityId) -> Self {
        ExchangeInput::Activity { id }
    }

    pub fn reference(key: ReferenceKey) -> Self {
        ExchangeInput::Reference { key }
    }

    pub fn as_activity(&self) -> Option<ActivityId> {
        match self {
            ExchangeInput::Activity { id } => Some(*id),
            ExchangeInput::Reference { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exchange {
    pub input: ExchangeInput,
    pub amount: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Activity {
    pub id: ActivityId,
    pub name: String,
    pub unit: Option<String>,
    pub location: Option<String>,
    pub kind: ActivityKind,
    #[serde(flatten)]
    pub origin: Origin,
    pub metadata: BTreeMap<String, serde_yaml::Value>,
    pub exchanges: Vec<Exchange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamespaceError {
    #[error("activity `{name}` already exists")]
    DuplicateName { name: String },
    #[error("unknown activity {0}")]
    UnknownActivity(ActivityId),
    #[error("edge `{consumer}` -> `{supplier}` would create a cycle")]
    Cycle { consumer: String, supplier: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Namespace {
    name: String,
    activities: Vec<Activity>,
    #[serde(skip)]
    by_name: HashMap<String, ActivityId>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            activities: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Database name of the working namespace (e.g. `"Foreground DB"`).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Activity> {
        self.activities.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn find(&self, name: &str) -> Option<ActivityId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: ActivityId) -> Option<&Activity> {
        self.activities.get(id.index())
    }

    pub fn activity(&self, id: ActivityId) -> Result<&Activity, NamespaceError> {
        self.get(id).ok_or(NamespaceError::UnknownActivity(id))
    }

    pub fn activity_mut(&mut self, id: ActivityId) -> Result<&mut Activity, NamespaceError> {
        self.activities
            .get_mut(id.index())
            .ok_or(NamespaceError::UnknownActivity(id))
    }

    /// Drop every activity.
    pub fn reset(&mut self) {
        self.activities.clear();
        self.by_name.clear();
    }

    pub fn create(
        &mut self,
        name: impl Into<String>,
        unit: Option<String>,
        kind: ActivityKind,
    ) -> Result<ActivityId, NamespaceError> {
        self.insert(name.into(), unit, None, kind, Origin::Working)
    }

    fn insert(
        &mut self,
        name: String,
        unit: Option<String>,
        location: Option<String>,
        kind: ActivityKind,
        origin: Origin,
    ) -> Result<ActivityId, NamespaceError> {
        if self.by_name.contains_key(&name) {
            return Err(NamespaceError::DuplicateName { name });
        }
        let id = ActivityId(self.activities.len() as u32);
        tracing::debug!(activity = %name, ?kind, "created activity");
        self.by_name.insert(name.clone(), id);
        self.activities.push(Activity {
            id,
            name,
            unit,
            location,
            kind,
            origin,
            metadata: BTreeMap::new(),
            exchanges: Vec::new(),
        });
        Ok(id)
    }

    /// First free name among `base`, `base_1`, `base_2`, …
    pub fn rename_on_conflict(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        let mut i = 1;
        let renamed = loop {
            let candidate = format!("{base}_{i}");
            if !self.contains(&candidate) {
                break candidate;
            }
            i += 1;
        };
        tracing::warn!(
            activity = base,
            renamed = %renamed,
            "activity defined multiple times, adding a suffix"
        );
        renamed
    }

    /// Copy a background activity into the namespace under `name`. The copy's
    /// inputs stay references into the background.
    pub fn copy_external(
        &mut self,
        name: impl Into<String>,
        source: &ExternalActivity,
    ) -> Result<ActivityId, NamespaceError> {
        let id = self.insert(
            name.into(),
            source.unit.clone(),
            source.location.clone(),
            ActivityKind::LeafReference,
            Origin::Reference {
                database: source.database.clone(),
            },
        )?;
        for (key, amount) in source.input_keys() {
            self.add_exchange(id, ExchangeInput::reference(key), Expr::num(amount))?;
        }
        Ok(id)
    }

    pub fn set_metadata(
        &mut self,
        id: ActivityId,
        key: impl Into<String>,
        value: serde_yaml::Value,
    ) -> Result<(), NamespaceError> {
        self.activity_mut(id)?.metadata.insert(key.into(), value);
        Ok(())
    }

    /// Add an edge `consumer -> input`, summing into an existing edge to the
    /// same input.
    pub fn add_exchange(
        &mut self,
        consumer: ActivityId,
        input: ExchangeInput,
        amount: Expr,
    ) -> Result<(), NamespaceError> {
        self.activity(consumer)?;
        if let Some(supplier) = input.as_activity() {
            let supplier_name = self.activity(supplier)?.name.clone();
            if supplier == consumer || self.reaches(supplier, consumer) {
                return Err(NamespaceError::Cycle {
                    consumer: self.activity(consumer)?.name.clone(),
                    supplier: supplier_name,
                });
            }
        }

        let activity = self.activity_mut(consumer)?;
        match activity.exchanges.iter_mut().find(|ex| ex.input == input) {
            Some(existing) => {
                let previous = std::mem::replace(&mut existing.amount, Expr::num(0.0));
                existing.amount = previous.sum(amount);
            }
            None => activity.exchanges.push(Exchange { input, amount }),
        }
        Ok(())
    }

    pub fn remove_exchange(
        &mut self,
        consumer: ActivityId,
        input: &ExchangeInput,
    ) -> Result<Option<Exchange>, NamespaceError> {
        let activity = self.activity_mut(consumer)?;
        Ok(activity
            .exchanges
            .iter()
            .position(|ex| ex.input == *input)
            .map(|pos| activity.exchanges.remove(pos)))
    }

    /// Display name of an exchange input.
    pub fn input_name<'a>(&'a self, input: &'a ExchangeInput) -> &'a str {
        match input {
            ExchangeInput::Activity { id } => self.get(*id).map_or("", |a| a.name.as_str()),
            ExchangeInput::Reference { key } => &key.name,
        }
    }

    /// Cost is bounded by the subgraph below `from`; a fresh supplier with no
    /// activity inputs answers immediately.
    fn reaches(&self, from: ActivityId, to: ActivityId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            stack.extend(
                self.activities[id.index()]
                    .exchanges
                    .iter()
                    .filter_map(|ex| ex.input.as_activity()),
            );
        }
        false
    }

    /// Activities reachable from `root` (inclusive), depth-first pre-order.
    pub fn reachable(&self, root: ActivityId) -> Vec<ActivityId> {
        let mut seen = vec![false; self.activities.len()];
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(activity) = self.get(id) else {
                continue;
            };
            if std::mem::replace(&mut seen[id.index()], true) {
                continue;
            }
            order.push(id);
            stack.extend(
                activity
                    .exchanges
                    .iter()
                    .rev()
                    .filter_map(|ex| ex.input.as_activity()),
            );
        }
        order
    }

    pub fn is_acyclic(&self) -> bool {
        // Kahn's algorithm over activity -> activity edges
        let n = self.activities.len();
        let mut indegree = vec![0usize; n];
        for activity in &self.activities {
            for input in activity.exchanges.iter().filter_map(|ex| ex.input.as_activity()) {
                indegree[input.index()] += 1;
            }
        }
        let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut visited = 0;
        while let Some(i) = ready.pop() {
            visited += 1;
            for input in self.activities[i]
                .exchanges
                .iter()
                .filter_map(|ex| ex.input.as_activity())
            {
                indegree[input.index()] -= 1;
                if indegree[input.index()] == 0 {
                    ready.push(input.index());
                }
            }
        }
        visited == n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lcagraph_expr::parse_expr;

    fn key(name: &str) -> ReferenceKey {
        ReferenceKey {
            database: "ei".to_string(),
            name: name.to_string(),
            location: None,
            unit: None,
            categories: Vec::new(),
        }
    }

    #[test]
    fn names_are_unique() {
        let mut ns = Namespace::new("fg");
        ns.create("foo", None, ActivityKind::Regular).unwrap();
        let err = ns.create("foo", None, ActivityKind::Regular).unwrap_err();
        assert_eq!(
            err,
            NamespaceError::DuplicateName {
                name: "foo".to_string()
            }
        );
    }

    #[test]
    fn rename_picks_first_free_suffix() {
        let mut ns = Namespace::new("fg");
        assert_eq!(ns.rename_on_conflict("foo"), "foo");
        ns.create("foo", None, ActivityKind::Regular).unwrap();
        assert_eq!(ns.rename_on_conflict("foo"), "foo_1");
        ns.create("foo_1", None, ActivityKind::Regular).unwrap();
        assert_eq!(ns.rename_on_conflict("foo"), "foo_2");
    }

    #[test]
    fn parallel_edges_accumulate() {
        let mut ns = Namespace::new("fg");
        let a = ns.create("a", None, ActivityKind::Regular).unwrap();
        let b = ns.create("b", None, ActivityKind::Regular).unwrap();
        ns.add_exchange(a, ExchangeInput::activity(b), Expr::num(1.0)).unwrap();
        ns.add_exchange(a, ExchangeInput::activity(b), parse_expr("2*x").unwrap())
            .unwrap();
        let activity = ns.activity(a).unwrap();
        assert_eq!(activity.exchanges.len(), 1);
        assert_eq!(activity.exchanges[0].amount.to_string(), "1 + 2*x");
    }

    #[test]
    fn cycles_are_refused() {
        let mut ns = Namespace::new("fg");
        let a = ns.create("a", None, ActivityKind::Regular).unwrap();
        let b = ns.create("b", None, ActivityKind::Regular).unwrap();
        let c = ns.create("c", None, ActivityKind::Regular).unwrap();
        ns.add_exchange(a, ExchangeInput::activity(b), Expr::one()).unwrap();
        ns.add_exchange(b, ExchangeInput::activity(c), Expr::one()).unwrap();
        assert!(matches!(
            ns.add_exchange(c, ExchangeInput::activity(a), Expr::one()),
            Err(NamespaceError::Cycle { .. })
        ));
        assert!(matches!(
            ns.add_exchange(a, ExchangeInput::activity(a), Expr::one()),
            Err(NamespaceError::Cycle { .. })
        ));
        assert!(ns.is_acyclic());
        assert_eq!(ns.reachable(a), vec![a, b, c]);
    }

    #[test]
    fn long_chain_of_fresh_suppliers() {
        let mut ns = Namespace::new("fg");
        let mut parent = ns.create("n0", None, ActivityKind::Regular).unwrap();
        let first = parent;
        for i in 1..20_000 {
            let child = ns.create(format!("n{i}"), None, ActivityKind::Regular).unwrap();
            ns.add_exchange(parent, ExchangeInput::activity(child), Expr::one())
                .unwrap();
            parent = child;
        }
        assert_eq!(ns.len(), 20_000);
        assert!(matches!(
            ns.add_exchange(parent, ExchangeInput::activity(first), Expr::one()),
            Err(NamespaceError::Cycle { .. })
        ));
        assert!(ns.is_acyclic());
    }

    #[test]
    fn copies_keep_background_inputs_as_references() {
        let source = ExternalActivity {
            database: "ei".to_string(),
            name: "steel".to_string(),
            location: Some("GLO".to_string()),
            unit: Some("kilogram".to_string()),
            categories: Vec::new(),
            exchanges: vec![crate::reference::ExternalExchange {
                input: "iron ore".to_string(),
                location: None,
                unit: None,
                categories: Vec::new(),
                database: None,
                amount: 1.5,
            }],
        };
        let mut ns = Namespace::new("fg");
        let id = ns.copy_external("frame", &source).unwrap();
        let copy = ns.activity(id).unwrap();
        assert_eq!(copy.kind, ActivityKind::LeafReference);
        assert_eq!(
            copy.origin,
            Origin::Reference {
                database: "ei".to_string()
            }
        );
        assert_eq!(copy.exchanges[0].input, ExchangeInput::reference(key("iron ore")));
        assert_eq!(ns.input_name(&copy.exchanges[0].input), "iron ore");
    }

    #[test]
    fn remove_and_reset() {
        let mut ns = Namespace::new("fg");
        let a = ns.create("a", None, ActivityKind::Regular).unwrap();
        ns.add_exchange(a, ExchangeInput::reference(key("x")), Expr::one())
            .unwrap();
        let removed = ns
            .remove_exchange(a, &ExchangeInput::reference(key("x")))
            .unwrap();
        assert!(removed.is_some());
        assert!(ns.activity(a).unwrap().exchanges.is_empty());
        ns.reset();
        assert!(ns.is_empty());
        assert!(!ns.contains("a"));
    }
}
