//! Background activity lookup
//!
//! The compiler never owns background data. It asks an [`ActivityLookup`] for
//! activities by name (plus optional location, unit and categories), first in
//! a technosphere database and then, when that fails, in the biosphere.
//!
//! [`ReferenceDb`] is a small in-memory implementation loaded from JSON; it is
//! what the CLI and the tests use.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::LoadError;

pub const DEFAULT_BIOSPHERE: &str = "biosphere3";

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LookupError {
    #[error("no activity matches {query} in `{database}`")]
    NotFound { query: String, database: String },
    #[error("{count} activities match {query} in `{database}`")]
    Ambiguous {
        query: String,
        database: String,
        count: usize,
    },
    #[error("unknown database `{database}`")]
    UnknownDatabase { database: String },
}

/// What the configuration says about a background activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityQuery {
    pub name: String,
    pub location: Option<String>,
    pub unit: Option<String>,
    pub categories: Option<Vec<String>>,
}

impl ActivityQuery {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl fmt::Display for ActivityQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.name)?;
        if let Some(loc) = &self.location {
            write!(f, " [{loc}]")?;
        }
        if let Some(unit) = &self.unit {
            write!(f, " ({unit})")?;
        }
        if let Some(categories) = &self.categories {
            write!(f, " {{{}}}", categories.join(", "))?;
        }
        Ok(())
    }
}

/// Stable reference to an activity that lives in a background database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceKey {
    pub database: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.database, self.name)?;
        if let Some(loc) = &self.location {
            write!(f, " [{loc}]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalExchange {
    pub input: String,
    #[serde(default, rename = "loc", alias = "location")]
    pub location: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Database of the input; the owning activity's database when absent.
    #[serde(default)]
    pub database: Option<String>,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalActivity {
    #[serde(default)]
    pub database: String,
    pub name: String,
    #[serde(default, rename = "loc", alias = "location")]
    pub location: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub exchanges: Vec<ExternalExchange>,
}

impl ExternalActivity {
    pub fn key(&self) -> ReferenceKey {
        ReferenceKey {
            database: self.database.clone(),
            name: self.name.clone(),
            location: self.location.clone(),
            unit: self.unit.clone(),
            categories: self.categories.clone(),
        }
    }

    pub fn matches(&self, query: &ActivityQuery) -> bool {
        fn opt_eq(wanted: &Option<String>, have: &Option<String>) -> bool {
            wanted.is_none() || wanted == have
        }
        self.name == query.name
            && opt_eq(&query.location, &self.location)
            && opt_eq(&query.unit, &self.unit)
            && query
                .categories
                .as_ref()
                .map_or(true, |c| *c == self.categories)
    }

    /// Reference keys of this activity's inputs.
    pub fn input_keys(&self) -> impl Iterator<Item = (ReferenceKey, f64)> + '_ {
        self.exchanges.iter().map(move |ex| {
            (
                ReferenceKey {
                    database: ex.database.clone().unwrap_or_else(|| self.database.clone()),
                    name: ex.input.clone(),
                    location: ex.location.clone(),
                    unit: ex.unit.clone(),
                    categories: ex.categories.clone(),
                },
                ex.amount,
            )
        })
    }
}

/// Outcome of the two-step technosphere/biosphere lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Primary(ExternalActivity),
    Secondary(ExternalActivity),
    NotFound {
        primary: LookupError,
        secondary: LookupError,
    },
}

pub trait ActivityLookup {
    fn has_database(&self, database: &str) -> bool;

    /// Match on name, location and unit. Categories only narrow biosphere
    /// lookups and are ignored here.
    fn find_technosphere(
        &self,
        database: &str,
        query: &ActivityQuery,
    ) -> Result<ExternalActivity, LookupError>;

    fn find_biosphere(&self, query: &ActivityQuery) -> Result<ExternalActivity, LookupError>;

    /// Technosphere lookup in `database`, falling back to the biosphere when
    /// it fails for any reason.
    fn resolve(&self, database: &str, query: &ActivityQuery) -> Resolution {
        let primary = match self.find_technosphere(database, query) {
            Ok(activity) => return Resolution::Primary(activity),
            Err(err) => err,
        };
        tracing::debug!(query = %query, database, error = %primary, "falling back to biosphere");
        match self.find_biosphere(query) {
            Ok(activity) => Resolution::Secondary(activity),
            Err(secondary) => Resolution::NotFound { primary, secondary },
        }
    }
}

/// In-memory background databases.
///
/// JSON layout:
///
/// ```json
/// {
///   "biosphere_name": "biosphere3",
///   "biosphere": [{ "name": "Carbon dioxide, fossil", "unit": "kilogram", "categories": ["air"] }],
///   "technosphere": {
///     "ecoinvent-3.9-cutoff": [
///       { "name": "market for steel", "loc": "GLO", "unit": "kilogram",
///         "exchanges": [{ "input": "Carbon dioxide, fossil", "database": "biosphere3", "amount": 2.1 }] }
///     ]
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceDb {
    #[serde(default = "default_biosphere")]
    pub biosphere_name: String,
    #[serde(default)]
    pub biosphere: Vec<ExternalActivity>,
    #[serde(default)]
    pub technosphere: BTreeMap<String, Vec<ExternalActivity>>,
}

fn default_biosphere() -> String {
    DEFAULT_BIOSPHERE.to_string()
}

impl Default for ReferenceDb {
    fn default() -> Self {
        Self {
            biosphere_name: default_biosphere(),
            biosphere: Vec::new(),
            technosphere: BTreeMap::new(),
        }
    }
}

impl ReferenceDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> Result<Self, LoadError> {
        let mut db: ReferenceDb = serde_json::from_str(text)?;
        let biosphere_name = db.biosphere_name.clone();
        for activity in &mut db.biosphere {
            activity.database = biosphere_name.clone();
        }
        for (name, activities) in &mut db.technosphere {
            for activity in activities {
                activity.database = name.clone();
            }
        }
        Ok(db)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Declare an empty technosphere database.
    pub fn add_database(&mut self, database: &str) {
        self.technosphere.entry(database.to_string()).or_default();
    }

    pub fn add_technosphere(&mut self, database: &str, mut activity: ExternalActivity) {
        activity.database = database.to_string();
        self.technosphere
            .entry(database.to_string())
            .or_default()
            .push(activity);
    }

    pub fn add_biosphere(&mut self, mut activity: ExternalActivity) {
        activity.database = self.biosphere_name.clone();
        self.biosphere.push(activity);
    }

    pub fn databases(&self) -> impl Iterator<Item = &str> {
        self.technosphere.keys().map(String::as_str)
    }

    fn find_in(
        activities: &[ExternalActivity],
        database: &str,
        query: &ActivityQuery,
    ) -> Result<ExternalActivity, LookupError> {
        let mut hits = activities.iter().filter(|a| a.matches(query));
        let Some(first) = hits.next() else {
            return Err(LookupError::NotFound {
                query: query.to_string(),
                database: database.to_string(),
            });
        };
        let extra = hits.count();
        if extra > 0 {
            return Err(LookupError::Ambiguous {
                query: query.to_string(),
                database: database.to_string(),
                count: extra + 1,
            });
        }
        Ok(first.clone())
    }
}

impl ActivityLookup for ReferenceDb {
    fn has_database(&self, database: &str) -> bool {
        self.technosphere.contains_key(database)
    }

    fn find_technosphere(
        &self,
        database: &str,
        query: &ActivityQuery,
    ) -> Result<ExternalActivity, LookupError> {
        let activities =
            self.technosphere
                .get(database)
                .ok_or_else(|| LookupError::UnknownDatabase {
                    database: database.to_string(),
                })?;
        let query = ActivityQuery {
            categories: None,
            ..query.clone()
        };
        Self::find_in(activities, database, &query)
    }

    fn find_biosphere(&self, query: &ActivityQuery) -> Result<ExternalActivity, LookupError> {
        Self::find_in(&self.biosphere, &self.biosphere_name, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(name: &str, loc: Option<&str>) -> ExternalActivity {
        ExternalActivity {
            database: String::new(),
            name: name.to_string(),
            location: loc.map(str::to_string),
            unit: Some("kilogram".to_string()),
            categories: Vec::new(),
            exchanges: Vec::new(),
        }
    }

    fn sample() -> ReferenceDb {
        let mut db = ReferenceDb::new();
        db.add_technosphere("ei", activity("steel", Some("GLO")));
        db.add_technosphere("ei", activity("steel", Some("RER")));
        db.add_technosphere("ei", activity("aluminium", Some("GLO")));
        db.add_biosphere(ExternalActivity {
            categories: vec!["air".to_string()],
            ..activity("Carbon dioxide, fossil", None)
        });
        db
    }

    #[test]
    fn technosphere_hit_is_primary() {
        let db = sample();
        let query = ActivityQuery::named("aluminium");
        match db.resolve("ei", &query) {
            Resolution::Primary(a) => assert_eq!(a.database, "ei"),
            other => panic!("expected primary, got {other:?}"),
        }
    }

    #[test]
    fn location_disambiguates() {
        let db = sample();
        let err = db
            .find_technosphere("ei", &ActivityQuery::named("steel"))
            .unwrap_err();
        assert!(matches!(err, LookupError::Ambiguous { count: 2, .. }));

        let query = ActivityQuery {
            location: Some("RER".to_string()),
            ..ActivityQuery::named("steel")
        };
        let hit = db.find_technosphere("ei", &query).unwrap();
        assert_eq!(hit.location.as_deref(), Some("RER"));
    }

    #[test]
    fn falls_back_to_biosphere() {
        let db = sample();
        let query = ActivityQuery {
            categories: Some(vec!["air".to_string()]),
            ..ActivityQuery::named("Carbon dioxide, fossil")
        };
        match db.resolve("ei", &query) {
            Resolution::Secondary(a) => assert_eq!(a.database, DEFAULT_BIOSPHERE),
            other => panic!("expected secondary, got {other:?}"),
        }
    }

    #[test]
    fn technosphere_ignores_categories() {
        let db = sample();
        let query = ActivityQuery {
            categories: Some(vec!["metals".to_string()]),
            ..ActivityQuery::named("aluminium")
        };
        match db.resolve("ei", &query) {
            Resolution::Primary(a) => assert_eq!(a.name, "aluminium"),
            other => panic!("expected primary, got {other:?}"),
        }

        let query = ActivityQuery {
            categories: Some(vec!["water".to_string()]),
            ..ActivityQuery::named("Carbon dioxide, fossil")
        };
        assert!(matches!(
            db.find_biosphere(&query),
            Err(LookupError::NotFound { .. })
        ));
    }

    #[test]
    fn unknown_everywhere_reports_both_failures() {
        let db = sample();
        match db.resolve("missing-db", &ActivityQuery::named("steel")) {
            Resolution::NotFound { primary, secondary } => {
                assert!(matches!(primary, LookupError::UnknownDatabase { .. }));
                assert!(matches!(secondary, LookupError::NotFound { .. }));
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[test]
    fn json_loading_assigns_databases() {
        let text = r#"{
            "biosphere": [{"name": "Water", "unit": "cubic meter", "categories": ["water"]}],
            "technosphere": {
                "ei": [{"name": "tap water", "loc": "CH", "unit": "kilogram",
                        "exchanges": [{"input": "Water", "database": "biosphere3", "amount": 0.001},
                                      {"input": "electricity", "loc": "CH", "amount": 0.2}]}]
            }
        }"#;
        let db = ReferenceDb::from_json_str(text).unwrap();
        let tap = db
            .find_technosphere("ei", &ActivityQuery::named("tap water"))
            .unwrap();
        assert_eq!(tap.database, "ei");
        let keys: Vec<_> = tap.input_keys().map(|(k, _)| k.database).collect();
        assert_eq!(keys, vec!["biosphere3".to_string(), "ei".to_string()]);
        assert_eq!(db.biosphere[0].database, "biosphere3");
    }
}
