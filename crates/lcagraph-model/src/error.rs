use std::fmt;
use std::path::PathBuf;

use lcagraph_expr::ExprParseError;
use serde::Serialize;
use thiserror::Error;

use crate::namespace::NamespaceError;
use crate::params::ParamError;
use crate::reference::LookupError;
use crate::update::UpdateError;

/// Fatal build errors. Anything recoverable is reported as a [`Diagnostic`]
/// instead.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("activity not found for {query} (database `{database}`): {reason}")]
    ActivityNotFound {
        query: String,
        database: String,
        reason: String,
    },

    #[error("scenario base database `{database}` is not available")]
    MissingScenarioBase { database: String },

    #[error("symbol `{symbol}` used by `{activity}` is not a registered parameter")]
    UnboundSymbol { symbol: String, activity: String },

    #[error("switch `{path}` has no branches")]
    EmptySwitch { path: String },

    #[error("invalid configuration at `{path}`: {message}")]
    Config { path: String, message: String },

    #[error("in `{path}`: {source}")]
    Formula {
        path: String,
        #[source]
        source: ExprParseError,
    },

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    #[error(transparent)]
    Lookup(#[from] LookupError),
}

impl CompileError {
    pub(crate) fn config(path: &str, message: impl Into<String>) -> Self {
        CompileError::Config {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// Errors reading configuration or reference data from disk.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A non-fatal condition met during a build.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A requested activity name was taken; the activity got `assigned`.
    Renamed { requested: String, assigned: String },
    /// An update directive was not applied.
    SkippedUpdate { activity: String, error: UpdateError },
    /// An update directive asked to keep both input and amount.
    KeptExchange { activity: String, input: String },
    /// Attributes or updates on an activity that cannot carry them.
    IgnoredAttributes { activity: String, reason: String },
    UnknownConfigKey { key: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Renamed {
                requested,
                assigned,
            } => write!(f, "activity `{requested}` already exists, renamed to `{assigned}`"),
            Diagnostic::SkippedUpdate { activity, error } => {
                write!(f, "skipped update on `{activity}`: {error}")
            }
            Diagnostic::KeptExchange { activity, input } => {
                write!(f, "update of `{input}` on `{activity}` keeps the existing exchange")
            }
            Diagnostic::IgnoredAttributes { activity, reason } => {
                write!(f, "ignored settings on `{activity}`: {reason}")
            }
            Diagnostic::UnknownConfigKey { key } => {
                write!(f, "unknown configuration key `{key}`")
            }
        }
    }
}
