//! lcagraph model compiler
//!
//! Turns a declarative, nested model table (YAML) into a directed acyclic graph
//! of activities whose edges carry symbolic weights over named parameters.
//!
//! ```text
//!   ModelConfig ──► ModelBuilder ──► Namespace (activities + exchanges)
//!                      │    ▲              ▲
//!                      │    └── ScenarioResolver (multi-switch + interpolation)
//!                      ▼
//!                ParamRegistry ◄── formula compiler (free symbols)
//!                      ▲
//!               Exchange updater (post-hoc edge rewrites)
//! ```
//!
//! Background activities are resolved through the [`reference::ActivityLookup`]
//! trait; numeric evaluation of the compiled graph is left to the caller.

pub mod builder;
pub mod config;
pub mod error;
pub mod formula;
pub mod namespace;
pub mod params;
pub mod processes;
pub mod reference;
pub mod scenario;
pub mod update;

pub use builder::{compile_into, compile_model, BuildOutput, CompiledModel, EdgeWeight, Workspace};
pub use config::{CompilerOptions, MethodRef, ModelConfig, ParameterDecl};
pub use error::{CompileError, Diagnostic, LoadError};
pub use namespace::{
    Activity, ActivityId, ActivityKind, Exchange, ExchangeInput, Namespace, NamespaceError, Origin,
};
pub use params::{EnumParam, FloatParam, Param, ParamError, ParamRegistry, ParamValue};
pub use processes::{format_number, process_table, ProcessRow};
pub use reference::{
    ActivityLookup, ActivityQuery, ExternalActivity, LookupError, ReferenceDb, ReferenceKey,
    Resolution,
};
pub use scenario::{ScenarioRecord, ScenarioSet};
pub use update::UpdateError;
