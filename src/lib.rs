//! Catalogue graph engine for tabletop roster data.
//!
//! The crate turns game-system and catalogue documents (XML `.gst`/`.cat`
//! files or their JSON form) into one linked [`Graph`]: links are bound
//! across imports, duplicate ids and broken references are reported as
//! [`Diagnostic`]s on the offending nodes, and each processed catalogue gets
//! derived [`CatalogueViews`] (units grouped by category, force templates and
//! lifted constraints). The [`query`] module reads the scoped constraint,
//! condition and modifier language on top of the graph.
//!
//! Resolution is synchronous. Only [`Loader`], which fetches imported
//! documents through a [`CatalogueProvider`], is async.

pub mod catalog;
pub mod diagnostics;
pub mod format;
pub mod loader;
pub mod query;
pub mod record_schema;
pub mod settings;
pub mod views;

pub use catalog::{
    Capabilities, CatalogueKey, CatalogueRepository, CatalogueState, ConditionKind,
    ConstraintKind, Graph, IdIndex, ModifierKind, Node, NodeId, NodeKind, ResolveReport,
    UNCATEGORIZED, display_names,
};
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use format::{FormatError, Record, Syntax, parse, parse_path, serialize};
pub use loader::{CatalogueProvider, Loader, MemoryProvider};
pub use query::{
    AffectsDomain, AffectsError, AffectsQuery, AffectsSelector, Bound, MaxEstimate, Scope,
    ScopeKeyword,
};
pub use record_schema::{record_schema_version, validate_record};
pub use settings::Settings;
pub use views::{
    CatalogueViews, CategoryView, ExtraConstraint, ForceView, ILLEGAL_UNITS, natural_cmp,
};
