//! Catalogue graph: typed nodes, id indexes, link resolution and editing.
//!
//! Documents (game systems and catalogues) live in one [`Graph`] arena and
//! are addressed through [`NodeId`] handles. `model` builds nodes from
//! records and writes them back, `index` tracks ids and duplicates,
//! `traverse` reads through links, `resolve` binds links across imports and
//! `edit` keeps everything consistent under incremental changes.

pub mod edit;
pub mod identity;
pub mod index;
pub mod model;
pub mod repository;
pub mod resolve;
pub mod schema;
pub mod traverse;

pub use identity::{CatalogueKey, ConditionKind, ConstraintKind, ModifierKind, NodeId, NodeKind};
pub use index::IdIndex;
pub use model::{CatalogueState, Graph, Node};
pub use repository::CatalogueRepository;
pub use resolve::ResolveReport;
pub use traverse::{Capabilities, UNCATEGORIZED, display_names};
