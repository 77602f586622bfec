//! Engine adapter, schema catalog, and project registry.
//!
//! One [`adapter::Engine`] wraps one project database. The
//! [`registry::ProjectRegistry`] owns every engine in the process and
//! maps logical project identifiers onto them.

pub mod adapter;
pub mod bootstrap;
pub mod catalog;
pub mod error;
pub mod registry;

pub use adapter::{Engine, QueryOutput, Session, Statement};
pub use catalog::{RelKind, Relationship, RelationshipLookup, SchemaCatalog};
pub use error::EngineError;
pub use registry::{ProjectRegistry, RegistryError};
