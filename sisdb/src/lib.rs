//! Schema-driven entity mapping for SIS.
//!
//! Schemas are defined remotely, as nested maps of type specifications, and
//! compiled at runtime into strongly-behaved local entities:
//! - [`SisDb`]: the registry, one [`EntityType`] per schema, kept in sync
//!   with the schema service by [`SisDb::refresh`]
//! - [`EntityType`]: a compiled schema; creates, loads and queries entities
//! - [`Entity`]: typed field access with coercion, change tracking and
//!   partial saves; embedded documents report changes to their root
//! - [`FieldDescriptor`] / [`FieldCodec`]: per-field coercion and equality
//! - [`TrackedMap`] / [`TrackedList`]: containers that mark their field
//!   changed when edited in place
//! - [`Query`]: filter, sort, paginate, with a result cache
//!
//! Everything is single-threaded (`Rc`/`RefCell`). The data service itself
//! sits behind the traits of [`sisdb_client`], re-exported as [`client`].

mod compile;
mod config;
mod entity;
mod error;
mod field;
mod query;
mod registry;
mod schema;
mod tracked;
mod value;

pub use config::{SisDbConfig, DEFAULT_PAGE_WINDOW};
pub use entity::Entity;
pub use error::{SisDbError, SisDbResult};
pub use field::{Coercion, FieldCodec, FieldDescriptor, FieldKind};
pub use query::{Query, SortKeys};
pub use registry::SisDb;
pub use schema::{DefinitionDiff, EntityType, SchemaKind, INTERNAL_FIELD_NAMES, SERVER_MANAGED_FIELDS};
pub use tracked::{ChangeNotifier, TrackedList, TrackedMap};
pub use value::{format_date, FieldValue, DATE_FORMAT};

pub use sisdb_client as client;
pub use sisdb_client::{ApiVersion, Record, SchemaDescriptor};
