//! # tenant-orm
//!
//! A multi-tenant typed entity model and schema-validated SQL compiler.
//!
//! Every organization owns its own set of tables and fields, described by
//! metadata tables. All data access goes through a JSON query representation
//! that is compiled to SQL only after every table and column has been checked
//! against that organization's catalog.
//!
//! ## Features
//!
//! - **Typed Fields**: Id, String, Boolean, Integer, Number, Date, DateTime and Reference fields with strict coercion
//! - **Entities with Change Tracking**: Read-through value cache, dirty set and row snapshots
//! - **JSON Query Model**: Select/insert/update/delete nodes with a fluent select builder
//! - **Tenant Catalog**: Per-organization whitelist of tables and columns, loaded once and cached
//! - **SQL Injection Prevention**: Identifiers are whitelisted, literals are escaped
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tenant_orm::{DataStore, Entity, EntitySchema, FieldDescriptor, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = DataStore::new(StoreConfig::from_env()?).await?;
//!     let tenant = store.tenant("org-1").await?;
//!
//!     let users = EntitySchema::builder("User", "users")
//!         .field(FieldDescriptor::string("firstName").column("first_name"))
//!         .field(FieldDescriptor::string("lastName").column("last_name"))
//!         .field(FieldDescriptor::integer("age"))
//!         .build()?;
//!
//!     // Insert
//!     let mut john = Entity::with_values(
//!         users.clone(),
//!         [("firstName", "John"), ("lastName", "Doe"), ("age", "30")],
//!     )?;
//!     tenant.insert([&mut john]).await?;
//!
//!     // Query
//!     let age = users.field("age")?;
//!     let older = users.select().filter(age.greater_than(35)).limit(10)?;
//!     for user in older.all(&tenant).await? {
//!         println!("{:?}", user.get("firstName")?);
//!     }
//!
//!     // Update only what changed
//!     john.set("age", 31)?;
//!     tenant.update([&mut john]).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use tenant_orm::StoreConfig;
//!
//! let config = StoreConfig::builder("postgres://localhost/mydb")
//!     .max_connections(10)                 // Pool size (default 5)
//!     .id_column("id")                     // Identifier column (default)
//!     .organizations_table("organizations") // Metadata tables (defaults)
//!     .objects_table("objects")
//!     .object_fields_table("object_fields")
//!     .build();
//! ```
//!
//! ## Multi-Tenancy
//!
//! All tenants share one database. Isolation comes from the catalog: a
//! [`TenantStore`] can only compile queries over the tables and columns its
//! organization's metadata lists. Catalogs are cached for the life of the
//! process; call [`CatalogCache::evict`] after changing a tenant's metadata.

pub mod catalog;
pub mod config;
pub mod entity;
pub mod error;
pub mod executor;
pub mod field;
pub mod id;
pub mod query;
pub mod schema;
pub mod sql;
pub mod store;
pub mod value;

// Re-export main types for convenience
pub use catalog::{CatalogCache, CatalogTable, ColumnInfo, TenantCatalog};
pub use config::{StoreConfig, StoreConfigBuilder};
pub use entity::Entity;
pub use error::{DataAccessError, Result};
pub use executor::{Executor, PgExecutor, Row};
pub use field::{FieldDescriptor, FieldType, ReferenceTarget};
pub use id::{Identifier, SegmentKind};
pub use query::{
    Condition, FieldList, Operand, Operator, QueryNode, Record, SelectQuery,
};
pub use schema::{EntitySchema, FieldSelector, SchemaDefinition, SchemaRegistry, TableDefinition};
pub use store::{DataStore, TenantStore};
pub use value::Value;

// Re-export SQL utilities for advanced users
pub use sql::{SqlCompiler, build_condition_clause, compile, validate_identifier};
