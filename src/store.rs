//! DataStore - entry point for tenant-scoped data access
//!
//! [`DataStore`] owns the executor and the process-wide catalog cache.
//! [`TenantStore`] is the per-organization handle that compiles queries
//! against that organization's catalog and runs them.

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::PgPool;
use tracing::debug;

use crate::catalog::{CatalogCache, TenantCatalog};
use crate::config::StoreConfig;
use crate::entity::Entity;
use crate::error::{DataAccessError, Result};
use crate::executor::{Executor, PgExecutor, Row};
use crate::id::Identifier;
use crate::query::{DeleteNode, InsertNode, QueryNode, SelectQuery, UpdateNode};
use crate::schema::EntitySchema;
use crate::sql::SqlCompiler;

/// Process-wide data store
pub struct DataStore {
    executor: Arc<dyn Executor>,
    catalogs: CatalogCache,
    config: StoreConfig,
}

impl DataStore {
    /// Create a new DataStore, connecting a pool from `config`
    pub async fn new(config: StoreConfig) -> Result<Self> {
        let executor = PgExecutor::connect(&config).await?;
        Ok(Self::with_executor(Arc::new(executor), config))
    }

    /// Create a new DataStore from an existing pool
    pub fn from_pool(pool: PgPool, config: StoreConfig) -> Self {
        Self::with_executor(Arc::new(PgExecutor::new(pool)), config)
    }

    /// Create a new DataStore over any executor
    pub fn with_executor(executor: Arc<dyn Executor>, config: StoreConfig) -> Self {
        Self {
            executor,
            catalogs: CatalogCache::new(),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn catalogs(&self) -> &CatalogCache {
        &self.catalogs
    }

    /// Handle scoped to one organization, loading its catalog on first use
    pub async fn tenant(&self, organization_id: &str) -> Result<TenantStore> {
        let catalog = self
            .catalogs
            .get_or_load(self.executor.as_ref(), &self.config, organization_id)
            .await?;
        Ok(TenantStore::new(Arc::clone(&self.executor), catalog).id_column(&self.config.id_column))
    }
}

/// Data access scoped to one organization's catalog
#[derive(Clone)]
pub struct TenantStore {
    executor: Arc<dyn Executor>,
    catalog: Arc<TenantCatalog>,
    id_column: String,
}

impl TenantStore {
    pub fn new(executor: Arc<dyn Executor>, catalog: Arc<TenantCatalog>) -> Self {
        Self {
            executor,
            catalog,
            id_column: crate::schema::ID_FIELD.to_string(),
        }
    }

    pub fn id_column(mut self, id_column: impl Into<String>) -> Self {
        self.id_column = id_column.into();
        self
    }

    pub fn catalog(&self) -> &TenantCatalog {
        &self.catalog
    }

    /// Compile a wire query without running it
    pub fn compile(&self, node: &QueryNode) -> Result<Vec<String>> {
        SqlCompiler::new(&self.catalog)
            .id_column(&self.id_column)
            .compile(node)
    }

    async fn run(&self, sql: &str) -> Result<Vec<Row>> {
        debug!(
            organization_id = self.catalog.organization_id(),
            sql, "Executing statement"
        );
        self.executor.execute(sql).await
    }

    /// Compile and run a wire query, returning the rows of every statement
    /// in statement order
    pub async fn query(&self, node: &QueryNode) -> Result<Vec<Row>> {
        let statements = self.compile(node)?;
        let mut rows = Vec::new();
        for sql in &statements {
            rows.extend(self.run(sql).await?);
        }
        Ok(rows)
    }

    pub(crate) async fn fetch_all(&self, query: &SelectQuery) -> Result<Vec<Entity>> {
        let schema = query.schema().ok_or_else(|| {
            DataAccessError::invalid_query(format!(
                "Select over '{}' has no entity schema to load rows into",
                query.table()
            ))
        })?;
        let rows = self.query(&query.to_node()).await?;
        Ok(rows
            .into_iter()
            .map(|row| Entity::from_row(Arc::clone(schema), row))
            .collect())
    }

    pub(crate) async fn count(&self, query: &SelectQuery) -> Result<u64> {
        let rows = self.query(&query.to_count_node()).await?;
        let count = rows.first().and_then(|row| row.get("count")).ok_or_else(|| {
            DataAccessError::invalid_response("Count query returned no 'count' column")
        })?;
        let parsed = match count {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| DataAccessError::invalid_response(format!("Invalid count value {}", count)))
    }

    /// Insert new entities
    ///
    /// Every entity is validated before any statement runs. Each entity then
    /// gets its own statement and adopts the returned row as its snapshot.
    pub async fn insert<'e>(&self, entities: impl IntoIterator<Item = &'e mut Entity>) -> Result<()> {
        let mut entities: Vec<&mut Entity> = entities.into_iter().collect();
        let Some(schema) = batch_schema(&entities)? else {
            return Ok(());
        };

        let records = entities
            .iter()
            .map(|entity| entity.insert_record())
            .collect::<Result<Vec<_>>>()?;
        let statements = self.compile(&QueryNode::Insert(InsertNode {
            table: schema.table().to_string(),
            records,
        }))?;

        for (entity, sql) in entities.iter_mut().zip(&statements) {
            let mut rows = self.run(sql).await?;
            if rows.len() != 1 {
                return Err(DataAccessError::invalid_response(format!(
                    "Insert into '{}' returned {} rows, expected 1",
                    schema.table(),
                    rows.len()
                )));
            }
            entity.apply_row(rows.remove(0));
        }
        Ok(())
    }

    /// Write the dirty columns of persisted entities
    ///
    /// Entities without dirty columns issue no statement.
    pub async fn update<'e>(&self, entities: impl IntoIterator<Item = &'e mut Entity>) -> Result<()> {
        let entities: Vec<&mut Entity> = entities.into_iter().collect();
        let Some(schema) = batch_schema(&entities)? else {
            return Ok(());
        };
        let ids = batch_ids(&entities)?;

        let mut pending = Vec::new();
        let mut records = Vec::new();
        for (entity, id) in entities.into_iter().zip(ids) {
            let record = entity.update_record()?;
            if record.updates.is_empty() {
                continue;
            }
            records.push(record);
            pending.push((entity, id));
        }
        let statements = self.compile(&QueryNode::Update(UpdateNode {
            table: schema.table().to_string(),
            records,
        }))?;

        for ((entity, id), sql) in pending.into_iter().zip(&statements) {
            let row = self.run(sql).await?.into_iter().next().ok_or_else(|| {
                DataAccessError::RecordNotFound(id.to_string())
            })?;
            entity.apply_row(row);
        }
        Ok(())
    }

    /// Delete persisted entities by identifier
    ///
    /// Each entity adopts the deleted row as its snapshot.
    pub async fn delete<'e>(&self, entities: impl IntoIterator<Item = &'e mut Entity>) -> Result<()> {
        let entities: Vec<&mut Entity> = entities.into_iter().collect();
        let Some(schema) = batch_schema(&entities)? else {
            return Ok(());
        };
        let ids = batch_ids(&entities)?;

        let records = entities
            .iter()
            .map(|entity| entity.delete_record())
            .collect::<Result<Vec<_>>>()?;
        let statements = self.compile(&QueryNode::Delete(DeleteNode {
            table: schema.table().to_string(),
            records,
        }))?;

        for ((entity, id), sql) in entities.into_iter().zip(ids).zip(&statements) {
            let row = self.run(sql).await?.into_iter().next().ok_or_else(|| {
                DataAccessError::RecordNotFound(id.to_string())
            })?;
            entity.apply_row(row);
        }
        Ok(())
    }
}

/// Schema shared by every entity of a batch; `None` for an empty batch
fn batch_schema(entities: &[&mut Entity]) -> Result<Option<Arc<EntitySchema>>> {
    let Some(first) = entities.first() else {
        return Ok(None);
    };
    let schema = Arc::clone(first.schema());
    if let Some(other) = entities.iter().find(|e| e.schema().table() != schema.table()) {
        return Err(DataAccessError::invalid_argument(format!(
            "Batch mixes tables '{}' and '{}'",
            schema.table(),
            other.schema().table()
        )));
    }
    Ok(Some(schema))
}

/// Identifiers of a batch, failing on a missing or repeated identifier
fn batch_ids(entities: &[&mut Entity]) -> Result<Vec<Identifier>> {
    let mut seen = HashSet::with_capacity(entities.len());
    let mut ids = Vec::with_capacity(entities.len());
    for entity in entities {
        let id = entity.id()?.ok_or_else(|| {
            DataAccessError::MissingIdentifier(format!(
                "'{}' record has no id",
                entity.schema().name()
            ))
        })?;
        if !seen.insert(id.clone()) {
            return Err(DataAccessError::DuplicateRecord(format!(
                "Record {} appears more than once in the batch",
                id
            )));
        }
        ids.push(id);
    }
    Ok(ids)
}
