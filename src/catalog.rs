//! Tenant schema catalog
//!
//! A [`TenantCatalog`] is the whitelist of tables and columns an organization
//! may touch. The SQL compiler refuses any identifier the catalog does not
//! list. Catalogs are loaded from the metadata tables on first use and kept
//! in a process-wide [`CatalogCache`].
//!
//! The cache never invalidates on its own. Two concurrent first loads of the
//! same organization both run and the later write wins; both read the same
//! metadata, so the stored catalog is equivalent either way.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{DataAccessError, Result};
use crate::executor::Executor;
use crate::sql::sanitize::{quote_literal, validate_identifier};

/// Metadata of one whitelisted column
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared field type (`id`, `text`, `reference`, ...)
    pub field_type: String,
    pub sql_type: Option<String>,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub reference_object_id: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            ..Default::default()
        }
    }
}

/// Whitelisted columns of one table
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTable {
    name: String,
    namespace: Option<String>,
    columns: IndexMap<String, ColumnInfo>,
}

impl CatalogTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            columns: IndexMap::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add a column by name and declared type
    pub fn with_column(mut self, name: impl Into<String>, field_type: impl Into<String>) -> Self {
        let column = ColumnInfo::new(name, field_type);
        self.columns.insert(column.name.clone(), column);
        self
    }

    /// Add a column, failing if the table already has one of that name
    pub fn add_column(&mut self, column: ColumnInfo) -> Result<()> {
        if self.columns.contains_key(&column.name) {
            return Err(DataAccessError::invalid_response(format!(
                "Table '{}' already has field named '{}'",
                self.name, column.name
            )));
        }
        self.columns.insert(column.name.clone(), column);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.get(name)
    }

    /// Column names in catalog order
    pub fn all_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }
}

/// Whitelist of one organization
#[derive(Debug, Clone, PartialEq)]
pub struct TenantCatalog {
    organization_id: String,
    id_key: Option<String>,
    tables: IndexMap<String, CatalogTable>,
}

impl TenantCatalog {
    pub fn new(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            id_key: None,
            tables: IndexMap::new(),
        }
    }

    pub fn with_id_key(mut self, id_key: impl Into<String>) -> Self {
        self.id_key = Some(id_key.into());
        self
    }

    pub fn with_table(mut self, table: CatalogTable) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    /// Organization segment used in identifiers of this tenant
    pub fn id_key(&self) -> Option<&str> {
        self.id_key.as_deref()
    }

    pub fn table(&self, name: &str) -> Option<&CatalogTable> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &CatalogTable> {
        self.tables.values()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.tables.get(table).is_some_and(|t| t.has_column(column))
    }

    /// Columns of `table`, or `None` if the table is not in the catalog
    pub fn all_columns(&self, table: &str) -> Option<Vec<&str>> {
        self.tables.get(table).map(|t| t.all_columns().collect())
    }
}

fn metadata_sql(config: &StoreConfig, organization_id: &str) -> Result<String> {
    for table in [
        &config.organizations_table,
        &config.objects_table,
        &config.object_fields_table,
    ] {
        validate_identifier(table).map_err(DataAccessError::InvalidArgument)?;
    }
    let org = quote_literal(organization_id).map_err(DataAccessError::InvalidArgument)?;
    Ok(format!(
        "SELECT org.id_key AS org_key, obj.table_name AS tablename, obj.table_schema AS tableschema, \
         fld.name AS fldname, fld.type AS fldtype, fld.sql_type AS fldsqltype, fld.not_null AS fldnotnull, \
         fld.default_value AS flddefault, fld.reference_object_id AS fldreference \
         FROM {} org LEFT OUTER JOIN {} obj ON org.id=obj.organization_id \
         LEFT OUTER JOIN {} fld ON obj.id=fld.object_id \
         WHERE org.id={}",
        config.organizations_table, config.objects_table, config.object_fields_table, org
    ))
}

fn text(row: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    match row.get(key)? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Load the catalog of `organization_id` from the metadata tables
///
/// Every table is whitelisted for the identifier column, whether or not the
/// metadata lists it.
pub async fn load_catalog(
    executor: &dyn Executor,
    config: &StoreConfig,
    organization_id: &str,
) -> Result<TenantCatalog> {
    if organization_id.is_empty() {
        return Err(DataAccessError::invalid_argument("No organization id provided"));
    }

    let rows = executor.execute(&metadata_sql(config, organization_id)?).await?;
    if rows.is_empty() {
        return Err(DataAccessError::UnknownOrganization(organization_id.to_string()));
    }

    let mut catalog = TenantCatalog::new(organization_id);
    catalog.id_key = text(&rows[0], "org_key");

    for row in &rows {
        let Some(table_name) = text(row, "tablename") else {
            continue;
        };
        let table = catalog
            .tables
            .entry(table_name.clone())
            .or_insert_with(|| {
                let mut table = CatalogTable::new(&table_name);
                table.namespace = text(row, "tableschema");
                table
            });

        match (text(row, "fldname"), text(row, "fldtype")) {
            (Some(name), Some(field_type)) => table.add_column(ColumnInfo {
                name,
                field_type,
                sql_type: text(row, "fldsqltype"),
                not_null: row.get("fldnotnull").and_then(|v| v.as_bool()).unwrap_or(false),
                default_value: text(row, "flddefault"),
                reference_object_id: text(row, "fldreference"),
            })?,
            (None, None) => {}
            (name, field_type) => {
                return Err(DataAccessError::invalid_response(format!(
                    "Incomplete field metadata on table '{}': name {:?}, type {:?}",
                    table_name, name, field_type
                )));
            }
        }
    }

    for table in catalog.tables.values_mut() {
        if !table.has_column(&config.id_column) {
            let mut id = ColumnInfo::new(&config.id_column, "id");
            id.sql_type = Some("text".to_string());
            id.not_null = true;
            table.columns.shift_insert(0, id.name.clone(), id);
        }
    }

    Ok(catalog)
}

/// Process-wide cache of tenant catalogs keyed by organization id
#[derive(Debug, Default)]
pub struct CatalogCache {
    entries: RwLock<HashMap<String, Arc<TenantCatalog>>>,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached catalog, if any
    pub fn get(&self, organization_id: &str) -> Option<Arc<TenantCatalog>> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(organization_id).cloned())
    }

    /// Store a catalog, returning the entry it replaced
    pub fn insert(&self, catalog: TenantCatalog) -> Arc<TenantCatalog> {
        let catalog = Arc::new(catalog);
        let previous = match self.entries.write() {
            Ok(mut entries) => entries.insert(
                catalog.organization_id().to_string(),
                Arc::clone(&catalog),
            ),
            Err(poisoned) => poisoned.into_inner().insert(
                catalog.organization_id().to_string(),
                Arc::clone(&catalog),
            ),
        };
        if previous.is_some() {
            warn!(
                organization_id = catalog.organization_id(),
                "Concurrent catalog load replaced an existing entry"
            );
        }
        catalog
    }

    /// Cached catalog, or load it through `executor` and cache it
    ///
    /// No lock is held while loading.
    pub async fn get_or_load(
        &self,
        executor: &dyn Executor,
        config: &StoreConfig,
        organization_id: &str,
    ) -> Result<Arc<TenantCatalog>> {
        if let Some(catalog) = self.get(organization_id) {
            debug!(organization_id, "Catalog cache hit");
            return Ok(catalog);
        }
        let catalog = load_catalog(executor, config, organization_id).await?;
        info!(
            organization_id,
            tables = catalog.tables.len(),
            "Loaded tenant catalog"
        );
        Ok(self.insert(catalog))
    }

    /// Drop the cached catalog of an organization
    pub fn evict(&self, organization_id: &str) -> Option<Arc<TenantCatalog>> {
        match self.entries.write() {
            Ok(mut entries) => entries.remove(organization_id),
            Err(poisoned) => poisoned.into_inner().remove(organization_id),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Row;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct MetadataStub {
        rows: Vec<Row>,
        calls: Mutex<Vec<String>>,
    }

    impl MetadataStub {
        fn new(rows: serde_json::Value) -> Self {
            let rows = rows
                .as_array()
                .unwrap()
                .iter()
                .map(|r| r.as_object().unwrap().clone())
                .collect();
            Self {
                rows,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Executor for MetadataStub {
        async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
            self.calls.lock().unwrap().push(sql.to_string());
            Ok(self.rows.clone())
        }
    }

    fn metadata() -> serde_json::Value {
        json!([
            {"org_key": "b2c3", "tablename": "users", "tableschema": "public",
             "fldname": "first_name", "fldtype": "text", "fldsqltype": "text", "fldnotnull": true},
            {"org_key": "b2c3", "tablename": "users", "tableschema": "public",
             "fldname": "last_name", "fldtype": "text"},
            {"org_key": "b2c3", "tablename": "users", "tableschema": "public",
             "fldname": "manager_id", "fldtype": "reference", "fldreference": "obj1"},
            {"org_key": "b2c3", "tablename": "tags", "tableschema": "public",
             "fldname": null, "fldtype": null}
        ])
    }

    fn config() -> StoreConfig {
        StoreConfig::builder("postgres://localhost/test").build()
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    #[test]
    fn test_lookups_report_not_found() {
        let catalog = TenantCatalog::new("org1")
            .with_table(CatalogTable::new("users").with_column("id", "id").with_column("age", "integer"));
        assert!(catalog.has_table("users"));
        assert!(!catalog.has_table("accounts"));
        assert!(catalog.has_column("users", "age"));
        assert!(!catalog.has_column("users", "salary"));
        assert!(!catalog.has_column("accounts", "age"));
        assert_eq!(catalog.all_columns("users"), Some(vec!["id", "age"]));
        assert_eq!(catalog.all_columns("accounts"), None);
    }

    // =========================================================================
    // Loader
    // =========================================================================

    #[tokio::test]
    async fn test_load_groups_rows_by_table() {
        let stub = MetadataStub::new(metadata());
        let catalog = load_catalog(&stub, &config(), "org1").await.unwrap();

        assert_eq!(catalog.organization_id(), "org1");
        assert_eq!(catalog.id_key(), Some("b2c3"));
        assert_eq!(
            catalog.all_columns("users"),
            Some(vec!["id", "first_name", "last_name", "manager_id"])
        );
        assert_eq!(catalog.all_columns("tags"), Some(vec!["id"]));

        let users = catalog.table("users").unwrap();
        assert_eq!(users.namespace(), Some("public"));
        let first = users.column("first_name").unwrap();
        assert!(first.not_null);
        assert_eq!(first.sql_type.as_deref(), Some("text"));
        assert_eq!(
            users.column("manager_id").unwrap().reference_object_id.as_deref(),
            Some("obj1")
        );
    }

    #[tokio::test]
    async fn test_load_escapes_organization_id() {
        let stub = MetadataStub::new(metadata());
        load_catalog(&stub, &config(), "o'rg").await.unwrap();
        let sql = stub.calls.lock().unwrap()[0].clone();
        assert!(sql.ends_with("WHERE org.id='o''rg'"));
        assert!(sql.contains("FROM organizations org"));
    }

    #[tokio::test]
    async fn test_load_unknown_organization() {
        let stub = MetadataStub::new(json!([]));
        let err = load_catalog(&stub, &config(), "nope").await.unwrap_err();
        assert!(matches!(err, DataAccessError::UnknownOrganization(_)));
    }

    #[tokio::test]
    async fn test_load_rejects_half_field_rows() {
        let stub = MetadataStub::new(json!([
            {"org_key": "b2c3", "tablename": "users", "fldname": "age", "fldtype": null}
        ]));
        assert!(load_catalog(&stub, &config(), "org1").await.is_err());
    }

    // =========================================================================
    // Cache
    // =========================================================================

    #[tokio::test]
    async fn test_cache_loads_once() {
        let stub = MetadataStub::new(metadata());
        let cache = CatalogCache::new();
        let first = cache.get_or_load(&stub, &config(), "org1").await.unwrap();
        let second = cache.get_or_load(&stub, &config(), "org1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(stub.calls.lock().unwrap().len(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_evict_forces_reload() {
        let stub = MetadataStub::new(metadata());
        let cache = CatalogCache::new();
        cache.get_or_load(&stub, &config(), "org1").await.unwrap();
        assert!(cache.evict("org1").is_some());
        assert!(cache.is_empty());
        cache.get_or_load(&stub, &config(), "org1").await.unwrap();
        assert_eq!(stub.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_cache_last_write_wins() {
        let cache = CatalogCache::new();
        cache.insert(TenantCatalog::new("org1").with_id_key("aaaa"));
        cache.insert(TenantCatalog::new("org1").with_id_key("bbbb"));
        assert_eq!(cache.get("org1").unwrap().id_key(), Some("bbbb"));
    }
}
