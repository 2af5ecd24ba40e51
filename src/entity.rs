//! Entity model
//!
//! An [`Entity`] wraps one row of a tenant table. It keeps the last known
//! database row (the snapshot), a cache of coerced values keyed by physical
//! column name, and the set of columns written since the last successful
//! round trip. Entities are not meant to be shared between concurrent
//! operations.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexSet;

use crate::error::{DataAccessError, Result};
use crate::id::Identifier;
use crate::query::{DeleteRecord, Record, UpdateRecord};
use crate::schema::{EntitySchema, FieldSelector};
use crate::value::Value;

/// Mutable record of one entity schema
#[derive(Debug, Clone)]
pub struct Entity {
    schema: Arc<EntitySchema>,
    snapshot: Option<Record>,
    cache: RefCell<HashMap<String, Option<Value>>>,
    dirty: IndexSet<String>,
}

impl Entity {
    /// Empty, unpersisted entity
    pub fn new(schema: Arc<EntitySchema>) -> Self {
        Self {
            schema,
            snapshot: None,
            cache: RefCell::new(HashMap::new()),
            dirty: IndexSet::new(),
        }
    }

    /// New entity with each `(field, value)` pair applied through [`Entity::set`]
    pub fn with_values<K, V>(
        schema: Arc<EntitySchema>,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self>
    where
        K: FieldSelector,
        V: Into<Value>,
    {
        let mut entity = Self::new(schema);
        for (field, value) in values {
            entity.set(field, value)?;
        }
        Ok(entity)
    }

    /// Entity backed by a row read from storage
    pub fn from_row(schema: Arc<EntitySchema>, row: Record) -> Self {
        let mut entity = Self::new(schema);
        entity.snapshot = Some(row);
        entity
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn snapshot(&self) -> Option<&Record> {
        self.snapshot.as_ref()
    }

    /// Read a field
    ///
    /// Cached values win. Otherwise the snapshot column is coerced once and
    /// cached. A column that is neither cached nor in the snapshot is unset.
    pub fn get(&self, field: impl FieldSelector) -> Result<Option<Value>> {
        let descriptor = field.resolve(&self.schema)?;
        let column = descriptor.column_name();

        if let Some(cached) = self.cache.borrow().get(column) {
            return Ok(cached.clone());
        }

        let Some(raw) = self.snapshot.as_ref().and_then(|row| row.get(column)) else {
            return Ok(None);
        };
        let value = descriptor.coerce(raw)?;
        self.cache
            .borrow_mut()
            .insert(column.to_string(), value.clone());
        Ok(value)
    }

    /// Write a field, coercing the value and marking the column dirty
    pub fn set(&mut self, field: impl FieldSelector, value: impl Into<Value>) -> Result<()> {
        let descriptor = field.resolve(&self.schema)?;
        let value = descriptor.coerce(value)?;
        let column = descriptor.column_name().to_string();
        self.cache.get_mut().insert(column.clone(), value);
        self.dirty.insert(column);
        Ok(())
    }

    /// Identifier of the entity, if it has one
    pub fn id(&self) -> Result<Option<Identifier>> {
        let value = self.get(self.schema.id_field())?;
        Ok(value.and_then(|v| v.as_id().cloned()))
    }

    /// True iff the entity carries a non-null identifier
    pub fn is_persisted(&self) -> bool {
        matches!(self.id(), Ok(Some(_)))
    }

    pub fn is_dirty(&self, field: impl FieldSelector) -> Result<bool> {
        let descriptor = field.resolve(&self.schema)?;
        Ok(self.dirty.contains(descriptor.column_name()))
    }

    /// Columns written since the last successful round trip, in write order
    pub fn dirty_columns(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    fn cached_json(&self, column: &str) -> serde_json::Value {
        self.cache
            .borrow()
            .get(column)
            .and_then(|value| value.as_ref().map(Value::to_json))
            .unwrap_or(serde_json::Value::Null)
    }

    /// Dirty columns with their staged values
    pub fn dirty_record(&self) -> Record {
        self.dirty
            .iter()
            .map(|column| (column.clone(), self.cached_json(column)))
            .collect()
    }

    /// Snapshot merged with the dirty values, dirty values winning
    pub fn to_record(&self) -> Record {
        let mut record = self.snapshot.clone().unwrap_or_default();
        for column in &self.dirty {
            record.insert(column.clone(), self.cached_json(column));
        }
        record
    }

    /// Replace the snapshot with a row returned by storage and forget every
    /// staged value
    pub fn apply_row(&mut self, row: Record) {
        self.snapshot = Some(row);
        self.cache.get_mut().clear();
        self.dirty.clear();
    }

    /// Copy the values of another entity of the same schema into this one
    ///
    /// Only dirty columns are copied when `only_changes` is set, otherwise
    /// snapshot columns are copied too. The identifier is never copied.
    /// Every copied column becomes dirty on this entity.
    pub fn copy_from(&mut self, other: &Entity, only_changes: bool) -> Result<()> {
        if !Arc::ptr_eq(&self.schema, &other.schema) && self.schema.name() != other.schema.name() {
            return Err(DataAccessError::invalid_argument(format!(
                "Cannot copy a '{}' entity into a '{}' entity",
                other.schema.name(),
                self.schema.name()
            )));
        }

        let id_column = self.schema.id_field().column_name();
        let mut columns: IndexSet<&str> = IndexSet::new();
        if !only_changes {
            if let Some(snapshot) = &other.snapshot {
                columns.extend(snapshot.keys().map(String::as_str));
            }
        }
        columns.extend(other.dirty_columns());

        for column in columns {
            if column == id_column {
                continue;
            }
            let Some(field) = other.schema.field_by_column(column) else {
                continue;
            };
            let value = other.get(field)?;
            self.cache.get_mut().insert(column.to_string(), value);
            self.dirty.insert(column.to_string());
        }
        Ok(())
    }

    /// Column payload of an insert
    pub fn insert_record(&self) -> Result<Record> {
        if let Some(id) = self.id()? {
            return Err(DataAccessError::AlreadyHasIdentifier(format!(
                "Cannot insert '{}' record {} that already has an id",
                self.schema.name(),
                id
            )));
        }
        Ok(self.dirty_record())
    }

    fn require_id(&self) -> Result<Identifier> {
        self.id()?.ok_or_else(|| {
            DataAccessError::MissingIdentifier(format!(
                "'{}' record has no id",
                self.schema.name()
            ))
        })
    }

    /// `{where: id = <id>, updates: <dirty columns>}`
    pub fn update_record(&self) -> Result<UpdateRecord> {
        let id = self.require_id()?;
        let id_column = self.schema.id_field().column_name();
        let mut updates = self.dirty_record();
        updates.shift_remove(id_column);
        Ok(UpdateRecord {
            condition: self.schema.id_field().equals(id),
            updates,
        })
    }

    /// `{where: id = <id>}`
    pub fn delete_record(&self) -> Result<DeleteRecord> {
        let id = self.require_id()?;
        Ok(DeleteRecord {
            condition: self.schema.id_field().equals(id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldDescriptor;
    use serde_json::json;

    const ID: &str = "a00aaaaaaaaaaaa";

    fn user_schema() -> Arc<EntitySchema> {
        EntitySchema::builder("User", "users")
            .field(FieldDescriptor::string("firstName").column("first_name"))
            .field(FieldDescriptor::string("lastName").column("last_name"))
            .field(FieldDescriptor::integer("age"))
            .field(FieldDescriptor::date("birthday"))
            .build()
            .unwrap()
    }

    fn loaded_user() -> Entity {
        let row = json!({"id": ID, "first_name": "John", "last_name": "Doe", "age": 30});
        let serde_json::Value::Object(row) = row else {
            unreachable!()
        };
        Entity::from_row(user_schema(), row)
    }

    // =========================================================================
    // get / set
    // =========================================================================

    #[test]
    fn test_get_reads_through_snapshot() {
        let user = loaded_user();
        assert_eq!(user.get("firstName").unwrap(), Some(Value::from("John")));
        assert_eq!(user.get("age").unwrap(), Some(Value::Integer(30)));
        assert_eq!(user.id().unwrap().unwrap().as_str(), ID);
        assert!(user.is_persisted());
        assert_eq!(user.dirty_columns().count(), 0);
    }

    #[test]
    fn test_get_missing_snapshot_column_is_unset() {
        let user = loaded_user();
        assert_eq!(user.get("birthday").unwrap(), None);
    }

    #[test]
    fn test_get_unknown_field() {
        let user = Entity::new(user_schema());
        assert!(matches!(
            user.get("middleName"),
            Err(DataAccessError::UnknownField(_))
        ));
        assert_eq!(user.get("firstName").unwrap(), None);
        assert!(!user.is_persisted());
    }

    #[test]
    fn test_set_coerces_and_marks_dirty() {
        let mut user = Entity::new(user_schema());
        user.set("age", "42").unwrap();
        user.set("birthday", "10/4/2012").unwrap();
        assert_eq!(user.get("age").unwrap(), Some(Value::Integer(42)));
        assert!(user.is_dirty("age").unwrap());
        assert!(!user.is_dirty("firstName").unwrap());
        assert_eq!(
            user.dirty_record(),
            json!({"age": 42, "birthday": "2012-10-04T00:00:00.000Z"})
                .as_object()
                .unwrap()
                .clone()
        );
    }

    #[test]
    fn test_set_propagates_coercion_errors() {
        let mut user = Entity::new(user_schema());
        assert!(matches!(user.set("age", "12abc"), Err(DataAccessError::Format(_))));
        assert_eq!(user.dirty_columns().count(), 0);
    }

    #[test]
    fn test_set_null_stages_null() {
        let mut user = loaded_user();
        user.set("lastName", Value::Null).unwrap();
        assert_eq!(user.get("lastName").unwrap(), None);
        assert_eq!(user.dirty_record()["last_name"], serde_json::Value::Null);
    }

    #[test]
    fn test_with_values() {
        let user = Entity::with_values(
            user_schema(),
            [("firstName", Value::from("John")), ("age", Value::from(30))],
        )
        .unwrap();
        let dirty: Vec<_> = user.dirty_columns().collect();
        assert_eq!(dirty, vec!["first_name", "age"]);
    }

    // =========================================================================
    // Records
    // =========================================================================

    #[test]
    fn test_to_record_merges_without_mutating_snapshot() {
        let mut user = loaded_user();
        user.set("age", 31).unwrap();
        let record = user.to_record();
        assert_eq!(record["age"], json!(31));
        assert_eq!(record["first_name"], json!("John"));
        assert_eq!(user.snapshot().unwrap()["age"], json!(30));
    }

    #[test]
    fn test_update_record_contains_only_dirty_columns() {
        let mut user = loaded_user();
        user.set("age", 31).unwrap();
        let record = user.update_record().unwrap();
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "where": {"left": "id", "operator": "=", "right": ID},
                "updates": {"age": 31}
            })
        );
    }

    #[test]
    fn test_insert_record_rejects_existing_id() {
        let user = loaded_user();
        assert!(matches!(
            user.insert_record(),
            Err(DataAccessError::AlreadyHasIdentifier(_))
        ));
    }

    #[test]
    fn test_update_and_delete_require_id() {
        let mut user = Entity::new(user_schema());
        user.set("age", 3).unwrap();
        assert!(matches!(
            user.update_record(),
            Err(DataAccessError::MissingIdentifier(_))
        ));
        assert!(matches!(
            user.delete_record(),
            Err(DataAccessError::MissingIdentifier(_))
        ));
    }

    #[test]
    fn test_apply_row_clears_state() {
        let mut user = Entity::with_values(user_schema(), [("age", 30)]).unwrap();
        let row = json!({"id": ID, "first_name": null, "last_name": null, "age": 30});
        user.apply_row(row.as_object().unwrap().clone());
        assert_eq!(user.dirty_columns().count(), 0);
        assert_eq!(user.id().unwrap().unwrap().as_str(), ID);
        assert_eq!(user.get("age").unwrap(), Some(Value::Integer(30)));
    }

    // =========================================================================
    // Clone / copy
    // =========================================================================

    #[test]
    fn test_clone_is_deep() {
        let original = loaded_user();
        let _ = original.get("age").unwrap();
        let mut copy = original.clone();
        copy.set("age", 99).unwrap();
        copy.apply_row(Record::new());
        assert_eq!(original.get("age").unwrap(), Some(Value::Integer(30)));
        assert_eq!(original.dirty_columns().count(), 0);
        assert!(original.snapshot().unwrap().contains_key("first_name"));
    }

    #[test]
    fn test_copy_from() {
        let mut source = loaded_user();
        source.set("age", 31).unwrap();

        let mut target = Entity::new(user_schema());
        target.copy_from(&source, true).unwrap();
        assert_eq!(target.dirty_columns().collect::<Vec<_>>(), vec!["age"]);

        let mut target = Entity::new(user_schema());
        target.copy_from(&source, false).unwrap();
        assert_eq!(target.get("firstName").unwrap(), Some(Value::from("John")));
        assert_eq!(target.get("age").unwrap(), Some(Value::Integer(31)));
        assert!(target.id().unwrap().is_none());
    }

    #[test]
    fn test_copy_from_other_schema() {
        let other = EntitySchema::builder("Tag", "tags").build().unwrap();
        let mut target = Entity::new(other);
        assert!(matches!(
            target.copy_from(&loaded_user(), false),
            Err(DataAccessError::InvalidArgument(_))
        ));
    }
}
