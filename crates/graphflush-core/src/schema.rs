//! Entity schema descriptions.
//!
//! The flush engine only needs a narrow view of the schema: the declared
//! fields, which of them reference another entity, their nullability, the
//! primary key and the unique-key groups. Schemas can be built in code or
//! loaded from JSON:
//!
//! ```ignore
//! let schema = Schema::from_json(r#"{
//!     "entities": [
//!         { "name": "user", "fields": [
//!             { "name": "id", "primary_key": true },
//!             { "name": "email", "unique": true }
//!         ] }
//!     ]
//! }"#)?;
//! ```

use crate::error::{Error, Result, SchemaErrorKind, ValidationError, ValidationErrorKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, LazyLock};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

/// Check that a table, column or field name is a plain SQL identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// A declared field of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name used by application code
    pub name: String,
    /// Storage column name (defaults to the field name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Whether the field accepts NULL
    #[serde(default)]
    pub nullable: bool,
    /// Whether this is the primary key
    #[serde(default)]
    pub primary_key: bool,
    /// Whether this field alone is a unique key
    #[serde(default)]
    pub unique: bool,
    /// Target entity when the field is a foreign key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
}

impl FieldDef {
    /// A plain scalar field.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: None,
            nullable: false,
            primary_key: false,
            unique: false,
            references: None,
        }
    }

    /// The primary key field.
    pub fn primary_key(name: impl Into<String>) -> Self {
        Self {
            primary_key: true,
            ..Self::scalar(name)
        }
    }

    /// A foreign key to `target`.
    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            references: Some(target.into()),
            ..Self::scalar(name)
        }
    }

    /// Set the storage column name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Mark the field nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark the field as a single-field unique key.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Storage column name.
    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }

    /// Whether values of this field are references to other records.
    pub fn is_reference(&self) -> bool {
        self.references.is_some()
    }
}

/// A group of fields whose combined value is unique per entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueKey {
    fields: Vec<String>,
}

impl UniqueKey {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// Fields of the key, in declaration order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Name used in diagnostics and merge bookkeeping.
    pub fn name(&self) -> String {
        self.fields.join("_")
    }
}

/// Schema description of one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityModel {
    /// Entity name
    pub name: String,
    /// Storage table name (defaults to the entity name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Declared fields
    pub fields: Vec<FieldDef>,
    /// Composite unique keys beyond the per-field `unique` flags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_keys: Vec<Vec<String>>,
}

impl EntityModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            fields: Vec::new(),
            unique_keys: Vec::new(),
        }
    }

    /// Set the storage table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Declare a field.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Declare a composite unique key.
    pub fn unique_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_keys
            .push(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Storage table name.
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    /// Look up a declared field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a declared field by its storage column.
    pub fn field_by_column(&self, column: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.column_name() == column)
    }

    /// The primary key field.
    ///
    /// Every validated model has exactly one.
    pub fn primary_key(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// Name of the primary key field, or an empty string for an unvalidated model.
    pub fn primary_key_name(&self) -> &str {
        self.primary_key().map_or("", |f| f.name.as_str())
    }

    /// All unique keys: the primary key first, then single-field keys, then
    /// composite keys, each in declaration order.
    pub fn unique_key_groups(&self) -> Vec<UniqueKey> {
        let mut keys = Vec::new();
        if let Some(pk) = self.primary_key() {
            keys.push(UniqueKey::new(vec![pk.name.clone()]));
        }
        for field in self.fields.iter().filter(|f| f.unique && !f.primary_key) {
            keys.push(UniqueKey::new(vec![field.name.clone()]));
        }
        for group in &self.unique_keys {
            keys.push(UniqueKey::new(group.clone()));
        }
        keys
    }

    /// Entities this entity holds foreign keys to (excluding itself).
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = self
            .fields
            .iter()
            .filter_map(|f| f.references.as_deref())
            .filter(|target| *target != self.name)
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    /// Check the model is internally consistent.
    pub fn validate(&self) -> Result<()> {
        let mut invalid = ValidationError::new();
        for name in std::iter::once(self.name.as_str())
            .chain(std::iter::once(self.table_name()))
            .chain(self.fields.iter().map(|f| f.name.as_str()))
            .chain(self.fields.iter().map(FieldDef::column_name))
        {
            if !is_valid_identifier(name) {
                invalid.add(
                    name,
                    ValidationErrorKind::Identifier,
                    format!("'{}' is not a valid identifier", name),
                );
            }
        }
        if !invalid.is_empty() {
            return Err(Error::Validation(invalid));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(Error::schema(
                    SchemaErrorKind::Invalid,
                    format!("{}.{} declared twice", self.name, field.name),
                ));
            }
        }

        let pks: Vec<&FieldDef> = self.fields.iter().filter(|f| f.primary_key).collect();
        match pks.as_slice() {
            [pk] if pk.is_reference() => {
                return Err(Error::schema(
                    SchemaErrorKind::Invalid,
                    format!("{}: primary key {} cannot be a reference", self.name, pk.name),
                ));
            }
            [_] => {}
            _ => {
                return Err(Error::schema(
                    SchemaErrorKind::Invalid,
                    format!("{} must declare exactly one primary key", self.name),
                ));
            }
        }

        for group in &self.unique_keys {
            if group.is_empty() {
                return Err(Error::schema(
                    SchemaErrorKind::Invalid,
                    format!("{} declares an empty unique key", self.name),
                ));
            }
            for name in group {
                if self.get_field(name).is_none() {
                    return Err(Error::schema(
                        SchemaErrorKind::FieldNotFound,
                        format!("unique key of {} names unknown field {}", self.name, name),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct SchemaDef {
    entities: Vec<EntityModel>,
}

/// A validated set of entity models.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    models: BTreeMap<String, Arc<EntityModel>>,
    order: Vec<String>,
}

impl Schema {
    /// Validate and index a list of models.
    pub fn new(models: Vec<EntityModel>) -> Result<Self> {
        let mut schema = Schema::default();
        for model in models {
            model.validate()?;
            if schema.models.contains_key(&model.name) {
                return Err(Error::schema(
                    SchemaErrorKind::Invalid,
                    format!("entity {} declared twice", model.name),
                ));
            }
            schema.order.push(model.name.clone());
            schema.models.insert(model.name.clone(), Arc::new(model));
        }

        for model in schema.models.values() {
            for field in &model.fields {
                if let Some(target) = &field.references {
                    if !schema.models.contains_key(target) {
                        return Err(Error::schema(
                            SchemaErrorKind::EntityNotFound,
                            format!("{}.{} references unknown entity {}", model.name, field.name, target),
                        ));
                    }
                }
            }
        }

        tracing::debug!(entities = schema.order.len(), "Schema loaded");
        Ok(schema)
    }

    /// Parse and validate a JSON schema document.
    pub fn from_json(json: &str) -> Result<Self> {
        let def: SchemaDef = serde_json::from_str(json)?;
        Self::new(def.entities)
    }

    /// Look up an entity model.
    pub fn model(&self, name: &str) -> Result<Arc<EntityModel>> {
        self.models.get(name).cloned().ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::EntityNotFound,
                format!("unknown entity {}", name),
            )
        })
    }

    /// Entity names in declaration order.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Models in declaration order.
    pub fn models(&self) -> impl Iterator<Item = &Arc<EntityModel>> {
        self.order.iter().filter_map(|name| self.models.get(name))
    }
}
