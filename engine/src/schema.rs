//! Schema definition and validation.
//!
//! Schemas describe the tables a device may write to, so that a malformed
//! mutation is refused at enqueue time instead of sitting in the queue until
//! the remote rejects it.

use crate::{
    error::Result, Error, Mutation, MutationMeta, OperationKind, SchemaVersion, TableName,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Every record is keyed by a client-generated string under this field.
pub const PRIMARY_KEY: &str = "id";

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Milliseconds since the Unix epoch
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field is required on insert
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&serde_json::Value>) -> Result<()> {
        match value {
            None | Some(serde_json::Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            None | Some(serde_json::Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &serde_json::Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64() || value.is_i64(),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        serde_json::Value::Number(_) => "Float",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// Schema for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Table name
    pub name: TableName,
    /// Field definitions; the primary key is implicit
    pub fields: Vec<FieldDef>,
    /// Int fields that may be changed through relative adjustments
    #[serde(default)]
    pub counters: BTreeSet<String>,
}

impl TableSchema {
    /// Create a new table schema.
    pub fn new(name: impl Into<TableName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            counters: BTreeSet::new(),
        }
    }

    /// Declare a counter field (builder style).
    pub fn with_counter(mut self, field: impl Into<String>) -> Self {
        self.counters.insert(field.into());
        self
    }

    /// Look up a field definition by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate a full record: primary key plus every declared field.
    pub fn validate_payload(&self, payload: &serde_json::Value) -> Result<()> {
        let obj = self.validate_primary_key(payload)?;
        for field in &self.fields {
            field.validate(obj.get(&field.name))?;
        }
        Ok(())
    }

    /// Validate a partial record: primary key plus the fields present.
    pub fn validate_patch(&self, payload: &serde_json::Value) -> Result<()> {
        let obj = self.validate_primary_key(payload)?;
        for (name, value) in obj {
            if let Some(field) = self.field(name) {
                field.validate(Some(value))?;
            }
        }
        Ok(())
    }

    fn validate_primary_key<'v>(
        &self,
        payload: &'v serde_json::Value,
    ) -> Result<&'v serde_json::Map<String, serde_json::Value>> {
        let obj = payload
            .as_object()
            .ok_or_else(|| Error::InvalidPayload("payload must be an object".into()))?;
        match obj.get(PRIMARY_KEY) {
            Some(serde_json::Value::String(id)) if !id.is_empty() => Ok(obj),
            _ => Err(Error::MissingPrimaryKey {
                table: self.name.clone(),
                field: PRIMARY_KEY.to_string(),
            }),
        }
    }
}

/// Schema for every table the device writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Schema version
    pub version: SchemaVersion,
    /// Table definitions by name
    pub tables: HashMap<TableName, TableSchema>,
}

impl Schema {
    /// Create a new empty schema.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            tables: HashMap::new(),
        }
    }

    /// Add a table schema.
    pub fn add_table(&mut self, table: TableSchema) -> &mut Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Builder-style method to add a table.
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.add_table(table);
        self
    }

    /// Get a table schema by name.
    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    fn table(&self, name: &str) -> Result<&TableSchema> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Validate a mutation before it is queued.
    pub fn validate_mutation(&self, mutation: &Mutation) -> Result<()> {
        mutation.validate_shape()?;
        let table = self.table(&mutation.table)?;

        match (&mutation.operation, &mutation.meta) {
            (OperationKind::Insert, _) | (OperationKind::Compound, _) => {
                table.validate_payload(&mutation.payload)?;
            }
            (OperationKind::Update, MutationMeta::Adjust(_)) => {
                table.validate_primary_key(&mutation.payload)?;
            }
            (OperationKind::Update, _) => table.validate_patch(&mutation.payload)?,
            (OperationKind::Delete, _) => {
                table.validate_primary_key(&mutation.payload)?;
            }
        }

        if let MutationMeta::OrderPlacement {
            line_table, lines, ..
        } = &mutation.meta
        {
            let line_schema = self.table(line_table)?;
            for line in lines {
                line_schema.validate_payload(line)?;
            }
        }

        for adjustment in mutation.meta.adjustments() {
            let target = self.table(&adjustment.table)?;
            if !target.counters.contains(&adjustment.field) {
                return Err(Error::NotACounter {
                    table: adjustment.table.clone(),
                    field: adjustment.field.clone(),
                });
            }
        }

        Ok(())
    }
}
