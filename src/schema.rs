//! Schema introspection contract
//!
//! The engine only reads schemas. Live databases are introspected through
//! [`crate::db::PgSchemaIntrospector`]; offline snapshots come from JSON files.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaSnapshot {
    pub schema: String,
    pub tables: Vec<TableSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub is_primary_key: bool,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForeignKey {
    pub column: String,
    /// Defaults to the referencing table's schema.
    #[serde(default)]
    pub references_schema: Option<String>,
    pub references_table: String,
    pub references_column: String,
}

impl ColumnSchema {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            is_primary_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }
}

impl TableSchema {
    pub fn new(name: &str, columns: Vec<ColumnSchema>) -> Self {
        Self {
            name: name.to_string(),
            columns,
            foreign_keys: Vec::new(),
        }
    }
}

/// Coarse type families used for the type-compatibility veto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Text,
    Integer,
    Decimal,
    Boolean,
    Temporal,
    Uuid,
    Other,
}

impl TypeFamily {
    pub fn of(data_type: &str) -> Self {
        let t = data_type.to_lowercase();
        let t = t.split('(').next().unwrap_or("").trim();
        match t {
            "text" | "varchar" | "nvarchar" | "char" | "nchar" | "character varying"
            | "character" | "string" | "citext" | "bpchar" | "name" => TypeFamily::Text,
            "int" | "integer" | "int2" | "int4" | "int8" | "smallint" | "bigint" | "tinyint"
            | "serial" | "bigserial" | "smallserial" => TypeFamily::Integer,
            "numeric" | "decimal" | "real" | "float" | "float4" | "float8" | "double"
            | "double precision" | "money" => TypeFamily::Decimal,
            "bool" | "boolean" | "bit" => TypeFamily::Boolean,
            "date" | "time" | "timestamp" | "timestamptz" | "datetime" | "datetime2"
            | "timestamp without time zone" | "timestamp with time zone" => TypeFamily::Temporal,
            "uuid" | "uniqueidentifier" => TypeFamily::Uuid,
            _ => TypeFamily::Other,
        }
    }

    /// Unknown types never veto a pair.
    pub fn compatible_with(self, other: TypeFamily) -> bool {
        use TypeFamily::*;
        match (self, other) {
            (Other, _) | (_, Other) => true,
            (a, b) if a == b => true,
            (Integer, Decimal) | (Decimal, Integer) => true,
            (Text, Uuid) | (Uuid, Text) => true,
            _ => false,
        }
    }
}

pub fn types_compatible(a: &str, b: &str) -> bool {
    TypeFamily::of(a).compatible_with(TypeFamily::of(b))
}

#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    async fn introspect(&self, schema: &str) -> Result<SchemaSnapshot>;
}

/// Reads `<dir>/<schema>.json` snapshot files.
pub struct JsonSchemaSource {
    dir: PathBuf,
}

impl JsonSchemaSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<SchemaSnapshot> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::NotFound(format!("Failed to read schema {}: {}", path.display(), e))
        })?;
        let snapshot: SchemaSnapshot = serde_json::from_str(&content)?;
        Ok(snapshot)
    }
}

#[async_trait]
impl SchemaIntrospector for JsonSchemaSource {
    async fn introspect(&self, schema: &str) -> Result<SchemaSnapshot> {
        Self::load_file(self.dir.join(format!("{}.json", schema)))
    }
}
