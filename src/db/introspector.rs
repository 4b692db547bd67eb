use super::connection::map_sqlx_error;
use crate::error::Result;
use crate::schema::{ColumnSchema, ForeignKey, SchemaIntrospector, SchemaSnapshot, TableSchema};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashSet};
use tracing::info;

/// Reads table, column and key metadata from `information_schema`.
pub struct PgSchemaIntrospector {
    pool: PgPool,
}

impl PgSchemaIntrospector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_columns(&self, schema: &str) -> Result<Vec<(String, String, String, String)>> {
        sqlx::query_as(
            r#"
            SELECT c.table_name::text, c.column_name::text, c.data_type::text, c.is_nullable::text
            FROM information_schema.columns c
            JOIN information_schema.tables t
              ON t.table_schema = c.table_schema AND t.table_name = c.table_name
            WHERE c.table_schema = $1 AND t.table_type IN ('BASE TABLE', 'VIEW')
            ORDER BY c.table_name, c.ordinal_position
            "#,
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("column introspection", e))
    }

    async fn load_primary_keys(&self, schema: &str) -> Result<HashSet<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT kcu.table_name::text, kcu.column_name::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
             AND tc.table_name = kcu.table_name
            WHERE tc.table_schema = $1 AND tc.constraint_type = 'PRIMARY KEY'
            "#,
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("primary key introspection", e))?;
        Ok(rows.into_iter().collect())
    }

    async fn load_foreign_keys(&self, schema: &str) -> Result<Vec<(String, String, String, String, String)>> {
        sqlx::query_as(
            r#"
            SELECT kcu.table_name::text, kcu.column_name::text,
                   ccu.table_schema::text, ccu.table_name::text, ccu.column_name::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
              ON tc.constraint_name = ccu.constraint_name
             AND tc.constraint_schema = ccu.constraint_schema
            WHERE tc.table_schema = $1 AND tc.constraint_type = 'FOREIGN KEY'
            ORDER BY kcu.table_name, kcu.column_name
            "#,
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("foreign key introspection", e))
    }
}

#[async_trait]
impl SchemaIntrospector for PgSchemaIntrospector {
    async fn introspect(&self, schema: &str) -> Result<SchemaSnapshot> {
        let columns = self.load_columns(schema).await?;
        let primary_keys = self.load_primary_keys(schema).await?;
        let foreign_keys = self.load_foreign_keys(schema).await?;

        let mut tables: BTreeMap<String, TableSchema> = BTreeMap::new();
        for (table, column, data_type, nullable) in columns {
            let is_primary_key = primary_keys.contains(&(table.clone(), column.clone()));
            tables
                .entry(table.clone())
                .or_insert_with(|| TableSchema::new(&table, Vec::new()))
                .columns
                .push(ColumnSchema {
                    name: column,
                    data_type,
                    nullable: nullable.eq_ignore_ascii_case("YES"),
                    is_primary_key,
                });
        }
        for (table, column, ref_schema, ref_table, ref_column) in foreign_keys {
            if let Some(entry) = tables.get_mut(&table) {
                entry.foreign_keys.push(ForeignKey {
                    column,
                    references_schema: Some(ref_schema),
                    references_table: ref_table,
                    references_column: ref_column,
                });
            }
        }

        info!("Introspected schema '{}': {} tables", schema, tables.len());
        Ok(SchemaSnapshot {
            schema: schema.to_string(),
            tables: tables.into_values().collect(),
        })
    }
}
