use std::sync::Arc;

use async_trait::async_trait;
use pgchat_core::domain::schema::{ColumnInfo, SchemaSnapshot};
use pgchat_core::errors::ConnectionError;
use thiserror::Error;
use tracing::{debug, info};

use crate::connection::DbPool;

const CATALOG_QUERY: &str = r#"
    SELECT c.table_schema::text,
           c.table_name::text,
           c.column_name::text,
           c.data_type::text,
           c.is_nullable::text
    FROM information_schema.columns c
    JOIN information_schema.tables t
      ON t.table_schema = c.table_schema
     AND t.table_name = c.table_name
    WHERE c.table_schema NOT IN ('pg_catalog', 'information_schema')
      AND c.table_schema NOT LIKE 'pg_toast%'
      AND t.table_type IN ('BASE TABLE', 'VIEW')
    ORDER BY c.table_schema, c.table_name, c.ordinal_position
"#;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("table `{table}` was not found")]
    TableNotFound { table: String },
}

#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Issues the catalog queries. Every call goes to the database.
    async fn fetch_snapshot(&self) -> Result<SchemaSnapshot, ConnectionError>;
}

#[async_trait]
impl<T> SchemaSource for Arc<T>
where
    T: SchemaSource + ?Sized,
{
    async fn fetch_snapshot(&self) -> Result<SchemaSnapshot, ConnectionError> {
        (**self).fetch_snapshot().await
    }
}

pub struct PgSchemaSource {
    pool: DbPool,
}

impl PgSchemaSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SchemaSource for PgSchemaSource {
    async fn fetch_snapshot(&self) -> Result<SchemaSnapshot, ConnectionError> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String)>(CATALOG_QUERY)
            .persistent(false)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| ConnectionError::new(error.to_string()))?;

        let mut snapshot = SchemaSnapshot::new();
        for (schema, table, column, data_type, is_nullable) in rows {
            snapshot.push_column(
                SchemaSnapshot::table_key(&schema, &table),
                ColumnInfo::new(column, data_type, is_nullable.eq_ignore_ascii_case("YES")),
            );
        }
        Ok(snapshot)
    }
}

/// Lazily fetched, session-lifetime cache over a [`SchemaSource`].
///
/// There is no change detection: a migration applied while the session is
/// open stays invisible until [`SchemaIntrospector::refresh`] is called.
pub struct SchemaIntrospector<S> {
    source: S,
    cached: Option<SchemaSnapshot>,
}

impl<S> SchemaIntrospector<S>
where
    S: SchemaSource,
{
    pub fn new(source: S) -> Self {
        Self { source, cached: None }
    }

    pub async fn describe(&mut self) -> Result<&SchemaSnapshot, ConnectionError> {
        match self.cached {
            Some(ref snapshot) => Ok(snapshot),
            None => self.refresh().await,
        }
    }

    pub async fn describe_table(
        &mut self,
        table: &str,
    ) -> Result<(String, Vec<ColumnInfo>), SchemaError> {
        let snapshot = self.describe().await?;
        snapshot
            .find_table(table)
            .map(|(key, columns)| (key.to_string(), columns.to_vec()))
            .ok_or_else(|| SchemaError::TableNotFound { table: table.to_string() })
    }

    pub async fn refresh(&mut self) -> Result<&SchemaSnapshot, ConnectionError> {
        debug!(event_name = "db.schema.fetch", "fetching schema snapshot");
        let snapshot = self.source.fetch_snapshot().await?;
        info!(event_name = "db.schema.cached", tables = snapshot.len(), "schema snapshot cached");
        Ok(self.cached.insert(snapshot))
    }

    pub fn cached(&self) -> Option<&SchemaSnapshot> {
        self.cached.as_ref()
    }
}
