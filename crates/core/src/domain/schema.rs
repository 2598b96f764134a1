use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self { name: name.into(), data_type: data_type.into(), nullable }
    }
}

/// Point-in-time copy of the database structure, keyed by table name.
///
/// Tables in the `public` schema use their bare name; every other schema is
/// qualified as `schema.table`. Columns keep their ordinal order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, Vec<ColumnInfo>>,
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_key(schema: &str, table: &str) -> String {
        if schema == "public" {
            table.to_string()
        } else {
            format!("{schema}.{table}")
        }
    }

    pub fn push_column(&mut self, table: impl Into<String>, column: ColumnInfo) {
        self.tables.entry(table.into()).or_default().push(column);
    }

    pub fn insert_table(&mut self, table: impl Into<String>, columns: Vec<ColumnInfo>) {
        self.tables.insert(table.into(), columns);
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn tables(&self) -> &BTreeMap<String, Vec<ColumnInfo>> {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Looks a table up by exact key, then case-insensitively, then by bare name
    /// against schema-qualified keys. A bare name matching several schemas is
    /// not resolved.
    pub fn find_table(&self, name: &str) -> Option<(&str, &[ColumnInfo])> {
        let wanted = name.trim().trim_matches('"');
        if let Some((key, columns)) = self.tables.get_key_value(wanted) {
            return Some((key.as_str(), columns.as_slice()));
        }

        let lowered = wanted.to_ascii_lowercase();
        if let Some((key, columns)) =
            self.tables.iter().find(|(key, _)| key.to_ascii_lowercase() == lowered)
        {
            return Some((key.as_str(), columns.as_slice()));
        }

        let mut qualified = self.tables.iter().filter(|(key, _)| {
            key.rsplit_once('.').is_some_and(|(_, bare)| bare.to_ascii_lowercase() == lowered)
        });
        match (qualified.next(), qualified.next()) {
            (Some((key, columns)), None) => Some((key.as_str(), columns.as_slice())),
            _ => None,
        }
    }

    /// Compact text form handed to the language model as grounding context.
    pub fn render(&self) -> String {
        if self.tables.is_empty() {
            return "(the database has no user tables)".to_string();
        }

        self.tables
            .iter()
            .map(|(table, columns)| render_table(table, columns))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn render_table(table: &str, columns: &[ColumnInfo]) -> String {
    let columns = columns
        .iter()
        .map(|column| {
            let null_marker = if column.nullable { "" } else { " not null" };
            format!("{} {}{null_marker}", column.name, column.data_type)
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("{table}({columns})")
}
