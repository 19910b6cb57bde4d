//! Schema introspection: tables, columns, and primary keys of the target
//! schema, read from `information_schema`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use sqlx::{PgPool, Row};

use super::GatewayError;

/// Snapshot of the relational schema the gateway exposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Catalog {
    pub schema: String,
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Table,
    View,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableInfo {
    pub name: String,
    pub kind: TableKind,
    pub columns: Vec<ColumnInfo>,
    /// Primary key column names, in constraint order. Empty for views.
    pub primary_key: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnInfo {
    pub name: String,
    /// Postgres udt name, e.g. `int4`, `timestamptz`.
    pub udt: String,
    pub scalar: ScalarKind,
    pub nullable: bool,
    /// True when the column has a default or is an identity column.
    pub has_default: bool,
}

/// GraphQL scalar a column maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Int,
    BigInt,
    Float,
    Boolean,
    String,
    Json,
}

impl ScalarKind {
    /// GraphQL type name for the scalar.
    pub fn type_name(self) -> &'static str {
        match self {
            ScalarKind::Int => "Int",
            ScalarKind::BigInt => "BigInt",
            ScalarKind::Float => "Float",
            ScalarKind::Boolean => "Boolean",
            ScalarKind::String => "String",
            ScalarKind::Json => "JSON",
        }
    }
}

/// Maps a Postgres udt name to the scalar it is exposed as.
///
/// Types without a natural GraphQL scalar (temporal, uuid, network, ...)
/// are exposed as `String` and cast to text when selected. Arrays and
/// composites are exposed as `JSON`.
pub fn map_udt(udt: &str) -> ScalarKind {
    if udt.starts_with('_') {
        return ScalarKind::Json;
    }
    match udt {
        "int2" | "int4" => ScalarKind::Int,
        "int8" => ScalarKind::BigInt,
        "float4" | "float8" => ScalarKind::Float,
        "bool" => ScalarKind::Boolean,
        "json" | "jsonb" => ScalarKind::Json,
        _ => ScalarKind::String,
    }
}

const COLUMNS_SQL: &str = r"
SELECT c.table_name::text   AS table_name,
       t.table_type::text   AS table_type,
       c.column_name::text  AS column_name,
       c.udt_name::text     AS udt_name,
       (c.is_nullable = 'YES') AS nullable,
       (c.column_default IS NOT NULL OR c.is_identity = 'YES') AS has_default
FROM information_schema.columns c
JOIN information_schema.tables t
  ON t.table_schema = c.table_schema AND t.table_name = c.table_name
WHERE c.table_schema = $1
  AND t.table_type IN ('BASE TABLE', 'VIEW')
ORDER BY c.table_name, c.ordinal_position
";

const PRIMARY_KEYS_SQL: &str = r"
SELECT tc.table_name::text  AS table_name,
       kcu.column_name::text AS column_name
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON kcu.constraint_name = tc.constraint_name
 AND kcu.table_schema = tc.table_schema
WHERE tc.table_schema = $1
  AND tc.constraint_type = 'PRIMARY KEY'
ORDER BY tc.table_name, kcu.ordinal_position
";

impl Catalog {
    /// Introspects the target schema.
    pub async fn load(pool: &PgPool, schema: &str) -> Result<Self, GatewayError> {
        let column_rows = sqlx::query(COLUMNS_SQL)
            .bind(schema)
            .fetch_all(pool)
            .await?;

        let mut tables: Vec<TableInfo> = Vec::new();
        for row in &column_rows {
            let table_name: String = row.try_get("table_name")?;
            let table_type: String = row.try_get("table_type")?;
            let udt: String = row.try_get("udt_name")?;

            if tables.last().is_none_or(|t| t.name != table_name) {
                tables.push(TableInfo {
                    name: table_name,
                    kind: if table_type == "VIEW" {
                        TableKind::View
                    } else {
                        TableKind::Table
                    },
                    columns: Vec::new(),
                    primary_key: Vec::new(),
                });
            }

            let scalar = map_udt(&udt);
            if let Some(table) = tables.last_mut() {
                table.columns.push(ColumnInfo {
                    name: row.try_get("column_name")?,
                    scalar,
                    udt,
                    nullable: row.try_get("nullable")?,
                    has_default: row.try_get("has_default")?,
                });
            }
        }

        let pk_rows = sqlx::query(PRIMARY_KEYS_SQL)
            .bind(schema)
            .fetch_all(pool)
            .await?;
        for row in &pk_rows {
            let table_name: String = row.try_get("table_name")?;
            let column_name: String = row.try_get("column_name")?;
            if let Some(table) = tables.iter_mut().find(|t| t.name == table_name) {
                table.primary_key.push(column_name);
            }
        }

        Ok(Catalog {
            schema: schema.to_string(),
            tables,
        })
    }

    /// Stable hash over the whole catalog, used by the schema watcher to
    /// detect DDL changes between polls.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl TableInfo {
    /// Returns the single primary-key column, if the table has exactly one.
    pub fn single_pk(&self) -> Option<&ColumnInfo> {
        match self.primary_key.as_slice() {
            [pk] => self.columns.iter().find(|c| &c.name == pk),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, udt: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            udt: udt.to_string(),
            scalar: map_udt(udt),
            nullable: true,
            has_default: false,
        }
    }

    #[test]
    fn udt_mapping() {
        assert_eq!(map_udt("int4"), ScalarKind::Int);
        assert_eq!(map_udt("int8"), ScalarKind::BigInt);
        assert_eq!(map_udt("float8"), ScalarKind::Float);
        assert_eq!(map_udt("bool"), ScalarKind::Boolean);
        assert_eq!(map_udt("jsonb"), ScalarKind::Json);
        assert_eq!(map_udt("_int4"), ScalarKind::Json);
        assert_eq!(map_udt("timestamptz"), ScalarKind::String);
        assert_eq!(map_udt("uuid"), ScalarKind::String);
    }

    #[test]
    fn fingerprint_tracks_ddl_changes() {
        let mut catalog = Catalog {
            schema: "public".into(),
            tables: vec![TableInfo {
                name: "book".into(),
                kind: TableKind::Table,
                columns: vec![column("id", "int4"), column("title", "text")],
                primary_key: vec!["id".into()],
            }],
        };
        let before = catalog.fingerprint();
        assert_eq!(before, catalog.fingerprint());

        catalog.tables[0].columns.push(column("isbn", "text"));
        assert_ne!(before, catalog.fingerprint());
    }

    #[test]
    fn single_pk_requires_exactly_one_column() {
        let mut table = TableInfo {
            name: "book".into(),
            kind: TableKind::Table,
            columns: vec![column("id", "int4"), column("edition", "int4")],
            primary_key: vec!["id".into()],
        };
        assert_eq!(table.single_pk().unwrap().name, "id");

        table.primary_key.push("edition".into());
        assert!(table.single_pk().is_none());
    }
}
