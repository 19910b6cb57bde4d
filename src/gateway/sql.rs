//! SQL generation and row conversion for the generated resolvers.
//!
//! All statements are parameterized; identifiers are always quoted. Columns
//! without a native GraphQL scalar are cast to text (or jsonb) on the way
//! out, which keeps row decoding uniform across Postgres types.

use async_graphql::Value as GqlValue;
use serde_json::Number;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row};

use super::GatewayError;
use super::catalog::{ColumnInfo, ScalarKind, TableInfo};

/// A resolved row, keyed by column name. Stored behind
/// `FieldValue::owned_any` so column resolvers can downcast it.
pub struct GqlRow(pub std::collections::BTreeMap<String, GqlValue>);

/// A value bound to a `$n` placeholder. `Null` carries the column's scalar
/// kind so the NULL parameter is sent with a concrete wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Null(ScalarKind),
}

/// Quotes an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Schema-qualified, quoted table reference.
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

fn is_text_udt(udt: &str) -> bool {
    matches!(udt, "text" | "varchar" | "bpchar" | "name" | "citext")
}

/// SELECT-list expression for a column, aliased back to the column name.
fn select_expr(col: &ColumnInfo) -> String {
    let ident = quote_ident(&col.name);
    let alias = &ident;
    match col.scalar {
        ScalarKind::Int if col.udt == "int2" => format!("{ident}::int4 AS {alias}"),
        ScalarKind::Float if col.udt == "float4" => format!("{ident}::float8 AS {alias}"),
        ScalarKind::Json if !matches!(col.udt.as_str(), "json" | "jsonb") => {
            format!("to_jsonb({ident}) AS {alias}")
        }
        ScalarKind::String if !is_text_udt(&col.udt) => format!("{ident}::text AS {alias}"),
        _ => ident,
    }
}

/// Comma-joined SELECT list over every column of the table.
pub fn select_list(table: &TableInfo) -> String {
    table
        .columns
        .iter()
        .map(select_expr)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Equality predicate against placeholder `$n`. String-typed columns whose
/// storage type is not textual are compared through a text cast, so the
/// parameter never needs a type annotation.
pub fn condition_expr(col: &ColumnInfo, n: usize) -> String {
    let ident = quote_ident(&col.name);
    if col.scalar == ScalarKind::String && !is_text_udt(&col.udt) {
        format!("{ident}::text = ${n}")
    } else {
        format!("{ident} = ${n}")
    }
}

/// `IS NULL` predicate for a column.
pub fn is_null_expr(col: &ColumnInfo) -> String {
    format!("{} IS NULL", quote_ident(&col.name))
}

/// Placeholder expression for writing into a column. Text parameters headed
/// for a non-textual column are cast to the storage type.
fn write_placeholder(col: &ColumnInfo, n: usize) -> String {
    match col.scalar {
        ScalarKind::Json => format!("${n}::jsonb"),
        ScalarKind::String if !is_text_udt(&col.udt) => {
            format!("${n}::{}", quote_ident(&col.udt))
        }
        _ => format!("${n}"),
    }
}

/// SELECT over a table with optional predicates and pagination. Rows are
/// ordered by primary key when one exists, so pagination is stable.
pub fn build_select(
    schema: &str,
    table: &TableInfo,
    predicates: &[String],
    first: Option<i64>,
    offset: Option<i64>,
) -> String {
    let mut sql = format!(
        "SELECT {} FROM {}",
        select_list(table),
        qualified(schema, &table.name)
    );
    if !predicates.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" AND "));
    }
    if !table.primary_key.is_empty() {
        let order = table
            .primary_key
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(" ORDER BY ");
        sql.push_str(&order);
    }
    if let Some(first) = first {
        sql.push_str(&format!(" LIMIT {}", first.max(0)));
    }
    if let Some(offset) = offset {
        sql.push_str(&format!(" OFFSET {}", offset.max(0)));
    }
    sql
}

/// INSERT returning the full row.
pub fn build_insert(schema: &str, table: &TableInfo, cols: &[&ColumnInfo]) -> String {
    let target = qualified(schema, &table.name);
    let returning = select_list(table);
    if cols.is_empty() {
        return format!("INSERT INTO {target} DEFAULT VALUES RETURNING {returning}");
    }
    let names = cols
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let values = cols
        .iter()
        .enumerate()
        .map(|(i, c)| write_placeholder(c, i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {target} ({names}) VALUES ({values}) RETURNING {returning}")
}

/// UPDATE by primary key returning the full row. The key parameter follows
/// the patch parameters.
pub fn build_update(
    schema: &str,
    table: &TableInfo,
    set_cols: &[&ColumnInfo],
    pk: &ColumnInfo,
) -> String {
    let assignments = set_cols
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = {}", quote_ident(&c.name), write_placeholder(c, i + 1)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {assignments} WHERE {} RETURNING {}",
        qualified(schema, &table.name),
        condition_expr(pk, set_cols.len() + 1),
        select_list(table)
    )
}

/// DELETE by primary key returning the deleted row.
pub fn build_delete(schema: &str, table: &TableInfo, pk: &ColumnInfo) -> String {
    format!(
        "DELETE FROM {} WHERE {} RETURNING {}",
        qualified(schema, &table.name),
        condition_expr(pk, 1),
        select_list(table)
    )
}

/// Attaches bind values to a prepared query in order.
pub fn apply_binds(
    sql: &str,
    binds: Vec<BindValue>,
) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    let mut query = sqlx::query(sql);
    for bind in binds {
        query = match bind {
            BindValue::Int(v) => query.bind(v),
            BindValue::Float(v) => query.bind(v),
            BindValue::Bool(v) => query.bind(v),
            BindValue::Text(v) => query.bind(v),
            BindValue::Null(kind) => match kind {
                ScalarKind::Int | ScalarKind::BigInt => query.bind(Option::<i64>::None),
                ScalarKind::Float => query.bind(Option::<f64>::None),
                ScalarKind::Boolean => query.bind(Option::<bool>::None),
                ScalarKind::String | ScalarKind::Json => query.bind(Option::<String>::None),
            },
        };
    }
    query
}

/// Decodes a fetched row into GraphQL values, keyed by column name.
pub fn row_to_gql(row: &PgRow, table: &TableInfo) -> Result<GqlRow, GatewayError> {
    let mut out = std::collections::BTreeMap::new();
    for col in &table.columns {
        let name = col.name.as_str();
        let value = match col.scalar {
            ScalarKind::Int => row
                .try_get::<Option<i32>, _>(name)?
                .map_or(GqlValue::Null, GqlValue::from),
            ScalarKind::BigInt => row
                .try_get::<Option<i64>, _>(name)?
                .map_or(GqlValue::Null, GqlValue::from),
            ScalarKind::Float => row
                .try_get::<Option<f64>, _>(name)?
                .and_then(Number::from_f64)
                .map_or(GqlValue::Null, GqlValue::Number),
            ScalarKind::Boolean => row
                .try_get::<Option<bool>, _>(name)?
                .map_or(GqlValue::Null, GqlValue::from),
            ScalarKind::String => row
                .try_get::<Option<String>, _>(name)?
                .map_or(GqlValue::Null, GqlValue::from),
            ScalarKind::Json => match row.try_get::<Option<serde_json::Value>, _>(name)? {
                Some(v) => GqlValue::from_json(v)
                    .map_err(|e| GatewayError::Schema(format!("json column '{name}': {e}")))?,
                None => GqlValue::Null,
            },
        };
        out.insert(col.name.clone(), value);
    }
    Ok(GqlRow(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::catalog::{TableKind, map_udt};

    fn column(name: &str, udt: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            udt: udt.to_string(),
            scalar: map_udt(udt),
            nullable: true,
            has_default: false,
        }
    }

    fn book_table() -> TableInfo {
        TableInfo {
            name: "book".into(),
            kind: TableKind::Table,
            columns: vec![
                column("id", "int4"),
                column("title", "text"),
                column("published_at", "timestamptz"),
            ],
            primary_key: vec!["id".into()],
        }
    }

    #[test]
    fn identifiers_are_quoted_and_escaped() {
        assert_eq!(quote_ident("book"), "\"book\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified("public", "book"), "\"public\".\"book\"");
    }

    #[test]
    fn select_casts_non_core_types_to_text() {
        let sql = build_select("public", &book_table(), &[], Some(10), Some(5));
        assert_eq!(
            sql,
            "SELECT \"id\", \"title\", \"published_at\"::text AS \"published_at\" \
             FROM \"public\".\"book\" ORDER BY \"id\" LIMIT 10 OFFSET 5"
        );
    }

    #[test]
    fn select_with_predicates() {
        let table = book_table();
        let predicates = vec![
            condition_expr(&table.columns[1], 1),
            is_null_expr(&table.columns[2]),
        ];
        let sql = build_select("public", &table, &predicates, None, None);
        assert!(sql.contains("WHERE \"title\" = $1 AND \"published_at\" IS NULL"));
    }

    #[test]
    fn uuid_comparison_goes_through_text_cast() {
        let col = column("owner_id", "uuid");
        assert_eq!(condition_expr(&col, 2), "\"owner_id\"::text = $2");
    }

    #[test]
    fn insert_casts_write_placeholders() {
        let table = book_table();
        let cols: Vec<&ColumnInfo> = vec![&table.columns[1], &table.columns[2]];
        let sql = build_insert("public", &table, &cols);
        assert!(sql.starts_with(
            "INSERT INTO \"public\".\"book\" (\"title\", \"published_at\") \
             VALUES ($1, $2::\"timestamptz\") RETURNING "
        ));
    }

    #[test]
    fn insert_without_columns_uses_defaults() {
        let sql = build_insert("public", &book_table(), &[]);
        assert!(sql.starts_with("INSERT INTO \"public\".\"book\" DEFAULT VALUES RETURNING "));
    }

    #[test]
    fn update_places_key_after_patch_values() {
        let table = book_table();
        let pk = table.single_pk().unwrap();
        let cols: Vec<&ColumnInfo> = vec![&table.columns[1]];
        let sql = build_update("public", &table, &cols, pk);
        assert!(sql.contains("SET \"title\" = $1 WHERE \"id\" = $2"));
    }

    #[test]
    fn delete_returns_the_row() {
        let table = book_table();
        let pk = table.single_pk().unwrap();
        let sql = build_delete("public", &table, pk);
        assert!(sql.starts_with("DELETE FROM \"public\".\"book\" WHERE \"id\" = $1 RETURNING "));
    }
}
