//! Dynamic GraphQL schema generation.
//!
//! Each introspected table becomes an object type with a list query, a
//! primary-key lookup, and CRUD mutations. GraphQL parsing, validation and
//! execution are owned by async-graphql; the resolvers here only translate
//! arguments into parameterized SQL.

use std::sync::Arc;

use async_graphql::Value as GqlValue;
use async_graphql::dynamic::{
    Field, FieldFuture, FieldValue, InputObject, InputValue, Object, ResolverContext, Scalar,
    Schema, Type, TypeRef, ValueAccessor,
};
use sqlx::PgPool;

use super::catalog::{Catalog, ColumnInfo, ScalarKind, TableInfo, TableKind};
use super::jwt::AuthSession;
use super::{GatewayError, GatewayOptions, execute_rows, sql};

/// Converts `snake_case` to `camelCase`.
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, part) in name.split('_').filter(|p| !p.is_empty()).enumerate() {
        if i == 0 {
            out.push_str(part);
        } else {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

/// Converts `snake_case` to `PascalCase`.
pub fn pascal_case(name: &str) -> String {
    name.split('_')
        .filter(|p| !p.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Naive English pluralization of the last word of a snake_case name.
pub fn pluralize(name: &str) -> String {
    if name.ends_with('s') || name.ends_with("ch") || name.ends_with("sh") || name.ends_with('x') {
        format!("{name}es")
    } else if name.ends_with('y')
        && !name
            .chars()
            .rev()
            .nth(1)
            .is_some_and(|c| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u'))
    {
        format!("{}ies", &name[..name.len() - 1])
    } else {
        format!("{name}s")
    }
}

/// True when the identifier is usable as a GraphQL name.
fn graphql_name_ok(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn scalar_ref(col: &ColumnInfo) -> TypeRef {
    if col.nullable {
        TypeRef::named(col.scalar.type_name())
    } else {
        TypeRef::named_nn(col.scalar.type_name())
    }
}

/// Resolves the authentication session for the current request, falling
/// back to an anonymous session running as the default role.
fn session(ctx: &ResolverContext<'_>, options: &GatewayOptions) -> AuthSession {
    ctx.data_opt::<AuthSession>()
        .cloned()
        .unwrap_or_else(|| AuthSession::anonymous(options.default_role.as_deref()))
}

/// Converts a GraphQL argument into a bind value for the column.
fn bind_from_accessor(
    col: &ColumnInfo,
    value: &ValueAccessor<'_>,
) -> Result<sql::BindValue, async_graphql::Error> {
    if value.is_null() {
        return Ok(sql::BindValue::Null(col.scalar));
    }
    let bind = match col.scalar {
        ScalarKind::Int | ScalarKind::BigInt => sql::BindValue::Int(value.i64()?),
        ScalarKind::Float => sql::BindValue::Float(value.f64()?),
        ScalarKind::Boolean => sql::BindValue::Bool(value.boolean()?),
        ScalarKind::String => sql::BindValue::Text(value.string()?.to_string()),
        ScalarKind::Json => {
            return Err(async_graphql::Error::new(format!(
                "column '{}' does not accept input",
                col.name
            )));
        }
    };
    Ok(bind)
}

/// Wraps a gateway failure, keeping the typed error as the source so the
/// HTTP layer can pull server-side failures out of the GraphQL response.
fn resolver_error(e: GatewayError) -> async_graphql::Error {
    async_graphql::Error::new_with_source(e)
}

fn row_field_value(
    row: &sqlx::postgres::PgRow,
    table: &TableInfo,
) -> Result<FieldValue<'static>, async_graphql::Error> {
    let gql_row = sql::row_to_gql(row, table).map_err(resolver_error)?;
    Ok(FieldValue::owned_any(gql_row))
}

/// Per-table context cloned into every resolver closure.
struct TableCtx {
    pool: PgPool,
    schema: String,
    table: Arc<TableInfo>,
    options: Arc<GatewayOptions>,
}

impl TableCtx {
    fn clone_parts(&self) -> (PgPool, String, Arc<TableInfo>, Arc<GatewayOptions>) {
        (
            self.pool.clone(),
            self.schema.clone(),
            Arc::clone(&self.table),
            Arc::clone(&self.options),
        )
    }
}

fn make_column_resolver(
    column: String,
) -> impl for<'a> Fn(ResolverContext<'a>) -> FieldFuture<'a> + Send + Sync + 'static {
    move |ctx| {
        let column = column.clone();
        FieldFuture::new(async move {
            let row = ctx
                .parent_value
                .downcast_ref::<sql::GqlRow>()
                .ok_or_else(|| async_graphql::Error::new("row state lost"))?;
            Ok(match row.0.get(&column) {
                None | Some(GqlValue::Null) => None,
                Some(v) => Some(FieldValue::value(v.clone())),
            })
        })
    }
}

fn make_list_field(name: String, type_name: &str, condition_name: &str, tcx: &TableCtx) -> Field {
    let (pool, schema, table, options) = tcx.clone_parts();
    Field::new(name, TypeRef::named_nn_list_nn(type_name), move |ctx| {
        let (pool, schema, table, options) =
            (pool.clone(), schema.clone(), table.clone(), options.clone());
        FieldFuture::new(async move {
            let auth = session(&ctx, &options);
            let first = ctx.args.get("first").map(|v| v.i64()).transpose()?;
            let offset = ctx.args.get("offset").map(|v| v.i64()).transpose()?;

            let mut predicates = Vec::new();
            let mut binds = Vec::new();
            if let Some(condition) = ctx.args.get("condition") {
                for (key, value) in condition.object()?.iter() {
                    let col = table
                        .columns
                        .iter()
                        .find(|c| camel_case(&c.name) == key.as_str())
                        .ok_or_else(|| {
                            async_graphql::Error::new(format!("unknown condition field '{key}'"))
                        })?;
                    match bind_from_accessor(col, &value)? {
                        sql::BindValue::Null(_) => predicates.push(sql::is_null_expr(col)),
                        bind => {
                            binds.push(bind);
                            predicates.push(sql::condition_expr(col, binds.len()));
                        }
                    }
                }
            }

            let stmt = sql::build_select(&schema, &table, &predicates, first, offset);
            let rows = execute_rows(&pool, &auth, &stmt, binds)
                .await
                .map_err(resolver_error)?;

            let mut out = Vec::with_capacity(rows.len());
            for row in &rows {
                out.push(row_field_value(row, &table)?);
            }
            Ok(Some(FieldValue::list(out)))
        })
    })
    .argument(InputValue::new("first", TypeRef::named(TypeRef::INT)))
    .argument(InputValue::new("offset", TypeRef::named(TypeRef::INT)))
    .argument(InputValue::new("condition", TypeRef::named(condition_name)))
    .description(format!("Reads rows from `{}`.", tcx.table.name))
}

fn make_by_pk_field(name: String, type_name: &str, pk: &ColumnInfo, tcx: &TableCtx) -> Field {
    let (pool, schema, table, options) = tcx.clone_parts();
    let pk_arg = camel_case(&pk.name);
    let pk_ref = TypeRef::named_nn(pk.scalar.type_name());
    let arg = pk_arg.clone();
    let field = Field::new(name, TypeRef::named(type_name), move |ctx| {
        let (pool, schema, table, options) =
            (pool.clone(), schema.clone(), table.clone(), options.clone());
        let arg = arg.clone();
        FieldFuture::new(async move {
            let auth = session(&ctx, &options);
            let pk = table
                .single_pk()
                .ok_or_else(|| async_graphql::Error::new("table has no single-column key"))?;
            let value = ctx.args.try_get(&arg)?;
            let bind = bind_from_accessor(pk, &value)?;

            let predicates = [sql::condition_expr(pk, 1)];
            let stmt = sql::build_select(&schema, &table, &predicates, None, None);
            let rows = execute_rows(&pool, &auth, &stmt, vec![bind])
                .await
                .map_err(resolver_error)?;

            match rows.first() {
                Some(row) => Ok(Some(row_field_value(row, &table)?)),
                None => Ok(None),
            }
        })
    });
    field
        .argument(InputValue::new(pk_arg, pk_ref))
        .description(format!("Reads a single `{type_name}` by key."))
}

/// Collects (column, bind) pairs from an input object, resolving camelCase
/// field names back to column names.
fn collect_input<'t>(
    table: &'t TableInfo,
    input: &ValueAccessor<'_>,
) -> Result<(Vec<&'t ColumnInfo>, Vec<sql::BindValue>), async_graphql::Error> {
    let mut cols = Vec::new();
    let mut binds = Vec::new();
    for (key, value) in input.object()?.iter() {
        let col = table
            .columns
            .iter()
            .find(|c| camel_case(&c.name) == key.as_str())
            .ok_or_else(|| async_graphql::Error::new(format!("unknown input field '{key}'")))?;
        cols.push(col);
        binds.push(bind_from_accessor(col, &value)?);
    }
    Ok((cols, binds))
}

fn make_create_field(name: String, type_name: &str, input_name: &str, tcx: &TableCtx) -> Field {
    let (pool, schema, table, options) = tcx.clone_parts();
    Field::new(name, TypeRef::named(type_name), move |ctx| {
        let (pool, schema, table, options) =
            (pool.clone(), schema.clone(), table.clone(), options.clone());
        FieldFuture::new(async move {
            let auth = session(&ctx, &options);
            let input = ctx.args.try_get("input")?;
            let (cols, binds) = collect_input(&table, &input)?;

            let stmt = sql::build_insert(&schema, &table, &cols);
            let rows = execute_rows(&pool, &auth, &stmt, binds)
                .await
                .map_err(resolver_error)?;

            match rows.first() {
                Some(row) => Ok(Some(row_field_value(row, &table)?)),
                None => Ok(None),
            }
        })
    })
    .argument(InputValue::new("input", TypeRef::named_nn(input_name)))
    .description(format!("Creates a `{type_name}` row."))
}

fn make_update_field(
    name: String,
    type_name: &str,
    patch_name: &str,
    pk: &ColumnInfo,
    tcx: &TableCtx,
) -> Field {
    let (pool, schema, table, options) = tcx.clone_parts();
    let pk_arg = camel_case(&pk.name);
    let pk_ref = TypeRef::named_nn(pk.scalar.type_name());
    let arg = pk_arg.clone();
    let field = Field::new(name, TypeRef::named(type_name), move |ctx| {
        let (pool, schema, table, options) =
            (pool.clone(), schema.clone(), table.clone(), options.clone());
        let arg = arg.clone();
        FieldFuture::new(async move {
            let auth = session(&ctx, &options);
            let pk = table
                .single_pk()
                .ok_or_else(|| async_graphql::Error::new("table has no single-column key"))?;
            let patch = ctx.args.try_get("patch")?;
            let (cols, mut binds) = collect_input(&table, &patch)?;
            if cols.is_empty() {
                return Err(async_graphql::Error::new("patch must set at least one column"));
            }
            let key = ctx.args.try_get(&arg)?;
            binds.push(bind_from_accessor(pk, &key)?);

            let stmt = sql::build_update(&schema, &table, &cols, pk);
            let rows = execute_rows(&pool, &auth, &stmt, binds)
                .await
                .map_err(resolver_error)?;

            match rows.first() {
                Some(row) => Ok(Some(row_field_value(row, &table)?)),
                None => Ok(None),
            }
        })
    });
    field
        .argument(InputValue::new(pk_arg, pk_ref))
        .argument(InputValue::new("patch", TypeRef::named_nn(patch_name)))
        .description(format!("Updates a `{type_name}` by key."))
}

fn make_delete_field(name: String, type_name: &str, pk: &ColumnInfo, tcx: &TableCtx) -> Field {
    let (pool, schema, table, options) = tcx.clone_parts();
    let pk_arg = camel_case(&pk.name);
    let pk_ref = TypeRef::named_nn(pk.scalar.type_name());
    let arg = pk_arg.clone();
    let field = Field::new(name, TypeRef::named(type_name), move |ctx| {
        let (pool, schema, table, options) =
            (pool.clone(), schema.clone(), table.clone(), options.clone());
        let arg = arg.clone();
        FieldFuture::new(async move {
            let auth = session(&ctx, &options);
            let pk = table
                .single_pk()
                .ok_or_else(|| async_graphql::Error::new("table has no single-column key"))?;
            let key = ctx.args.try_get(&arg)?;
            let bind = bind_from_accessor(pk, &key)?;

            let stmt = sql::build_delete(&schema, &table, pk);
            let rows = execute_rows(&pool, &auth, &stmt, vec![bind])
                .await
                .map_err(resolver_error)?;

            match rows.first() {
                Some(row) => Ok(Some(row_field_value(row, &table)?)),
                None => Ok(None),
            }
        })
    });
    field
        .argument(InputValue::new(pk_arg, pk_ref))
        .description(format!("Deletes a `{type_name}` by key."))
}

/// Builds the executable schema for a catalog snapshot.
pub fn build_schema(
    pool: &PgPool,
    catalog: &Catalog,
    options: &Arc<GatewayOptions>,
) -> Result<Schema, GatewayError> {
    let mut query = Object::new("Query").description(format!(
        "Automatically generated API over the `{}` schema.",
        catalog.schema
    ));
    let mut mutation = Object::new("Mutation");
    let mut has_mutations = false;
    let mut types: Vec<Type> = Vec::new();

    let schema_name = catalog.schema.clone();
    query = query.field(
        Field::new(
            "currentSchema",
            TypeRef::named_nn(TypeRef::STRING),
            move |_ctx| {
                let name = schema_name.clone();
                FieldFuture::new(async move { Ok(Some(FieldValue::value(GqlValue::from(name)))) })
            },
        )
        .description("The database schema this gateway serves."),
    );

    for table in &catalog.tables {
        if !graphql_name_ok(&table.name) {
            tracing::warn!(table = %table.name, "skipping table: not a valid GraphQL name");
            continue;
        }
        let columns: Vec<&ColumnInfo> = table
            .columns
            .iter()
            .filter(|c| graphql_name_ok(&c.name))
            .collect();
        if columns.len() < table.columns.len() {
            tracing::warn!(table = %table.name, "skipping columns with invalid GraphQL names");
        }

        let exposed = Arc::new(TableInfo {
            name: table.name.clone(),
            kind: table.kind,
            columns: columns.into_iter().cloned().collect(),
            primary_key: table.primary_key.clone(),
        });
        let tcx = TableCtx {
            pool: pool.clone(),
            schema: catalog.schema.clone(),
            table: Arc::clone(&exposed),
            options: Arc::clone(options),
        };

        let type_name = pascal_case(&table.name);

        // Row object type.
        let mut obj = Object::new(&type_name)
            .description(format!("A row of `{}`.`{}`.", catalog.schema, table.name));
        for col in &exposed.columns {
            obj = obj.field(Field::new(
                camel_case(&col.name),
                scalar_ref(col),
                make_column_resolver(col.name.clone()),
            ));
        }
        types.push(Type::Object(obj));

        // Equality condition input (json columns excluded).
        let condition_name = format!("{type_name}Condition");
        let mut condition = InputObject::new(&condition_name).description(format!(
            "Equality conditions over `{}` columns. A null value matches SQL NULL.",
            table.name
        ));
        for col in exposed
            .columns
            .iter()
            .filter(|c| c.scalar != ScalarKind::Json)
        {
            condition = condition.field(InputValue::new(
                camel_case(&col.name),
                TypeRef::named(col.scalar.type_name()),
            ));
        }
        types.push(Type::InputObject(condition));

        query = query.field(make_list_field(
            format!("all{}", pascal_case(&pluralize(&table.name))),
            &type_name,
            &condition_name,
            &tcx,
        ));

        let pk = exposed.single_pk().cloned();
        if let Some(pk) = &pk {
            query = query.field(make_by_pk_field(
                format!("{}By{}", camel_case(&table.name), pascal_case(&pk.name)),
                &type_name,
                pk,
                &tcx,
            ));
        }

        // Mutations only exist for real tables.
        if exposed.kind == TableKind::Table {
            let input_name = format!("Create{type_name}Input");
            let mut input = InputObject::new(&input_name);
            for col in exposed
                .columns
                .iter()
                .filter(|c| c.scalar != ScalarKind::Json)
            {
                let type_ref = if col.nullable || col.has_default {
                    TypeRef::named(col.scalar.type_name())
                } else {
                    TypeRef::named_nn(col.scalar.type_name())
                };
                input = input.field(InputValue::new(camel_case(&col.name), type_ref));
            }
            types.push(Type::InputObject(input));

            mutation = mutation.field(make_create_field(
                format!("create{type_name}"),
                &type_name,
                &input_name,
                &tcx,
            ));
            has_mutations = true;

            if let Some(pk) = &pk {
                let patch_name = format!("{type_name}Patch");
                let mut patch = InputObject::new(&patch_name);
                for col in exposed
                    .columns
                    .iter()
                    .filter(|c| c.scalar != ScalarKind::Json)
                {
                    patch = patch.field(InputValue::new(
                        camel_case(&col.name),
                        TypeRef::named(col.scalar.type_name()),
                    ));
                }
                types.push(Type::InputObject(patch));

                let pk_pascal = pascal_case(&pk.name);
                mutation = mutation.field(make_update_field(
                    format!("update{type_name}By{pk_pascal}"),
                    &type_name,
                    &patch_name,
                    pk,
                    &tcx,
                ));
                mutation = mutation.field(make_delete_field(
                    format!("delete{type_name}By{pk_pascal}"),
                    &type_name,
                    pk,
                    &tcx,
                ));
            }
        }
    }

    let mut builder = if has_mutations {
        Schema::build("Query", Some("Mutation"), None)
            .register(query)
            .register(mutation)
    } else {
        Schema::build("Query", None, None).register(query)
    };

    builder = builder
        .register(Type::Scalar(
            Scalar::new("BigInt").description("64-bit integer, exposed for int8 columns."),
        ))
        .register(Type::Scalar(
            Scalar::new("JSON").description("Arbitrary JSON value."),
        ));
    for ty in types {
        builder = builder.register(ty);
    }

    builder
        .finish()
        .map_err(|e| GatewayError::Schema(e.to_string()))
}
