//! The GraphQL gateway: schema introspection, dynamic schema generation,
//! per-request role switching, and live schema reload.

pub mod catalog;
pub mod jwt;
pub mod schema;
pub mod sql;

use std::sync::Arc;

use async_graphql::dynamic::Schema;
use parking_lot::RwLock;
use sqlx::PgPool;
use sqlx::postgres::PgRow;

pub use catalog::Catalog;
pub use jwt::{AuthError, AuthSession, authenticate};

use self::sql::BindValue;

/// Gateway behavior options, assembled from configuration at startup.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Target schema name.
    pub schema: String,
    /// Serve the interactive explorer on GET /graphql.
    pub graphiql: bool,
    /// Poll for DDL changes and hot-swap the generated schema.
    pub watch: bool,
    /// HS256 secret for verifying JWTs. `None` disables verification.
    pub jwt_secret: Option<String>,
    /// Schema-qualified composite type returned by in-database token-minting
    /// functions (informational; verification uses the secret alone).
    pub jwt_type: Option<String>,
    /// Role assumed for requests without a verified token.
    pub default_role: Option<String>,
}

impl GatewayOptions {
    /// Options with everything but the schema name disabled or unset.
    pub fn default_for(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            graphiql: true,
            watch: false,
            jwt_secret: None,
            jwt_type: None,
            default_role: None,
        }
    }
}

/// Errors raised while introspecting or generating the schema.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema generation failed: {0}")]
    Schema(String),
}

struct Inner {
    pool: PgPool,
    options: Arc<GatewayOptions>,
    schema: RwLock<Schema>,
    catalog: RwLock<Catalog>,
}

/// Shared gateway handle, cloneable across handlers and the watcher task.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    /// Introspects the target schema and builds the initial GraphQL schema.
    pub async fn connect(pool: PgPool, options: GatewayOptions) -> Result<Self, GatewayError> {
        let catalog = Catalog::load(&pool, &options.schema).await?;
        tracing::info!(
            schema = %options.schema,
            tables = catalog.tables.len(),
            "introspected target schema"
        );
        Self::with_catalog(pool, catalog, options)
    }

    /// Builds a gateway over an already-loaded catalog snapshot.
    pub fn with_catalog(
        pool: PgPool,
        catalog: Catalog,
        options: GatewayOptions,
    ) -> Result<Self, GatewayError> {
        let options = Arc::new(options);
        let schema = schema::build_schema(&pool, &catalog, &options)?;
        Ok(Self {
            inner: Arc::new(Inner {
                pool,
                options,
                schema: RwLock::new(schema),
                catalog: RwLock::new(catalog),
            }),
        })
    }

    /// Returns the current executable schema (cheap clone).
    pub fn schema(&self) -> Schema {
        self.inner.schema.read().clone()
    }

    /// Returns the gateway options.
    pub fn options(&self) -> &GatewayOptions {
        &self.inner.options
    }

    /// Number of tables currently exposed.
    pub fn table_count(&self) -> usize {
        self.inner.catalog.read().tables.len()
    }

    /// Re-introspects the target schema and swaps in a freshly generated
    /// GraphQL schema when the catalog changed. Returns true on a swap.
    pub async fn reload(&self) -> Result<bool, GatewayError> {
        let fresh = Catalog::load(&self.inner.pool, &self.inner.options.schema).await?;
        if fresh.fingerprint() == self.inner.catalog.read().fingerprint() {
            return Ok(false);
        }

        let schema = schema::build_schema(&self.inner.pool, &fresh, &self.inner.options)?;
        tracing::info!(
            schema = %self.inner.options.schema,
            tables = fresh.tables.len(),
            "schema changed, regenerated GraphQL API"
        );
        *self.inner.schema.write() = schema;
        *self.inner.catalog.write() = fresh;
        Ok(true)
    }
}

/// Runs a generated statement inside a transaction carrying the request's
/// role and claims, so row-level security and column grants apply.
pub(crate) async fn execute_rows(
    pool: &PgPool,
    auth: &AuthSession,
    stmt: &str,
    binds: Vec<BindValue>,
) -> Result<Vec<PgRow>, GatewayError> {
    let mut tx = pool.begin().await?;

    if let Some(role) = &auth.role {
        let set_role = format!("SET LOCAL ROLE {}", sql::quote_ident(role));
        sqlx::query(&set_role).execute(&mut *tx).await?;
    }
    if let Some(claims) = &auth.claims {
        sqlx::query("SELECT set_config('jwt.claims', $1, true)")
            .bind(claims.to_string())
            .execute(&mut *tx)
            .await?;
    }

    let rows = sql::apply_binds(stmt, binds).fetch_all(&mut *tx).await?;
    tx.commit().await?;
    Ok(rows)
}
