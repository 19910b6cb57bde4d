//! Server configuration via CLI args and environment variables.

use clap::Parser;
use sqlx::postgres::PgConnectOptions;

use crate::gateway::GatewayOptions;

/// HTTPS GraphQL gateway over a PostgreSQL schema.
#[derive(Parser, Debug, Clone)]
#[command(name = "tablegate", version, about)]
pub struct Config {
    /// Bind address.
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Bind port.
    #[arg(long, default_value_t = 5443, env = "PORT")]
    pub port: u16,

    /// TLS private key in PEM format. HTTPS is enabled when both TLS paths are set.
    #[arg(long, env = "SSL_KEY_PATH")]
    pub ssl_key_path: Option<String>,

    /// TLS certificate chain in PEM format.
    #[arg(long, env = "SSL_CHAIN_PATH")]
    pub ssl_chain_path: Option<String>,

    /// Database user.
    #[arg(long, env = "POSTGRES_USERNAME")]
    pub postgres_username: String,

    /// Database password.
    #[arg(long, env = "POSTGRES_PASSWORD")]
    pub postgres_password: Option<String>,

    /// Database host.
    #[arg(long, default_value = "localhost", env = "POSTGRES_HOST")]
    pub postgres_host: String,

    /// Database port.
    #[arg(long, default_value_t = 5432, env = "POSTGRES_PORT")]
    pub postgres_port: u16,

    /// Database name.
    #[arg(long, env = "POSTGRES_DATABASE")]
    pub postgres_database: String,

    /// Maximum connections held by the pool.
    #[arg(long, default_value_t = 10, env = "POSTGRES_POOL_SIZE")]
    pub pool_size: u32,

    /// Schema exposed through the generated GraphQL API.
    #[arg(long, default_value = "public", env = "POSTGRAPHILE_SCHEMA")]
    pub schema: String,

    /// HS256 secret for verifying JWTs. Unset disables token verification.
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Name of the composite type (within the target schema) that in-database
    /// token-minting functions return.
    #[arg(long, default_value = "jwt", env = "JWT_TYPE")]
    pub jwt_type: String,

    /// Database role assumed for requests without a verified token.
    #[arg(long, env = "POSTGRAPHILE_DEFAULT_ROLE")]
    pub default_role: Option<String>,

    /// Serve the GraphiQL explorer on GET /graphql.
    #[arg(long, default_value_t = true, env = "GRAPHIQL", action = clap::ArgAction::Set)]
    pub graphiql: bool,

    /// Re-introspect the schema periodically and hot-swap the API on change.
    #[arg(long, default_value_t = true, env = "SCHEMA_WATCH", action = clap::ArgAction::Set)]
    pub schema_watch: bool,

    /// Seconds between schema watch polls.
    #[arg(long, default_value_t = 15, env = "SCHEMA_WATCH_INTERVAL")]
    pub schema_watch_interval: u64,

    /// Deployment environment. "development" includes error detail in responses.
    #[arg(long, default_value = "production", env = "ENVIRONMENT")]
    pub environment: String,

    /// Log level.
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Log format: "text" or "json".
    #[arg(long, default_value = "text", env = "LOG_FORMAT")]
    pub log_format: String,
}

impl Config {
    /// Parses configuration from CLI args and env vars.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Returns true when both TLS paths are configured.
    pub fn tls_enabled(&self) -> bool {
        self.ssl_key_path.is_some() && self.ssl_chain_path.is_some()
    }

    /// Builds Postgres connection options from the individual settings.
    pub fn pg_connect_options(&self) -> PgConnectOptions {
        let mut opts = PgConnectOptions::new()
            .host(&self.postgres_host)
            .port(self.postgres_port)
            .username(&self.postgres_username)
            .database(&self.postgres_database);
        if let Some(password) = &self.postgres_password {
            opts = opts.password(password);
        }
        opts
    }

    /// Builds the gateway options from the schema and auth settings.
    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            schema: self.schema.clone(),
            graphiql: self.graphiql,
            watch: self.schema_watch,
            jwt_secret: self.jwt_secret.clone(),
            jwt_type: Some(format!("{}.{}", self.schema, self.jwt_type)),
            default_role: self.default_role.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::try_parse_from([
            "tablegate",
            "--postgres-username",
            "app",
            "--postgres-database",
            "appdb",
        ])
        .unwrap()
    }

    #[test]
    fn tls_requires_both_paths() {
        let mut config = base_config();
        assert!(!config.tls_enabled());
        config.ssl_key_path = Some("/etc/tls/key.pem".into());
        assert!(!config.tls_enabled());
        config.ssl_chain_path = Some("/etc/tls/chain.pem".into());
        assert!(config.tls_enabled());
    }

    #[test]
    fn connect_options_carry_credentials() {
        let mut config = base_config();
        config.postgres_host = "db.internal".into();
        config.postgres_port = 5433;
        let opts = config.pg_connect_options();
        assert_eq!(opts.get_host(), "db.internal");
        assert_eq!(opts.get_port(), 5433);
        assert_eq!(opts.get_username(), "app");
        assert_eq!(opts.get_database(), Some("appdb"));
    }

    #[test]
    fn gateway_options_carry_watch_and_graphiql_flags() {
        let mut config = base_config();
        config.schema_watch = false;
        config.graphiql = false;
        let options = config.gateway_options();
        assert!(!options.watch);
        assert!(!options.graphiql);
    }

    #[test]
    fn jwt_type_is_schema_qualified() {
        let mut config = base_config();
        config.schema = "app_public".into();
        let options = config.gateway_options();
        assert_eq!(options.jwt_type.as_deref(), Some("app_public.jwt"));
    }
}
