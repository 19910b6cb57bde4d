//! Tablegate - HTTPS GraphQL gateway over a PostgreSQL schema.
//!
//! The server introspects a target schema at startup, generates a GraphQL
//! API from its tables with [`async_graphql::dynamic`], and serves it over
//! HTTPS behind a permissive CORS layer. Requests carry an optional JWT
//! whose `role` claim selects the database role for the generated SQL.

pub mod config;
pub mod error;
pub mod gateway;
pub mod request_id;
pub mod routes;
pub mod state;
pub mod tls;

pub use routes::router;
pub use state::AppState;
