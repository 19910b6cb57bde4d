//! TLS context construction and HTTPS serving.
//!
//! Certificate and key loading is startup-fatal: the caller aborts before
//! the listener binds when either file is missing or the pair is invalid.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Errors raised while building the TLS context.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("cannot open '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid certificate chain: {0}")]
    Chain(std::io::Error),

    #[error("no certificates found in chain file")]
    EmptyChain,

    #[error("invalid private key: {0}")]
    Key(std::io::Error),

    #[error("no private key found in key file")]
    MissingKey,

    #[error("TLS configuration rejected: {0}")]
    Config(#[from] rustls::Error),
}

/// Loads the certificate chain and private key from PEM files into a
/// rustls server configuration.
pub fn load_tls_config(chain_path: &str, key_path: &str) -> Result<ServerConfig, TlsError> {
    // Install ring as the default crypto provider (idempotent).
    let _ = rustls::crypto::ring::default_provider().install_default();

    let open = |path: &str| {
        File::open(path).map_err(|source| TlsError::Open {
            path: path.to_string(),
            source,
        })
    };

    let chain_file = open(chain_path)?;
    let key_file = open(key_path)?;

    let chain: Vec<_> = certs(&mut BufReader::new(chain_file))
        .collect::<Result<_, _>>()
        .map_err(TlsError::Chain)?;
    if chain.is_empty() {
        return Err(TlsError::EmptyChain);
    }

    let key = private_key(&mut BufReader::new(key_file))
        .map_err(TlsError::Key)?
        .ok_or(TlsError::MissingKey)?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(TlsError::Config)
}

/// Serves the application over TLS until the shutdown future resolves.
pub async fn serve_tls(
    listener: TcpListener,
    config: ServerConfig,
    app: Router,
    shutdown: impl std::future::Future<Output = ()>,
) {
    let acceptor = TlsAcceptor::from(Arc::new(config));
    let mut shutdown = std::pin::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (tcp, addr) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("TCP accept error: {e}");
                        continue;
                    }
                };

                let acceptor = acceptor.clone();
                let app = app.clone();

                tokio::spawn(async move {
                    let tls = match acceptor.accept(tcp).await {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::debug!(%addr, "TLS handshake failed: {e}");
                            return;
                        }
                    };

                    let io = TokioIo::new(tls);
                    let svc = app.into_service();
                    let hyper_svc = hyper::service::service_fn(
                        move |req: hyper::Request<hyper::body::Incoming>| {
                            let mut svc = svc.clone();
                            async move { tower::Service::call(&mut svc, req).await }
                        },
                    );

                    if let Err(e) = Builder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(io, hyper_svc)
                        .await
                    {
                        tracing::debug!(%addr, "connection error: {e}");
                    }
                });
            }
            () = &mut shutdown => {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_key_file_fails() {
        let err = load_tls_config("/does/not/exist.pem", "/does/not/exist.key").unwrap_err();
        assert!(matches!(err, TlsError::Open { .. }));
    }

    #[test]
    fn chain_without_certificates_fails() {
        let mut chain = tempfile::NamedTempFile::new().unwrap();
        writeln!(chain, "not a certificate").unwrap();
        let key = tempfile::NamedTempFile::new().unwrap();

        let err = load_tls_config(
            chain.path().to_str().unwrap(),
            key.path().to_str().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, TlsError::EmptyChain));
    }
}
