//! 示例 TLS 服务器：对任何请求都返回 `Hello, world!`

use anyhow::{Context, Result};
use http::StatusCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

use crate::identity::CertLayout;
use crate::server::{HttpConn, ResponseWriter};
use crate::tls;

pub const GREETING: &str = "Hello, world!";

pub async fn run_sample_server(port: u16, layout: &CertLayout) -> Result<()> {
    let tls_config = tls::sample_server_config(layout)?;

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to listen on port {}", port))?;
    info!("Sample server listening on {}", listener.local_addr()?);

    serve_sample(listener, TlsAcceptor::from(tls_config)).await
}

pub async fn serve_sample(listener: TcpListener, acceptor: TlsAcceptor) -> Result<()> {
    let acceptor = Arc::new(acceptor);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };

        let acceptor = Arc::clone(&acceptor);
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(tls_stream) => tls_stream,
                Err(e) => {
                    debug!("TLS handshake with {} failed: {}", peer, e);
                    return;
                }
            };

            let mut conn = HttpConn::new(tls_stream);
            let status = match conn.read_request().await {
                Ok(Some(request)) => {
                    info!("{} {} from {}", request.method, request.target, peer);
                    StatusCode::OK
                }
                Ok(None) => return,
                Err(_) => StatusCode::BAD_REQUEST,
            };

            let body = if status == StatusCode::OK {
                GREETING
            } else {
                "Bad Request"
            };
            if let Err(e) = conn.respond(status, body).await {
                debug!("Failed to respond to {}: {}", peer, e);
            }
        });
    }
}
