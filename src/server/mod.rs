pub mod access_log;
pub mod handler;
pub mod http;

pub use access_log::{init_local_offset, AccessLog};
pub use handler::{ConnectHandler, Handler, ProxySettings, RequestContext, TunnelTarget};
pub use self::http::{HttpConn, RequestHead, ResponseWriter};

use crate::config::ProxyConfig;
use crate::identity;
use ::http::StatusCode;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{rustls, TlsAcceptor};
use tracing::{debug, error, info, warn};

/// 运行代理服务器，直到收到 Ctrl+C
pub async fn run_server(config: &ProxyConfig, tls_config: Arc<rustls::ServerConfig>) -> Result<()> {
    let settings = config.settings()?;

    let listener = TcpListener::bind(("0.0.0.0", config.listen_port))
        .await
        .with_context(|| format!("Failed to listen on port {}", config.listen_port))?;

    info!(
        "Proxy listening on {} (hostname {}, allowed ports {})",
        listener.local_addr()?,
        settings.hostname,
        settings.allowed_ports
    );
    info!("Waiting for client connections... (Press Ctrl+C to stop)");

    let handler = Arc::new(AccessLog::new(ConnectHandler::new(settings)));
    serve(listener, TlsAcceptor::from(tls_config), handler).await
}

/// 在已绑定的监听器上接受 TLS 连接，每个连接一个任务
pub async fn serve<H>(listener: TcpListener, acceptor: TlsAcceptor, handler: Arc<H>) -> Result<()>
where
    H: Handler + 'static,
{
    // 设置 Ctrl+C 处理
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        debug!("Accepted connection from {}", peer);

                        let acceptor = acceptor.clone();
                        let handler = Arc::clone(&handler);

                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, acceptor, handler).await {
                                warn!("Connection from {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Received shutdown signal, stopping proxy...");
                break;
            }
        }
    }

    info!("Proxy stopped");
    Ok(())
}

/// 单个连接：TLS 握手（校验客户端证书），读取请求头，交给处理器
async fn handle_connection<H: Handler>(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    handler: Arc<H>,
) -> Result<()> {
    let tls_stream = acceptor
        .accept(stream)
        .await
        .context("TLS handshake failed")?;

    let peer_common_name = tls_stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .and_then(|cert| identity::common_name(cert));

    debug!(
        "TLS session with {} established (client {})",
        peer,
        peer_common_name.as_deref().unwrap_or("-")
    );

    let ctx = RequestContext {
        remote_addr: Some(peer),
        peer_common_name,
    };

    let mut conn = HttpConn::new(tls_stream);
    match conn.read_request().await {
        Ok(Some(request)) => handler.serve(&ctx, &request, conn).await,
        Ok(None) => debug!("{} closed the connection without a request", peer),
        Err(e) => {
            debug!("Malformed request from {}: {}", peer, e);
            conn.respond(StatusCode::BAD_REQUEST, "Bad Request")
                .await
                .ok();
        }
    }

    Ok(())
}
