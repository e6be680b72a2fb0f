use super::http::{Hijacked, RequestHead, ResponseWriter, TUNNEL_ESTABLISHED};
use crate::config::AllowedPorts;
use crate::error::ConnectError;
use crate::relay::relay;
use async_trait::async_trait;
use http::Method;
use std::fmt;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// 单个请求的连接上下文
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub remote_addr: Option<SocketAddr>,
    /// 对端客户端证书的 Common Name
    pub peer_common_name: Option<String>,
}

/// 请求处理器
///
/// 处理器要么通过写入器返回响应，要么接管连接；返回即表示请求处理完毕。
#[async_trait]
pub trait Handler: Send + Sync {
    async fn serve<W>(&self, ctx: &RequestContext, request: &RequestHead, writer: W)
    where
        W: ResponseWriter + 'static;
}

/// 代理的不可变策略：本机主机名与允许的目标端口
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub hostname: String,
    pub allowed_ports: AllowedPorts,
}

/// 通过校验的隧道目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for TunnelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// CONNECT 请求处理器
pub struct ConnectHandler {
    settings: ProxySettings,
}

impl ConnectHandler {
    pub fn new(settings: ProxySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// 校验方法、目标主机与端口
    pub fn authorize(&self, method: &Method, target: &str) -> Result<TunnelTarget, ConnectError> {
        if method != Method::CONNECT {
            return Err(ConnectError::MethodNotAllowed);
        }

        let (host, port) = split_host_port(target);
        if host != self.settings.hostname {
            return Err(ConnectError::ForbiddenHost(host.to_string()));
        }

        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|source| ConnectError::InvalidPort {
                port: port.to_string(),
                source,
            })?;

        if !self.settings.allowed_ports.contains(port) {
            return Err(ConnectError::ForbiddenPort(port));
        }

        Ok(TunnelTarget {
            host: host.to_string(),
            port,
        })
    }
}

#[async_trait]
impl Handler for ConnectHandler {
    async fn serve<W>(&self, ctx: &RequestContext, request: &RequestHead, writer: W)
    where
        W: ResponseWriter + 'static,
    {
        if !writer.can_hijack() {
            reject(writer, ConnectError::NotHijackable).await;
            return;
        }

        let target = match self.authorize(&request.method, &request.target) {
            Ok(target) => target,
            Err(e) => {
                info!(
                    "Rejected {} {} from {}: {}",
                    request.method,
                    request.target,
                    peer(ctx),
                    e
                );
                reject(writer, e).await;
                return;
            }
        };

        let addr = target.to_string();
        let mut upstream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(source) => {
                warn!("Failed to connect to {}: {}", addr, source);
                reject(writer, ConnectError::Dial { addr, source }).await;
                return;
            }
        };

        let Hijacked {
            stream: mut client,
            buffered,
        } = match writer.hijack() {
            Ok(hijacked) => hijacked,
            Err(rejected) => {
                reject(rejected.writer, ConnectError::Hijack(rejected.reason)).await;
                return;
            }
        };

        // 此后 HTTP 响应通道已不存在，错误只能记录日志
        if let Err(e) = write_established(&mut client).await {
            warn!("Failed to confirm tunnel to {}: {}", peer(ctx), e);
            return;
        }

        // 请求头之后已被预读的字节属于隧道数据，必须先转发
        if !buffered.is_empty() {
            debug!("Forwarding {} pre-buffered bytes to {}", buffered.len(), addr);
            if let Err(e) = upstream.write_all(&buffered).await {
                warn!("Failed to forward buffered bytes to {}: {}", addr, e);
                return;
            }
        }

        info!("Tunnel established: {} <-> {}", peer(ctx), addr);

        let stats = relay(client, upstream).await;

        info!(
            "Tunnel closed: {} <-> {} (sent {} bytes, received {} bytes)",
            peer(ctx),
            addr,
            stats.a_to_b,
            stats.b_to_a
        );
    }
}

async fn write_established<S>(stream: &mut S) -> std::io::Result<()>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    stream.write_all(TUNNEL_ESTABLISHED).await?;
    stream.flush().await
}

async fn reject<W: ResponseWriter>(writer: W, err: ConnectError) {
    if let Err(e) = writer.respond(err.status(), &err.to_string()).await {
        debug!("Failed to write {} response: {}", err.status(), e);
    }
}

fn peer(ctx: &RequestContext) -> String {
    ctx.remote_addr
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// 拆分 `host:port`，支持 `[v6]:port`
fn split_host_port(authority: &str) -> (&str, &str) {
    if let Some(rest) = authority.strip_prefix('[') {
        if let Some((host, after)) = rest.split_once(']') {
            return (host, after.strip_prefix(':').unwrap_or(""));
        }
    }

    authority.rsplit_once(':').unwrap_or((authority, ""))
}
