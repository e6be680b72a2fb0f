/// CONNECT 客户端（corkscrew）
///
/// 通过 TLS 连接代理，发送 CONNECT 请求，然后把本地标准输入/输出接到隧道上。
/// 典型用法是作为 ssh 的 ProxyCommand。
use crate::error::{Result, TunnelError};
use crate::identity::CertLayout;
use crate::relay::{relay, StdioStream, TunnelStats};
use crate::tls;
use rustls::pki_types::ServerName;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};
use url::{Host, Url};

/// 代理接受 CONNECT 时唯一可接受的状态行
const ESTABLISHED_STATUS_LINE: &str = "HTTP/1.1 200 OK\r\n";

/// 从代理 URL 解析出的拨号目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    /// TCP 拨号使用的主机（IPv6 不带方括号）
    pub host: String,
    pub port: u16,
    pub server_name: ServerName<'static>,
}

impl ProxyEndpoint {
    /// 解析 `https://proxy.example:8443` 形式的 URL
    pub fn parse(proxy_url: &str) -> Result<Self> {
        let url = Url::parse(proxy_url)
            .map_err(|e| TunnelError::config_error(format!("Invalid proxy URL {:?}: {}", proxy_url, e)))?;

        let port = url.port_or_known_default().ok_or_else(|| {
            TunnelError::config_error(format!("Proxy URL {:?} has no port", proxy_url))
        })?;

        let (host, server_name) = match url.host() {
            Some(Host::Domain(domain)) => {
                let server_name = ServerName::try_from(domain.to_string()).map_err(|e| {
                    TunnelError::config_error(format!("Invalid proxy host {:?}: {}", domain, e))
                })?;
                (domain.to_string(), server_name)
            }
            Some(Host::Ipv4(ip)) => (ip.to_string(), ServerName::from(IpAddr::V4(ip))),
            Some(Host::Ipv6(ip)) => (ip.to_string(), ServerName::from(IpAddr::V6(ip))),
            None => {
                return Err(TunnelError::config_error(format!(
                    "Proxy URL {:?} has no host",
                    proxy_url
                )))
            }
        };

        Ok(Self {
            host,
            port,
            server_name,
        })
    }
}

/// TCP 连接代理并完成 TLS 握手（校验代理证书，出示客户端证书）
pub async fn dial(
    endpoint: &ProxyEndpoint,
    config: Arc<rustls::ClientConfig>,
) -> Result<TlsStream<TcpStream>> {
    let addr = format!("{}:{}", endpoint.host, endpoint.port);
    let tcp_stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|e| TunnelError::connection_failed(&addr, e))?;

    debug!("Connected to proxy {}", addr);

    let tls_stream = TlsConnector::from(config)
        .connect(endpoint.server_name.clone(), tcp_stream)
        .await
        .map_err(|e| TunnelError::protocol(format!("TLS handshake with {} failed: {}", addr, e)))?;

    debug!("TLS handshake with {} completed", addr);
    Ok(tls_stream)
}

/// 在已建立的连接上发送 CONNECT 请求并等待代理确认
///
/// 返回连接本身以及响应头之后已被预读的字节（属于隧道数据）。
pub async fn establish<S>(stream: S, destination: &str) -> Result<(S, Vec<u8>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);

    let request = format!("CONNECT {} HTTP/1.1\r\n\r\n", destination);
    reader.get_mut().write_all(request.as_bytes()).await?;
    reader.get_mut().flush().await?;

    // 按字节读取，非 UTF-8 的状态行同样视为协议错误
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).await?;
    if line != ESTABLISHED_STATUS_LINE.as_bytes() {
        return Err(TunnelError::protocol(format!(
            "unexpected response {:?}",
            String::from_utf8_lossy(&line)
        )));
    }

    // 丢弃其余响应头，直到空行
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Err(TunnelError::protocol(
                "connection closed before end of response headers",
            ));
        }
        if line == b"\r\n" {
            break;
        }
    }

    let buffered = reader.buffer().to_vec();
    Ok((reader.into_inner(), buffered))
}

/// corkscrew：建立到 `destination` 的隧道并把标准输入/输出接上去
pub async fn run_corkscrew(
    proxy_url: &str,
    destination: &str,
    layout: &CertLayout,
) -> Result<TunnelStats> {
    let endpoint = ProxyEndpoint::parse(proxy_url)?;
    let config = tls::client_tunnel_config(layout)?;

    let tls_stream = dial(&endpoint, config).await?;
    let (tls_stream, early) = establish(tls_stream, destination).await?;

    info!(
        "Tunnel to {} via {}:{} established",
        destination, endpoint.host, endpoint.port
    );

    let mut stdio = StdioStream::new();
    if !early.is_empty() {
        stdio.write_stdout(&early).await?;
    }

    let mut stats = relay(tls_stream, stdio).await;
    stats.a_to_b += early.len() as u64;

    info!(
        "Tunnel to {} closed (sent {} bytes, received {} bytes)",
        destination, stats.b_to_a, stats.a_to_b
    );
    Ok(stats)
}
