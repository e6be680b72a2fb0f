//! 示例客户端：经由代理隧道，以 HTTPS GET 方式获取一个 URL

use anyhow::{bail, Context, Result};
use http::StatusCode;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::{dial, establish, ProxyEndpoint};
use crate::identity::CertLayout;
use crate::tls;

/// 隧道内 HTTP 请求的结果
#[derive(Debug)]
pub struct SampleResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// 获取 `target_url` 并把响应体写到标准输出
pub async fn run_sample_client(proxy_url: &str, target_url: &str, layout: &CertLayout) -> Result<()> {
    let response = fetch(proxy_url, target_url, layout).await?;
    if !response.status.is_success() {
        warn!("{} answered {}", target_url, response.status);
    }

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&response.body).await?;
    stdout.flush().await?;
    Ok(())
}

/// 通过代理建立到目标的隧道，在隧道内完成 TLS 握手并发送 GET 请求
pub async fn fetch(proxy_url: &str, target_url: &str, layout: &CertLayout) -> Result<SampleResponse> {
    let url = Url::parse(target_url).with_context(|| format!("Invalid URL {:?}", target_url))?;
    if url.scheme() != "https" {
        bail!("Unsupported URL scheme {:?}, expected https", url.scheme());
    }
    let host = url
        .host_str()
        .with_context(|| format!("URL {:?} has no host", target_url))?;

    // 目标的拨号地址与 TLS 名称，解析规则与代理 URL 相同
    let target = ProxyEndpoint::parse(target_url)?;
    let destination = format!("{}:{}", host, target.port);

    let proxy = ProxyEndpoint::parse(proxy_url)?;
    let stream = dial(&proxy, tls::client_tunnel_config(layout)?).await?;
    let (tunnel, early) = establish(stream, &destination).await?;
    if !early.is_empty() {
        bail!(
            "{} sent {} bytes before the TLS handshake",
            destination,
            early.len()
        );
    }
    debug!("Tunnel to {} via {}:{} established", destination, proxy.host, proxy.port);

    let inner = TlsConnector::from(tls::sample_client_config(layout)?)
        .connect(target.server_name.clone(), tunnel)
        .await
        .with_context(|| format!("TLS handshake with {} failed", destination))?;

    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }

    let mut reader = BufReader::new(inner);
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host
    );
    reader.get_mut().write_all(request.as_bytes()).await?;
    reader.get_mut().flush().await?;

    let response = read_response(&mut reader).await?;
    info!("GET {} -> {}", target_url, response.status);
    Ok(response)
}

/// 读取状态行与响应头；有 Content-Length 时按长度读取响应体，否则读到 EOF
async fn read_response<R>(reader: &mut R) -> Result<SampleResponse>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).await?;
    let status_line = String::from_utf8_lossy(&line).trim_end().to_string();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| StatusCode::from_bytes(code.as_bytes()).ok())
        .with_context(|| format!("Malformed status line {:?}", status_line))?;

    let mut content_length = None;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            bail!("Connection closed before end of response headers");
        }
        if line == b"\r\n" || line == b"\n" {
            break;
        }
        let header = String::from_utf8_lossy(&line);
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = Some(
                    value
                        .trim()
                        .parse::<usize>()
                        .with_context(|| format!("Invalid Content-Length {:?}", value.trim()))?,
                );
            }
        }
    }

    let mut body = Vec::new();
    match content_length {
        Some(len) => {
            body.resize(len, 0);
            reader.read_exact(&mut body).await?;
        }
        None => {
            reader.read_to_end(&mut body).await?;
        }
    }

    Ok(SampleResponse { status, body })
}
