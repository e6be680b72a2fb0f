//! 最小化的 HTTP/1.1 请求头解析与响应写入
//!
//! 只服务于 CONNECT：读取请求行和请求头，然后要么写出一个错误响应，
//! 要么把底层连接（连同已预读的字节）整体交出去。

use crate::limited_reader::LimitedReader;
use crate::relay::IntoHalves;
use async_trait::async_trait;
use http::{Method, StatusCode};
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// CONNECT 成功时写回客户端的响应
pub const TUNNEL_ESTABLISHED: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// 已解析的请求头
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// 请求目标；CONNECT 为 `host:port`
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// 解析请求行，例如 `CONNECT example.com:22 HTTP/1.1`
    pub fn parse_request_line(line: &str) -> io::Result<Self> {
        let mut parts = line.split_whitespace();
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid_data(format!("malformed request line {:?}", line)));
        };

        if !version.starts_with("HTTP/1.") {
            return Err(invalid_data(format!("unsupported protocol {:?}", version)));
        }

        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| invalid_data(format!("invalid method {:?}", method)))?;

        Ok(Self {
            method,
            target: target.to_string(),
            version: version.to_string(),
            headers: Vec::new(),
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// 接管后的原始连接以及 HTTP 层已预读但尚未消费的字节
pub struct Hijacked<S> {
    pub stream: S,
    pub buffered: Vec<u8>,
}

/// 接管失败时把写入器交还，调用者仍可写出错误响应
pub struct HijackRejected<W> {
    pub writer: W,
    pub reason: String,
}

/// 响应写入器
///
/// `respond` 与 `hijack` 都会消费写入器：一个请求要么得到普通响应，
/// 要么交出底层连接，二者不会同时发生。
#[async_trait]
pub trait ResponseWriter: Send + Sized {
    type Stream: IntoHalves + AsyncRead + AsyncWrite + Unpin + Send;

    /// 是否支持接管底层连接
    fn can_hijack(&self) -> bool;

    /// 写出带纯文本响应体的响应并关闭连接
    async fn respond(self, status: StatusCode, body: &str) -> io::Result<()>;

    /// 接管底层连接
    fn hijack(self) -> Result<Hijacked<Self::Stream>, HijackRejected<Self>>;
}

/// 单个入站连接上的 HTTP/1.1 会话
pub struct HttpConn<S> {
    reader: BufReader<LimitedReader<S>>,
}

impl<S> HttpConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(LimitedReader::with_header_limit(stream)),
        }
    }

    /// 读取请求头；连接在发送任何字节前关闭时返回 `None`
    pub async fn read_request(&mut self) -> io::Result<Option<RequestHead>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }

        let mut head = RequestHead::parse_request_line(line.trim_end())?;

        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before end of request headers",
                ));
            }

            let header = line.trim_end_matches(['\r', '\n']);
            if header.is_empty() {
                break;
            }

            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| invalid_data(format!("malformed header line {:?}", header)))?;
            head.headers
                .push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Some(head))
    }

    fn stream_mut(&mut self) -> &mut S {
        self.reader.get_mut().get_mut()
    }
}

#[async_trait]
impl<S> ResponseWriter for HttpConn<S>
where
    S: IntoHalves + AsyncRead + AsyncWrite + Unpin + Send,
{
    type Stream = S;

    fn can_hijack(&self) -> bool {
        true
    }

    async fn respond(mut self, status: StatusCode, body: &str) -> io::Result<()> {
        let response = error_response(status, body);
        let stream = self.stream_mut();
        stream.write_all(&response).await?;
        stream.flush().await?;
        stream.shutdown().await
    }

    fn hijack(self) -> Result<Hijacked<S>, HijackRejected<Self>> {
        let buffered = self.reader.buffer().to_vec();
        let stream = self.reader.into_inner().into_inner();
        Ok(Hijacked { stream, buffered })
    }
}

/// 错误响应的响应体：描述文本加换行
pub fn text_body(description: &str) -> String {
    format!("{}\n", description)
}

/// 纯文本错误响应
pub fn error_response(status: StatusCode, description: &str) -> Vec<u8> {
    let body = text_body(description);
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         X-Content-Type-Options: nosniff\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        body.len(),
        body
    )
    .into_bytes()
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
