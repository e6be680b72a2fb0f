/// 访问日志
///
/// 包装任意 `Handler`，在请求处理结束后按 Apache Common Log Format 输出一行：
/// `ip:port - cn [02/Jan/2006 03:04:05] "CONNECT host:22 HTTP/1.1" 200 0`
use super::handler::{Handler, RequestContext};
use super::http::{text_body, HijackRejected, Hijacked, RequestHead, ResponseWriter};
use async_trait::async_trait;
use http::StatusCode;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing::info;

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[day]/[month repr:short]/[year] [hour repr:12]:[minute]:[second]");

/// 访问日志装饰器
pub struct AccessLog<H> {
    inner: H,
}

impl<H> AccessLog<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<H: Handler> Handler for AccessLog<H> {
    async fn serve<W>(&self, ctx: &RequestContext, request: &RequestHead, writer: W)
    where
        W: ResponseWriter + 'static,
    {
        let started = local_now();
        let (writer, outcome) = RecordingWriter::new(writer);

        self.inner.serve(ctx, request, writer).await;

        let entry = AccessEntry {
            remote: ctx.remote_addr,
            common_name: ctx.peer_common_name.as_deref(),
            time: started,
            request,
            status: outcome.status(),
            bytes: outcome.bytes(),
        };
        info!(target: "access", "{}", entry);
    }
}

static LOCAL_OFFSET: OnceLock<UtcOffset> = OnceLock::new();

/// 记录本地时区偏移；须在运行时启动其他线程之前调用，否则退回 UTC
pub fn init_local_offset() -> UtcOffset {
    *LOCAL_OFFSET.get_or_init(|| UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
}

fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(init_local_offset())
}

/// 写入器观察到的响应结果
#[derive(Debug, Default)]
pub struct Outcome {
    status: AtomicU16,
    bytes: AtomicU64,
}

impl Outcome {
    /// 未写出响应（连接被接管）时视为 200
    pub fn status(&self) -> u16 {
        match self.status.load(Ordering::Relaxed) {
            0 => StatusCode::OK.as_u16(),
            status => status,
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// 记录状态码与响应体字节数的写入器
pub struct RecordingWriter<W> {
    inner: W,
    outcome: Arc<Outcome>,
}

impl<W> RecordingWriter<W> {
    pub fn new(inner: W) -> (Self, Arc<Outcome>) {
        let outcome = Arc::new(Outcome::default());
        (
            Self {
                inner,
                outcome: outcome.clone(),
            },
            outcome,
        )
    }
}

#[async_trait]
impl<W: ResponseWriter> ResponseWriter for RecordingWriter<W> {
    type Stream = W::Stream;

    fn can_hijack(&self) -> bool {
        self.inner.can_hijack()
    }

    async fn respond(self, status: StatusCode, body: &str) -> io::Result<()> {
        self.outcome.status.store(status.as_u16(), Ordering::Relaxed);
        self.inner.respond(status, body).await?;
        self.outcome
            .bytes
            .store(text_body(body).len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn hijack(self) -> Result<Hijacked<W::Stream>, HijackRejected<Self>> {
        let outcome = self.outcome;
        self.inner.hijack().map_err(|rejected| HijackRejected {
            writer: RecordingWriter {
                inner: rejected.writer,
                outcome,
            },
            reason: rejected.reason,
        })
    }
}

/// 一行访问日志
pub struct AccessEntry<'a> {
    pub remote: Option<SocketAddr>,
    pub common_name: Option<&'a str>,
    pub time: OffsetDateTime,
    pub request: &'a RequestHead,
    pub status: u16,
    pub bytes: u64,
}

impl fmt::Display for AccessEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = self
            .time
            .format(TIMESTAMP_FORMAT)
            .unwrap_or_else(|_| "-".to_string());

        let remote = self
            .remote
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "-".to_string());

        write!(
            f,
            "{} - {} [{}] \"{} {} {}\" {} {}",
            remote,
            self.common_name.unwrap_or("-"),
            time,
            self.request.method,
            self.request.target,
            self.request.version,
            self.status,
            self.bytes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::http::HttpConn;
    use time::macros::datetime;
    use tokio::io::{duplex, AsyncReadExt};

    fn request() -> RequestHead {
        RequestHead::parse_request_line("CONNECT host.example:22 HTTP/1.1").unwrap()
    }

    #[test]
    fn test_common_log_line() {
        let request = request();
        let entry = AccessEntry {
            remote: Some("10.0.0.7:52100".parse().unwrap()),
            common_name: Some("client"),
            time: datetime!(2024-03-09 15:04:05 UTC),
            request: &request,
            status: 403,
            bytes: 10,
        };
        assert_eq!(
            entry.to_string(),
            "10.0.0.7:52100 - client [09/Mar/2024 03:04:05] \"CONNECT host.example:22 HTTP/1.1\" 403 10"
        );
    }

    #[test]
    fn test_missing_fields_render_as_dash() {
        let request = request();
        let entry = AccessEntry {
            remote: None,
            common_name: None,
            time: datetime!(2024-12-25 00:30:00 UTC),
            request: &request,
            status: 200,
            bytes: 0,
        };
        assert!(entry.to_string().starts_with("- - - [25/Dec/2024 12:30:00]"));
    }

    #[tokio::test]
    async fn test_recording_writer_counts_body() {
        let (mut client, server) = duplex(1024);
        let (writer, outcome) = RecordingWriter::new(HttpConn::new(server));

        writer
            .respond(StatusCode::FORBIDDEN, "Forbidden")
            .await
            .unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.ends_with("Forbidden\n"));
        assert_eq!(outcome.status(), 403);
        assert_eq!(outcome.bytes(), 10);
    }

    #[tokio::test]
    async fn test_hijacked_request_defaults_to_ok() {
        let (_client, server) = duplex(1024);
        let (writer, outcome) = RecordingWriter::new(HttpConn::new(server));

        assert!(writer.can_hijack());
        assert!(writer.hijack().is_ok());
        assert_eq!(outcome.status(), 200);
        assert_eq!(outcome.bytes(), 0);
    }
}
