/// 双向数据转发
///
/// 两个方向各自复制数据直到源端 EOF 或出错，互不取消；
/// 只有两个方向都结束后 `relay` 才返回。
use async_trait::async_trait;
use std::io;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadHalf, Stdin, WriteHalf,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// 写方向的关闭能力
///
/// 默认实现表示不支持半关闭：刷新后直接释放写端（完全关闭）。
/// 支持半关闭的流覆盖 `close_write`，只关闭写方向，读方向保持可用。
#[async_trait]
pub trait CloseWrite: AsyncWrite + Unpin + Send + Sized {
    async fn close_write(mut self) -> io::Result<()> {
        self.flush().await
    }
}

#[async_trait]
impl CloseWrite for OwnedWriteHalf {
    async fn close_write(mut self) -> io::Result<()> {
        self.shutdown().await
    }
}

/// `tokio::io::split` 得到的写端；TLS 流的 shutdown 会先发送 close_notify
#[async_trait]
impl<T: AsyncWrite + Send> CloseWrite for WriteHalf<T> {
    async fn close_write(mut self) -> io::Result<()> {
        self.shutdown().await
    }
}

/// 文件描述符不支持半关闭，释放即关闭
impl CloseWrite for tokio::fs::File {}

#[cfg(not(unix))]
impl CloseWrite for tokio::io::Stdout {}

/// 可拆分为独立读写两端的全双工流
pub trait IntoHalves {
    type Read: AsyncRead + Unpin + Send;
    type Write: CloseWrite;

    fn into_halves(self) -> (Self::Read, Self::Write);
}

impl IntoHalves for TcpStream {
    type Read = OwnedReadHalf;
    type Write = OwnedWriteHalf;

    fn into_halves(self) -> (Self::Read, Self::Write) {
        self.into_split()
    }
}

impl<IO> IntoHalves for tokio_rustls::server::TlsStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    type Read = ReadHalf<Self>;
    type Write = WriteHalf<Self>;

    fn into_halves(self) -> (Self::Read, Self::Write) {
        tokio::io::split(self)
    }
}

impl<IO> IntoHalves for tokio_rustls::client::TlsStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    type Read = ReadHalf<Self>;
    type Write = WriteHalf<Self>;

    fn into_halves(self) -> (Self::Read, Self::Write) {
        tokio::io::split(self)
    }
}

impl IntoHalves for DuplexStream {
    type Read = ReadHalf<Self>;
    type Write = WriteHalf<Self>;

    fn into_halves(self) -> (Self::Read, Self::Write) {
        tokio::io::split(self)
    }
}

/// 标准输出的写端
#[cfg(unix)]
pub type StdoutWriter = tokio::fs::File;
#[cfg(not(unix))]
pub type StdoutWriter = tokio::io::Stdout;

/// 本地标准输入/输出组成的“流”
///
/// Unix 下接管 fd 1，写方向结束时关闭它，让读取 stdout 的一方看到 EOF。
/// 每个进程只应创建一次。
pub struct StdioStream {
    stdin: Stdin,
    stdout: StdoutWriter,
}

impl StdioStream {
    pub fn new() -> Self {
        Self {
            stdin: tokio::io::stdin(),
            stdout: take_stdout(),
        }
    }

    /// 在开始转发之前直接写出的数据
    pub async fn write_stdout(&mut self, data: &[u8]) -> io::Result<()> {
        self.stdout.write_all(data).await?;
        self.stdout.flush().await
    }
}

#[cfg(unix)]
fn take_stdout() -> StdoutWriter {
    use std::os::fd::FromRawFd;

    // SAFETY: fd 1 在进程启动时已打开，此后只由这个 File 持有并关闭；
    // 日志写到 stderr，std 的 stdout 句柄不再被使用
    let file = unsafe { std::fs::File::from_raw_fd(1) };
    tokio::fs::File::from_std(file)
}

#[cfg(not(unix))]
fn take_stdout() -> StdoutWriter {
    tokio::io::stdout()
}

impl Default for StdioStream {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoHalves for StdioStream {
    type Read = Stdin;
    type Write = StdoutWriter;

    fn into_halves(self) -> (Self::Read, Self::Write) {
        (self.stdin, self.stdout)
    }
}

/// 每个方向转发的字节数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
}

/// 在 `a` 与 `b` 之间双向转发，直到两个方向都结束
pub async fn relay<A, B>(a: A, b: B) -> TunnelStats
where
    A: IntoHalves,
    B: IntoHalves,
{
    let (a_read, a_write) = a.into_halves();
    let (b_read, b_write) = b.into_halves();

    // 使用 tokio::join! 而不是 select!，一个方向结束不会取消另一个方向
    let (a_to_b, b_to_a) = tokio::join!(
        pipe("a->b", a_read, b_write),
        pipe("b->a", b_read, a_write)
    );

    TunnelStats { a_to_b, b_to_a }
}

const COPY_BUF_SIZE: usize = 16 * 1024;

/// 从 `src` 复制到 `dst`，EOF 后关闭 `dst` 的写方向；错误只记录日志
///
/// 返回已写入 `dst` 的字节数，出错时同样计入出错前转发的部分。
async fn pipe<R, W>(direction: &'static str, mut src: R, mut dst: W) -> u64
where
    R: AsyncRead + Unpin + Send,
    W: CloseWrite,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total = 0u64;

    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("{}: read error after {} bytes: {}", direction, total, e);
                return total;
            }
        };

        if let Err(e) = dst.write_all(&buf[..n]).await {
            warn!("{}: write error after {} bytes: {}", direction, total, e);
            return total;
        }
        total += n as u64;

        if let Err(e) = dst.flush().await {
            warn!("{}: flush error after {} bytes: {}", direction, total, e);
            return total;
        }
    }

    debug!("{}: source reached EOF after {} bytes", direction, total);
    if let Err(e) = dst.close_write().await {
        warn!("{}: failed to close destination: {}", direction, e);
    }
    total
}
