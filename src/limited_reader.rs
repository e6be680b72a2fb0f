/// 有限读取器模块
///
/// 限制 CONNECT 请求头的大小，防止内存耗尽攻击
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// HTTP 请求头最大大小（默认 8KB）
pub const DEFAULT_MAX_HEADER_SIZE: usize = 8 * 1024;

/// 有限读取器 - 限制可以读取的最大字节数
pub struct LimitedReader<R> {
    inner: R,
    remaining: usize,
    limit: usize,
}

impl<R> LimitedReader<R> {
    /// 创建新的有限读取器
    pub fn new(inner: R, limit: usize) -> Self {
        Self {
            inner,
            remaining: limit,
            limit,
        }
    }

    /// 使用 HTTP 头大小限制（8KB）
    pub fn with_header_limit(inner: R) -> Self {
        Self::new(inner, DEFAULT_MAX_HEADER_SIZE)
    }

    /// 获取剩余可读字节数
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// 获取已读取字节数
    pub fn read_count(&self) -> usize {
        self.limit - self.remaining
    }

    /// 获取内部读取器的可变引用
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// 消费 LimitedReader，返回内部读取器
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for LimitedReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.remaining == 0 {
            return Poll::Ready(Err(io::Error::other(format!(
                "Request header size limit exceeded ({} bytes)",
                self.limit
            ))));
        }

        // 缓冲区不超过剩余额度时直接读取，否则经临时缓冲区截断
        let read = if buf.remaining() <= self.remaining {
            let before = buf.filled().len();
            ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
            buf.filled().len() - before
        } else {
            let mut scratch = vec![0u8; self.remaining];
            let mut limited = ReadBuf::new(&mut scratch);
            ready!(Pin::new(&mut self.inner).poll_read(cx, &mut limited))?;
            buf.put_slice(limited.filled());
            limited.filled().len()
        };

        self.remaining = self.remaining.saturating_sub(read);
        Poll::Ready(Ok(()))
    }
}
