/// 自定义错误类型
///
/// 使用 thiserror 定义精确的错误类型，替代泛型的 anyhow::Error
/// 这样可以让调用者进行更精确的错误处理和恢复
use http::StatusCode;
use std::io;
use std::num::ParseIntError;
use std::path::PathBuf;
use thiserror::Error;

/// 证书、TLS 配置与客户端隧道建立的错误类型
#[derive(Error, Debug)]
pub enum TunnelError {
    /// 文件读写失败
    #[error("Failed to access {path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 密钥或序列号生成、签名失败
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// PEM 块中的 DER 内容无法解析
    #[error("Parse error: {0}")]
    Parse(String),

    /// PEM 文件中不存在所需类型的块
    #[error("{0} not found")]
    NotFound(&'static str),

    /// TLS 配置或握手错误
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// 连接失败
    #[error("Failed to connect to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 协议错误
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// 创建文件访问错误
    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }

    /// 创建连接失败错误
    pub fn connection_failed(addr: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectionFailed {
            addr: addr.into(),
            source,
        }
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// 创建协议错误
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 创建配置错误
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 检查是否为“未找到”错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// 检查是否为解析错误
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    /// 检查是否为协议错误
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// 检查是否为配置错误
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl From<rcgen::Error> for TunnelError {
    fn from(err: rcgen::Error) -> Self {
        Self::Crypto(err.to_string())
    }
}

impl From<openssl::error::ErrorStack> for TunnelError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self::Crypto(err.to_string())
    }
}

/// CONNECT 请求被拒绝的原因
///
/// `Display` 的输出即为返回给客户端的响应体
#[derive(Error, Debug)]
pub enum ConnectError {
    /// 响应写入器不支持接管底层连接
    #[error("ResponseWriter is not a Hijacker")]
    NotHijackable,

    /// 非 CONNECT 方法
    #[error("Method Not Allowed")]
    MethodNotAllowed,

    /// 目标主机不是本机
    #[error("Forbidden")]
    ForbiddenHost(String),

    /// 目标端口不在允许列表中
    #[error("Forbidden")]
    ForbiddenPort(u16),

    /// 端口无法解析为 u16
    #[error("invalid port {port:?}: {source}")]
    InvalidPort {
        port: String,
        #[source]
        source: ParseIntError,
    },

    /// 无法连接目标地址
    #[error("dial tcp {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 接管连接失败
    #[error("hijack failed: {0}")]
    Hijack(String),
}

impl ConnectError {
    /// 对应的 HTTP 状态码
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotHijackable | Self::Hijack(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::ForbiddenHost(_) | Self::ForbiddenPort(_) => StatusCode::FORBIDDEN,
            Self::InvalidPort { .. } | Self::Dial { .. } => StatusCode::BAD_REQUEST,
        }
    }
}
