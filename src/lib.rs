/// TLS CONNECT 代理库入口
///
/// 将核心模块导出为库，方便测试和复用
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod limited_reader;
pub mod relay;
pub mod server;
pub mod tls;

// 重新导出常用类型
pub use client::{establish, run_corkscrew, ProxyEndpoint};
pub use config::{AllowedPorts, ProxyConfig};
pub use error::{ConnectError, Result, TunnelError};
pub use identity::{issue_certificate, load_certificate, CertLayout, Identity, KeyUsage};
pub use limited_reader::{LimitedReader, DEFAULT_MAX_HEADER_SIZE};
pub use relay::{relay, TunnelStats};
pub use server::{AccessLog, ConnectHandler, Handler, ProxySettings};
