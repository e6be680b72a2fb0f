use crate::config::AllowedPorts;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tls-connect-proxy")]
#[command(author, version, about = "Mutually-authenticated TLS CONNECT proxy", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// 证书目录（proxy / client / sampleserver 的 .crt 与 .key）
    #[arg(long, value_name = "DIR", global = true)]
    pub cert_dir: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 生成代理、客户端和示例服务器的自签名证书
    Certs {
        /// 证书 Common Name（默认为本机主机名）
        #[arg(long)]
        hostname: Option<String>,
    },
    /// 运行 CONNECT 代理
    Proxy {
        /// 监听端口
        #[arg(long, value_name = "PORT")]
        listen: Option<u16>,

        /// 允许的目标端口（逗号分隔）
        #[arg(long, value_name = "PORTS")]
        allowed: Option<AllowedPorts>,

        /// 本机主机名，CONNECT 目标主机必须与之一致
        #[arg(long)]
        hostname: Option<String>,

        /// 配置文件路径
        #[arg(short, long)]
        config: Option<String>,
    },
    /// 通过代理建立隧道，并连接到标准输入/输出（用作 ssh ProxyCommand）
    Corkscrew {
        /// 代理地址，例如 https://proxy.example:8443
        proxy_url: String,

        /// 隧道目标 host:port
        destination: String,
    },
    /// 运行示例 TLS 服务器
    SampleServer {
        /// 监听端口
        #[arg(long, default_value_t = 8444)]
        listen: u16,
    },
    /// 经由代理获取 HTTPS URL，并输出响应体（信任示例服务器证书）
    SampleClient {
        /// 代理地址，例如 https://proxy.example:8443
        proxy_url: String,

        /// 要获取的 URL，例如 https://proxy.example:8444/
        url: String,
    },
    /// 检查配置文件格式是否正确
    Check {
        /// 配置文件路径
        #[arg(short, long)]
        config: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proxy_flags() {
        let cli = Cli::parse_from([
            "tls-connect-proxy",
            "--log-level",
            "debug",
            "proxy",
            "--listen",
            "9443",
            "--allowed",
            "22,2222",
        ]);
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Proxy {
                listen, allowed, ..
            } => {
                assert_eq!(listen, Some(9443));
                let allowed = allowed.unwrap();
                assert!(allowed.contains(2222));
                assert!(!allowed.contains(8444));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_corkscrew() {
        let cli = Cli::parse_from([
            "tls-connect-proxy",
            "corkscrew",
            "https://proxy.example:8443",
            "proxy.example:22",
            "--cert-dir",
            "/etc/certs",
        ]);
        assert_eq!(cli.cert_dir.as_deref(), Some("/etc/certs"));
        assert!(matches!(cli.command, Commands::Corkscrew { .. }));
    }

    #[test]
    fn test_parse_sample_client() {
        let cli = Cli::parse_from([
            "tls-connect-proxy",
            "sample-client",
            "https://proxy.example:8443",
            "https://proxy.example:8444/",
        ]);
        match cli.command {
            Commands::SampleClient { proxy_url, url } => {
                assert_eq!(proxy_url, "https://proxy.example:8443");
                assert_eq!(url, "https://proxy.example:8444/");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_allowed_list() {
        assert!(Cli::try_parse_from(["tls-connect-proxy", "proxy", "--allowed", "22,ssh"]).is_err());
    }
}
