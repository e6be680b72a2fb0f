use crate::identity::CertLayout;
use crate::server::ProxySettings;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 默认监听端口
pub const DEFAULT_LISTEN_PORT: u16 = 8443;

/// 默认允许的目标端口
pub const DEFAULT_ALLOWED_PORTS: &[u16] = &[22, 8444];

/// 允许作为隧道目标的端口集合
///
/// 只提供成员判断；顺序与重复项无意义。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowedPorts(Vec<u16>);

impl AllowedPorts {
    pub fn new(ports: Vec<u16>) -> Self {
        Self(ports)
    }

    pub fn contains(&self, port: u16) -> bool {
        self.0.contains(&port)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

impl Default for AllowedPorts {
    fn default() -> Self {
        Self(DEFAULT_ALLOWED_PORTS.to_vec())
    }
}

/// 解析逗号分隔的端口列表，例如 `22, 8444`
impl FromStr for AllowedPorts {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(|item| {
                let item = item.trim();
                item.parse::<u16>()
                    .with_context(|| format!("invalid port {:?} in allowed ports", item))
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .map(Self)
    }
}

impl fmt::Display for AllowedPorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ports: Vec<String> = self.0.iter().map(u16::to_string).collect();
        f.write_str(&ports.join(","))
    }
}

/// 代理服务端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// 监听端口
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// 允许的目标端口
    #[serde(default)]
    pub allowed_ports: AllowedPorts,
    /// 本机主机名；CONNECT 目标主机必须与之相同。缺省时取操作系统主机名
    #[serde(default)]
    pub hostname: Option<String>,
    /// 证书目录
    #[serde(default = "default_cert_dir")]
    pub cert_dir: PathBuf,
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_cert_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            allowed_ports: AllowedPorts::default(),
            hostname: None,
            cert_dir: default_cert_dir(),
        }
    }
}

impl ProxyConfig {
    /// 从 TOML 文件加载 `[proxy]` 段并校验
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        #[derive(Deserialize)]
        struct ProxyConfigWrapper {
            #[serde(default)]
            proxy: ProxyConfig,
        }

        let wrapper: ProxyConfigWrapper =
            toml::from_str(content).context("Failed to parse proxy configuration")?;
        wrapper
            .proxy
            .validate()
            .context("Proxy configuration validation failed")?;
        Ok(wrapper.proxy)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.allowed_ports.is_empty() {
            bail!("allowed_ports cannot be empty");
        }
        if self.allowed_ports.contains(0) {
            bail!("allowed_ports cannot contain port 0");
        }
        if let Some(hostname) = &self.hostname {
            if hostname.trim().is_empty() {
                bail!("hostname cannot be empty");
            }
        }
        Ok(())
    }

    /// 配置中的主机名，缺省时取操作系统主机名
    pub fn resolved_hostname(&self) -> anyhow::Result<String> {
        match &self.hostname {
            Some(hostname) => Ok(hostname.clone()),
            None => system_hostname(),
        }
    }

    /// 处理器使用的不可变策略
    pub fn settings(&self) -> anyhow::Result<ProxySettings> {
        Ok(ProxySettings {
            hostname: self.resolved_hostname()?,
            allowed_ports: self.allowed_ports.clone(),
        })
    }

    pub fn cert_layout(&self) -> CertLayout {
        CertLayout::new(&self.cert_dir)
    }
}

/// 操作系统主机名
pub fn system_hostname() -> anyhow::Result<String> {
    let hostname = gethostname::gethostname()
        .into_string()
        .map_err(|raw| anyhow::anyhow!("hostname {:?} is not valid UTF-8", raw))?;
    if hostname.is_empty() {
        bail!("operating system reported an empty hostname");
    }
    Ok(hostname)
}
