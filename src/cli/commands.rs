use anyhow::{Context, Result};
use tracing::info;

use crate::config::ProxyConfig;
use crate::identity::CertLayout;
use crate::{client, server, tls};

use super::cert;
use super::config::{check_config, check_key_file_permissions, expand_path};
use super::{sample_client, sample_server};
use super::{Cli, Commands};

/// Execute CLI commands
pub async fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Certs { hostname } => {
            let layout = cert_layout(cli.cert_dir.as_deref())?;
            cert::generate_certificates(&layout, hostname.as_deref())?;
        }
        Commands::Proxy {
            listen,
            allowed,
            hostname,
            config,
        } => {
            let mut proxy_config = match config {
                Some(path) => {
                    let config_path = expand_path(path)?;
                    info!("Loading proxy configuration from: {}", config_path.display());
                    ProxyConfig::from_file(&config_path)?
                }
                None => ProxyConfig::default(),
            };

            // 命令行参数覆盖配置文件
            if let Some(listen) = listen {
                proxy_config.listen_port = *listen;
            }
            if let Some(allowed) = allowed {
                proxy_config.allowed_ports = allowed.clone();
            }
            if let Some(hostname) = hostname {
                proxy_config.hostname = Some(hostname.clone());
            }
            if let Some(dir) = &cli.cert_dir {
                proxy_config.cert_dir = expand_path(dir)?;
            }
            proxy_config
                .validate()
                .context("Invalid proxy configuration")?;

            run_proxy(proxy_config).await?;
        }
        Commands::Corkscrew {
            proxy_url,
            destination,
        } => {
            let layout = cert_layout(cli.cert_dir.as_deref())?;
            client::run_corkscrew(proxy_url, destination, &layout)
                .await
                .with_context(|| format!("Failed to tunnel to {} via {}", destination, proxy_url))?;
        }
        Commands::SampleServer { listen } => {
            let layout = cert_layout(cli.cert_dir.as_deref())?;
            sample_server::run_sample_server(*listen, &layout).await?;
        }
        Commands::SampleClient { proxy_url, url } => {
            let layout = cert_layout(cli.cert_dir.as_deref())?;
            sample_client::run_sample_client(proxy_url, url, &layout)
                .await
                .with_context(|| format!("Failed to fetch {} via {}", url, proxy_url))?;
        }
        Commands::Check { config } => {
            let config_path = expand_path(config)?;
            check_config(&config_path)?;
        }
    }

    Ok(())
}

/// Run the CONNECT proxy
async fn run_proxy(config: ProxyConfig) -> Result<()> {
    let layout = config.cert_layout();

    // 检查私钥文件权限
    check_key_file_permissions(&layout.proxy().key)?;

    let tls_config = tls::server_tunnel_config(&layout).with_context(|| {
        format!(
            "Failed to load proxy credentials from {}",
            layout.dir().display()
        )
    })?;

    server::run_server(&config, tls_config).await
}

fn cert_layout(cert_dir: Option<&str>) -> Result<CertLayout> {
    match cert_dir {
        Some(dir) => Ok(CertLayout::new(expand_path(dir)?)),
        None => Ok(CertLayout::default()),
    }
}
