use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::ProxyConfig;

/// 检查私钥文件权限（仅Unix系统）
#[cfg(unix)]
pub fn check_key_file_permissions(key_path: &Path) -> Result<()> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tracing::warn;

    let metadata = fs::metadata(key_path)
        .with_context(|| format!("Failed to read metadata for key file: {}", key_path.display()))?;
    let mode = metadata.permissions().mode();

    // 组用户或其他用户可读（g+r = 0o040, o+r = 0o004）
    if mode & 0o044 != 0 {
        warn!(
            "Private key '{}' is readable by group or others (permissions: {:o}); run chmod 600 {}",
            key_path.display(),
            mode & 0o777,
            key_path.display()
        );
    }

    Ok(())
}

/// Windows系统不进行权限检查
#[cfg(not(unix))]
pub fn check_key_file_permissions(_key_path: &Path) -> Result<()> {
    Ok(())
}

/// Expand path with tilde (~) and make it absolute
pub fn expand_path(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::tilde(path);
    let path_buf = PathBuf::from(expanded.as_ref());

    if path_buf.is_absolute() {
        Ok(path_buf)
    } else {
        Ok(std::env::current_dir()
            .context("Failed to get current directory")?
            .join(path_buf))
    }
}

/// 校验配置文件并打印摘要
pub fn check_config(config_path: &Path) -> Result<()> {
    let config = ProxyConfig::from_file(config_path)?;
    let hostname = config
        .resolved_hostname()
        .context("Failed to determine hostname")?;

    println!("Configuration file {} is valid", config_path.display());
    println!("  listen_port:   {}", config.listen_port);
    println!("  allowed_ports: {}", config.allowed_ports);
    println!(
        "  hostname:      {}{}",
        hostname,
        if config.hostname.is_none() {
            " (from operating system)"
        } else {
            ""
        }
    );
    println!("  cert_dir:      {}", config.cert_dir.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_path_relative() {
        let expanded = expand_path("certs").unwrap();
        assert!(expanded.is_absolute());
        assert!(expanded.ends_with("certs"));
    }

    #[test]
    fn test_expand_path_absolute() {
        assert_eq!(expand_path("/etc/proxy").unwrap(), PathBuf::from("/etc/proxy"));
    }

    #[test]
    fn test_check_config_reports_errors() {
        let path = std::env::temp_dir().join(format!("check-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[proxy]\nallowed_ports = []\n").unwrap();
        let err = check_config(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("allowed_ports cannot be empty"));

        std::fs::write(&path, "[proxy]\nhostname = \"bastion\"\n").unwrap();
        check_config(&path).unwrap();
        std::fs::remove_file(&path).ok();
    }
}
