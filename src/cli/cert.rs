use anyhow::{Context, Result};
use tracing::info;

use crate::config::system_hostname;
use crate::identity::{self, CertLayout, IdentityFiles};

/// 生成 proxy / client / sampleserver 三套自签名证书
pub fn generate_certificates(layout: &CertLayout, hostname: Option<&str>) -> Result<()> {
    let hostname = match hostname {
        Some(hostname) => hostname.to_string(),
        None => system_hostname()?,
    };

    info!("Issuing certificates for {} in {}", hostname, layout.dir().display());
    identity::issue_bundle(layout, &hostname).context("Failed to issue certificates")?;

    for files in [layout.proxy(), layout.client(), layout.sample_server()] {
        print_identity(&files)?;
    }

    Ok(())
}

fn print_identity(files: &IdentityFiles) -> Result<()> {
    let details = files
        .load_certificate()?
        .certificate
        .map(|cert| cert.details)
        .context("certificate not found")?;

    println!(
        "Generated certificate: {} (CN={}, expires {})",
        files.cert.display(),
        details.common_name.as_deref().unwrap_or("-"),
        details.not_after.date()
    );
    println!("Generated private key: {}", files.key.display());
    Ok(())
}
