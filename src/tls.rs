use crate::error::{Result, TunnelError};
use crate::identity::CertLayout;
use rustls::server::WebPkiClientVerifier;
use std::sync::Arc;
use tracing::debug;

/// 构建隧道客户端 TLS 配置
///
/// 信任池 = 系统根证书 + 代理证书；出示客户端证书。
pub fn client_tunnel_config(layout: &CertLayout) -> Result<Arc<rustls::ClientConfig>> {
    let proxy_cert = layout.proxy().load_certificate()?.into_certificate()?;
    let (client_chain, client_key) = layout.client().load()?.into_pair()?;

    let mut root_store = native_roots();
    root_store.add(proxy_cert)?;

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_client_auth_cert(client_chain, client_key)?;

    Ok(Arc::new(config))
}

/// 示例客户端在隧道内使用的 TLS 配置
///
/// 在隧道客户端的信任池基础上再加入示例服务器证书，同样出示客户端证书。
pub fn sample_client_config(layout: &CertLayout) -> Result<Arc<rustls::ClientConfig>> {
    let proxy_cert = layout.proxy().load_certificate()?.into_certificate()?;
    let sample_cert = layout.sample_server().load_certificate()?.into_certificate()?;
    let (client_chain, client_key) = layout.client().load()?.into_pair()?;

    let mut root_store = native_roots();
    root_store.add(proxy_cert)?;
    root_store.add(sample_cert)?;

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_client_auth_cert(client_chain, client_key)?;

    Ok(Arc::new(config))
}

/// 系统 CA 证书，加载失败的条目被忽略
fn native_roots() -> rustls::RootCertStore {
    let mut root_store = rustls::RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs();
    if !native_certs.errors.is_empty() {
        debug!(
            "Ignored {} errors while loading platform trust roots",
            native_certs.errors.len()
        );
    }
    for cert in native_certs.certs {
        root_store.add(cert).ok();
    }

    root_store
}

/// 构建代理服务端 TLS 配置
///
/// 出示代理证书，强制要求客户端证书，且只接受与固定的客户端证书匹配的对端。
pub fn server_tunnel_config(layout: &CertLayout) -> Result<Arc<rustls::ServerConfig>> {
    let (proxy_chain, proxy_key) = layout.proxy().load()?.into_pair()?;
    let client_cert = layout.client().load_certificate()?.into_certificate()?;

    let mut client_roots = rustls::RootCertStore::empty();
    client_roots.add(client_cert)?;

    let verifier = WebPkiClientVerifier::builder(Arc::new(client_roots))
        .build()
        .map_err(|e| TunnelError::config_error(format!("Invalid client trust pool: {}", e)))?;

    let config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(proxy_chain, proxy_key)?;

    Ok(Arc::new(config))
}

/// 示例服务器的 TLS 配置（不要求客户端证书）
pub fn sample_server_config(layout: &CertLayout) -> Result<Arc<rustls::ServerConfig>> {
    let (chain, key) = layout.sample_server().load()?.into_pair()?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)?;

    Ok(Arc::new(config))
}
