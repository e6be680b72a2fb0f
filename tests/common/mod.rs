//! Common utilities for integration tests
#![allow(dead_code)]

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tls_connect_proxy::identity::{issue_bundle, CertLayout};
use tls_connect_proxy::server::{serve, ConnectHandler, ProxySettings};
use tls_connect_proxy::{tls, AccessLog, AllowedPorts};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

/// Hostname the test proxy identifies as; also the proxy certificate CN
pub const PROXY_HOSTNAME: &str = "localhost";

/// Find an available port
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to random port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Unique temporary directory holding a freshly issued certificate bundle,
/// removed on drop
pub struct TestCerts {
    pub layout: CertLayout,
}

impl TestCerts {
    pub fn dir(&self) -> PathBuf {
        self.layout.dir().to_path_buf()
    }
}

impl Drop for TestCerts {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(self.layout.dir());
    }
}

/// Generate proxy, client and sample-server certificates for testing
pub fn generate_test_certs() -> TestCerts {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
    let unique_id = format!("{}-{}-{}", timestamp, counter, std::process::id());

    let layout = CertLayout::new(std::env::temp_dir().join(format!("test-certs-{}", unique_id)));
    issue_bundle(&layout, PROXY_HOSTNAME).expect("Failed to generate test certificates");

    TestCerts { layout }
}

/// Start the CONNECT proxy on a random loopback port and return the port
pub async fn start_proxy(certs: &TestCerts, allowed_ports: &[u16]) -> u16 {
    let tls_config = tls::server_tunnel_config(&certs.layout).expect("Failed to load proxy TLS config");
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind proxy");
    let port = listener.local_addr().unwrap().port();

    let handler = Arc::new(AccessLog::new(ConnectHandler::new(ProxySettings {
        hostname: PROXY_HOSTNAME.to_string(),
        allowed_ports: AllowedPorts::new(allowed_ports.to_vec()),
    })));

    tokio::spawn(async move {
        let _ = serve(listener, TlsAcceptor::from(tls_config), handler).await;
    });

    port
}

/// Create a simple echo server for testing
pub async fn start_echo_server() -> u16 {
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind echo server");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) => break, // Connection closed
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            });
        }
    });

    port
}

/// Server that reads until EOF, then answers with the reversed input.
/// Only works when the write side of the tunnel can be closed on its own.
pub async fn start_reverse_server() -> u16 {
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind reverse server");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut input = Vec::new();
                if socket.read_to_end(&mut input).await.is_ok() {
                    input.reverse();
                    let _ = socket.write_all(&input).await;
                    let _ = socket.shutdown().await;
                }
            });
        }
    });

    port
}

/// Listener that only counts accepted connections
pub async fn start_counting_listener() -> (u16, Arc<AtomicUsize>) {
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind counting listener");
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((_socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    (port, accepted)
}

/// Wait for server to be ready
pub async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    for _ in 0..max_attempts {
        if TcpStream::connect(format!("127.0.0.1:{}", port))
            .await
            .is_ok()
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}
