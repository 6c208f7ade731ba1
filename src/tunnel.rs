//! Public tunnel seam.
//!
//! When no `callback_url` is configured the notifier asks a
//! [`TunnelProvider`] for a public address forwarding to the bound socket.
//! Such an address is ephemeral: it dies with the process, so no shutdown
//! unsubscription is attempted for it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{NotifierError, Result};

#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Base URL reachable from the internet, without the endpoint path.
    fn public_url(&self) -> &str;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait TunnelProvider: Send + Sync {
    async fn open(&self, local: SocketAddr) -> Result<Box<dyn Tunnel>>;
}

/// Used when nothing was configured; always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTunnel;

#[async_trait]
impl TunnelProvider for NoTunnel {
    async fn open(&self, local: SocketAddr) -> Result<Box<dyn Tunnel>> {
        Err(NotifierError::Tunnel(format!(
            "no callback_url configured and no tunnel provider for {local}"
        )))
    }
}

/// Provider for an externally managed forward (reverse proxy, port
/// mapping) whose URL is known up front. `close` only flips a flag.
#[derive(Debug, Clone)]
pub struct StaticTunnelProvider {
    url: String,
    closed: Arc<AtomicBool>,
}

impl StaticTunnelProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct StaticTunnel {
    url: String,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Tunnel for StaticTunnel {
    fn public_url(&self) -> &str {
        &self.url
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TunnelProvider for StaticTunnelProvider {
    async fn open(&self, local: SocketAddr) -> Result<Box<dyn Tunnel>> {
        tracing::info!(target: "notifier", %local, url = %self.url, "using static tunnel");
        self.closed.store(false, Ordering::SeqCst);
        Ok(Box::new(StaticTunnel {
            url: self.url.trim_end_matches('/').to_string(),
            closed: self.closed.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_tunnel_round_trip() {
        let provider = StaticTunnelProvider::new("http://public.example/");
        let t = provider.open("127.0.0.1:8000".parse().unwrap()).await.unwrap();
        assert_eq!(t.public_url(), "http://public.example");
        assert!(!provider.is_closed());
        t.close().await.unwrap();
        assert!(provider.is_closed());
    }

    #[tokio::test]
    async fn no_tunnel_fails() {
        let err = NoTunnel
            .open("127.0.0.1:8000".parse().unwrap())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, NotifierError::Tunnel(_)));
    }
}
