//! Reachability check used during discovery
//!
//! Independent of SSH authentication: a host that accepts a TCP connection on
//! the SSH port within the timeout is worth connecting to.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
    async fn is_reachable(&self, host: &str) -> bool;
}

/// TCP connect check
#[derive(Debug, Clone)]
pub struct TcpConnectCheck {
    pub port: u16,
    pub timeout: Duration,
}

impl TcpConnectCheck {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

#[async_trait]
impl ReachabilityCheck for TcpConnectCheck {
    async fn is_reachable(&self, host: &str) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect((host, self.port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("{}:{} refused: {}", host, self.port, e);
                false
            }
            Err(_) => {
                debug!("{}:{} timed out after {:?}", host, self.port, self.timeout);
                false
            }
        }
    }
}
