/// Capabilities consumed from the transport layer.
///
/// The registry never looks inside a connection: it only needs an identity
/// and a way to close it. Producing connections (the handshake/upgrade) is
/// delegated to an [`Upgrader`].
use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::MemberId;

/// A live, addressable connection owned by the transport layer.
pub trait Connection: Send + Sync + 'static {
    /// Transport-level identity of the connection (e.g. peer address or
    /// session id). Independent of the id it is registered under.
    fn id(&self) -> &str;

    /// Close the connection. Closing twice is a no-op.
    fn close(&self) -> anyhow::Result<()>;

    /// Whether the connection has been closed.
    fn is_closed(&self) -> bool;

    /// Access to the concrete transport type, for callers that need to send.
    fn as_any(&self) -> &dyn Any;
}

/// An inbound request to turn a raw transport stream into a [`Connection`].
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// Id the connection will be registered under.
    pub member_id: MemberId,
    pub remote_addr: Option<SocketAddr>,
    pub headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    pub fn new(member_id: impl Into<MemberId>) -> Self {
        Self {
            member_id: member_id.into(),
            remote_addr: None,
            headers: Vec::new(),
        }
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header value matching `name` (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Transport handshake seam.
///
/// In production: a websocket (or other) acceptor.
/// In tests and in-process setups: [`LoopbackUpgrader`].
#[async_trait::async_trait]
pub trait Upgrader: Send + Sync {
    async fn upgrade(&self, request: &UpgradeRequest) -> anyhow::Result<Arc<dyn Connection>>;
}

// ── Loopback (in-process) ───────────────────────────────────────────────

/// In-process connection with no underlying socket.
#[derive(Debug)]
pub struct LoopbackConnection {
    id: String,
    remote_addr: Option<SocketAddr>,
    closed: AtomicBool,
}

impl LoopbackConnection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            remote_addr: None,
            closed: AtomicBool::new(false),
        }
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

impl Connection for LoopbackConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Default upgrader: produces a [`LoopbackConnection`] per request.
#[derive(Debug, Default, Clone)]
pub struct LoopbackUpgrader;

#[async_trait::async_trait]
impl Upgrader for LoopbackUpgrader {
    async fn upgrade(&self, request: &UpgradeRequest) -> anyhow::Result<Arc<dyn Connection>> {
        let conn = LoopbackConnection {
            id: format!("loopback:{}", request.member_id),
            remote_addr: request.remote_addr,
            closed: AtomicBool::new(false),
        };
        Ok(Arc::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_close_is_idempotent() {
        let conn = LoopbackConnection::new("c1");
        assert!(!conn.is_closed());
        conn.close().unwrap();
        conn.close().unwrap();
        assert!(conn.is_closed());
    }

    #[test]
    fn downcast_through_as_any() {
        let conn: Arc<dyn Connection> = Arc::new(LoopbackConnection::new("c1"));
        let concrete = conn.as_any().downcast_ref::<LoopbackConnection>();
        assert_eq!(concrete.map(|c| c.id()), Some("c1"));
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = UpgradeRequest::new("alice").header("Sec-WebSocket-Protocol", "chat");
        assert_eq!(req.header_value("sec-websocket-protocol"), Some("chat"));
        assert_eq!(req.header_value("origin"), None);
    }

    #[tokio::test]
    async fn loopback_upgrader_carries_request_identity() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let req = UpgradeRequest::new("alice").remote_addr(addr);
        let conn = LoopbackUpgrader.upgrade(&req).await.unwrap();
        assert_eq!(conn.id(), "loopback:alice");
        let loopback = conn.as_any().downcast_ref::<LoopbackConnection>().unwrap();
        assert_eq!(loopback.remote_addr(), Some(addr));
    }
}
