//! Broadcast relay server.
//!
//! Every line a client sends is forwarded byte-for-byte to every *other*
//! connected client; only the terminating `\n` is framing. Lines that are
//! not JSON are dropped. The relay never
//! stores or interprets negotiation state, and it admits at most
//! `max_clients` concurrent connections.

use super::protocol::{DEFAULT_MAX_LINE_LEN, RelayError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

/// Relay server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayServerConfig {
    /// Maximum number of concurrent clients
    pub max_clients: usize,
    /// Longest accepted line in bytes (excluding the newline)
    pub max_line_len: usize,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            max_clients: 2,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

type ClientId = u64;
type Clients = Arc<RwLock<HashMap<ClientId, mpsc::UnboundedSender<Arc<[u8]>>>>>;

/// Line-oriented broadcast relay
pub struct RelayServer {
    listener: TcpListener,
    clients: Clients,
    next_id: AtomicU64,
    config: RelayServerConfig,
}

impl RelayServer {
    /// Bind with default configuration
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot bind.
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self, RelayError> {
        Self::bind_with_config(bind_addr, RelayServerConfig::default()).await
    }

    /// Bind with custom configuration
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot bind.
    pub async fn bind_with_config(
        bind_addr: SocketAddr,
        config: RelayServerConfig,
    ) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self {
            listener,
            clients: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            config,
        })
    }

    /// Address the server is listening on
    ///
    /// # Errors
    ///
    /// Returns error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of connected clients
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Accept and serve clients until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns error if accepting a connection fails.
    pub async fn run(self) -> Result<(), RelayError> {
        info!(
            addr = %self.listener.local_addr()?,
            max_clients = self.config.max_clients,
            "Relay server listening"
        );

        loop {
            let (stream, peer) = self.listener.accept().await?;
            self.admit(stream, peer).await;
        }
    }

    async fn admit(&self, mut stream: TcpStream, peer: SocketAddr) {
        let mut clients = self.clients.write().await;
        if clients.len() >= self.config.max_clients {
            warn!(%peer, max = self.config.max_clients, "Relay full; refusing client");
            drop(clients);
            let _ = stream.shutdown().await;
            return;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        clients.insert(id, tx);
        let count = clients.len();
        drop(clients);

        info!(%peer, id, clients = count, "Relay client connected");

        let (read_half, write_half) = stream.into_split();
        tokio::spawn(write_loop(write_half, rx));

        let clients = Arc::clone(&self.clients);
        let max_line_len = self.config.max_line_len;
        tokio::spawn(async move {
            if let Err(e) = read_loop(id, read_half, &clients, max_line_len).await {
                debug!(id, error = %e, "Relay client read ended with error");
            }
            let remaining = {
                let mut clients = clients.write().await;
                clients.remove(&id);
                clients.len()
            };
            info!(%peer, id, clients = remaining, "Relay client disconnected");
        });
    }
}

async fn write_loop(
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Arc<[u8]>>,
) {
    while let Some(line) = rx.recv().await {
        let result = async {
            writer.write_all(&line).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        if result.is_err() {
            break;
        }
    }
}

async fn read_loop(
    id: ClientId,
    read_half: OwnedReadHalf,
    clients: &Clients,
    max_line_len: usize,
) -> Result<(), RelayError> {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let limit = u64::try_from(max_line_len).unwrap_or(u64::MAX).saturating_add(1);
        let n = (&mut reader).take(limit).read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let line = match buf.strip_suffix(b"\n") {
            Some(line) => line,
            None if buf.len() > max_line_len => {
                warn!(id, limit = max_line_len, "Relay line too long; dropping client");
                return Err(RelayError::LineTooLong(max_line_len));
            }
            None => &buf[..],
        };

        if line.is_empty() {
            continue;
        }
        if serde_json::from_slice::<serde_json::Value>(line).is_err() {
            warn!(id, "Dropping non-JSON relay message");
            continue;
        }

        let line: Arc<[u8]> = Arc::from(line);
        let clients = clients.read().await;
        let mut forwarded = 0;
        for (other, tx) in clients.iter() {
            if *other != id && tx.send(Arc::clone(&line)).is_ok() {
                forwarded += 1;
            }
        }
        debug!(id, bytes = line.len(), forwarded, "Relayed message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;

    async fn start(config: RelayServerConfig) -> SocketAddr {
        let server = RelayServer::bind_with_config("127.0.0.1:0".parse().unwrap(), config)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    async fn connect(addr: SocketAddr) -> (BufReader<OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (r, w) = stream.into_split();
        (BufReader::new(r), w)
    }

    // Clients register after the server accepts them.
    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_forwards_to_other_client_only() {
        let addr = start(RelayServerConfig::default()).await;
        let (mut a_r, mut a_w) = connect(addr).await;
        let (mut b_r, _b_w) = connect(addr).await;
        settle().await;

        a_w.write_all(b"{\"type\":\"offer\",\"sdp\":1}\n").await.unwrap();

        let mut line = String::new();
        b_r.read_line(&mut line).await.unwrap();
        assert_eq!(line, "{\"type\":\"offer\",\"sdp\":1}\n");

        let echoed = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            a_r.read_line(&mut String::new()),
        )
        .await;
        assert!(echoed.is_err(), "sender must not receive its own message");
    }

    #[tokio::test]
    async fn test_forwards_line_unmodified() {
        let addr = start(RelayServerConfig::default()).await;
        let (_a_r, mut a_w) = connect(addr).await;
        let (mut b_r, _b_w) = connect(addr).await;
        settle().await;

        // Whitespace and a carriage return are part of the message
        let sent = b"  {\"type\":\"answer\", \"sdp\": {}} \r\n";
        a_w.write_all(sent).await.unwrap();

        let mut line = Vec::new();
        b_r.read_until(b'\n', &mut line).await.unwrap();
        assert_eq!(line, sent);
    }

    #[tokio::test]
    async fn test_drops_non_json() {
        let addr = start(RelayServerConfig::default()).await;
        let (_a_r, mut a_w) = connect(addr).await;
        let (mut b_r, _b_w) = connect(addr).await;
        settle().await;

        a_w.write_all(b"not json\n{\"ok\":true}\n").await.unwrap();

        let mut line = String::new();
        b_r.read_line(&mut line).await.unwrap();
        assert_eq!(line, "{\"ok\":true}\n");
    }

    #[tokio::test]
    async fn test_third_client_refused() {
        let addr = start(RelayServerConfig::default()).await;
        let _a = connect(addr).await;
        let _b = connect(addr).await;
        settle().await;

        let (mut c_r, _c_w) = connect(addr).await;
        let mut line = String::new();
        let n = tokio::time::timeout(std::time::Duration::from_secs(1), c_r.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0, "refused client sees EOF");
    }

    #[test]
    fn test_default_config() {
        let config = RelayServerConfig::default();
        assert_eq!(config.max_clients, 2);
        assert_eq!(config.max_line_len, 1024 * 1024);
    }
}
