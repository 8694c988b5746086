//! Relay client.

use super::protocol::{DEFAULT_MAX_LINE_LEN, RelayError, normalize_relay_addr};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

/// Line-oriented connection to a [`RelayServer`](super::RelayServer)
pub struct RelayClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    max_line_len: usize,
    addr: String,
}

impl RelayClient {
    /// Connect to a relay.
    ///
    /// `addr` may use any form accepted by [`normalize_relay_addr`].
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or the connection fails.
    pub async fn connect(addr: &str) -> Result<Self, RelayError> {
        let addr = normalize_relay_addr(addr)?;
        let stream = TcpStream::connect(&addr).await?;
        stream.set_nodelay(true)?;
        info!(relay = %addr, "Connected to relay");

        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            addr,
        })
    }

    /// Normalised relay address
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one line. Newlines inside `line` are rejected.
    ///
    /// # Errors
    ///
    /// Returns error if the line contains a newline, is too long, or the
    /// write fails.
    pub async fn send_line(&mut self, line: &str) -> Result<(), RelayError> {
        if line.contains('\n') {
            return Err(RelayError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "relay messages must be a single line",
            )));
        }
        if line.len() > self.max_line_len {
            return Err(RelayError::LineTooLong(self.max_line_len));
        }

        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        debug!(bytes = line.len(), "Sent relay line");
        Ok(())
    }

    /// Receive the next non-empty line.
    ///
    /// # Errors
    ///
    /// Returns `Closed` when the relay closes the connection.
    pub async fn recv_line(&mut self) -> Result<String, RelayError> {
        let limit = u64::try_from(self.max_line_len)
            .unwrap_or(u64::MAX)
            .saturating_add(1);
        let mut buf = String::new();

        loop {
            buf.clear();
            let n = (&mut self.reader).take(limit).read_line(&mut buf).await?;
            if n == 0 {
                return Err(RelayError::Closed);
            }
            if !buf.ends_with('\n') && buf.len() > self.max_line_len {
                return Err(RelayError::LineTooLong(self.max_line_len));
            }

            let line = buf.trim_end_matches(['\r', '\n']);
            if !line.is_empty() {
                return Ok(line.to_string());
            }
        }
    }
}
