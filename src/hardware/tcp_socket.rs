//! Raw SCPI over TCP.
//!
//! Networked analyzers accept newline-terminated SCPI on a plain socket
//! (port 5555 unless stated otherwise). Addresses may be given as
//! `host`, `host:port`, `TCPIP[n]::host::port::SOCKET` or
//! `TCPIP[n]::host::INSTR`.

use crate::traits::{InstrumentTransport, TransportFactory};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Default raw SCPI socket port.
pub const DEFAULT_SCPI_PORT: u16 = 5555;

/// Splits an analyzer address into host and port.
///
/// # Errors
/// Empty host or unparsable port.
pub fn parse_socket_address(address: &str) -> Result<(String, u16)> {
    let address = address.trim();

    let (host, port) = if address.to_ascii_uppercase().starts_with("TCPIP") {
        let parts: Vec<&str> = address.split("::").collect();
        match parts.as_slice() {
            [_, host, port, kind] if kind.eq_ignore_ascii_case("SOCKET") => {
                let port = port
                    .parse::<u16>()
                    .with_context(|| format!("Invalid port in resource '{}'", address))?;
                (host.to_string(), port)
            }
            [_, host, kind] if kind.eq_ignore_ascii_case("INSTR") => {
                (host.to_string(), DEFAULT_SCPI_PORT)
            }
            _ => bail!("Unsupported resource string '{}'", address),
        }
    } else {
        match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .with_context(|| format!("Invalid port in address '{}'", address))?;
                (host.to_string(), port)
            }
            None => (address.to_string(), DEFAULT_SCPI_PORT),
        }
    };

    if host.is_empty() {
        bail!("Address '{}' has no host", address);
    }
    Ok((host, port))
}

/// An open SCPI socket.
pub struct SocketTransport {
    peer: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
    closed: bool,
}

impl SocketTransport {
    /// Connects to `host:port`, giving up after `timeout`.
    ///
    /// # Errors
    /// Connection refused, unreachable host or timeout.
    pub async fn connect(host: &str, port: u16, io_timeout: Duration) -> Result<Self> {
        let peer = format!("{}:{}", host, port);
        let stream = timeout(io_timeout, TcpStream::connect(&peer))
            .await
            .map_err(|_| anyhow!("Timed out connecting to {}", peer))?
            .with_context(|| format!("Failed to connect to {}", peer))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on {}: {}", peer, e);
        }

        let (read_half, write_half) = stream.into_split();
        debug!("Opened SCPI socket to {}", peer);
        Ok(Self {
            peer,
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout: io_timeout,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            bail!("Socket to {} is closed", self.peer);
        }
        Ok(())
    }

    /// Closes the socket after an interrupted read. Part of the response may
    /// still be in flight, so nothing read afterwards can be trusted.
    async fn abandon(&mut self) {
        self.closed = true;
        if let Err(e) = self.writer.shutdown().await {
            debug!("Shutdown of {} after failed read: {}", self.peer, e);
        }
    }
}

#[async_trait]
impl InstrumentTransport for SocketTransport {
    async fn write(&mut self, text: &str) -> Result<()> {
        self.ensure_open()?;
        let line = format!("{}\n", text);
        timeout(self.timeout, self.writer.write_all(line.as_bytes()))
            .await
            .map_err(|_| anyhow!("Write to {} timed out", self.peer))?
            .with_context(|| format!("Failed to write '{}' to {}", text, self.peer))?;
        Ok(())
    }

    async fn read(&mut self) -> Result<String> {
        self.ensure_open()?;
        let mut line = String::new();
        let outcome = timeout(self.timeout, self.reader.read_line(&mut line)).await;
        match outcome {
            Ok(Ok(0)) => {
                self.abandon().await;
                bail!("Connection closed by {}", self.peer)
            }
            Ok(Ok(_)) => Ok(line.trim_end_matches(['\r', '\n']).to_string()),
            Ok(Err(e)) => {
                self.abandon().await;
                Err(anyhow::Error::new(e).context(format!("Failed to read from {}", self.peer)))
            }
            Err(_) => {
                self.abandon().await;
                bail!(
                    "Read from {} timed out after {:?} with {} bytes pending; socket closed",
                    self.peer,
                    self.timeout,
                    line.len()
                )
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer
            .shutdown()
            .await
            .with_context(|| format!("Failed to close socket to {}", self.peer))
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("socket {}", self.peer)
    }
}

/// Opens [`SocketTransport`]s.
#[derive(Debug, Clone)]
pub struct SocketTransportFactory {
    timeout: Duration,
}

impl SocketTransportFactory {
    /// Factory whose sockets start with the given I/O timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl TransportFactory for SocketTransportFactory {
    async fn open(&self, address: &str) -> Result<Box<dyn InstrumentTransport>> {
        let (host, port) = parse_socket_address(address)?;
        let transport = SocketTransport::connect(&host, port, self.timeout).await?;
        Ok(Box::new(transport))
    }

    fn kind(&self) -> &'static str {
        "socket"
    }
}
