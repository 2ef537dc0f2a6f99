//! Instrument transport traits
//!
//! The low-level I/O channel to an analyzer is an external capability with
//! four operations (open, write, read, close) plus a configurable timeout.
//! Implementations handle protocol-specific details (raw TCP socket, VISA,
//! in-process simulation).
//!
//! ## Framing
//! - `write` sends one complete command; the implementation appends any
//!   terminator it needs
//! - `read` returns one complete response with terminators stripped
//! - One command per round trip; there is no pipelining
//!
//! ## Error Handling
//! - Implementations return `anyhow::Result` with context describing the
//!   failed operation; the session maps failures onto its own taxonomy
//! - Nothing is retried at this layer

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// An open I/O channel to one instrument.
#[async_trait]
pub trait InstrumentTransport: Send {
    /// Send one command.
    ///
    /// # Errors
    /// - Channel closed or write timed out
    async fn write(&mut self, text: &str) -> Result<()>;

    /// Read one response.
    ///
    /// # Errors
    /// - Channel closed
    /// - No complete response within the current timeout
    async fn read(&mut self) -> Result<String>;

    /// Close the channel. Further writes and reads fail.
    ///
    /// # Errors
    /// - The underlying close failed (callers on teardown paths ignore this)
    async fn close(&mut self) -> Result<()>;

    /// Current I/O timeout.
    fn timeout(&self) -> Duration;

    /// Change the I/O timeout for subsequent operations.
    ///
    /// # Errors
    /// - The underlying library rejected the value
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Opens transports by address.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a channel to the instrument at `address`.
    ///
    /// # Errors
    /// - Address malformed or unreachable
    async fn open(&self, address: &str) -> Result<Box<dyn InstrumentTransport>>;

    /// Transport kind name for logs (`socket`, `visa`, `mock`).
    fn kind(&self) -> &'static str;
}
