//! Byte-level transports for talking to the modem
//!
//! - [`serial::SerialTransport`] - Serial port communication (requires `serial` feature)
//! - [`crate::test_utils::ScriptedTransport`] - Scripted transcripts for tests
//!
//! # Feature Requirements
//!
//! - `serial`: Requires `libudev-dev` and `pkg-config` on Linux
//!   ```bash
//!   # Ubuntu/Debian
//!   apt install libudev-dev pkg-config
//!   ```

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Trait for the physical link to the modem
///
/// Implementations are not expected to be safe for concurrent use; the
/// [`AtChannel`](crate::channel::AtChannel) owns the only handle and
/// serializes every access behind its lock.
#[async_trait]
pub trait Transport: Send {
    /// Write bytes, returning how many were accepted
    async fn write(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Read whatever is buffered, waiting at most `max_wait` for data
    ///
    /// Returns an empty buffer when nothing arrived in time.
    async fn read(&mut self, max_wait: Duration) -> Result<Bytes>;

    /// Number of bytes that can be read without waiting
    fn bytes_available(&mut self) -> Result<usize>;

    /// Flush pending output
    async fn flush(&mut self) -> Result<()>;

    /// Get the transport name (for logging)
    fn name(&self) -> &str;
}
