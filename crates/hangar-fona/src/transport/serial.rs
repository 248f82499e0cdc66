//! Serial port transport for the Fona modem
//!
//! Uses tokio-serial for async reads and writes. The Fona ships configured
//! for 8N1 with no flow control, which is the tokio-serial default.

use crate::error::{FonaError, Result};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, trace};

/// Buffer size for reading from serial port
const READ_BUFFER_SIZE: usize = 512;

/// Serial connection to the modem
pub struct SerialTransport {
    /// Serial port path
    port_path: PathBuf,

    /// Baud rate
    baud_rate: u32,

    /// Open serial stream
    stream: SerialStream,

    /// Transport name for logging
    name: String,
}

impl SerialTransport {
    /// Open the serial port and discard anything left in its buffers
    pub fn open(port: impl AsRef<Path>, baud_rate: u32) -> Result<Self> {
        let port_path = port.as_ref().to_path_buf();
        info!(port = %port_path.display(), baud = baud_rate, "Opening serial port");

        if !port_path.exists() {
            return Err(FonaError::PortOpenFailed {
                port: port_path.display().to_string(),
                reason: "no such device".to_string(),
            });
        }

        let stream = tokio_serial::new(port_path.to_string_lossy(), baud_rate)
            .open_native_async()
            .map_err(|e| FonaError::PortOpenFailed {
                port: port_path.display().to_string(),
                reason: e.to_string(),
            })?;

        stream.clear(ClearBuffer::All)?;

        let name = format!("serial:{}", port_path.display());
        Ok(Self {
            port_path,
            baud_rate,
            stream,
            name,
        })
    }

    /// Get the port path
    pub fn port_path(&self) -> &Path {
        &self.port_path
    }

    /// Get the baud rate
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        trace!(size = bytes.len(), "Writing to serial port");
        self.stream
            .write_all(bytes)
            .await
            .map_err(|e| FonaError::WriteError(e.to_string()))?;
        Ok(bytes.len())
    }

    async fn read(&mut self, max_wait: Duration) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(READ_BUFFER_SIZE);

        match tokio::time::timeout(max_wait, self.stream.read(&mut buf)).await {
            Ok(Ok(n)) => {
                trace!(bytes = n, "Read from serial port");
                buf.truncate(n);
                Ok(buf.freeze())
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Bytes::new()),
            Ok(Err(e)) => Err(FonaError::ReadError(e.to_string())),
            Err(_) => {
                debug!(
                    wait_ms = max_wait.as_millis() as u64,
                    "No serial data before timeout"
                );
                Ok(Bytes::new())
            }
        }
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let pending = self.stream.bytes_to_read()?;
        Ok(pending as usize)
    }

    async fn flush(&mut self) -> Result<()> {
        self.stream
            .flush()
            .await
            .map_err(|e| FonaError::WriteError(format!("Flush failed: {}", e)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.port_path)
            .field("baud_rate", &self.baud_rate)
            .finish()
    }
}
