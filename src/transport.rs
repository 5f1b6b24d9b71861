//! Concrete transports behind the [`Transport`](crate::endpoint::Transport)
//! seam.
//!
//! The serial side opens a COM/tty device through `tokio-serial`; the
//! network side dials the CAN server over TCP with a connect timeout. Both
//! are plain byte streams — all framing lives in the codec layer.

use std::io;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::{Duration, timeout},
};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::endpoint::{Connector, Transport, TransportError};

/// Default serial baud rate used by CAN29 hardware.
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

/// Dials the CAN server over TCP.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Connector for `addr` with the given connect timeout.
    #[must_use]
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout(self.connect_timeout))?
            .map_err(TransportError::Open)?;
        Ok(Box::new(TcpTransport { stream }))
    }
}

/// TCP byte stream to the CAN server.
pub struct TcpTransport {
    stream: TcpStream,
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        self.stream.read_buf(buf).await
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await
    }

    async fn close(&mut self) -> io::Result<()> { self.stream.shutdown().await }
}

/// Opens the serial/COM device the client software is paired with.
#[derive(Clone, Debug)]
pub struct SerialConnector {
    path: String,
    baud_rate: u32,
}

impl SerialConnector {
    /// Connector for the serial device at `path`.
    #[must_use]
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let stream = tokio_serial::new(&self.path, self.baud_rate)
            .open_native_async()
            .map_err(|err| TransportError::Open(io::Error::other(err)))?;
        Ok(Box::new(SerialTransport { stream }))
    }
}

/// Serial byte stream to the client side.
pub struct SerialTransport {
    stream: SerialStream,
}

#[async_trait]
impl Transport for SerialTransport {
    async fn read(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        self.stream.read_buf(buf).await
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        // Clients poll the port with short timeouts; flush each message so
        // answers are never held back by buffering.
        self.stream.flush().await
    }

    async fn close(&mut self) -> io::Result<()> { self.stream.shutdown().await }
}
