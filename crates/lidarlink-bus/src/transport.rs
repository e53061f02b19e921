//! [`BusTransport`] – the seam between the endpoint and whatever carries its
//! frames.
//!
//! The endpoint never touches a socket directly. It talks to this trait, so
//! the real [`UnixBus`] connection and the in-process
//! [`LoopbackBus`][crate::loopback::LoopbackBus] are interchangeable.

use async_trait::async_trait;
use lidarlink_types::BridgeError;
use tokio::net::UnixStream;

use crate::frame::{read_frame, write_frame, BusFrame};

/// One bidirectional frame stream to the hub.
#[async_trait]
pub trait BusTransport: Send {
    /// Send one frame.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::BusIo`] when the hub connection is gone.
    async fn send(&mut self, frame: BusFrame) -> Result<(), BridgeError>;

    /// Receive the next frame. `Ok(None)` means the hub closed the
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Payload`] for a malformed frame (recoverable –
    /// the stream is still usable) and [`BridgeError::BusIo`] for socket
    /// failure.
    async fn recv(&mut self) -> Result<Option<BusFrame>, BridgeError>;
}

/// The real hub connection: framed JSON over a Unix domain socket.
#[derive(Debug)]
pub struct UnixBus {
    stream: UnixStream,
}

impl UnixBus {
    /// Connect to the hub's socket.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::BusIo`] when the socket cannot be reached; the
    /// caller decides whether that is fatal (it is, during startup).
    pub async fn connect(path: &str) -> Result<Self, BridgeError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| BridgeError::BusIo(format!("connect {path}: {e}")))?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl BusTransport for UnixBus {
    async fn send(&mut self, frame: BusFrame) -> Result<(), BridgeError> {
        write_frame(&mut self.stream, &frame).await
    }

    async fn recv(&mut self) -> Result<Option<BusFrame>, BridgeError> {
        read_frame(&mut self.stream).await
    }
}
