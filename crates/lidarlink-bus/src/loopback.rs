//! [`LoopbackBus`] – an in-process hub double.
//!
//! Mirrors the HAL's scripted sim driver: tests (and headless CI runs) play
//! the hub through a [`HubHandle`], queueing frames for the client and
//! inspecting what the client sent. Because the queues are plain channels,
//! acks can be staged *before* the lifecycle call that awaits them, which
//! keeps endpoint tests single-threaded.

use async_trait::async_trait;
use lidarlink_types::BridgeError;
use tokio::sync::mpsc;

use crate::frame::BusFrame;
use crate::transport::BusTransport;

/// Client end of an in-process hub connection.
pub struct LoopbackBus {
    to_hub: mpsc::UnboundedSender<BusFrame>,
    from_hub: mpsc::UnboundedReceiver<BusFrame>,
}

/// Test-side end: what the hub would see and do.
pub struct HubHandle {
    to_client: Option<mpsc::UnboundedSender<BusFrame>>,
    from_client: mpsc::UnboundedReceiver<BusFrame>,
}

/// Create a connected client/hub pair.
pub fn pair() -> (LoopbackBus, HubHandle) {
    let (to_hub, from_client) = mpsc::unbounded_channel();
    let (to_client, from_hub) = mpsc::unbounded_channel();
    (
        LoopbackBus { to_hub, from_hub },
        HubHandle {
            to_client: Some(to_client),
            from_client,
        },
    )
}

impl HubHandle {
    /// Queue a frame for the client. Frames queued before the client awaits
    /// are delivered in order.
    pub fn push(&self, frame: BusFrame) {
        if let Some(tx) = &self.to_client {
            // The client dropping its receiver just means the test tore it
            // down first.
            let _ = tx.send(frame);
        }
    }

    /// Stop sending: after the queued frames drain, the client sees a hub
    /// close (`recv` → `None`).
    pub fn close_incoming(&mut self) {
        self.to_client = None;
    }

    /// Drain everything the client has sent so far.
    pub fn drain_sent(&mut self) -> Vec<BusFrame> {
        let mut out = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            out.push(frame);
        }
        out
    }
}

#[async_trait]
impl BusTransport for LoopbackBus {
    async fn send(&mut self, frame: BusFrame) -> Result<(), BridgeError> {
        self.to_hub
            .send(frame)
            .map_err(|_| BridgeError::BusIo("hub side closed".to_string()))
    }

    async fn recv(&mut self) -> Result<Option<BusFrame>, BridgeError> {
        Ok(self.from_hub.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn staged_frames_arrive_in_order_then_close() {
        let (mut bus, mut hub) = pair();
        hub.push(BusFrame::RegisterAck {
            ok: true,
            reason: None,
        });
        hub.push(BusFrame::BindAck {
            ok: true,
            reason: None,
        });
        hub.close_incoming();

        assert!(matches!(
            bus.recv().await.unwrap(),
            Some(BusFrame::RegisterAck { ok: true, .. })
        ));
        assert!(matches!(
            bus.recv().await.unwrap(),
            Some(BusFrame::BindAck { ok: true, .. })
        ));
        assert!(bus.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hub_observes_client_sends() {
        let (mut bus, mut hub) = pair();
        bus.send(BusFrame::Unregister {
            service: "io.lidarlink.bridge".to_string(),
        })
        .await
        .unwrap();
        let sent = hub.drain_sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], BusFrame::Unregister { .. }));
    }
}
