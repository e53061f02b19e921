//! [`EventLoop`] – the single-threaded cooperative dispatcher.
//!
//! One current-thread tokio runtime owns all bus traffic: inbound-method
//! handlers and outbound-call continuations run interleaved on this one
//! thread, never concurrently, so handlers need no locking – but they must
//! not block, since a stalled handler stalls every piece of bus I/O in the
//! process.
//!
//! The loop stops on two conditions only: the [`ShutdownHandle`] fires
//! (process termination via signal handler), or the hub closes the
//! connection. Per-frame trouble never stops it.

use std::future::Future;

use lidarlink_types::BridgeError;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::endpoint::ServiceEndpoint;

/// Externally-triggerable stop signal for a running [`EventLoop`].
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Ask the loop to stop after the frame it is currently dispatching.
    /// Safe to call from any thread, any number of times.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Single-threaded cooperative dispatcher for one [`ServiceEndpoint`].
pub struct EventLoop {
    rt: tokio::runtime::Runtime,
    shutdown_tx: watch::Sender<bool>,
}

impl EventLoop {
    /// Build the loop's current-thread runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::LoopAttach`] (fatal-startup) when the runtime
    /// cannot be constructed.
    pub fn new() -> Result<Self, BridgeError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BridgeError::LoopAttach(format!("runtime: {e}")))?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self { rt, shutdown_tx })
    }

    /// Handle for signal handlers and supervisors to stop the loop.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Run one future to completion on the loop's thread. Used for the
    /// async lifecycle steps before the service loop proper starts.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.rt.block_on(fut)
    }

    /// Dispatch inbound frames until shutdown or hub close. Returns with the
    /// endpoint in [`Running`][crate::endpoint::EndpointState::Running]
    /// state, ready for its terminal unregister.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::LoopAttach`] when `endpoint` was never
    /// attached to this loop.
    pub fn run(&self, endpoint: &mut ServiceEndpoint) -> Result<(), BridgeError> {
        let mut shutdown = endpoint.take_shutdown().ok_or_else(|| {
            BridgeError::LoopAttach("endpoint is not attached to this loop".to_string())
        })?;
        endpoint.mark_running();
        info!(service = %endpoint.service(), "service loop running");

        self.rt.block_on(async {
            loop {
                if *shutdown.borrow() {
                    info!("shutdown requested; leaving the service loop");
                    break;
                }
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    frame = endpoint.next_frame() => match frame {
                        Ok(Some(frame)) => endpoint.dispatch(frame).await,
                        Ok(None) => {
                            info!("hub closed the connection; leaving the service loop");
                            break;
                        }
                        Err(e) => warn!(error = %e, "skipping malformed frame"),
                    }
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{EndpointState, MethodHandler};
    use crate::frame::BusFrame;
    use crate::loopback;
    use lidarlink_types::{BusUri, Message};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    const SERVICE: &str = "io.lidarlink.bridge";

    fn counting_handler(calls: Arc<AtomicUsize>) -> MethodHandler {
        Box::new(move |_: &Message| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Message::new().with("returnValue", true))
        })
    }

    /// Endpoint registered, bound, and attached, driven via `block_on`.
    fn ready_endpoint(
        event_loop: &EventLoop,
        calls: Arc<AtomicUsize>,
    ) -> (ServiceEndpoint, loopback::HubHandle) {
        let (bus, mut hub) = loopback::pair();
        let mut endpoint = ServiceEndpoint::new(SERVICE, Box::new(bus));
        hub.push(BusFrame::RegisterAck {
            ok: true,
            reason: None,
        });
        hub.push(BusFrame::BindAck {
            ok: true,
            reason: None,
        });
        event_loop.block_on(endpoint.register()).unwrap();
        event_loop
            .block_on(
                endpoint.bind_methods("/", vec![("hello".to_string(), counting_handler(calls))]),
            )
            .unwrap();
        endpoint.attach(event_loop).unwrap();
        hub.drain_sent();
        (endpoint, hub)
    }

    #[test]
    fn run_refuses_an_unattached_endpoint() {
        let event_loop = EventLoop::new().unwrap();
        let (bus, _hub) = loopback::pair();
        let mut endpoint = ServiceEndpoint::new(SERVICE, Box::new(bus));
        let err = event_loop.run(&mut endpoint).unwrap_err();
        assert!(matches!(err, lidarlink_types::BridgeError::LoopAttach(_)));
    }

    #[test]
    fn a_prefired_shutdown_stops_the_loop_immediately() {
        let event_loop = EventLoop::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let (mut endpoint, _hub) = ready_endpoint(&event_loop, calls);

        event_loop.shutdown_handle().shutdown();
        event_loop.run(&mut endpoint).unwrap();
        assert_eq!(endpoint.state(), EndpointState::Running);
    }

    #[test]
    fn queued_frames_are_dispatched_before_a_hub_close_ends_the_loop() {
        let event_loop = EventLoop::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let (mut endpoint, mut hub) = ready_endpoint(&event_loop, calls.clone());

        hub.push(BusFrame::Call {
            id: Uuid::new_v4(),
            target: BusUri::new(SERVICE, "hello"),
            payload: Message::new(),
        });
        hub.push(BusFrame::Call {
            id: Uuid::new_v4(),
            target: BusUri::new(SERVICE, "hello"),
            payload: Message::new(),
        });
        hub.close_incoming();

        event_loop.run(&mut endpoint).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let replies = hub.drain_sent();
        assert_eq!(replies.len(), 2);
        assert!(replies
            .iter()
            .all(|f| matches!(f, BusFrame::Reply { .. })));
    }

    #[test]
    fn a_reply_arriving_during_the_loop_fires_the_continuation() {
        let event_loop = EventLoop::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let (mut endpoint, mut hub) = ready_endpoint(&event_loop, calls);

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_cb = fired.clone();
        let id = event_loop
            .block_on(endpoint.call(
                BusUri::new("io.lidarlink.clock", "clock/get_time"),
                Message::new(),
                Box::new(move |reply: &Message| {
                    assert_eq!(reply.i64("utc"), Some(1_700_000_000));
                    fired_in_cb.fetch_add(1, Ordering::SeqCst);
                }),
            ))
            .unwrap();

        hub.push(BusFrame::Reply {
            id,
            payload: Message::new()
                .with("returnValue", true)
                .with("utc", 1_700_000_000i64),
        });
        hub.close_incoming();
        event_loop.run(&mut endpoint).unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(endpoint.pending_calls(), 0);
    }

    #[test]
    fn a_malformed_frame_never_stops_the_loop() {
        use crate::transport::BusTransport;
        use lidarlink_types::BridgeError;
        use std::collections::VecDeque;
        use std::sync::Mutex;

        /// Transport scripted at the `recv` level, so a decode error can be
        /// injected between good frames.
        struct ScriptedBus {
            script: VecDeque<Result<Option<BusFrame>, BridgeError>>,
            sent: Arc<Mutex<Vec<BusFrame>>>,
        }

        #[async_trait::async_trait]
        impl BusTransport for ScriptedBus {
            async fn send(&mut self, frame: BusFrame) -> Result<(), BridgeError> {
                self.sent.lock().unwrap().push(frame);
                Ok(())
            }
            async fn recv(&mut self) -> Result<Option<BusFrame>, BridgeError> {
                self.script.pop_front().unwrap_or(Ok(None))
            }
        }

        let sent = Arc::new(Mutex::new(Vec::new()));
        let script = VecDeque::from([
            Ok(Some(BusFrame::RegisterAck {
                ok: true,
                reason: None,
            })),
            Ok(Some(BusFrame::BindAck {
                ok: true,
                reason: None,
            })),
            // The poison pill: a frame that failed to decode.
            Err(BridgeError::Payload("frame failed to parse".to_string())),
            Ok(Some(BusFrame::Call {
                id: Uuid::new_v4(),
                target: BusUri::new(SERVICE, "hello"),
                payload: Message::new(),
            })),
            Ok(None),
        ]);

        let event_loop = EventLoop::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut endpoint = ServiceEndpoint::new(
            SERVICE,
            Box::new(ScriptedBus {
                script,
                sent: sent.clone(),
            }),
        );
        event_loop.block_on(endpoint.register()).unwrap();
        event_loop
            .block_on(endpoint.bind_methods(
                "/",
                vec![("hello".to_string(), counting_handler(calls.clone()))],
            ))
            .unwrap();
        endpoint.attach(&event_loop).unwrap();

        event_loop.run(&mut endpoint).unwrap();

        // The call behind the bad frame was still dispatched and answered.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sent
            .lock()
            .unwrap()
            .iter()
            .any(|f| matches!(f, BusFrame::Reply { .. })));
    }

    #[test]
    fn shutdown_from_another_thread_stops_a_blocked_loop() {
        let event_loop = EventLoop::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        // Keep the hub alive so the loop has nothing to read and must wait.
        let (mut endpoint, _hub) = ready_endpoint(&event_loop, calls);

        let handle = event_loop.shutdown_handle();
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            handle.shutdown();
        });

        event_loop.run(&mut endpoint).unwrap();
        trigger.join().unwrap();
    }
}
