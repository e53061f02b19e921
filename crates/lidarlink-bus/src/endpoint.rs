//! [`ServiceEndpoint`] – one service identity on the bus.
//!
//! The endpoint walks a strict lifecycle:
//!
//! ```text
//! Unregistered → Registered → MethodsBound → LoopAttached → Running → Released
//! ```
//!
//! Every arrow is one fallible step. Failures before `Running` carry
//! fatal-startup severity – the process must not serve half-registered.
//! Once running, nothing the endpoint does may take the loop down: handler
//! failures become `returnValue: false` replies, malformed payloads are
//! logged and dropped, and the terminal unregister is attempted exactly once
//! whatever came before.
//!
//! Outbound calls are fire-and-forget: [`ServiceEndpoint::call`] registers a
//! continuation under a fresh correlation id and returns immediately. The
//! continuation runs on the event loop when (and only if) the correlated
//! reply arrives – there is no timeout, so a silent peer leaves the pending
//! call parked indefinitely.

use std::collections::HashMap;

use lidarlink_types::{BridgeError, BusUri, Message};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event_loop::EventLoop;
use crate::frame::BusFrame;
use crate::transport::BusTransport;

/// An inbound-method handler: consumes the request payload, produces the
/// reply payload or a local failure.
pub type MethodHandler = Box<dyn FnMut(&Message) -> Result<Message, BridgeError> + Send>;

/// A reply continuation for one outbound call. Consumed on invocation –
/// at most once per call.
pub type ReplyCallback = Box<dyn FnOnce(&Message) + Send>;

/// Lifecycle position of a [`ServiceEndpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// No identity claimed yet.
    Unregistered,
    /// Identity accepted by the hub.
    Registered,
    /// Method table bound under its category root.
    MethodsBound,
    /// Wired to an event loop's shutdown signal.
    LoopAttached,
    /// Inside the service loop.
    Running,
    /// Identity released; terminal.
    Released,
}

/// One service identity: registration lifecycle, method table, and
/// pending-call continuations.
pub struct ServiceEndpoint {
    service: String,
    state: EndpointState,
    methods: HashMap<String, MethodHandler>,
    pending: HashMap<Uuid, ReplyCallback>,
    transport: Box<dyn BusTransport>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl ServiceEndpoint {
    /// A new, unregistered endpoint over an established hub connection.
    pub fn new(service: impl Into<String>, transport: Box<dyn BusTransport>) -> Self {
        Self {
            service: service.into(),
            state: EndpointState::Unregistered,
            methods: HashMap::new(),
            pending: HashMap::new(),
            transport,
            shutdown: None,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Number of outstanding outbound calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Claim the service identity on the hub.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Registration`] (fatal-startup) when the hub is
    /// unreachable, refuses the identity, or answers out of protocol.
    pub async fn register(&mut self) -> Result<(), BridgeError> {
        if self.state != EndpointState::Unregistered {
            return Err(self.registration_error(format!(
                "register called in state {:?}",
                self.state
            )));
        }
        self.transport
            .send(BusFrame::Register {
                service: self.service.clone(),
            })
            .await
            .map_err(|e| self.registration_error(e.to_string()))?;

        match self.transport.recv().await {
            Ok(Some(BusFrame::RegisterAck { ok: true, .. })) => {
                info!(service = %self.service, "registered on the bus");
                self.state = EndpointState::Registered;
                Ok(())
            }
            Ok(Some(BusFrame::RegisterAck { ok: false, reason })) => Err(self
                .registration_error(
                    reason.unwrap_or_else(|| "hub refused the identity".to_string()),
                )),
            Ok(Some(other)) => {
                Err(self.registration_error(format!("unexpected frame {other:?}")))
            }
            Ok(None) => Err(self.registration_error("hub closed during registration".to_string())),
            Err(e) => Err(self.registration_error(e.to_string())),
        }
    }

    /// Bind a table of `(name, handler)` pairs under `category`.
    ///
    /// Method names must be unique within the registration – checked locally
    /// before the hub ever sees the table.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MethodBind`] (fatal-startup) on a name
    /// collision, an out-of-order call, or hub refusal.
    pub async fn bind_methods(
        &mut self,
        category: &str,
        methods: Vec<(String, MethodHandler)>,
    ) -> Result<(), BridgeError> {
        if self.state != EndpointState::Registered {
            return Err(BridgeError::MethodBind(format!(
                "bind_methods called in state {:?}",
                self.state
            )));
        }

        let mut names = Vec::with_capacity(methods.len());
        let mut table = HashMap::new();
        for (name, handler) in methods {
            let qualified = qualify(category, &name);
            if self.methods.contains_key(&qualified) || table.contains_key(&qualified) {
                return Err(BridgeError::MethodBind(format!(
                    "duplicate method name '{qualified}'"
                )));
            }
            names.push(name);
            table.insert(qualified, handler);
        }

        self.transport
            .send(BusFrame::BindMethods {
                category: category.to_string(),
                methods: names,
            })
            .await
            .map_err(|e| BridgeError::MethodBind(e.to_string()))?;

        match self.transport.recv().await {
            Ok(Some(BusFrame::BindAck { ok: true, .. })) => {
                info!(service = %self.service, category, count = table.len(), "methods bound");
                self.methods.extend(table);
                self.state = EndpointState::MethodsBound;
                Ok(())
            }
            Ok(Some(BusFrame::BindAck { ok: false, reason })) => Err(BridgeError::MethodBind(
                reason.unwrap_or_else(|| "hub refused the method table".to_string()),
            )),
            Ok(Some(other)) => Err(BridgeError::MethodBind(format!(
                "unexpected frame {other:?}"
            ))),
            Ok(None) => Err(BridgeError::MethodBind(
                "hub closed during method bind".to_string(),
            )),
            Err(e) => Err(BridgeError::MethodBind(e.to_string())),
        }
    }

    /// Wire this endpoint to `event_loop`'s shutdown signal.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::LoopAttach`] (fatal-startup) when called out
    /// of lifecycle order.
    pub fn attach(&mut self, event_loop: &EventLoop) -> Result<(), BridgeError> {
        if self.state != EndpointState::MethodsBound {
            return Err(BridgeError::LoopAttach(format!(
                "attach called in state {:?}",
                self.state
            )));
        }
        self.shutdown = Some(event_loop.subscribe());
        self.state = EndpointState::LoopAttached;
        Ok(())
    }

    /// Issue one outbound call. Fire-and-forget: returns as soon as the
    /// frame is on the wire. `callback` runs on the event loop when the
    /// correlated reply arrives – at most once, possibly never.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::BusIo`] (recoverable – log and move on) when
    /// the frame cannot be sent; the continuation is dropped with it.
    pub async fn call(
        &mut self,
        target: BusUri,
        payload: Message,
        callback: ReplyCallback,
    ) -> Result<Uuid, BridgeError> {
        if matches!(
            self.state,
            EndpointState::Unregistered | EndpointState::Released
        ) {
            return Err(BridgeError::BusIo(format!(
                "call issued in state {:?}",
                self.state
            )));
        }
        let id = Uuid::new_v4();
        self.pending.insert(id, callback);
        debug!(%id, %target, "outbound call issued");
        if let Err(e) = self
            .transport
            .send(BusFrame::Call {
                id,
                target,
                payload,
            })
            .await
        {
            self.pending.remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Release the bus identity. Attempted exactly once: the endpoint moves
    /// to [`EndpointState::Released`] whether or not the frame made it out.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Unregister`] (recoverable – the process is
    /// already shutting down) on a repeated attempt or a send failure.
    pub async fn unregister(&mut self) -> Result<(), BridgeError> {
        match self.state {
            EndpointState::Unregistered => {
                Err(BridgeError::Unregister("never registered".to_string()))
            }
            EndpointState::Released => {
                Err(BridgeError::Unregister("already released".to_string()))
            }
            _ => {
                self.state = EndpointState::Released;
                self.transport
                    .send(BusFrame::Unregister {
                        service: self.service.clone(),
                    })
                    .await
                    .map_err(|e| BridgeError::Unregister(e.to_string()))?;
                info!(service = %self.service, "unregistered from the bus");
                Ok(())
            }
        }
    }

    // ── Event-loop plumbing ──────────────────────────────────────────────────

    pub(crate) fn take_shutdown(&mut self) -> Option<watch::Receiver<bool>> {
        self.shutdown.take()
    }

    pub(crate) fn mark_running(&mut self) {
        self.state = EndpointState::Running;
    }

    pub(crate) async fn next_frame(&mut self) -> Result<Option<BusFrame>, BridgeError> {
        self.transport.recv().await
    }

    /// Route one inbound frame. Never fails – per-message trouble is logged
    /// and the loop keeps going.
    pub(crate) async fn dispatch(&mut self, frame: BusFrame) {
        match frame {
            BusFrame::Call {
                id,
                target,
                payload,
            } if target.service == self.service => {
                self.dispatch_call(id, &target.method, &payload).await;
            }
            BusFrame::Call { target, .. } => {
                debug!(%target, "call addressed to another service ignored");
            }
            BusFrame::Reply { id, payload } => match self.pending.remove(&id) {
                Some(callback) => callback(&payload),
                None => debug!(%id, "reply with unknown correlation id ignored"),
            },
            other => debug!(?other, "lifecycle frame outside startup ignored"),
        }
    }

    async fn dispatch_call(&mut self, id: Uuid, method: &str, payload: &Message) {
        let reply = match self.methods.get_mut(method) {
            Some(handler) => match handler(payload) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(method, error = %e, "handler failed; answering negatively");
                    Message::new().with("returnValue", false)
                }
            },
            None => {
                warn!(method, "call to unbound method");
                Message::new().with("returnValue", false)
            }
        };
        if let Err(e) = self
            .transport
            .send(BusFrame::Reply { id, payload: reply })
            .await
        {
            let e = BridgeError::ReplySend(e.to_string());
            warn!(error = %e, method, "reply dropped");
        }
    }

    fn registration_error(&self, reason: String) -> BridgeError {
        BridgeError::Registration {
            service: self.service.clone(),
            reason,
        }
    }
}

/// Join a category root and a method name into the path carried by call
/// targets: `("/", "hello")` → `"hello"`, `("/clock", "get_time")` →
/// `"clock/get_time"`.
fn qualify(category: &str, name: &str) -> String {
    let cat = category.trim_matches('/');
    if cat.is_empty() {
        name.to_string()
    } else {
        format!("{cat}/{name}")
    }
}
