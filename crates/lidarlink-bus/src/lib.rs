//! `lidarlink-bus` – the service's side of the message bus.
//!
//! The hub itself is an external collaborator; this crate implements what a
//! service needs to live on it:
//!
//! - [`frame`] – the [`BusFrame`] wire enum and its length-prefixed JSON
//!   codec.
//! - [`transport`] – the [`BusTransport`] seam plus [`UnixBus`], the real
//!   hub connection over a Unix socket.
//! - [`loopback`] – [`LoopbackBus`] and [`HubHandle`], an in-process hub
//!   double for tests.
//! - [`endpoint`] – [`ServiceEndpoint`], the registration lifecycle state
//!   machine with the method table and pending-call continuations.
//! - [`event_loop`] – [`EventLoop`], the single-threaded cooperative
//!   dispatcher, and its [`ShutdownHandle`].

pub mod endpoint;
pub mod event_loop;
pub mod frame;
pub mod loopback;
pub mod transport;

pub use endpoint::{EndpointState, MethodHandler, ReplyCallback, ServiceEndpoint};
pub use event_loop::{EventLoop, ShutdownHandle};
pub use frame::BusFrame;
pub use loopback::{HubHandle, LoopbackBus};
pub use transport::{BusTransport, UnixBus};
