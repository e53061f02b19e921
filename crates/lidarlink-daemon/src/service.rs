//! Bus-facing half of the daemon: the `hello` method, the one-shot clock
//! query, and the registration lifecycle around the service loop.

use lidarlink_bus::{BusTransport, EventLoop, MethodHandler, ReplyCallback, ServiceEndpoint};
use lidarlink_types::{BridgeError, BusUri, Message};
use tracing::{debug, info, warn};

use crate::config::Config;

/// Normal shutdown.
pub const EXIT_OK: i32 = 0;
/// The lidar driver could not be allocated at all.
pub const EXIT_DRIVER_UNAVAILABLE: i32 = 2;
/// A fatal bus-registration step failed.
pub const EXIT_BUS_STARTUP: i32 = 3;

const HELLO_ANSWER: &str = "Hello from the lidar bridge!";

/// The `hello` method: any input, affirmative reply with a fixed greeting.
pub fn hello_method() -> (String, MethodHandler) {
    (
        "hello".to_string(),
        Box::new(|_request: &Message| {
            info!("hello method called");
            Ok(Message::new()
                .with("returnValue", true)
                .with("answer", HELLO_ANSWER))
        }),
    )
}

/// Pull the epoch value out of a clock reply, but only when the peer
/// answered affirmatively.
fn extract_utc(reply: &Message) -> Option<i64> {
    if reply.bool("returnValue")? {
        reply.i64("utc")
    } else {
        None
    }
}

/// Continuation for the clock query: log the epoch on success, stay quiet
/// (and alive) on anything else.
pub fn clock_reply_logger() -> ReplyCallback {
    Box::new(|reply: &Message| match extract_utc(reply) {
        Some(utc) => info!(utc, "peer clock answered"),
        None => debug!(reply = %reply.to_json(), "clock reply unusable; ignored"),
    })
}

/// Drive the endpoint through its whole lifecycle: register, bind, attach,
/// issue the clock query, run until shutdown, release the identity.
///
/// # Errors
///
/// Every error out of this function is fatal-startup – the caller exits
/// with [`EXIT_BUS_STARTUP`]. Post-startup trouble is logged here and
/// absorbed.
pub fn serve(
    cfg: &Config,
    event_loop: &EventLoop,
    transport: Box<dyn BusTransport>,
) -> Result<(), BridgeError> {
    let mut endpoint = ServiceEndpoint::new(cfg.service_name.clone(), transport);
    event_loop.block_on(endpoint.register())?;
    event_loop.block_on(endpoint.bind_methods("/", vec![hello_method()]))?;
    endpoint.attach(event_loop)?;

    // Fire-and-forget: the reply, if one ever comes, is handled on the loop.
    match cfg.time_service.parse::<BusUri>() {
        Ok(target) => {
            if let Err(e) =
                event_loop.block_on(endpoint.call(target, Message::new(), clock_reply_logger()))
            {
                warn!(error = %e, "clock query could not be issued");
            }
        }
        Err(e) => warn!(error = %e, "bad clock address in config; skipping the query"),
    }

    event_loop.run(&mut endpoint)?;

    if let Err(e) = event_loop.block_on(endpoint.unregister()) {
        warn!(error = %e, "identity release failed during shutdown");
    }
    Ok(())
}
