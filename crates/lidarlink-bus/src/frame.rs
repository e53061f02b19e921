//! [`BusFrame`] – the hub's wire vocabulary, and the length-prefixed JSON
//! codec that carries it.
//!
//! Every frame on the socket is a 4-byte big-endian payload length followed
//! by one JSON-encoded [`BusFrame`]. The length prefix keeps the stream
//! synchronized even when a payload turns out to be garbage: the bad bytes
//! are fully consumed before the parse error is reported, so one malformed
//! frame never poisons the ones behind it.

use lidarlink_types::{BridgeError, BusUri, Message};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Upper bound on a single frame's JSON payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Client ↔ hub frames.
///
/// `Call` and `Reply` correlate through `id`; everything else belongs to the
/// registration lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusFrame {
    /// Claim a service identity on the hub.
    Register { service: String },
    /// Hub's verdict on `Register`.
    RegisterAck { ok: bool, reason: Option<String> },
    /// Bind method names under a category root.
    BindMethods {
        category: String,
        methods: Vec<String>,
    },
    /// Hub's verdict on `BindMethods`.
    BindAck { ok: bool, reason: Option<String> },
    /// A method invocation, inbound or outbound.
    Call {
        id: Uuid,
        target: BusUri,
        payload: Message,
    },
    /// The single reply correlated to an earlier `Call`.
    Reply { id: Uuid, payload: Message },
    /// Release a previously claimed service identity.
    Unregister { service: String },
}

/// Write one frame to `w`.
///
/// # Errors
///
/// [`BridgeError::BusIo`] on socket failure.
pub async fn write_frame<W>(w: &mut W, frame: &BusFrame) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
{
    // A frame enum of plain data cannot fail to serialize.
    let payload = serde_json::to_vec(frame).unwrap_or_default();
    let len = u32::try_from(payload.len())
        .map_err(|_| BridgeError::Payload("frame exceeds u32 length".to_string()))?;
    w.write_all(&len.to_be_bytes())
        .await
        .map_err(|e| BridgeError::BusIo(e.to_string()))?;
    w.write_all(&payload)
        .await
        .map_err(|e| BridgeError::BusIo(e.to_string()))?;
    w.flush().await.map_err(|e| BridgeError::BusIo(e.to_string()))
}

/// Read one frame from `r`.
///
/// Returns `Ok(None)` on a clean end-of-stream at a frame boundary (the hub
/// closed the connection).
///
/// # Errors
///
/// - [`BridgeError::Payload`] when a frame is oversized or fails to parse –
///   recoverable; the stream is still synchronized afterwards.
/// - [`BridgeError::BusIo`] when the socket fails mid-frame.
pub async fn read_frame<R>(r: &mut R) -> Result<Option<BusFrame>, BridgeError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(BridgeError::BusIo(e.to_string())),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(BridgeError::Payload(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_LEN}-byte cap"
        )));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .map_err(|e| BridgeError::BusIo(e.to_string()))?;
    serde_json::from_slice(&payload).map(Some).map_err(|e| {
        BridgeError::Payload(format!("frame failed to parse: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidarlink_types::Severity;

    fn call_frame() -> BusFrame {
        BusFrame::Call {
            id: Uuid::new_v4(),
            target: BusUri::new("io.lidarlink.clock", "clock/get_time"),
            payload: Message::new(),
        }
    }

    #[tokio::test]
    async fn roundtrip_through_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let frame = call_frame();
        write_frame(&mut a, &frame).await.unwrap();
        let back = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(frame, back);
    }

    #[tokio::test]
    async fn frames_survive_tiny_pipe_buffers() {
        // An 8-byte duplex buffer forces the codec through split writes and
        // reads; run both ends concurrently so neither side stalls.
        let (mut a, mut b) = tokio::io::duplex(8);
        let frame = BusFrame::Reply {
            id: Uuid::new_v4(),
            payload: Message::new().with("returnValue", true).with("utc", 1_700_000_000i64),
        };
        let expected = frame.clone();
        let (wrote, read) =
            tokio::join!(write_frame(&mut a, &frame), read_frame(&mut b));
        wrote.unwrap();
        assert_eq!(read.unwrap().unwrap(), expected);
    }

    #[tokio::test]
    async fn eof_at_a_frame_boundary_is_a_clean_close() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn garbage_payload_is_recoverable_and_resynchronizes() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        // A correctly-framed but unparseable payload…
        let garbage = b"this is not json";
        a.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
        a.write_all(garbage).await.unwrap();
        // …followed by a valid frame.
        let frame = call_frame();
        write_frame(&mut a, &frame).await.unwrap();

        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.severity(), Severity::Recoverable);
        // The stream is still in sync: the next read yields the good frame.
        assert_eq!(read_frame(&mut b).await.unwrap().unwrap(), frame);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes())
            .await
            .unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, BridgeError::Payload(_)));
    }

    #[test]
    fn frame_json_shape_is_tagged() {
        let json = serde_json::to_value(BusFrame::Register {
            service: "io.lidarlink.bridge".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "register");
        assert_eq!(json["service"], "io.lidarlink.bridge");
    }
}
