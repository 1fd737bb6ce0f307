//! Length-prefixed framing shared by the price, news and order endpoints.
//!
//! Every message on every socket is one self-delimiting frame:
//!
//! ```text
//! ┌──────────────┬────────────┬──────────────────────────────┐
//! │ len          │ msg_type   │ payload                      │
//! │ u32 BE       │ u8         │ len - 1 bytes                │
//! └──────────────┴────────────┴──────────────────────────────┘
//! ```
//!
//! Tick payloads are rkyv archives (validated on decode); order payloads are
//! JSON. A zero or oversized length, an unknown `msg_type`, or a payload that
//! fails to decode is [`PipelineError::MalformedMessage`]. EOF exactly at a
//! frame boundary is a clean close; EOF inside a frame is
//! [`PipelineError::ConnectionLost`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::PipelineError;
use crate::types::{OrderAck, OrderRequest, PriceTick, SentimentTick};

/// Upper bound on `len`; anything larger is treated as a framing error.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const LEN_PREFIX: usize = 4;

/// Frame discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    PriceTick = 0,
    SentimentTick = 1,
    OrderRequest = 2,
    OrderAck = 3,
}

impl TryFrom<u8> for MessageType {
    type Error = PipelineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::PriceTick),
            1 => Ok(Self::SentimentTick),
            2 => Ok(Self::OrderRequest),
            3 => Ok(Self::OrderAck),
            other => Err(PipelineError::MalformedMessage(format!("unknown message type {other}"))),
        }
    }
}

/// A message that can travel inside a frame.
pub trait WireMessage: Sized {
    const MSG_TYPE: MessageType;

    fn encode_payload(&self) -> Result<Vec<u8>, PipelineError>;

    fn decode_payload(payload: &[u8]) -> Result<Self, PipelineError>;
}

macro_rules! rkyv_message {
    ($T:ty, $msg_type:expr) => {
        impl WireMessage for $T {
            const MSG_TYPE: MessageType = $msg_type;

            fn encode_payload(&self) -> Result<Vec<u8>, PipelineError> {
                rkyv::to_bytes::<rkyv::rancor::Error>(self)
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| PipelineError::MalformedMessage(format!("encode {}: {e}", stringify!($T))))
            }

            fn decode_payload(payload: &[u8]) -> Result<Self, PipelineError> {
                // rkyv validation needs an aligned buffer.
                let mut aligned = rkyv::util::AlignedVec::<8>::with_capacity(payload.len());
                aligned.extend_from_slice(payload);
                rkyv::from_bytes::<$T, rkyv::rancor::Error>(&aligned)
                    .map_err(|e| PipelineError::MalformedMessage(format!("decode {}: {e}", stringify!($T))))
            }
        }
    };
}

macro_rules! json_message {
    ($T:ty, $msg_type:expr) => {
        impl WireMessage for $T {
            const MSG_TYPE: MessageType = $msg_type;

            fn encode_payload(&self) -> Result<Vec<u8>, PipelineError> {
                serde_json::to_vec(self)
                    .map_err(|e| PipelineError::MalformedMessage(format!("encode {}: {e}", stringify!($T))))
            }

            fn decode_payload(payload: &[u8]) -> Result<Self, PipelineError> {
                serde_json::from_slice(payload)
                    .map_err(|e| PipelineError::MalformedMessage(format!("decode {}: {e}", stringify!($T))))
            }
        }
    };
}

rkyv_message!(PriceTick, MessageType::PriceTick);
rkyv_message!(SentimentTick, MessageType::SentimentTick);
json_message!(OrderRequest, MessageType::OrderRequest);
json_message!(OrderAck, MessageType::OrderAck);

/// A raw frame as read off a socket, before payload decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Decode the payload as `M`, checking the frame carries `M`'s type.
    pub fn decode<M: WireMessage>(&self) -> Result<M, PipelineError> {
        let got = MessageType::try_from(self.msg_type)?;
        if got != M::MSG_TYPE {
            return Err(PipelineError::MalformedMessage(format!(
                "expected {:?} frame, got {got:?}",
                M::MSG_TYPE
            )));
        }
        M::decode_payload(&self.payload)
    }
}

/// Encode `msg` as a complete frame (prefix included).
pub fn encode_frame<M: WireMessage>(msg: &M) -> Result<Vec<u8>, PipelineError> {
    let payload = msg.encode_payload()?;
    let len = payload.len() + 1;
    if len > MAX_FRAME_LEN {
        return Err(PipelineError::MalformedMessage(format!("frame of {len} bytes exceeds {MAX_FRAME_LEN}")));
    }
    let mut buf = Vec::with_capacity(LEN_PREFIX + len);
    buf.extend_from_slice(&(len as u32).to_be_bytes());
    buf.push(M::MSG_TYPE as u8);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Write an already-encoded frame.
pub async fn write_raw<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<(), PipelineError> {
    writer.write_all(frame).await.map_err(|e| PipelineError::connection("write", e))?;
    writer.flush().await.map_err(|e| PipelineError::connection("flush", e))
}

/// Encode and write one message.
pub async fn write_message<W, M>(writer: &mut W, msg: &M) -> Result<(), PipelineError>
where
    W: AsyncWrite + Unpin,
    M: WireMessage,
{
    let frame = encode_frame(msg)?;
    write_raw(writer, &frame).await
}

/// Read one frame. Returns `Ok(None)` on a clean close between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>, PipelineError> {
    let mut prefix = [0u8; LEN_PREFIX];
    let mut filled = 0;
    while filled < LEN_PREFIX {
        let n = reader.read(&mut prefix[filled..]).await.map_err(|e| PipelineError::connection("read", e))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(PipelineError::ConnectionLost("peer closed inside length prefix".to_string()));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(PipelineError::MalformedMessage(format!("invalid frame length {len}")));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => PipelineError::ConnectionLost("peer closed inside frame".to_string()),
        _ => PipelineError::connection("read", e),
    })?;

    let payload = body.split_off(1);
    Ok(Some(Frame { msg_type: body[0], payload }))
}

/// Read and decode one message of type `M`. Returns `Ok(None)` on clean close.
pub async fn read_message<R, M>(reader: &mut R) -> Result<Option<M>, PipelineError>
where
    R: AsyncRead + Unpin,
    M: WireMessage,
{
    match read_frame(reader).await? {
        Some(frame) => frame.decode().map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    #[tokio::test]
    async fn price_tick_over_stream() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let tick = PriceTick::new("MSFT", 310.45, 1_700_000_000_000_000).unwrap();
        write_message(&mut a, &tick).await.unwrap();
        drop(a);

        let got: PriceTick = read_message(&mut b).await.unwrap().unwrap();
        assert_eq!(got, tick);
        assert_eq!(got.symbol(), "MSFT");
        // Clean close at a frame boundary.
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn back_to_back_frames_stay_delimited() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        for i in 0..5 {
            write_message(&mut a, &SentimentTick::new(i as f64 / 10.0, i)).await.unwrap();
        }
        write_message(&mut a, &OrderRequest::new("AMZN", Side::Sell, 3, 130.0)).await.unwrap();

        for i in 0..5 {
            let tick: SentimentTick = read_message(&mut b).await.unwrap().unwrap();
            assert_eq!(tick.timestamp_us, i);
        }
        let order: OrderRequest = read_message(&mut b).await.unwrap().unwrap();
        assert_eq!(order.side, Side::Sell);
    }

    #[tokio::test]
    async fn oversized_length_is_malformed() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes()).await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedMessage(_)));
    }

    #[tokio::test]
    async fn zero_length_is_malformed() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&0u32.to_be_bytes()).await.unwrap();
        assert!(matches!(read_frame(&mut b).await.unwrap_err(), PipelineError::MalformedMessage(_)));
    }

    #[tokio::test]
    async fn truncated_frame_is_connection_lost() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(&[2, b'{']).await.unwrap();
        drop(a);
        assert!(matches!(read_frame(&mut b).await.unwrap_err(), PipelineError::ConnectionLost(_)));
    }

    #[test]
    fn wrong_or_unknown_type_is_malformed() {
        let frame = Frame { msg_type: MessageType::OrderAck as u8, payload: b"{\"accepted\":true}".to_vec() };
        assert!(matches!(frame.decode::<OrderRequest>(), Err(PipelineError::MalformedMessage(_))));
        assert!(frame.decode::<OrderAck>().unwrap().accepted);

        let unknown = Frame { msg_type: 42, payload: vec![] };
        assert!(matches!(unknown.decode::<OrderAck>(), Err(PipelineError::MalformedMessage(_))));
    }

    #[test]
    fn garbage_payloads_are_malformed() {
        let frame = Frame { msg_type: MessageType::OrderRequest as u8, payload: b"not an order".to_vec() };
        assert!(matches!(frame.decode::<OrderRequest>(), Err(PipelineError::MalformedMessage(_))));

        let frame = Frame { msg_type: MessageType::PriceTick as u8, payload: vec![1, 2, 3] };
        assert!(matches!(frame.decode::<PriceTick>(), Err(PipelineError::MalformedMessage(_))));
    }

    #[test]
    fn frame_layout() {
        let bytes = encode_frame(&OrderAck::accepted(1)).unwrap();
        let len = u32::from_be_bytes(bytes[..4].try_into().unwrap()) as usize;
        assert_eq!(len, bytes.len() - 4);
        assert_eq!(bytes[4], MessageType::OrderAck as u8);
    }
}
