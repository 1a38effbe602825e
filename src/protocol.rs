use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Packet too short")]
    PacketTooShort,
    #[error("Unknown message kind {0:#04x}")]
    UnknownKind(u8),
    #[error("Invalid UTF-8 in space descriptor")]
    InvalidUtf8,
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
    #[error("Frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Empty = 0x00,
    Init = 0x01,
    Step = 0x02,
    Shutdown = 0x03,
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x00 => Ok(MessageKind::Empty),
            0x01 => Ok(MessageKind::Init),
            0x02 => Ok(MessageKind::Step),
            0x03 => Ok(MessageKind::Shutdown),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

/// Header in front of every bridge message.
///
/// Layout:
/// - kind: u8 (1 byte)
/// - id: u64 (8 bytes)
/// Total: 9 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub kind: MessageKind,
    pub id: u64,
}

impl MessageHeader {
    pub const SIZE: usize = 9;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.kind as u8);
        buf.put_u64(self.id);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        if buf.remaining() < Self::SIZE {
            return Err(ProtocolError::PacketTooShort);
        }
        let kind = MessageKind::try_from(buf.get_u8())?;
        let id = buf.get_u64();
        Ok(Self { kind, id })
    }
}

/// Largest payload accepted on the wire.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Init {
        observation_space: String,
        action_space: String,
    },
    Step {
        observation: Vec<f64>,
        reward: Vec<f64>,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Empty,
    Init,
    Step { action: Vec<f64> },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: u64,
    pub body: ReplyBody,
}

impl Reply {
    /// What a disabled bridge answers with.
    pub fn empty() -> Self {
        Self {
            id: 0,
            body: ReplyBody::Empty,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self.body {
            ReplyBody::Empty => MessageKind::Empty,
            ReplyBody::Init => MessageKind::Init,
            ReplyBody::Step { .. } => MessageKind::Step,
            ReplyBody::Shutdown => MessageKind::Shutdown,
        }
    }
}

impl Request {
    pub fn kind(&self) -> MessageKind {
        match self.body {
            RequestBody::Init { .. } => MessageKind::Init,
            RequestBody::Step { .. } => MessageKind::Step,
            RequestBody::Shutdown => MessageKind::Shutdown,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MessageHeader::SIZE + 64);
        MessageHeader {
            kind: self.kind(),
            id: self.id,
        }
        .encode(&mut buf);
        match &self.body {
            RequestBody::Init {
                observation_space,
                action_space,
            } => {
                put_string(&mut buf, observation_space);
                put_string(&mut buf, action_space);
            }
            RequestBody::Step {
                observation,
                reward,
            } => {
                put_box(&mut buf, observation);
                put_box(&mut buf, reward);
            }
            RequestBody::Shutdown => {}
        }
        buf.freeze()
    }

    pub fn decode(mut packet: Bytes) -> Result<Self, ProtocolError> {
        let header = MessageHeader::decode(&mut packet)?;
        let body = match header.kind {
            MessageKind::Init => RequestBody::Init {
                observation_space: get_string(&mut packet)?,
                action_space: get_string(&mut packet)?,
            },
            MessageKind::Step => RequestBody::Step {
                observation: get_box(&mut packet)?,
                reward: get_box(&mut packet)?,
            },
            MessageKind::Shutdown => RequestBody::Shutdown,
            MessageKind::Empty => return Err(ProtocolError::UnknownKind(MessageKind::Empty as u8)),
        };
        ensure_consumed(&packet)?;
        Ok(Self {
            id: header.id,
            body,
        })
    }
}

impl Reply {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MessageHeader::SIZE + 40);
        MessageHeader {
            kind: self.kind(),
            id: self.id,
        }
        .encode(&mut buf);
        if let ReplyBody::Step { action } = &self.body {
            put_box(&mut buf, action);
        }
        buf.freeze()
    }

    pub fn decode(mut packet: Bytes) -> Result<Self, ProtocolError> {
        let header = MessageHeader::decode(&mut packet)?;
        let body = match header.kind {
            MessageKind::Empty => ReplyBody::Empty,
            MessageKind::Init => ReplyBody::Init,
            MessageKind::Step => ReplyBody::Step {
                action: get_box(&mut packet)?,
            },
            MessageKind::Shutdown => ReplyBody::Shutdown,
        };
        ensure_consumed(&packet)?;
        Ok(Self {
            id: header.id,
            body,
        })
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_string(buf: &mut Bytes) -> Result<String, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::PacketTooShort);
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::PacketTooShort);
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

// Box: u32 count followed by big-endian f64 values.
fn put_box(buf: &mut BytesMut, values: &[f64]) {
    buf.put_u32(values.len() as u32);
    for v in values {
        buf.put_f64(*v);
    }
}

fn get_box(buf: &mut Bytes) -> Result<Vec<f64>, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::PacketTooShort);
    }
    let count = buf.get_u32() as usize;
    if buf.remaining() < count.saturating_mul(8) {
        return Err(ProtocolError::PacketTooShort);
    }
    Ok((0..count).map(|_| buf.get_f64()).collect())
}

fn ensure_consumed(buf: &Bytes) -> Result<(), ProtocolError> {
    match buf.remaining() {
        0 => Ok(()),
        n => Err(ProtocolError::TrailingBytes(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut buf = BytesMut::new();
        MessageHeader {
            kind: MessageKind::Step,
            id: 0x0102030405060708,
        }
        .encode(&mut buf);
        assert_eq!(buf.len(), MessageHeader::SIZE);
        assert_eq!(&buf[..], &[0x02, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_step_request_carries_both_boxes() {
        let request = Request {
            id: 42,
            body: RequestBody::Step {
                observation: vec![0.37],
                reward: vec![0.81],
            },
        };
        let encoded = request.encode();
        // header + two boxes of one value each
        assert_eq!(encoded.len(), MessageHeader::SIZE + 2 * (4 + 8));
        assert_eq!(Request::decode(encoded).unwrap(), request);
    }

    #[test]
    fn test_init_request_strings() {
        let request = Request {
            id: 0,
            body: RequestBody::Init {
                observation_space: "gym.spaces.Box(low=0, high=1, shape=(1,))".to_string(),
                action_space: "gym.spaces.Box(low=0, high=1, shape=(4,))".to_string(),
            },
        };
        assert_eq!(Request::decode(request.encode()).unwrap(), request);
    }

    #[test]
    fn test_step_reply_action() {
        let reply = Reply {
            id: 7,
            body: ReplyBody::Step {
                action: vec![0.1, 0.2, 0.3, 0.4],
            },
        };
        let decoded = Reply::decode(reply.encode()).unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(
            decoded.body,
            ReplyBody::Step {
                action: vec![0.1, 0.2, 0.3, 0.4]
            }
        );
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let packet = Bytes::from_static(&[0x09, 0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(
            Reply::decode(packet).unwrap_err(),
            ProtocolError::UnknownKind(0x09)
        );
    }

    #[test]
    fn test_rejects_truncated_box() {
        let reply = Reply {
            id: 1,
            body: ReplyBody::Step {
                action: vec![0.5; 4],
            },
        };
        let encoded = reply.encode();
        let truncated = encoded.slice(..encoded.len() - 3);
        assert_eq!(
            Reply::decode(truncated).unwrap_err(),
            ProtocolError::PacketTooShort
        );
        assert_eq!(
            Reply::decode(Bytes::from_static(&[0x02, 0, 0])).unwrap_err(),
            ProtocolError::PacketTooShort
        );
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut buf = BytesMut::from(&Reply::empty().encode()[..]);
        buf.put_u8(0xff);
        assert_eq!(
            Reply::decode(buf.freeze()).unwrap_err(),
            ProtocolError::TrailingBytes(1)
        );
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        let mut buf = BytesMut::new();
        MessageHeader {
            kind: MessageKind::Init,
            id: 0,
        }
        .encode(&mut buf);
        buf.put_u32(2);
        buf.put_slice(&[0xc3, 0x28]);
        buf.put_u32(0);
        assert_eq!(
            Request::decode(buf.freeze()).unwrap_err(),
            ProtocolError::InvalidUtf8
        );
    }
}
