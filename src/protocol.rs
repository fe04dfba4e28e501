//! Binary packet codec
//!
//! Every frame on the wire is `[tag:1][payload]`. Tags are scoped by direction:
//! `0x00` is a handshake when a client sends it and a "user joined" notice when
//! the server sends it. The codec only deals with payloads; the tag byte is
//! prefixed by [`Session::send`](crate::session::Session::send).

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::{Identity, MessageId, MessageRecord};

/// client→server: `[nameLen:1][name][uuid as ASCII]`
pub const TAG_CONNECT: u8 = 0x00;
/// client→server: `[text]`
pub const TAG_SEND_MESSAGE: u8 = 0x01;

/// server→client: `[name]`
pub const TAG_USER_JOINED: u8 = 0x00;
/// server→client: `[nameLen:1][name][text][id:8, big-endian i64]`
pub const TAG_MESSAGE_RECEIVED: u8 = 0x01;
/// server→client: `[name]`
pub const TAG_USER_LEFT: u8 = 0x02;

/// Longest name that fits the 1-byte length prefix
pub const MAX_NAME_BYTES: usize = u8::MAX as usize;

const ID_LEN: usize = std::mem::size_of::<MessageId>();

/// Errors produced while turning bytes into a packet
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Empty frame has no packet tag")]
    EmptyFrame,

    #[error("Unknown packet tag 0x{0:02x}")]
    UnknownTag(u8),

    #[error("Truncated {field}: need {need} bytes, have {have}")]
    Truncated {
        field: &'static str,
        need: usize,
        have: usize,
    },

    #[error("Invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("Malformed identity token: {0}")]
    InvalidIdentity(String),
}

/// Errors produced while turning a packet into bytes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("Name is {0} bytes, the wire limit is 255")]
    NameTooLong(usize),
}

/// Split a raw frame into its tag and payload
pub fn split_frame(frame: &[u8]) -> Result<(u8, &[u8]), DecodeError> {
    frame
        .split_first()
        .map(|(tag, payload)| (*tag, payload))
        .ok_or(DecodeError::EmptyFrame)
}

/// Packets a client sends to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    Connect { name: String, identity: Identity },
    SendMessage { text: String },
}

impl ClientPacket {
    pub fn tag(&self) -> u8 {
        match self {
            ClientPacket::Connect { .. } => TAG_CONNECT,
            ClientPacket::SendMessage { .. } => TAG_SEND_MESSAGE,
        }
    }

    /// Short name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            ClientPacket::Connect { .. } => "connect",
            ClientPacket::SendMessage { .. } => "send_message",
        }
    }

    pub fn decode(tag: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        match tag {
            TAG_CONNECT => {
                let (name, rest) = read_name(payload)?;
                let token = utf8(rest, "identity")?;
                let identity = token
                    .parse::<Identity>()
                    .map_err(|e| DecodeError::InvalidIdentity(e.to_string()))?;
                Ok(ClientPacket::Connect { name, identity })
            }
            TAG_SEND_MESSAGE => Ok(ClientPacket::SendMessage {
                text: utf8(payload, "text")?,
            }),
            other => Err(DecodeError::UnknownTag(other)),
        }
    }

    pub fn encode_payload(&self) -> Result<Bytes, EncodeError> {
        match self {
            ClientPacket::Connect { name, identity } => {
                let token = identity.to_string();
                let mut buf = BytesMut::with_capacity(1 + name.len() + token.len());
                put_name(&mut buf, name)?;
                buf.put_slice(token.as_bytes());
                Ok(buf.freeze())
            }
            ClientPacket::SendMessage { text } => Ok(Bytes::copy_from_slice(text.as_bytes())),
        }
    }

    /// Full `[tag] + payload` frame, as a client puts it on the wire
    pub fn to_frame(&self) -> Result<Bytes, EncodeError> {
        let payload = self.encode_payload()?;
        let mut frame = BytesMut::with_capacity(1 + payload.len());
        frame.put_u8(self.tag());
        frame.put_slice(&payload);
        Ok(frame.freeze())
    }
}

/// Packets the server sends to clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPacket {
    UserJoined {
        name: String,
    },
    MessageReceived {
        name: String,
        text: String,
        id: MessageId,
    },
    UserLeft {
        name: String,
    },
}

impl ServerPacket {
    pub fn tag(&self) -> u8 {
        match self {
            ServerPacket::UserJoined { .. } => TAG_USER_JOINED,
            ServerPacket::MessageReceived { .. } => TAG_MESSAGE_RECEIVED,
            ServerPacket::UserLeft { .. } => TAG_USER_LEFT,
        }
    }

    /// Short name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            ServerPacket::UserJoined { .. } => "user_joined",
            ServerPacket::MessageReceived { .. } => "message_received",
            ServerPacket::UserLeft { .. } => "user_left",
        }
    }

    pub fn decode(tag: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        match tag {
            TAG_USER_JOINED => Ok(ServerPacket::UserJoined {
                name: utf8(payload, "name")?,
            }),
            TAG_MESSAGE_RECEIVED => {
                let (name, rest) = read_name(payload)?;
                if rest.len() < ID_LEN {
                    return Err(DecodeError::Truncated {
                        field: "message id",
                        need: payload.len() - rest.len() + ID_LEN,
                        have: payload.len(),
                    });
                }
                let (text, id_bytes) = rest.split_at(rest.len() - ID_LEN);
                let mut id = [0u8; ID_LEN];
                id.copy_from_slice(id_bytes);
                Ok(ServerPacket::MessageReceived {
                    name,
                    text: utf8(text, "text")?,
                    id: MessageId::from_be_bytes(id),
                })
            }
            TAG_USER_LEFT => Ok(ServerPacket::UserLeft {
                name: utf8(payload, "name")?,
            }),
            other => Err(DecodeError::UnknownTag(other)),
        }
    }

    /// Decode a whole `[tag] + payload` frame, as a client receives it
    pub fn from_frame(frame: &[u8]) -> Result<Self, DecodeError> {
        let (tag, payload) = split_frame(frame)?;
        Self::decode(tag, payload)
    }

    pub fn encode_payload(&self) -> Result<Bytes, EncodeError> {
        match self {
            ServerPacket::UserJoined { name } | ServerPacket::UserLeft { name } => {
                Ok(Bytes::copy_from_slice(name.as_bytes()))
            }
            ServerPacket::MessageReceived { name, text, id } => {
                let mut buf = BytesMut::with_capacity(1 + name.len() + text.len() + ID_LEN);
                put_name(&mut buf, name)?;
                buf.put_slice(text.as_bytes());
                buf.put_i64(*id);
                Ok(buf.freeze())
            }
        }
    }
}

impl From<MessageRecord> for ServerPacket {
    fn from(record: MessageRecord) -> Self {
        ServerPacket::MessageReceived {
            name: record.sender,
            text: record.text,
            id: record.id,
        }
    }
}

fn utf8(bytes: &[u8], field: &'static str) -> Result<String, DecodeError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| DecodeError::InvalidUtf8 { field })
}

/// Read a length-prefixed name, returning it and the bytes after it
fn read_name(payload: &[u8]) -> Result<(String, &[u8]), DecodeError> {
    let (&len, rest) = payload.split_first().ok_or(DecodeError::Truncated {
        field: "name length",
        need: 1,
        have: 0,
    })?;
    let len = len as usize;
    if rest.len() < len {
        return Err(DecodeError::Truncated {
            field: "name",
            need: 1 + len,
            have: payload.len(),
        });
    }
    let (name, rest) = rest.split_at(len);
    Ok((utf8(name, "name")?, rest))
}

fn put_name(buf: &mut BytesMut, name: &str) -> Result<(), EncodeError> {
    let len = u8::try_from(name.len()).map_err(|_| EncodeError::NameTooLong(name.len()))?;
    buf.put_u8(len);
    buf.put_slice(name.as_bytes());
    Ok(())
}
