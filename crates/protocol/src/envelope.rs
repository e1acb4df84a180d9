//! Frame codec: 4-byte big-endian header length + JSON header + raw payload.
//!
//! ```text
//! [4 bytes BE: header_len]
//! [header_len bytes: {"type": "<KIND>", "payload": {...}}]
//! [rest: raw file bytes, CHUNK frames only]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::{MAX_HEADER_LEN, MessageKind};
use crate::messages::{FileRef, PeerMessage};
use crate::types::FileMeta;

const NO_BODY: &[u8] = &[];

/// Errors from encoding or decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame too short")]
    TooShort,

    #[error("header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("header too large: {0} bytes")]
    HeaderTooLarge(usize),

    #[error("invalid header JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("unknown message type")]
    UnknownKind,

    #[error("{kind} frame carries {len} unexpected payload bytes")]
    UnexpectedPayload { kind: MessageKind, len: usize },
}

/// JSON header of a frame. The payload is kept raw until the kind is known.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Header<'a> {
    #[serde(rename = "type")]
    kind: MessageKind,
    #[serde(borrow)]
    payload: &'a RawValue,
}

#[derive(Serialize)]
struct OutHeader<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: MessageKind,
    payload: &'a T,
}

/// Encodes a message into one transport frame.
pub fn encode(message: &PeerMessage) -> Result<Vec<u8>, CodecError> {
    let kind = message.kind();
    let (header, body): (Vec<u8>, &[u8]) = match message {
        PeerMessage::Meta(meta) => (header_json(kind, meta)?, NO_BODY),
        PeerMessage::Chunk { file_id, data } => (
            header_json(
                kind,
                &FileRef {
                    file_id: file_id.clone(),
                },
            )?,
            data.as_slice(),
        ),
        PeerMessage::End { file_id }
        | PeerMessage::RequestDownload { file_id }
        | PeerMessage::DenyDownload { file_id } => (
            header_json(
                kind,
                &FileRef {
                    file_id: file_id.clone(),
                },
            )?,
            NO_BODY,
        ),
    };

    if header.len() > MAX_HEADER_LEN {
        return Err(CodecError::HeaderTooLarge(header.len()));
    }

    let mut frame = Vec::with_capacity(4 + header.len() + body.len());
    frame.extend_from_slice(&(header.len() as u32).to_be_bytes());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Decodes one transport frame, rejecting any shape that does not match
/// its declared kind.
pub fn decode(frame: &[u8]) -> Result<PeerMessage, CodecError> {
    if frame.len() < 4 {
        return Err(CodecError::TooShort);
    }

    let header_len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    if header_len > MAX_HEADER_LEN {
        return Err(CodecError::HeaderTooLarge(header_len));
    }
    if frame.len() < 4 + header_len {
        return Err(CodecError::HeaderTruncated {
            expected: header_len,
            got: frame.len() - 4,
        });
    }

    let header: Header<'_> = serde_json::from_slice(&frame[4..4 + header_len])?;
    let body = &frame[4 + header_len..];

    if header.kind != MessageKind::Chunk && !body.is_empty() {
        return Err(CodecError::UnexpectedPayload {
            kind: header.kind,
            len: body.len(),
        });
    }

    let message = match header.kind {
        MessageKind::Meta => {
            let meta: FileMeta = serde_json::from_str(header.payload.get())?;
            PeerMessage::Meta(meta)
        }
        MessageKind::Chunk => PeerMessage::Chunk {
            file_id: file_ref(header.payload)?.file_id,
            data: body.to_vec(),
        },
        MessageKind::End => PeerMessage::End {
            file_id: file_ref(header.payload)?.file_id,
        },
        MessageKind::RequestDownload => PeerMessage::RequestDownload {
            file_id: file_ref(header.payload)?.file_id,
        },
        MessageKind::DenyDownload => PeerMessage::DenyDownload {
            file_id: file_ref(header.payload)?.file_id,
        },
        MessageKind::Unknown => return Err(CodecError::UnknownKind),
    };
    Ok(message)
}

fn header_json<T: Serialize>(kind: MessageKind, payload: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(&OutHeader { kind, payload })?)
}

fn file_ref(raw: &RawValue) -> Result<FileRef, CodecError> {
    Ok(serde_json::from_str(raw.get())?)
}
