use thiserror::Error;
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::message::Envelope;

/// Upper bound on a single frame. A compile request or diagnostic burst is
/// tiny compared to this; anything larger means a corrupted length prefix.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A LEB128 u32 never needs more than five bytes.
const MAX_VARINT_LEN: usize = 5;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame length prefix")]
    MalformedLengthPrefix,
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Frames [`Envelope`] values as `[varint length][MessagePack bytes]`.
///
/// Decoding is all-or-nothing: until a complete frame is buffered the codec
/// reports "need more data" and leaves the buffer untouched. Any malformed
/// prefix or payload is fatal to the connection; there is no resync.
#[derive(Debug, Default)]
pub struct WireCodec;

impl Decoder for WireCodec {
    type Item = Envelope;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, ProtoError> {
        let mut len: u64 = 0;
        let mut prefix_len = 0;
        for (i, &byte) in src.iter().enumerate() {
            if i >= MAX_VARINT_LEN {
                return Err(ProtoError::MalformedLengthPrefix);
            }
            len |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                prefix_len = i + 1;
                break;
            }
        }
        if prefix_len == 0 {
            // The length prefix itself is incomplete.
            return Ok(None);
        }

        let len = len as usize;
        if len > MAX_FRAME_LEN {
            return Err(ProtoError::FrameTooLarge(len));
        }
        if src.len() < prefix_len + len {
            src.reserve(prefix_len + len - src.len());
            return Ok(None);
        }

        src.advance(prefix_len);
        let frame = src.split_to(len);
        Ok(Some(rmp_serde::from_slice(&frame)?))
    }
}

impl Encoder<Envelope> for WireCodec {
    type Error = ProtoError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), ProtoError> {
        let body = rmp_serde::to_vec(&item)?;
        if body.len() > MAX_FRAME_LEN {
            return Err(ProtoError::FrameTooLarge(body.len()));
        }
        dst.reserve(MAX_VARINT_LEN + body.len());
        put_varint(dst, body.len() as u64);
        dst.put_slice(&body);
        Ok(())
    }
}

fn put_varint(dst: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        dst.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{BuildType, CompileRequest, Request};
    use uuid::Uuid;

    fn sample() -> Envelope {
        Envelope::request(
            Uuid::new_v4(),
            Request::Compile(CompileRequest {
                project_path: "/work/demo".to_string(),
                modules: vec!["app".to_string()],
                build_type: BuildType::Make,
            }),
        )
    }

    #[test]
    fn roundtrip() {
        let envelope = sample();
        let mut codec = WireCodec;
        let mut buf = BytesMut::new();
        codec.encode(envelope.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, envelope);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_input_has_no_side_effects() {
        let mut codec = WireCodec;
        let mut full = BytesMut::new();
        codec.encode(sample(), &mut full).unwrap();

        // Feed the frame one byte at a time; only the final byte yields it.
        let mut buf = BytesMut::new();
        for (i, byte) in full.iter().enumerate() {
            buf.put_u8(*byte);
            let result = codec.decode(&mut buf).unwrap();
            if i + 1 < full.len() {
                assert!(result.is_none());
            } else {
                assert!(result.is_some());
            }
        }
    }

    #[test]
    fn two_frames_in_one_buffer() {
        let mut codec = WireCodec;
        let a = sample();
        let b = sample();
        let mut buf = BytesMut::new();
        codec.encode(a.clone(), &mut buf).unwrap();
        codec.encode(b.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), a);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), b);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn malformed_length_prefix_is_fatal() {
        let mut codec = WireCodec;
        // Six continuation bytes can never form a valid length prefix.
        let mut buf = BytesMut::from(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtoError::MalformedLengthPrefix)
        ));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = WireCodec;
        let mut buf = BytesMut::new();
        put_varint(&mut buf, (MAX_FRAME_LEN + 1) as u64);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtoError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn truncated_payload_is_a_decode_error() {
        let mut codec = WireCodec;
        let mut full = BytesMut::new();
        codec.encode(sample(), &mut full).unwrap();

        // Rewrite the prefix to claim a shorter payload than was encoded,
        // so a "complete" frame arrives with garbage cut off the end.
        let body_len = full.len() - 1; // single-byte varint for small frames
        let mut buf = BytesMut::new();
        put_varint(&mut buf, (body_len / 2) as u64);
        buf.put_slice(&full[1..1 + body_len / 2]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtoError::Decode(_))
        ));
    }
}
