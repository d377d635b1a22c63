use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};

/// Frame header: stream id (4) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Largest payload the 4-byte length field can describe.
pub const MAX_PAYLOAD: usize = u32::MAX as usize;

/// Most a header may grow the buffer ahead of its payload arriving.
pub const MAX_RESERVE: usize = 64 * 1024;

/// A framed message addressed to one logical stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The logical stream this message belongs to.
    pub stream_id: u32,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(stream_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            stream_id,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format, appending to `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬─────────────────┐
/// │ Stream (4B)  │ Length (4B)  │ Payload         │
/// │ LE           │ LE           │ (Length bytes)  │
/// └──────────────┴──────────────┴─────────────────┘
/// ```
pub fn encode_frame(stream_id: u32, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32_le(stream_id);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Encode a frame into a freshly allocated buffer.
pub fn encode(stream_id: u32, payload: &[u8]) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_frame(stream_id, payload, &mut dst)?;
    Ok(dst.freeze())
}

/// Decode one frame from the start of `src` without consuming it.
///
/// Returns the frame and the number of bytes that follow it, so callers can
/// keep extracting frames packed into one read. A short buffer yields
/// [`FrameError::IncompleteData`].
pub fn decode(src: &[u8]) -> Result<(Frame, usize)> {
    let (stream_id, payload_len) = peek_header(src).ok_or(FrameError::IncompleteData)?;

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Err(FrameError::IncompleteData);
    }

    let payload = Bytes::copy_from_slice(&src[HEADER_SIZE..total]);
    Ok((Frame { stream_id, payload }, src.len() - total))
}

/// Decode a frame from a buffer, consuming its bytes on success.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some((stream_id, payload_len)) = peek_header(src) else {
        return Ok(None); // Need more data
    };

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        // Declared lengths are untrusted; reads grow the buffer past this.
        src.reserve((total - src.len()).min(MAX_RESERVE));
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { stream_id, payload }))
}

fn peek_header(src: &[u8]) -> Option<(u32, usize)> {
    if src.len() < HEADER_SIZE {
        return None;
    }
    let mut header = &src[..HEADER_SIZE];
    let stream_id = header.get_u32_le();
    let payload_len = header.get_u32_le() as usize;
    Some((stream_id, payload_len))
}

/// `tokio_util` codec for muxpipe frames.
#[derive(Debug, Clone, Copy)]
pub struct MuxCodec {
    max_payload: usize,
}

impl MuxCodec {
    pub fn new() -> Self {
        Self {
            max_payload: MAX_PAYLOAD,
        }
    }

    /// Reject frames declaring more than `max_payload` bytes.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for MuxCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MuxCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src, self.max_payload)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for MuxCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        encode_frame(item.stream_id, &item.payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let payload = b"hello, muxpipe!";
        let wire = encode(100, payload).unwrap();

        assert_eq!(wire.len(), HEADER_SIZE + payload.len());

        let (frame, remaining) = decode(&wire).unwrap();
        assert_eq!(frame.stream_id, 100);
        assert_eq!(frame.payload.as_ref(), payload);
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_wire_layout_is_little_endian() {
        let wire = encode(0x0102_0304, b"ab").unwrap();
        assert_eq!(
            wire.as_ref(),
            &[0x04, 0x03, 0x02, 0x01, 0x02, 0x00, 0x00, 0x00, b'a', b'b']
        );
    }

    #[test]
    fn test_decode_incomplete_header() {
        let err = decode(&[0x01, 0x00, 0x00]).unwrap_err();
        assert!(err.is_incomplete());

        let mut buf = BytesMut::from(&[0x01, 0x00, 0x00][..]);
        assert!(decode_frame(&mut buf, MAX_PAYLOAD).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let wire = encode(1, b"hello").unwrap();
        let err = decode(&wire[..HEADER_SIZE + 2]).unwrap_err();
        assert!(matches!(err, FrameError::IncompleteData));

        let mut buf = BytesMut::from(&wire[..HEADER_SIZE + 2]);
        assert!(decode_frame(&mut buf, MAX_PAYLOAD).unwrap().is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 2);
    }

    #[test]
    fn test_decode_reports_remaining_bytes() {
        let mut wire = BytesMut::new();
        encode_frame(1, b"first", &mut wire).unwrap();
        encode_frame(2, b"second", &mut wire).unwrap();
        wire.put_slice(&[0xAA, 0xBB]);

        let (f1, rest) = decode(&wire).unwrap();
        assert_eq!(f1, Frame::new(1, &b"first"[..]));
        assert_eq!(rest, HEADER_SIZE + 6 + 2);

        let (f2, rest) = decode(&wire[wire.len() - rest..]).unwrap();
        assert_eq!(f2, Frame::new(2, &b"second"[..]));
        assert_eq!(rest, 2);

        assert!(decode(&wire[wire.len() - rest..]).unwrap_err().is_incomplete());
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(1);
        buf.put_u32_le(1024 * 1024 * 32);

        let result = decode_frame(&mut buf, 1024);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_declared_length_does_not_reserve_payload() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(1);
        buf.put_u32_le(0xFFFF_FFF0);
        buf.put_u8(0xAA);

        let result = decode_frame(&mut buf, MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 1);
        assert!(buf.capacity() < 2 * MAX_RESERVE);
    }

    #[test]
    fn test_control_bit_is_carried() {
        let id = crate::stream::with_control(crate::stream::METRICS);
        let wire = encode(id, b"schema").unwrap();
        let (frame, _) = decode(&wire).unwrap();
        assert_eq!(frame.stream_id, id);
    }

    #[test]
    fn test_empty_payload() {
        let wire = encode(0, b"").unwrap();
        let (frame, remaining) = decode(&wire).unwrap();
        assert_eq!(frame.stream_id, 0);
        assert!(frame.payload.is_empty());
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_frame_wire_size() {
        let frame = Frame::new(1, Bytes::from_static(b"test"));
        assert_eq!(frame.wire_size(), HEADER_SIZE + 4);
    }

    #[test]
    fn test_codec_roundtrip_and_eof() {
        let mut codec = MuxCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::new(7, &b"log line"[..]), &mut buf)
            .unwrap();
        buf.put_u8(0xFF);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::new(7, &b"log line"[..]));

        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }
}
