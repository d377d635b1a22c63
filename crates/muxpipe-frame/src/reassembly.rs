use bytes::BytesMut;

use crate::codec::{decode_frame, Frame, MAX_PAYLOAD};
use crate::error::Result;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Rebuilds frame boundaries from an arbitrarily chunked byte stream.
///
/// Feed each read with [`extend`](Self::extend), then call
/// [`next_frame`](Self::next_frame) until it returns `Ok(None)`. Whatever
/// is left over (the remainder) is kept for the next read.
#[derive(Debug)]
pub struct Reassembler {
    buf: BytesMut,
    max_payload: usize,
    frames: u64,
}

impl Reassembler {
    /// A reassembler that accepts any payload length the header can express.
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD)
    }

    /// A reassembler that fails on frames declaring more than `max_payload` bytes.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload,
            frames: 0,
        }
    }

    /// Append freshly read bytes after the current remainder.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete frame, if the buffered bytes hold one.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = decode_frame(&mut self.buf, self.max_payload)?;
        if frame.is_some() {
            self.frames += 1;
        }
        Ok(frame)
    }

    /// Append `bytes` and drain every frame they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Frame>> {
        self.extend(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Bytes waiting for the rest of their frame.
    pub fn remainder(&self) -> usize {
        self.buf.len()
    }

    /// Frames produced so far.
    pub fn frames_decoded(&self) -> u64 {
        self.frames
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;
    use crate::codec::{encode_frame, HEADER_SIZE, MAX_RESERVE};
    use crate::error::FrameError;

    fn sample_wire() -> (BytesMut, Vec<Frame>) {
        let frames = vec![
            Frame::new(0, &b"{\"pid\":1}"[..]),
            Frame::new(1, &b"stdout line"[..]),
            Frame::new(7, &b""[..]),
            Frame::new(100, vec![0xAB; 3000]),
            Frame::new(0x8000_000B, &b"schema"[..]),
        ];
        let mut wire = BytesMut::new();
        for frame in &frames {
            encode_frame(frame.stream_id, &frame.payload, &mut wire).unwrap();
        }
        (wire, frames)
    }

    #[test]
    fn whole_buffer_yields_all_frames() {
        let (wire, expected) = sample_wire();
        let mut reassembler = Reassembler::new();

        let frames = reassembler.push(&wire).unwrap();

        assert_eq!(frames, expected);
        assert_eq!(reassembler.remainder(), 0);
        assert_eq!(reassembler.frames_decoded(), expected.len() as u64);
    }

    #[test]
    fn byte_by_byte_yields_same_sequence() {
        let (wire, expected) = sample_wire();
        let mut reassembler = Reassembler::new();

        let mut frames = Vec::new();
        for byte in wire.iter() {
            frames.extend(reassembler.push(&[*byte]).unwrap());
        }

        assert_eq!(frames, expected);
        assert_eq!(reassembler.remainder(), 0);
    }

    #[test]
    fn every_split_point_yields_same_sequence() {
        let (wire, expected) = sample_wire();

        for split in 0..=wire.len() {
            let mut reassembler = Reassembler::new();
            let mut frames = reassembler.push(&wire[..split]).unwrap();
            frames.extend(reassembler.push(&wire[split..]).unwrap());
            assert_eq!(frames, expected, "split at {split}");
        }
    }

    #[test]
    fn uneven_chunks_yield_same_sequence() {
        let (wire, expected) = sample_wire();
        let chunk_sizes = [3usize, 1, 7, 13, 2, 500, 5, 4096];

        let mut reassembler = Reassembler::new();
        let mut frames = Vec::new();
        let mut offset = 0;
        let mut i = 0;
        while offset < wire.len() {
            let end = (offset + chunk_sizes[i % chunk_sizes.len()]).min(wire.len());
            frames.extend(reassembler.push(&wire[offset..end]).unwrap());
            offset = end;
            i += 1;
        }

        assert_eq!(frames, expected);
    }

    #[test]
    fn remainder_is_kept_between_reads() {
        let mut wire = BytesMut::new();
        encode_frame(3, b"complete", &mut wire).unwrap();
        encode_frame(3, b"partial", &mut wire).unwrap();
        let cut = wire.len() - 4;

        let mut reassembler = Reassembler::new();
        let frames = reassembler.push(&wire[..cut]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(reassembler.remainder(), HEADER_SIZE + 7 - 4);

        let frames = reassembler.push(&wire[cut..]).unwrap();
        assert_eq!(frames, vec![Frame::new(3, &b"partial"[..])]);
        assert_eq!(reassembler.remainder(), 0);
    }

    #[test]
    fn oversized_declared_length_is_an_error() {
        let mut wire = BytesMut::new();
        wire.put_u32_le(1);
        wire.put_u32_le(1024);

        let mut reassembler = Reassembler::with_max_payload(16);
        let err = reassembler.push(&wire).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn huge_declared_length_keeps_buffer_small() {
        let mut wire = BytesMut::new();
        encode_frame(0, b"{\"pid\":1}", &mut wire).unwrap();
        wire.put_u32_le(1);
        wire.put_u32_le(0xFFFF_FFF0);
        wire.put_u8(0x42);

        let mut reassembler = Reassembler::new();
        let frames = reassembler.push(&wire).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(reassembler.remainder(), HEADER_SIZE + 1);
        assert!(reassembler.buf.capacity() < 2 * MAX_RESERVE);

        let frames = reassembler.push(&[0u8; 4096]).unwrap();
        assert!(frames.is_empty());
        assert!(reassembler.buf.capacity() < 4 * MAX_RESERVE);
    }

    #[tokio::test]
    async fn framed_read_matches_reassembler() {
        use futures_util::StreamExt;
        use tokio_util::codec::FramedRead;

        let (wire, expected) = sample_wire();
        let mut framed = FramedRead::new(&wire[..], crate::codec::MuxCodec::new());

        let mut frames = Vec::new();
        while let Some(frame) = framed.next().await {
            frames.push(frame.unwrap());
        }
        assert_eq!(frames, expected);
    }
}
