//! Length-prefixed message framing with stream multiplexing.
//!
//! Every message is framed with:
//! - A 4-byte little-endian stream ID
//! - A 4-byte little-endian payload length
//!
//! Stream 0 is reserved for the connection fingerprint. The [`Reassembler`]
//! turns an arbitrarily chunked byte stream back into whole frames.

pub mod codec;
pub mod error;
pub mod reassembly;
pub mod stream;

pub use codec::{
    decode, decode_frame, encode, encode_frame, Frame, MuxCodec, HEADER_SIZE, MAX_PAYLOAD,
    MAX_RESERVE,
};
pub use error::{FrameError, Result};
pub use reassembly::Reassembler;
pub use stream::{
    data_stream, is_control, is_reserved, stream_name, with_control, CONTROL_BIT, FINGERPRINT,
    LOGGER, METRICS, STDERR, STDOUT, USER_STREAM_START,
};
