//! Well-known stream IDs.
//!
//! Stream 0 carries the connection fingerprint and nothing else.
//! Streams below 100 are reserved by convention; 100 and up belong to
//! applications.

/// Identity blob, first frame of every connection.
pub const FINGERPRINT: u32 = 0;

/// Captured standard output.
pub const STDOUT: u32 = 1;

/// Captured standard error.
pub const STDERR: u32 = 3;

/// Structured logger output.
pub const LOGGER: u32 = 7;

/// Metrics sub-protocol.
pub const METRICS: u32 = 11;

/// First application-defined stream ID.
pub const USER_STREAM_START: u32 = 100;

/// High bit a sub-protocol may set to mark control/schema frames.
///
/// The transport carries it untouched.
pub const CONTROL_BIT: u32 = 0x8000_0000;

/// Returns a human-readable name for a stream ID.
pub fn stream_name(id: u32) -> &'static str {
    match data_stream(id) {
        FINGERPRINT => "FINGERPRINT",
        STDOUT => "STDOUT",
        STDERR => "STDERR",
        LOGGER => "LOGGER",
        METRICS => "METRICS",
        id if id < USER_STREAM_START => "RESERVED",
        _ => "USER",
    }
}

/// Returns true if the stream ID is in the reserved range.
pub fn is_reserved(id: u32) -> bool {
    data_stream(id) < USER_STREAM_START
}

/// Returns true if the control bit is set.
pub fn is_control(id: u32) -> bool {
    id & CONTROL_BIT != 0
}

/// The same stream with the control bit set.
pub fn with_control(id: u32) -> u32 {
    id | CONTROL_BIT
}

/// The stream ID with the control bit cleared.
pub fn data_stream(id: u32) -> u32 {
    id & !CONTROL_BIT
}
