/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The buffer does not yet hold a complete frame.
    ///
    /// Not a failure: keep the bytes and wait for more.
    #[error("incomplete data")]
    IncompleteData,

    /// The payload exceeds the representable or configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// True for the benign "need more bytes" status.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, FrameError::IncompleteData)
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
