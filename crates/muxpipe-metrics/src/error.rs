/// Errors that can occur while encoding or decoding metric records.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// A record value does not fit the one-byte length field.
    #[error("metric {index} value is {len} bytes, at most 255 fit in a record")]
    ValueTooLong { index: u16, len: usize },

    /// A payload ended in the middle of a record.
    #[error("truncated metric record at offset {offset}")]
    Truncated { offset: usize },

    /// A schema record did not hold four NUL-terminated fields.
    #[error("malformed schema record for metric {0}")]
    MalformedSchema(u16),

    /// Every record index is in use.
    #[error("no free metric index left")]
    IndexExhausted,

    /// Publishing on the metrics stream failed.
    #[error("metrics stream error: {0}")]
    Peer(#[from] muxpipe_peer::PeerError),
}

pub type Result<T> = std::result::Result<T, MetricsError>;
