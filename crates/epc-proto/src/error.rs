/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The 6-byte length header is not hexadecimal, or encodes length zero.
    ///
    /// Fatal to the connection: once a header is malformed, frame
    /// boundaries in the stream can no longer be trusted.
    #[error("malformed frame header {header:?}")]
    BadHeader { header: String },

    /// The payload exceeds what the header can represent or the configured
    /// maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended cleanly at a frame boundary.
    #[error("end of stream")]
    Eof,

    /// The stream ended in the middle of a frame.
    ///
    /// Fatal to the connection, like [`FrameError::BadHeader`].
    #[error("connection closed mid-frame ({buffered} bytes buffered)")]
    Truncated { buffered: usize },

    /// A write was attempted on a closed stream.
    #[error("connection closed")]
    Closed,
}

impl FrameError {
    /// Whether the connection can continue after this error.
    ///
    /// Only `Eof` is a clean stop; everything else means the stream's
    /// integrity is gone.
    pub fn is_clean_eof(&self) -> bool {
        matches!(self, FrameError::Eof)
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
