//! Encoding error types
//!
//! Encoder failures are kept separate from [`FeedSnapError`] so the encoder can
//! be used without a feed in scope; the coordinator attaches the feed id when
//! it converts them.

use feedsnap_core::{FeedId, FeedSnapError, ImageFormat};
use thiserror::Error;

/// Failure while turning a frame into a still image
#[derive(Error, Debug)]
pub enum EncodeError {
    /// Buffer length does not match the frame dimensions
    #[error("Malformed frame: {width}x{height} with {len} bytes (expected {expected})")]
    MalformedFrame {
        /// Frame width
        width: u32,
        /// Frame height
        height: u32,
        /// Actual buffer length
        len: usize,
        /// Length implied by the dimensions
        expected: usize,
    },

    /// The codec rejected the frame
    #[error("{format:?} encoder failed: {source}")]
    Codec {
        /// Target format
        format: ImageFormat,
        /// Codec error
        #[source]
        source: image::ImageError,
    },

    /// The blocking encode task panicked or was cancelled
    #[error("Encode task failed: {reason}")]
    Task {
        /// Join error description
        reason: String,
    },

    /// Writing an encoded image to disk failed
    #[error("I/O error: {source}")]
    Io {
        /// Underlying error
        #[from]
        source: std::io::Error,
    },
}

impl EncodeError {
    /// Attach a feed id, producing the crate-wide error type
    pub fn for_feed(self, feed_id: FeedId) -> FeedSnapError {
        FeedSnapError::Encoding {
            feed_id,
            reason: self.to_string(),
        }
    }
}

/// Result type for encoder operations
pub type EncodeResult<T> = std::result::Result<T, EncodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_frame_display() {
        let err = EncodeError::MalformedFrame {
            width: 2,
            height: 2,
            len: 3,
            expected: 16,
        };
        assert_eq!(
            err.to_string(),
            "Malformed frame: 2x2 with 3 bytes (expected 16)"
        );
    }

    #[test]
    fn test_for_feed_is_encoding_error() {
        let err = EncodeError::Task {
            reason: "cancelled".to_string(),
        }
        .for_feed(FeedId(4));
        assert_eq!(err.error_code(), "ENCODING_FAILED");
        assert!(err.to_string().contains("feed 4"));
    }
}
