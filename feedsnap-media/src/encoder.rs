//! Still-image encoder
//!
//! Frames arrive as packed RGBA8. JPEG has no alpha channel, so the alpha
//! byte is dropped before encoding; PNG keeps it.

use crate::error::{EncodeError, EncodeResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use feedsnap_core::{ImageFormat, SnapshotConfig, VideoFrame};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tracing::trace;

/// Encodes frames with a fixed format and quality
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotEncoder {
    format: ImageFormat,
    quality: f32,
}

impl Default for SnapshotEncoder {
    fn default() -> Self {
        Self::new(ImageFormat::Jpeg, 0.9)
    }
}

impl SnapshotEncoder {
    /// Create an encoder; `quality` is clamped to 0.0 - 1.0
    pub fn new(format: ImageFormat, quality: f32) -> Self {
        let quality = if quality.is_finite() {
            quality.clamp(0.0, 1.0)
        } else {
            0.9
        };
        Self { format, quality }
    }

    /// Encoder matching the snapshot configuration
    pub fn from_config(config: &SnapshotConfig) -> Self {
        Self::new(config.image_format, config.image_quality)
    }

    /// Output format
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Quality on a 0.0 - 1.0 scale
    pub fn quality(&self) -> f32 {
        self.quality
    }

    /// JPEG quality on the codec's 1 - 100 scale
    fn jpeg_quality(&self) -> u8 {
        (self.quality * 100.0).round().clamp(1.0, 100.0) as u8
    }

    /// Encode a frame on the calling thread
    pub fn encode_blocking(&self, frame: &VideoFrame) -> EncodeResult<Vec<u8>> {
        if !frame.is_well_formed() {
            return Err(EncodeError::MalformedFrame {
                width: frame.width,
                height: frame.height,
                len: frame.data.len(),
                expected: frame.expected_len(),
            });
        }

        let codec_error = |source| EncodeError::Codec {
            format: self.format,
            source,
        };

        let mut out = Vec::new();
        match self.format {
            ImageFormat::Jpeg => {
                let rgb: Vec<u8> = frame
                    .data
                    .chunks_exact(VideoFrame::BYTES_PER_PIXEL)
                    .flat_map(|pixel| [pixel[0], pixel[1], pixel[2]])
                    .collect();
                JpegEncoder::new_with_quality(&mut out, self.jpeg_quality())
                    .write_image(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
                    .map_err(codec_error)?;
            }
            ImageFormat::Png => {
                PngEncoder::new(&mut out)
                    .write_image(&frame.data, frame.width, frame.height, ExtendedColorType::Rgba8)
                    .map_err(codec_error)?;
            }
        }

        trace!(
            "Encoded {}x{} frame to {} bytes of {}",
            frame.width,
            frame.height,
            out.len(),
            self.format.mime_type()
        );
        Ok(out)
    }

    /// Encode a frame on the blocking thread pool
    pub async fn encode(&self, frame: VideoFrame) -> EncodeResult<Bytes> {
        let encoder = *self;
        tokio::task::spawn_blocking(move || encoder.encode_blocking(&frame))
            .await
            .map_err(|e| EncodeError::Task {
                reason: e.to_string(),
            })?
            .map(Bytes::from)
    }
}

/// Render encoded bytes as a `data:` URL
pub fn data_url(format: ImageFormat, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", format.mime_type(), STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, rgba: [u8; 4]) -> VideoFrame {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        VideoFrame::rgba(width, height, data, 0)
    }

    #[test]
    fn test_jpeg_output_has_soi_marker() {
        let bytes = SnapshotEncoder::default()
            .encode_blocking(&solid_frame(8, 8, [200, 10, 10, 255]))
            .unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_png_output_has_signature() {
        let bytes = SnapshotEncoder::new(ImageFormat::Png, 1.0)
            .encode_blocking(&solid_frame(4, 3, [0, 0, 255, 128]))
            .unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn test_malformed_frame_rejected() {
        let frame = VideoFrame::rgba(4, 4, vec![0; 10], 0);
        let err = SnapshotEncoder::default().encode_blocking(&frame).unwrap_err();
        assert!(matches!(err, EncodeError::MalformedFrame { expected: 64, .. }));
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(SnapshotEncoder::new(ImageFormat::Jpeg, 3.0).quality(), 1.0);
        assert_eq!(SnapshotEncoder::new(ImageFormat::Jpeg, -1.0).quality(), 0.0);
        assert_eq!(SnapshotEncoder::new(ImageFormat::Jpeg, f32::NAN).quality(), 0.9);
        assert_eq!(SnapshotEncoder::new(ImageFormat::Jpeg, 0.0).jpeg_quality(), 1);
        assert_eq!(SnapshotEncoder::new(ImageFormat::Jpeg, 0.9).jpeg_quality(), 90);
    }

    #[test]
    fn test_data_url_prefix() {
        assert_eq!(data_url(ImageFormat::Jpeg, b"abc"), "data:image/jpeg;base64,YWJj");
        assert!(data_url(ImageFormat::Png, b"").starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_encode_runs_off_thread() {
        let bytes = SnapshotEncoder::default()
            .encode(solid_frame(16, 16, [1, 2, 3, 255]))
            .await
            .unwrap();
        assert!(!bytes.is_empty());
    }
}
