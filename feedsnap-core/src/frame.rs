//! Rendered frames and the surfaces that hold them

use parking_lot::RwLock;

/// A decoded, rendered video frame in packed RGBA8
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel data, 4 bytes per pixel, row major
    pub data: Vec<u8>,
    /// Timestamp in milliseconds
    pub timestamp: u64,
}

impl VideoFrame {
    /// Bytes per RGBA pixel
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Create a frame from RGBA pixel data
    pub fn rgba(width: u32, height: u32, data: Vec<u8>, timestamp: u64) -> Self {
        Self {
            width,
            height,
            data,
            timestamp,
        }
    }

    /// Whether the frame has a drawable area
    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Expected buffer length for the frame dimensions
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * Self::BYTES_PER_PIXEL
    }

    /// Whether the buffer matches the dimensions
    pub fn is_well_formed(&self) -> bool {
        self.has_dimensions() && self.data.len() == self.expected_len()
    }
}

/// A surface a feed's media is rendered into
///
/// Owned by the presentation layer. The registry only keeps a weak reference
/// for lookup, so dropping the surface makes the feed uncapturable without any
/// further bookkeeping.
pub trait RenderTarget: Send + Sync {
    /// The frame currently on screen, if anything has been rendered
    fn current_frame(&self) -> Option<VideoFrame>;
}

/// Render target that keeps the most recently presented frame
#[derive(Debug, Default)]
pub struct LatestFrame {
    frame: RwLock<Option<VideoFrame>>,
}

impl LatestFrame {
    /// Create an empty surface
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the displayed frame
    pub fn present(&self, frame: VideoFrame) {
        *self.frame.write() = Some(frame);
    }

    /// Drop the displayed frame
    pub fn clear(&self) {
        *self.frame.write() = None;
    }
}

impl RenderTarget for LatestFrame {
    fn current_frame(&self) -> Option<VideoFrame> {
        self.frame.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_dimensions() {
        let frame = VideoFrame::rgba(2, 2, vec![0; 16], 0);
        assert!(frame.has_dimensions());
        assert!(frame.is_well_formed());

        let truncated = VideoFrame::rgba(2, 2, vec![0; 15], 0);
        assert!(!truncated.is_well_formed());

        let empty = VideoFrame::rgba(0, 480, Vec::new(), 0);
        assert!(!empty.has_dimensions());
    }

    #[test]
    fn test_latest_frame_surface() {
        let surface = LatestFrame::new();
        assert!(surface.current_frame().is_none());

        surface.present(VideoFrame::rgba(1, 1, vec![1, 2, 3, 4], 7));
        assert_eq!(surface.current_frame().unwrap().timestamp, 7);

        surface.clear();
        assert!(surface.current_frame().is_none());
    }
}
