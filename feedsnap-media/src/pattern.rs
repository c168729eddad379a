//! Synthetic media stack
//!
//! Accepts every offer and renders a colour-bar test pattern into an
//! in-memory surface per feed. Pairs with the loopback gateway for demo mode,
//! where no real cameras or WebRTC stack are available.

use async_trait::async_trait;
use feedsnap_core::{
    FeedDescriptor, FeedId, IceConfiguration, LatestFrame, RenderTarget, Result, VideoFrame,
};
use feedsnap_signaling::{Jsep, MediaAnswer, MediaNegotiator};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const BARS: [[u8; 3]; 7] = [
    [192, 192, 192],
    [192, 192, 0],
    [0, 192, 192],
    [0, 192, 0],
    [192, 0, 192],
    [192, 0, 0],
    [0, 0, 192],
];

/// Build a colour-bar frame; the bar order is rotated by `seed`
pub fn test_pattern(width: u32, height: u32, seed: u64, timestamp: u64) -> VideoFrame {
    let mut data = Vec::with_capacity(width as usize * height as usize * VideoFrame::BYTES_PER_PIXEL);
    let bar_width = (width as usize / BARS.len()).max(1);
    for _ in 0..height {
        for x in 0..width as usize {
            let bar = (x / bar_width + seed as usize) % BARS.len();
            let [r, g, b] = BARS[bar];
            data.extend_from_slice(&[r, g, b, 255]);
        }
    }
    VideoFrame::rgba(width, height, data, timestamp)
}

/// Media stack that renders test patterns instead of decoding video
#[derive(Debug)]
pub struct TestPatternMedia {
    width: u32,
    height: u32,
    surfaces: Mutex<HashMap<FeedId, Arc<LatestFrame>>>,
}

impl Default for TestPatternMedia {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl TestPatternMedia {
    /// Render frames of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            surfaces: Mutex::new(HashMap::new()),
        }
    }

    /// Surface currently owned for `feed_id`
    pub fn surface(&self, feed_id: FeedId) -> Option<Arc<LatestFrame>> {
        self.surfaces.lock().get(&feed_id).cloned()
    }

    fn answer_sdp(offer: &Jsep) -> String {
        // Echo the offer's media sections with the direction flipped
        offer
            .sdp
            .lines()
            .map(|line| match line {
                "a=sendonly" => "a=recvonly",
                "a=sendrecv" => "a=recvonly",
                other => other,
            })
            .fold(String::new(), |mut sdp, line| {
                sdp.push_str(line);
                sdp.push_str("\r\n");
                sdp
            })
    }
}

#[async_trait]
impl MediaNegotiator for TestPatternMedia {
    async fn answer(
        &self,
        feed: &FeedDescriptor,
        offer: &Jsep,
        _ice: &IceConfiguration,
    ) -> Result<MediaAnswer> {
        let surface = Arc::new(LatestFrame::new());
        let timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
        surface.present(test_pattern(self.width, self.height, feed.id.get(), timestamp));
        self.surfaces.lock().insert(feed.id, surface.clone());
        debug!("Rendering test pattern for feed {}", feed.id);

        let target: Arc<dyn RenderTarget> = surface;
        Ok(MediaAnswer::new(Jsep::answer(Self::answer_sdp(offer))).with_render_target(&target))
    }

    async fn release(&self, feed_id: FeedId) {
        self.surfaces.lock().remove(&feed_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedsnap_signaling::JsepType;

    #[test]
    fn test_pattern_dimensions() {
        let frame = test_pattern(14, 3, 0, 0);
        assert!(frame.is_well_formed());
        assert_eq!(&frame.data[..4], &[192, 192, 192, 255]);
        // Second bar starts at x = 2
        assert_eq!(&frame.data[8..12], &[192, 192, 0, 255]);
    }

    #[test]
    fn test_seed_rotates_bars() {
        let a = test_pattern(7, 1, 0, 0);
        let b = test_pattern(7, 1, 1, 0);
        assert_eq!(&a.data[4..8], &b.data[..4]);
    }

    #[tokio::test]
    async fn test_answer_binds_live_surface() {
        let media = TestPatternMedia::new(8, 8);
        let feed = FeedDescriptor::new(3u64, "Camera 3");
        let answer = media
            .answer(&feed, &Jsep::offer("v=0\r\na=sendonly"), &IceConfiguration::default())
            .await
            .unwrap();

        assert_eq!(answer.jsep.kind, JsepType::Answer);
        assert!(answer.jsep.sdp.contains("a=recvonly"));
        let target = answer.render_target.unwrap();
        assert!(target.upgrade().unwrap().current_frame().is_some());

        media.release(FeedId(3)).await;
        assert!(target.upgrade().is_none());
    }
}
