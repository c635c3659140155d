//! Debug overlay of the detected skeleton, in pixel space.
//!
//! Observers draw this on top of the video frame; the session itself never
//! renders pixels.

use serde::{Deserialize, Serialize};

use crate::landmarks::{LandmarkFrame, HAND_CONNECTIONS};

const SEGMENT_COLOR: &str = "lime";
const SEGMENT_WIDTH: u32 = 2;
const POINT_COLOR: &str = "red";
const POINT_RADIUS: u32 = 4;

/// A line between two connected landmarks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start, in pixels.
    pub from: [f32; 2],
    /// End, in pixels.
    pub to: [f32; 2],
}

/// Drawing instructions for one processed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overlay {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Skeleton lines of every hand.
    pub segments: Vec<Segment>,
    /// Landmark centres of every hand, in pixels.
    pub points: Vec<[f32; 2]>,
    /// CSS color of the lines.
    pub segment_color: String,
    /// Line width in pixels.
    pub segment_width: u32,
    /// CSS color of the points.
    pub point_color: String,
    /// Point radius in pixels.
    pub point_radius: u32,
}

impl Overlay {
    /// Projects every hand onto a `width` x `height` frame. A frame without
    /// hands yields an empty overlay, which clears the previous drawing.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn render(width: u32, height: u32, hands: &[LandmarkFrame]) -> Self {
        let (w, h) = (width as f32, height as f32);
        let mut segments = Vec::with_capacity(hands.len() * HAND_CONNECTIONS.len());
        let mut points = Vec::new();

        for hand in hands {
            let projected: Vec<[f32; 2]> =
                hand.points().iter().map(|p| [p.x * w, p.y * h]).collect();
            segments.extend(HAND_CONNECTIONS.iter().map(|&(a, b)| Segment {
                from: projected[a],
                to: projected[b],
            }));
            points.extend(projected);
        }

        Self {
            width,
            height,
            segments,
            points,
            segment_color: SEGMENT_COLOR.to_string(),
            segment_width: SEGMENT_WIDTH,
            point_color: POINT_COLOR.to_string(),
            point_radius: POINT_RADIUS,
        }
    }

    /// Returns `true` if nothing would be drawn.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
