//! Hand skeleton types.

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};

/// Points per hand: the wrist, then four joints per finger from thumb to pinky.
pub const LANDMARK_COUNT: usize = 21;

/// Bone connections between landmark indices.
pub const HAND_CONNECTIONS: [(usize, usize); 21] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (5, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (9, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (13, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (0, 17),
];

/// One landmark in normalized image coordinates; `z` is relative depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Horizontal position, 0 at the left edge.
    pub x: f32,
    /// Vertical position, 0 at the top edge.
    pub y: f32,
    /// Depth relative to the wrist.
    pub z: f32,
}

impl Landmark {
    /// Creates a landmark.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl From<[f32; 3]> for Landmark {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

/// One hand skeleton at one instant. Always holds exactly
/// [`LANDMARK_COUNT`] points.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LandmarkFrame {
    points: Vec<Landmark>,
}

impl LandmarkFrame {
    /// Wraps detector output.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::InvalidFrame`] for any other point count.
    pub fn new(points: Vec<Landmark>) -> Result<Self> {
        if points.len() != LANDMARK_COUNT {
            return Err(CaptureError::InvalidFrame {
                expected: LANDMARK_COUNT,
                actual: points.len(),
            });
        }
        Ok(Self { points })
    }

    /// Points in landmark order.
    #[must_use]
    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    /// Points as `[x, y, z]` triples, the shape the training service stores.
    #[must_use]
    pub fn keypoints(&self) -> Vec<[f32; 3]> {
        self.points.iter().map(|p| [p.x, p.y, p.z]).collect()
    }
}
