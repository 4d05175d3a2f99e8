//! Vision module
//!
//! Frame acquisition, template lookup and template matching. Everything here
//! is detection only: no function in this module sends input to the device.

pub mod capture;
pub mod diagnostics;
pub mod matcher;
pub mod templates;

use std::sync::Arc;
use std::time::Instant;

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

pub use capture::{FrameSource, Mirror};
pub use diagnostics::Diagnostics;
pub use matcher::{MatchOptions, TemplateMatcher};
pub use templates::{DirTemplateStore, MemoryTemplateStore, TemplateStore};

/// Reference portrait width every frame is normalised to
pub const REFERENCE_WIDTH: u32 = 1080;
/// Reference portrait height every frame is normalised to
pub const REFERENCE_HEIGHT: u32 = 1920;

/// One captured screen, immutable once built
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbaImage>,
    captured_at: Instant,
    sequence: u64,
}

impl Frame {
    /// Wrap a captured image
    pub fn new(image: RgbaImage, captured_at: Instant, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            captured_at,
            sequence,
        }
    }

    /// Get the image
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// When the frame was captured
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Monotonic capture counter assigned by the frame source
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Get frame dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Get pixel at coordinates
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        let (width, height) = self.dimensions();
        (x < width && y < height).then(|| *self.image.get_pixel(x, y))
    }
}

/// Rectangle restricting a search, in reference coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Create a region
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole reference screen
    pub const fn full() -> Self {
        Self::new(0, 0, REFERENCE_WIDTH, REFERENCE_HEIGHT)
    }

    /// Clip to an image of the given size, `None` if nothing remains
    pub fn clip(&self, width: u32, height: u32) -> Option<Region> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        (w > 0 && h > 0).then_some(Region::new(self.x, self.y, w, h))
    }

    /// Check if a point lies inside the region
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::full()
    }
}

/// Location of a template inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Similarity score in [0, 1]
    pub confidence: f32,
}

impl Match {
    /// Centre of the matched rectangle, rounded like the tap target
    pub fn center(&self) -> (i32, i32) {
        (
            (self.x as f32 + self.width as f32 / 2.0).round() as i32,
            (self.y as f32 + self.height as f32 / 2.0).round() as i32,
        )
    }

    /// Check if two matches overlap
    pub fn overlaps(&self, other: &Match) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

/// Result of a visibility test; a miss is a value, never an error
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchResult {
    Found(Match),
    NotFound,
}

impl MatchResult {
    /// Check if the template was found
    pub fn is_found(&self) -> bool {
        matches!(self, MatchResult::Found(_))
    }

    /// Get the match, if any
    pub fn found(self) -> Option<Match> {
        match self {
            MatchResult::Found(m) => Some(m),
            MatchResult::NotFound => None,
        }
    }
}

impl From<Option<Match>> for MatchResult {
    fn from(value: Option<Match>) -> Self {
        value.map_or(MatchResult::NotFound, MatchResult::Found)
    }
}

/// Vision system errors
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("template {0:?} not found in asset store")]
    TemplateMissing(String),
    #[error("failed to load template {name:?}: {source}")]
    TemplateLoad {
        name: String,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write screenshot {path:?}: {message}")]
    Screenshot { path: std::path::PathBuf, message: String },
}
