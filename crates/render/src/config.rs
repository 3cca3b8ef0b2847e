use crate::RenderError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Output settings shared by the render paths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Device pixels per world unit.
    pub resolution: f32,
    /// Truncate fill rectangles to whole pixels.
    pub round_pixels: bool,
    /// RGBA clear color of the render target.
    pub clear_color: [u8; 4],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            round_pixels: false,
            clear_color: [0, 0, 0, 0],
        }
    }
}

impl RenderConfig {
    pub fn from_json(json: &str) -> Result<Self, RenderError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RenderError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
