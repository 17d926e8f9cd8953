//! GPU capability consumed by the engine and the visual programs.
//!
//! Shader compilation, matrix maths and the actual GPU primitives live behind
//! [`GraphicsBackend`]. The core only ever talks in opaque handles.

mod headless;

use std::fmt;

use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};

use crate::{palette::Color, quality::QualityState, Result};

pub use headless::{DrawRecord, HeadlessBackend};

/// Pixel dimensions of a viewport or render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// `floor(self × scale)` per axis, never smaller than one pixel.
    pub fn scaled(self, scale: f32) -> Self {
        let axis = |value: u32| ((value as f32 * scale).floor() as u32).max(1);
        Self::new(axis(self.width), axis(self.height))
    }

    pub fn aspect(self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }
}

impl Default for Extent {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub u64);

/// External render capability. Implementations use interior mutability
/// because the engine and every program share one handle on a single thread.
pub trait GraphicsBackend {
    /// Loads shader source, fonts or other binary assets.
    fn load_asset(&self, key: &str) -> LocalBoxFuture<'static, Result<Vec<u8>>>;

    fn create_target(&self, label: &str, extent: Extent) -> Result<TargetId>;
    fn resize_target(&self, target: TargetId, extent: Extent);
    fn configure_target(&self, target: TargetId, quality: &QualityState);
    fn release_target(&self, target: TargetId);

    fn create_geometry(&self, label: &str, vertices: usize) -> Result<GeometryId>;
    fn write_uniforms(&self, geometry: GeometryId, values: &[f32]);
    fn release_geometry(&self, geometry: GeometryId);

    fn clear_target(&self, target: TargetId, color: Color);
    fn draw(&self, geometry: GeometryId, target: TargetId);
    /// Blends a target onto the output surface at the given opacity.
    fn composite(&self, target: TargetId, alpha: f32);

    fn set_clear_color(&self, color: Color);
    fn set_camera_aspect(&self, aspect: f32);
}
