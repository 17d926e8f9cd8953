use futures::future::{FutureExt, LocalBoxFuture};

use super::{palette_uniforms, require_asset, smoothing, ProgramName, Resources, VisualProgram};
use crate::{
    audio::AudioFrame,
    graphics::{Extent, GeometryId, GraphicsBackend, TargetId},
    palette::Palette,
    Result,
};

pub(crate) const SHADER: &str = "shaders/particles.wgsl";

const MIN_PARTICLES: usize = 1_024;
const MAX_PARTICLES: usize = 16_384;
/// One particle per this many viewport pixels.
const PIXELS_PER_PARTICLE: usize = 256;
const BURST_DECAY: f32 = 3.0;
const SPREAD_RATE: f32 = 6.0;

/// Point cloud that breathes with the bass and bursts on onsets.
#[derive(Debug)]
pub struct Particles {
    resources: Resources,
    points: Option<GeometryId>,
    count: usize,
    palette: Palette,
    time: f32,
    spread: f32,
    burst: f32,
    spin: f32,
    shimmer: f32,
}

impl Default for Particles {
    fn default() -> Self {
        Self {
            resources: Resources::default(),
            points: None,
            count: 0,
            palette: Palette::default(),
            time: 0.0,
            spread: 1.0,
            burst: 0.0,
            spin: 0.0,
            shimmer: 0.0,
        }
    }
}

impl Particles {
    pub fn count(&self) -> usize {
        self.count
    }

    fn allocate(&mut self, gfx: &dyn GraphicsBackend, viewport: Extent) -> Result<()> {
        let pixels = viewport.width as usize * viewport.height as usize;
        self.count = (pixels / PIXELS_PER_PARTICLE).clamp(MIN_PARTICLES, MAX_PARTICLES);
        self.points = Some(self.resources.geometry(gfx, "particles/points", self.count)?);
        Ok(())
    }
}

impl VisualProgram for Particles {
    fn name(&self) -> ProgramName {
        ProgramName::Particles
    }

    fn init<'a>(
        &'a mut self,
        gfx: &'a dyn GraphicsBackend,
        viewport: Extent,
    ) -> LocalBoxFuture<'a, Result<()>> {
        async move {
            require_asset(gfx, SHADER).await?;
            let allocated = self.allocate(gfx, viewport);
            if allocated.is_err() {
                self.resources.release(gfx);
                self.points = None;
            }
            allocated
        }
        .boxed_local()
    }

    fn update(&mut self, elapsed: f32, delta: f32, frame: &AudioFrame) {
        self.time = elapsed;
        self.burst = if frame.onset {
            1.0
        } else {
            (self.burst - delta * BURST_DECAY).max(0.0)
        };
        let target_spread = 1.0 + frame.bands.bass * 2.0 + self.burst * 0.5;
        self.spread += (target_spread - self.spread) * smoothing(delta, SPREAD_RATE);
        self.spin += delta * (0.2 + frame.spectral_centroid * 1.5);
        self.shimmer = frame.bands.highs + frame.novelty * 0.5;
    }

    fn set_palette(&mut self, palette: &Palette) {
        self.palette = *palette;
    }

    fn render(&self, gfx: &dyn GraphicsBackend, target: TargetId) {
        let Some(points) = self.points else {
            return;
        };
        let mut uniforms = vec![
            self.time,
            self.spread,
            self.burst,
            self.spin,
            self.shimmer,
            self.count as f32,
        ];
        uniforms.extend_from_slice(&palette_uniforms(&self.palette));
        gfx.write_uniforms(points, &uniforms);
        gfx.draw(points, target);
    }

    fn dispose(&mut self, gfx: &dyn GraphicsBackend) {
        self.resources.release(gfx);
        self.points = None;
    }
}
