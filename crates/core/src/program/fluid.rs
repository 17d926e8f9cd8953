use futures::future::{FutureExt, LocalBoxFuture};

use super::{palette_uniforms, require_asset, smoothing, ProgramName, Resources, VisualProgram};
use crate::{
    audio::AudioFrame,
    graphics::{Extent, GeometryId, GraphicsBackend, TargetId},
    palette::Palette,
    Result,
};

pub(crate) const SHADER: &str = "shaders/fluid.wgsl";

/// The dye field simulates at a fixed resolution regardless of viewport.
const DYE_EXTENT: Extent = Extent::new(256, 256);
const MAX_SPLATS: usize = 8;
const SPLAT_DECAY: f32 = 0.8;
const SWIRL_RATE: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Splat {
    x: f32,
    y: f32,
    strength: f32,
}

/// Dye advected through a slowly swirling field; onsets inject splats
/// positioned by the dominant pitch class and the spectral centroid.
#[derive(Debug)]
pub struct Fluid {
    resources: Resources,
    dye: Option<TargetId>,
    quad: Option<GeometryId>,
    palette: Palette,
    time: f32,
    swirl: f32,
    splats: Vec<Splat>,
}

impl Default for Fluid {
    fn default() -> Self {
        Self {
            resources: Resources::default(),
            dye: None,
            quad: None,
            palette: Palette::default(),
            time: 0.0,
            swirl: 0.0,
            splats: Vec::with_capacity(MAX_SPLATS),
        }
    }
}

impl Fluid {
    fn allocate(&mut self, gfx: &dyn GraphicsBackend) -> Result<()> {
        self.dye = Some(self.resources.target(gfx, "fluid/dye", DYE_EXTENT)?);
        self.quad = Some(self.resources.geometry(gfx, "fluid/quad", 6)?);
        Ok(())
    }

    fn inject(&mut self, frame: &AudioFrame) {
        let dominant = frame
            .chroma
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(class, _)| class)
            .unwrap_or(0);
        if self.splats.len() == MAX_SPLATS {
            self.splats.remove(0);
        }
        self.splats.push(Splat {
            x: (dominant as f32 + 0.5) / 12.0,
            y: frame.spectral_centroid.clamp(0.0, 1.0),
            strength: (0.3 + frame.rms).min(1.5),
        });
    }
}

impl VisualProgram for Fluid {
    fn name(&self) -> ProgramName {
        ProgramName::Fluid
    }

    fn init<'a>(
        &'a mut self,
        gfx: &'a dyn GraphicsBackend,
        _viewport: Extent,
    ) -> LocalBoxFuture<'a, Result<()>> {
        async move {
            require_asset(gfx, SHADER).await?;
            let allocated = self.allocate(gfx);
            if allocated.is_err() {
                self.dispose(gfx);
            }
            allocated
        }
        .boxed_local()
    }

    fn update(&mut self, elapsed: f32, delta: f32, frame: &AudioFrame) {
        self.time = elapsed;
        let target_swirl = frame.bands.mid + frame.bands.low_mid * 0.5;
        self.swirl += (target_swirl - self.swirl) * smoothing(delta, SWIRL_RATE);

        let decay = (-delta.max(0.0) * SPLAT_DECAY).exp();
        for splat in &mut self.splats {
            splat.strength *= decay;
        }
        self.splats.retain(|splat| splat.strength > 0.01);

        if frame.onset {
            self.inject(frame);
        }
    }

    fn set_palette(&mut self, palette: &Palette) {
        self.palette = *palette;
    }

    fn render(&self, gfx: &dyn GraphicsBackend, target: TargetId) {
        let (Some(dye), Some(quad)) = (self.dye, self.quad) else {
            return;
        };

        let mut uniforms = vec![self.time, self.swirl, self.splats.len() as f32];
        for slot in 0..MAX_SPLATS {
            let splat = self.splats.get(slot).copied().unwrap_or(Splat {
                x: 0.0,
                y: 0.0,
                strength: 0.0,
            });
            uniforms.extend_from_slice(&[splat.x, splat.y, splat.strength]);
        }
        uniforms.extend_from_slice(&palette_uniforms(&self.palette));
        gfx.write_uniforms(quad, &uniforms);

        // Advect into the dye field, then resolve it into the slot target.
        gfx.draw(quad, dye);
        gfx.draw(quad, target);
    }

    fn dispose(&mut self, gfx: &dyn GraphicsBackend) {
        self.resources.release(gfx);
        self.dye = None;
        self.quad = None;
        self.splats.clear();
    }
}
