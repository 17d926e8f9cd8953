use futures::future::{FutureExt, LocalBoxFuture};

use super::{palette_uniforms, require_asset, smoothing, ProgramName, Resources, VisualProgram};
use crate::{
    audio::AudioFrame,
    graphics::{Extent, GeometryId, GraphicsBackend, TargetId},
    palette::Palette,
    Result,
};

pub(crate) const SHADER: &str = "shaders/tunnel.wgsl";

const RINGS: usize = 48;
const SEGMENTS: usize = 64;
/// Travel speed in rings per beat when the tempo is known.
const RINGS_PER_BEAT: f32 = 1.0;
const IDLE_SPEED: f32 = 0.5;
const TWIST_RATE: f32 = 1.5;

/// Ring tunnel that travels on the beat and twists with brightness.
#[derive(Debug)]
pub struct Tunnel {
    resources: Resources,
    rings: Option<GeometryId>,
    palette: Palette,
    time: f32,
    depth: f32,
    twist: f32,
    pulse: f32,
}

impl Default for Tunnel {
    fn default() -> Self {
        Self {
            resources: Resources::default(),
            rings: None,
            palette: Palette::default(),
            time: 0.0,
            depth: 0.0,
            twist: 0.0,
            pulse: 0.0,
        }
    }
}

impl VisualProgram for Tunnel {
    fn name(&self) -> ProgramName {
        ProgramName::Tunnel
    }

    fn init<'a>(
        &'a mut self,
        gfx: &'a dyn GraphicsBackend,
        _viewport: Extent,
    ) -> LocalBoxFuture<'a, Result<()>> {
        async move {
            require_asset(gfx, SHADER).await?;
            self.rings = Some(
                self.resources
                    .geometry(gfx, "tunnel/rings", RINGS * SEGMENTS * 6)?,
            );
            Ok(())
        }
        .boxed_local()
    }

    fn update(&mut self, elapsed: f32, delta: f32, frame: &AudioFrame) {
        self.time = elapsed;
        let speed = if frame.tempo > 0.0 {
            frame.tempo / 60.0 * RINGS_PER_BEAT
        } else {
            IDLE_SPEED
        };
        self.depth = (self.depth + speed * delta.max(0.0)) % RINGS as f32;

        let target_twist = (frame.spectral_centroid - 0.5) * 2.0;
        self.twist += (target_twist - self.twist) * smoothing(delta, TWIST_RATE);

        // Strongest on the beat, fading towards the next one.
        let beat = 1.0 - frame.beat_phase.clamp(0.0, 1.0);
        self.pulse = beat * beat * frame.beat_confidence.clamp(0.0, 1.0);
    }

    fn set_palette(&mut self, palette: &Palette) {
        self.palette = *palette;
    }

    fn render(&self, gfx: &dyn GraphicsBackend, target: TargetId) {
        let Some(rings) = self.rings else {
            return;
        };
        let mut uniforms = vec![self.time, self.depth, self.twist, self.pulse];
        uniforms.extend_from_slice(&palette_uniforms(&self.palette));
        gfx.write_uniforms(rings, &uniforms);
        gfx.draw(rings, target);
    }

    fn dispose(&mut self, gfx: &dyn GraphicsBackend) {
        self.resources.release(gfx);
        self.rings = None;
    }
}
