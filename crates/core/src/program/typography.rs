use futures::future::{FutureExt, LocalBoxFuture};

use super::{palette_uniforms, require_asset, smoothing, ProgramName, Resources, VisualProgram};
use crate::{
    audio::AudioFrame,
    graphics::{Extent, GeometryId, GraphicsBackend, TargetId},
    palette::Palette,
    Result,
};

pub(crate) const SHADER: &str = "shaders/typography.wgsl";
pub(crate) const FONT_ATLAS: &str = "fonts/typography-atlas";

const ATLAS_EXTENT: Extent = Extent::new(512, 512);
const WORDS: [&str; 6] = ["PULSE", "DRIFT", "GLOW", "RISE", "FALL", "HOLD"];
const MAX_GLYPHS: usize = 16;
const SCALE_RATE: f32 = 10.0;

/// Kinetic type: the word advances on each onset, size follows loudness and
/// letter spacing follows the high bands.
#[derive(Debug)]
pub struct Typography {
    resources: Resources,
    atlas: Option<TargetId>,
    glyphs: Option<GeometryId>,
    atlas_bytes: usize,
    palette: Palette,
    time: f32,
    word: usize,
    scale: f32,
    tracking: f32,
    hue: f32,
}

impl Default for Typography {
    fn default() -> Self {
        Self {
            resources: Resources::default(),
            atlas: None,
            glyphs: None,
            atlas_bytes: 0,
            palette: Palette::default(),
            time: 0.0,
            word: 0,
            scale: 1.0,
            tracking: 0.0,
            hue: 0.0,
        }
    }
}

impl Typography {
    pub fn word(&self) -> &'static str {
        WORDS[self.word % WORDS.len()]
    }

    fn allocate(&mut self, gfx: &dyn GraphicsBackend) -> Result<()> {
        self.atlas = Some(self.resources.target(gfx, "typography/atlas", ATLAS_EXTENT)?);
        self.glyphs = Some(
            self.resources
                .geometry(gfx, "typography/glyphs", MAX_GLYPHS * 6)?,
        );
        Ok(())
    }
}

impl VisualProgram for Typography {
    fn name(&self) -> ProgramName {
        ProgramName::Typography
    }

    fn init<'a>(
        &'a mut self,
        gfx: &'a dyn GraphicsBackend,
        _viewport: Extent,
    ) -> LocalBoxFuture<'a, Result<()>> {
        async move {
            require_asset(gfx, SHADER).await?;
            self.atlas_bytes = require_asset(gfx, FONT_ATLAS).await?.len();
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
        if frame.onset {
            self.word = (self.word + 1) % WORDS.len();
        }
        let target_scale = 0.8 + frame.rms.clamp(0.0, 1.0) * 0.8;
        self.scale += (target_scale - self.scale) * smoothing(delta, SCALE_RATE);
        self.tracking = (frame.bands.high_mid + frame.bands.highs).clamp(0.0, 1.0);

        let dominant = frame
            .chroma
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .filter(|(_, weight)| **weight > 0.0)
            .map(|(class, _)| class);
        if let Some(class) = dominant {
            self.hue = class as f32 / 12.0;
        }
    }

    fn set_palette(&mut self, palette: &Palette) {
        self.palette = *palette;
    }

    fn render(&self, gfx: &dyn GraphicsBackend, target: TargetId) {
        let (Some(atlas), Some(glyphs)) = (self.atlas, self.glyphs) else {
            return;
        };
        let word = self.word();
        let mut uniforms = vec![
            self.time,
            self.scale,
            self.tracking,
            self.hue,
            word.len() as f32,
            self.atlas_bytes as f32,
        ];
        uniforms.extend(word.bytes().map(f32::from));
        uniforms.extend_from_slice(&palette_uniforms(&self.palette));
        gfx.write_uniforms(glyphs, &uniforms);

        // Rasterise into the glyph atlas, then lay the word out into the slot.
        gfx.draw(glyphs, atlas);
        gfx.draw(glyphs, target);
    }

    fn dispose(&mut self, gfx: &dyn GraphicsBackend) {
        self.resources.release(gfx);
        self.atlas = None;
        self.glyphs = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onsets_advance_the_word() {
        let mut typography = Typography::default();
        assert_eq!(typography.word(), "PULSE");

        let hit = AudioFrame {
            onset: true,
            ..AudioFrame::neutral()
        };
        typography.update(0.0, 0.016, &hit);
        assert_eq!(typography.word(), "DRIFT");

        for _ in 0..WORDS.len() - 1 {
            typography.update(0.0, 0.016, &hit);
        }
        assert_eq!(typography.word(), "PULSE");
    }

    #[test]
    fn hue_follows_the_dominant_pitch_class() {
        let mut typography = Typography::default();
        let mut chroma = [0.0; 12];
        chroma[3] = 1.0;
        typography.update(
            0.0,
            0.016,
            &AudioFrame {
                chroma,
                ..AudioFrame::neutral()
            },
        );
        assert_eq!(typography.hue, 0.25);

        typography.update(0.1, 0.016, &AudioFrame::neutral());
        assert_eq!(typography.hue, 0.25);
    }
}
