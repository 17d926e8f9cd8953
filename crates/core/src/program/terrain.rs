use std::collections::VecDeque;

use futures::future::{FutureExt, LocalBoxFuture};

use super::{palette_uniforms, require_asset, ProgramName, Resources, VisualProgram};
use crate::{
    audio::{AudioFrame, Bands},
    graphics::{Extent, GeometryId, GraphicsBackend, TargetId},
    palette::Palette,
    Result,
};

pub(crate) const SHADER: &str = "shaders/terrain.wgsl";

const MIN_COLUMNS: usize = 32;
const MAX_COLUMNS: usize = 256;
const PIXELS_PER_COLUMN: u32 = 16;
const ROWS: usize = 64;
/// A new spectral row scrolls in at this rate (rows per second).
const ROW_RATE: f32 = 30.0;

/// Scrolling spectral landscape: each row is a snapshot of the band
/// energies stretched across the grid width.
#[derive(Debug)]
pub struct Terrain {
    resources: Resources,
    grid: Option<GeometryId>,
    columns: usize,
    palette: Palette,
    time: f32,
    scroll: f32,
    rows: VecDeque<Vec<f32>>,
}

impl Default for Terrain {
    fn default() -> Self {
        Self {
            resources: Resources::default(),
            grid: None,
            columns: MIN_COLUMNS,
            palette: Palette::default(),
            time: 0.0,
            scroll: 0.0,
            rows: VecDeque::with_capacity(ROWS),
        }
    }
}

impl Terrain {
    pub fn columns(&self) -> usize {
        self.columns
    }

    fn push_row(&mut self, bands: &Bands, loudness: f32) {
        let anchors = [bands.bass, bands.low_mid, bands.mid, bands.high_mid, bands.highs];
        let last = (anchors.len() - 1) as f32;
        let row = (0..self.columns)
            .map(|column| {
                let position = column as f32 / (self.columns - 1).max(1) as f32 * last;
                let lower = position.floor() as usize;
                let upper = (lower + 1).min(anchors.len() - 1);
                let t = position - lower as f32;
                (anchors[lower] + (anchors[upper] - anchors[lower]) * t) * loudness
            })
            .collect();

        if self.rows.len() == ROWS {
            self.rows.pop_back();
        }
        self.rows.push_front(row);
    }
}

impl VisualProgram for Terrain {
    fn name(&self) -> ProgramName {
        ProgramName::Terrain
    }

    fn init<'a>(
        &'a mut self,
        gfx: &'a dyn GraphicsBackend,
        viewport: Extent,
    ) -> LocalBoxFuture<'a, Result<()>> {
        async move {
            require_asset(gfx, SHADER).await?;
            self.columns =
                ((viewport.width / PIXELS_PER_COLUMN) as usize).clamp(MIN_COLUMNS, MAX_COLUMNS);
            self.grid = Some(
                self.resources
                    .geometry(gfx, "terrain/grid", self.columns * ROWS)?,
            );
            Ok(())
        }
        .boxed_local()
    }

    fn update(&mut self, elapsed: f32, delta: f32, frame: &AudioFrame) {
        self.time = elapsed;
        self.scroll += delta.max(0.0) * ROW_RATE;
        // Loudness in [0, 1] from the -70..0 LUFS range.
        let loudness = ((frame.lufs_short + 70.0) / 70.0).clamp(0.0, 1.0);
        if !self.scroll.is_finite() {
            self.scroll = ROWS as f32;
        }
        // Only the newest `ROWS` rows are ever kept.
        let due = self.scroll.floor();
        self.scroll -= due;
        for _ in 0..(due as usize).min(ROWS) {
            self.push_row(&frame.bands, loudness);
        }
    }

    fn set_palette(&mut self, palette: &Palette) {
        self.palette = *palette;
    }

    fn render(&self, gfx: &dyn GraphicsBackend, target: TargetId) {
        let Some(grid) = self.grid else {
            return;
        };
        let mut uniforms = Vec::with_capacity(2 + self.columns * ROWS + 12);
        uniforms.extend_from_slice(&[self.time, self.scroll]);
        for row in 0..ROWS {
            match self.rows.get(row) {
                Some(heights) => uniforms.extend_from_slice(heights),
                None => uniforms.extend(std::iter::repeat(0.0).take(self.columns)),
            }
        }
        uniforms.extend_from_slice(&palette_uniforms(&self.palette));
        gfx.write_uniforms(grid, &uniforms);
        gfx.draw(grid, target);
    }

    fn dispose(&mut self, gfx: &dyn GraphicsBackend) {
        self.resources.release(gfx);
        self.grid = None;
        self.rows.clear();
    }
}
