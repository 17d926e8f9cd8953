//! Pluggable visual programs.
//!
//! Every variant implements [`VisualProgram`]; the engine only ever holds the
//! closed [`Program`] enum, built from the static table in [`Program::new`].

mod fluid;
mod particles;
mod terrain;
mod tunnel;
mod typography;

use std::{fmt, str::FromStr};

use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};

use crate::{
    audio::AudioFrame,
    graphics::{Extent, GeometryId, GraphicsBackend, TargetId},
    palette::Palette,
    Result, VisualsError,
};

pub use fluid::Fluid;
pub use particles::Particles;
pub use terrain::Terrain;
pub use tunnel::Tunnel;
pub use typography::Typography;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgramName {
    Particles,
    Fluid,
    Tunnel,
    Terrain,
    Typography,
}

impl ProgramName {
    pub const ALL: [ProgramName; 5] = [
        ProgramName::Particles,
        ProgramName::Fluid,
        ProgramName::Tunnel,
        ProgramName::Terrain,
        ProgramName::Typography,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProgramName::Particles => "Particles",
            ProgramName::Fluid => "Fluid",
            ProgramName::Tunnel => "Tunnel",
            ProgramName::Terrain => "Terrain",
            ProgramName::Typography => "Typography",
        }
    }

    /// Assets the program awaits during `init`, in load order.
    pub fn asset_keys(self) -> &'static [&'static str] {
        match self {
            ProgramName::Particles => &[particles::SHADER],
            ProgramName::Fluid => &[fluid::SHADER],
            ProgramName::Tunnel => &[tunnel::SHADER],
            ProgramName::Terrain => &[terrain::SHADER],
            ProgramName::Typography => &[typography::SHADER, typography::FONT_ATLAS],
        }
    }
}

impl fmt::Display for ProgramName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgramName {
    type Err = VisualsError;

    fn from_str(s: &str) -> Result<Self> {
        ProgramName::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| VisualsError::UnknownScene(s.to_string()))
    }
}

/// Lifecycle shared by every visual program.
///
/// A program owns its GPU resources exclusively. `dispose` must release all
/// of them; the engine calls it at most once per instance.
pub trait VisualProgram {
    fn name(&self) -> ProgramName;

    /// Awaits the program's assets, then allocates its resources.
    fn init<'a>(
        &'a mut self,
        gfx: &'a dyn GraphicsBackend,
        viewport: Extent,
    ) -> LocalBoxFuture<'a, Result<()>>;

    /// Advances the simulation. `elapsed` and `delta` are in seconds.
    fn update(&mut self, elapsed: f32, delta: f32, frame: &AudioFrame);

    fn set_palette(&mut self, palette: &Palette);

    /// Uploads uniforms and submits draws into the engine-owned `target`.
    fn render(&self, gfx: &dyn GraphicsBackend, target: TargetId);

    fn dispose(&mut self, gfx: &dyn GraphicsBackend);
}

/// Closed set of program variants.
#[derive(Debug)]
pub enum Program {
    Particles(Particles),
    Fluid(Fluid),
    Tunnel(Tunnel),
    Terrain(Terrain),
    Typography(Typography),
}

type Constructor = fn() -> Program;

const REGISTRY: [(ProgramName, Constructor); 5] = [
    (ProgramName::Particles, new_particles),
    (ProgramName::Fluid, new_fluid),
    (ProgramName::Tunnel, new_tunnel),
    (ProgramName::Terrain, new_terrain),
    (ProgramName::Typography, new_typography),
];

fn new_particles() -> Program {
    Program::Particles(Particles::default())
}

fn new_fluid() -> Program {
    Program::Fluid(Fluid::default())
}

fn new_tunnel() -> Program {
    Program::Tunnel(Tunnel::default())
}

fn new_terrain() -> Program {
    Program::Terrain(Terrain::default())
}

fn new_typography() -> Program {
    Program::Typography(Typography::default())
}

macro_rules! dispatch {
    ($program:expr, $inner:ident => $body:expr) => {
        match $program {
            Program::Particles($inner) => $body,
            Program::Fluid($inner) => $body,
            Program::Tunnel($inner) => $body,
            Program::Terrain($inner) => $body,
            Program::Typography($inner) => $body,
        }
    };
}

impl Program {
    pub fn new(name: ProgramName) -> Self {
        let (_, construct) = REGISTRY
            .iter()
            .find(|(entry, _)| *entry == name)
            .copied()
            .unwrap_or(REGISTRY[0]);
        construct()
    }
}

impl VisualProgram for Program {
    fn name(&self) -> ProgramName {
        dispatch!(self, inner => inner.name())
    }

    fn init<'a>(
        &'a mut self,
        gfx: &'a dyn GraphicsBackend,
        viewport: Extent,
    ) -> LocalBoxFuture<'a, Result<()>> {
        dispatch!(self, inner => inner.init(gfx, viewport))
    }

    fn update(&mut self, elapsed: f32, delta: f32, frame: &AudioFrame) {
        dispatch!(self, inner => inner.update(elapsed, delta, frame))
    }

    fn set_palette(&mut self, palette: &Palette) {
        dispatch!(self, inner => inner.set_palette(palette))
    }

    fn render(&self, gfx: &dyn GraphicsBackend, target: TargetId) {
        dispatch!(self, inner => inner.render(gfx, target))
    }

    fn dispose(&mut self, gfx: &dyn GraphicsBackend) {
        dispatch!(self, inner => inner.dispose(gfx))
    }
}

/// Ledger of everything a program allocated, released in one sweep.
#[derive(Debug, Default)]
pub(crate) struct Resources {
    targets: Vec<TargetId>,
    geometry: Vec<GeometryId>,
}

impl Resources {
    pub(crate) fn target(
        &mut self,
        gfx: &dyn GraphicsBackend,
        label: &str,
        extent: Extent,
    ) -> Result<TargetId> {
        let target = gfx.create_target(label, extent)?;
        self.targets.push(target);
        Ok(target)
    }

    pub(crate) fn geometry(
        &mut self,
        gfx: &dyn GraphicsBackend,
        label: &str,
        vertices: usize,
    ) -> Result<GeometryId> {
        let geometry = gfx.create_geometry(label, vertices)?;
        self.geometry.push(geometry);
        Ok(geometry)
    }

    pub(crate) fn release(&mut self, gfx: &dyn GraphicsBackend) {
        for geometry in self.geometry.drain(..) {
            gfx.release_geometry(geometry);
        }
        for target in self.targets.drain(..) {
            gfx.release_target(target);
        }
    }
}

/// Palette packed as three RGB triples plus background, for uniform upload.
pub(crate) fn palette_uniforms(palette: &Palette) -> [f32; 12] {
    let mut packed = [0.0; 12];
    for (slot, color) in packed.chunks_exact_mut(3).zip([
        palette.primary,
        palette.secondary,
        palette.tertiary,
        palette.background,
    ]) {
        slot.copy_from_slice(&color.to_array());
    }
    packed
}

/// Frame-rate independent exponential smoothing factor.
pub(crate) fn smoothing(delta: f32, rate: f32) -> f32 {
    1.0 - (-delta.max(0.0) * rate).exp()
}

pub(crate) async fn require_asset(gfx: &dyn GraphicsBackend, key: &str) -> Result<Vec<u8>> {
    let bytes = gfx.load_asset(key).await?;
    if bytes.is_empty() {
        return Err(VisualsError::backend(format!("asset `{key}` is empty")));
    }
    Ok(bytes)
}
