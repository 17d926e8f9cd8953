//! Dual-slot scene engine.
//!
//! The engine owns two render pipelines, the current program, at most one
//! incoming program and the crossfade state machine:
//!
//! ```text
//! Idle --switch_scene--> Initializing --init ok--> Fading --progress >= 1--> Completing --swap--> Idle
//! ```
//!
//! Scene initialisation is the only asynchronous work. It runs on a local
//! executor that is drained once per tick, and its result is committed only
//! if the epoch it was started under is still the latest one.

mod pipeline;

use std::{rc::Rc, sync::Arc, time::Duration};

use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    executor::LocalPool,
    task::LocalSpawnExt,
};

use crate::{
    audio::{AudioFrame, FrameSubscription},
    config::EngineConfig,
    graphics::{Extent, GraphicsBackend},
    palette::Palette,
    program::{Program, ProgramName, VisualProgram},
    quality::{QualityConfig, QualityController, QualityPatch, QualityState},
    timeline::FrameClock,
    Result,
};

use pipeline::Pipeline;

/// Anything that can be asked to switch scenes. Implemented by [`Engine`];
/// the director only depends on this.
pub trait SceneSwitcher {
    /// Requests a crossfade to `scene` and returns the request's epoch.
    fn switch_scene(&mut self, scene: ProgramName, duration: Duration) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossfadePhase {
    Idle,
    Initializing,
    Fading,
    Completing,
}

/// Snapshot of the crossfade state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossfadeState {
    pub phase: CrossfadePhase,
    /// Opacity of the incoming slot, in `[0, 1]`.
    pub progress: f32,
    pub duration: Duration,
    pub outgoing: Option<ProgramName>,
    pub incoming: Option<ProgramName>,
}

impl CrossfadeState {
    fn idle() -> Self {
        Self {
            phase: CrossfadePhase::Idle,
            progress: 0.0,
            duration: Duration::ZERO,
            outgoing: None,
            incoming: None,
        }
    }
}

/// What happened during one [`Engine::tick`].
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub elapsed: f32,
    pub delta: f32,
    pub phase: CrossfadePhase,
    pub progress: f32,
    /// A program finished initialising and was committed this tick.
    pub committed: Option<ProgramName>,
    /// A crossfade completed this tick; this program is now current.
    pub completed: Option<ProgramName>,
    pub resized: bool,
}

struct InitOutcome {
    epoch: u64,
    scene: ProgramName,
    result: Result<Program>,
}

pub struct Engine {
    gfx: Rc<dyn GraphicsBackend>,
    config: EngineConfig,
    clock: FrameClock,
    frames: FrameSubscription,
    frame: Arc<AudioFrame>,
    quality: QualityController,
    viewport: Extent,
    pending_resize: bool,
    slots: [Pipeline; 2],
    active: usize,
    current: Option<Program>,
    incoming: Option<Program>,
    crossfade: CrossfadeState,
    palette: Palette,
    epoch: u64,
    pool: LocalPool,
    completion_tx: UnboundedSender<InitOutcome>,
    completions: UnboundedReceiver<InitOutcome>,
}

impl Engine {
    /// Builds an engine around explicitly injected collaborators. No program
    /// is active until [`Engine::start`] or [`Engine::switch_scene`].
    pub fn new(
        gfx: Rc<dyn GraphicsBackend>,
        frames: FrameSubscription,
        config: EngineConfig,
        quality: QualityConfig,
    ) -> Result<Self> {
        let quality = QualityController::new(quality);
        let viewport = config.viewport;
        let extent = viewport.scaled(quality.resolution_scale());

        let first = Pipeline::create(&*gfx, "engine/slot-a", extent, quality.state())?;
        let second = match Pipeline::create(&*gfx, "engine/slot-b", extent, quality.state()) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                first.release(&*gfx);
                return Err(err);
            }
        };

        let palette = Palette::default();
        gfx.set_clear_color(palette.background);
        gfx.set_camera_aspect(viewport.aspect());

        let frame = frames.latest();
        let (completion_tx, completions) = mpsc::unbounded();
        tracing::debug!(%viewport, %extent, "engine ready");

        Ok(Self {
            gfx,
            config,
            clock: FrameClock::default(),
            frames,
            frame,
            quality,
            viewport,
            pending_resize: false,
            slots: [first, second],
            active: 0,
            current: None,
            incoming: None,
            crossfade: CrossfadeState::idle(),
            palette,
            epoch: 0,
            pool: LocalPool::new(),
            completion_tx,
            completions,
        })
    }

    /// Starts the configured initial scene.
    pub fn start(&mut self) -> u64 {
        let scene = self.config.initial_scene;
        let duration = self.config.default_crossfade();
        self.switch_scene(scene, duration)
    }

    /// Begins initialising `scene` for the inactive slot. The current program
    /// keeps rendering alone until the initialisation resolves. A newer call
    /// supersedes any pending one, and a crossfade already in progress is
    /// aborted: its incoming program is disposed.
    pub fn switch_scene(&mut self, scene: ProgramName, duration: Duration) -> u64 {
        self.epoch += 1;
        let epoch = self.epoch;

        if let Some(mut aborted) = self.incoming.take() {
            tracing::info!(scene = %aborted.name(), epoch, "aborting crossfade in progress");
            aborted.dispose(&*self.gfx);
        }

        self.crossfade = CrossfadeState {
            phase: CrossfadePhase::Initializing,
            progress: 0.0,
            duration,
            outgoing: self.current_scene(),
            incoming: Some(scene),
        };

        let gfx = Rc::clone(&self.gfx);
        let sender = self.completion_tx.clone();
        let viewport = self.viewport;
        let task = async move {
            let mut program = Program::new(scene);
            let initialised = program.init(&*gfx, viewport).await;
            let result = match initialised {
                Ok(()) => Ok(program),
                Err(err) => {
                    program.dispose(&*gfx);
                    Err(err)
                }
            };
            let _ = sender.unbounded_send(InitOutcome {
                epoch,
                scene,
                result,
            });
        };

        if let Err(err) = self.pool.spawner().spawn_local(task) {
            tracing::warn!(%scene, epoch, error = %err, "could not schedule scene initialisation");
            self.crossfade = CrossfadeState::idle();
        } else {
            tracing::info!(%scene, epoch, ?duration, "scene switch requested");
        }
        epoch
    }

    /// Name-based entry point for UI callers. Unknown names are logged and
    /// skipped.
    pub fn request_scene(&mut self, name: &str, duration: Duration) -> Option<u64> {
        match name.parse::<ProgramName>() {
            Ok(scene) => Some(self.switch_scene(scene, duration)),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring scene request");
                None
            }
        }
    }

    /// Applies a palette to both active programs and the clear colour. Takes
    /// effect before each program's next render.
    pub fn set_palette(&mut self, palette: Palette) {
        self.palette = palette;
        for program in self.current.iter_mut().chain(self.incoming.iter_mut()) {
            program.set_palette(&palette);
        }
        self.gfx.set_clear_color(palette.background);
    }

    /// Merges a partial quality update, reconfigures both pipelines and
    /// resizes.
    pub fn set_quality(&mut self, patch: QualityPatch) -> QualityState {
        let state = self.quality.apply(&patch);
        for slot in &self.slots {
            slot.configure(&*self.gfx, &state);
        }
        self.resize();
        state
    }

    pub fn set_viewport(&mut self, viewport: Extent) {
        self.viewport = viewport;
        self.resize();
    }

    /// Recomputes `floor(viewport × resolution_scale)` for both pipelines and
    /// updates the camera aspect.
    pub fn resize(&mut self) {
        let extent = self.viewport.scaled(self.quality.resolution_scale());
        for slot in &mut self.slots {
            slot.resize(&*self.gfx, extent);
        }
        self.gfx.set_camera_aspect(self.viewport.aspect());
        tracing::debug!(viewport = %self.viewport, %extent, "resized pipelines");
    }

    /// Runs one display frame.
    pub fn tick(&mut self, delta: Duration) -> TickReport {
        let delta = self.clock.advance(delta);
        let elapsed = self.clock.elapsed();

        self.refresh_frame();
        self.pool.run_until_stalled();
        let committed = self.collect_completions();

        let frame = Arc::clone(&self.frame);
        for program in self.current.iter_mut().chain(self.incoming.iter_mut()) {
            program.update(elapsed, delta, &frame);
        }

        let previous_scale = self.quality.resolution_scale();
        if self.quality.sample(delta * 1000.0) != previous_scale {
            self.pending_resize = true;
        }
        let resized = std::mem::take(&mut self.pending_resize);
        if resized {
            self.resize();
        }

        self.render();
        let completed = self.advance_crossfade(delta);

        TickReport {
            elapsed,
            delta,
            phase: self.crossfade.phase,
            progress: self.crossfade.progress,
            committed,
            completed,
            resized,
        }
    }

    pub fn crossfade(&self) -> &CrossfadeState {
        &self.crossfade
    }

    pub fn current_scene(&self) -> Option<ProgramName> {
        self.current.as_ref().map(|program| program.name())
    }

    pub fn incoming_scene(&self) -> Option<ProgramName> {
        self.incoming.as_ref().map(|program| program.name())
    }

    pub fn quality(&self) -> &QualityState {
        self.quality.state()
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// The frame programs were last updated with.
    pub fn frame(&self) -> &AudioFrame {
        &self.frame
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn viewport(&self) -> Extent {
        self.viewport
    }

    pub fn render_extent(&self) -> Extent {
        self.slots[self.active].extent()
    }

    pub fn elapsed(&self) -> f32 {
        self.clock.elapsed()
    }

    fn refresh_frame(&mut self) {
        match self.frames.poll() {
            Ok(Some(frame)) => self.frame = frame,
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "keeping previous audio frame"),
        }
    }

    fn collect_completions(&mut self) -> Option<ProgramName> {
        let mut committed = None;
        while let Ok(Some(outcome)) = self.completions.try_next() {
            if let Some(scene) = self.finish_initialisation(outcome) {
                committed = Some(scene);
            }
        }
        committed
    }

    fn finish_initialisation(&mut self, outcome: InitOutcome) -> Option<ProgramName> {
        let InitOutcome {
            epoch,
            scene,
            result,
        } = outcome;

        if epoch != self.epoch {
            tracing::debug!(%scene, epoch, latest = self.epoch, "discarding superseded initialisation");
            if let Ok(mut stale) = result {
                stale.dispose(&*self.gfx);
            }
            return None;
        }

        let mut program = match result {
            Ok(program) => program,
            Err(err) => {
                tracing::warn!(%scene, epoch, error = %err, "scene initialisation failed, keeping current program");
                self.crossfade = CrossfadeState::idle();
                return None;
            }
        };
        program.set_palette(&self.palette);

        if self.current.is_none() {
            self.current = Some(program);
            self.crossfade = CrossfadeState::idle();
            tracing::info!(%scene, epoch, "scene active");
        } else {
            self.incoming = Some(program);
            self.crossfade.phase = CrossfadePhase::Fading;
            self.crossfade.progress = 0.0;
            tracing::info!(%scene, epoch, duration = ?self.crossfade.duration, "crossfade started");
        }
        Some(scene)
    }

    fn render(&self) {
        let gfx = &*self.gfx;
        let background = self.palette.background;

        if let Some(current) = &self.current {
            let slot = &self.slots[self.active];
            gfx.clear_target(slot.target(), background);
            current.render(gfx, slot.target());
            gfx.composite(slot.target(), 1.0);
        }

        if self.crossfade.phase == CrossfadePhase::Fading {
            if let Some(incoming) = &self.incoming {
                let slot = &self.slots[1 - self.active];
                gfx.clear_target(slot.target(), background);
                incoming.render(gfx, slot.target());
                gfx.composite(slot.target(), self.crossfade.progress);
            }
        }
    }

    fn advance_crossfade(&mut self, delta: f32) -> Option<ProgramName> {
        if self.crossfade.phase != CrossfadePhase::Fading {
            return None;
        }

        let duration = self.crossfade.duration.as_secs_f32();
        let step = if duration > 0.0 {
            delta.max(0.0) / duration
        } else {
            1.0
        };
        self.crossfade.progress = (self.crossfade.progress + step).min(1.0);
        if self.crossfade.progress < 1.0 {
            return None;
        }

        self.crossfade.phase = CrossfadePhase::Completing;
        self.complete_crossfade()
    }

    fn complete_crossfade(&mut self) -> Option<ProgramName> {
        let incoming = self.incoming.take();
        let promoted = incoming.as_ref().map(|program| program.name());

        if let Some(incoming) = incoming {
            if let Some(mut outgoing) = self.current.take() {
                outgoing.dispose(&*self.gfx);
            }
            self.current = Some(incoming);
            self.active = 1 - self.active;
            tracing::info!(scene = ?promoted, epoch = self.epoch, "crossfade complete");
        }
        self.crossfade = CrossfadeState::idle();
        promoted
    }
}

impl SceneSwitcher for Engine {
    fn switch_scene(&mut self, scene: ProgramName, duration: Duration) -> u64 {
        Engine::switch_scene(self, scene, duration)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let gfx = Rc::clone(&self.gfx);
        for mut program in self.incoming.take().into_iter().chain(self.current.take()) {
            program.dispose(&*gfx);
        }
        while let Ok(Some(outcome)) = self.completions.try_next() {
            if let Ok(mut program) = outcome.result {
                program.dispose(&*gfx);
            }
        }
        for slot in &self.slots {
            slot.release(&*gfx);
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("viewport", &self.viewport)
            .field("epoch", &self.epoch)
            .field("crossfade", &self.crossfade)
            .field("current", &self.current_scene())
            .field("incoming", &self.incoming_scene())
            .field("quality", self.quality.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::FrameBus, graphics::HeadlessBackend};

    const FRAME: Duration = Duration::from_millis(16);

    struct Rig {
        gfx: Rc<HeadlessBackend>,
        bus: FrameBus,
        engine: Engine,
    }

    fn rig_with(gfx: HeadlessBackend, quality: QualityConfig) -> Rig {
        let gfx = Rc::new(gfx);
        let bus = FrameBus::new();
        let backend: Rc<dyn GraphicsBackend> = gfx.clone();
        let config = EngineConfig {
            viewport: Extent::new(640, 360),
            ..EngineConfig::default()
        };
        let engine = Engine::new(backend, bus.subscribe(), config, quality).unwrap();
        Rig { gfx, bus, engine }
    }

    fn gated_rig() -> Rig {
        rig_with(HeadlessBackend::gated(), QualityConfig::default())
    }

    fn release(gfx: &HeadlessBackend, scene: ProgramName) {
        for key in scene.asset_keys() {
            gfx.release(key);
        }
    }

    /// Gated rig with `scene` already current.
    fn running(scene: ProgramName) -> Rig {
        let mut rig = gated_rig();
        rig.engine.switch_scene(scene, Duration::from_secs(1));
        release(&rig.gfx, scene);
        let report = rig.engine.tick(FRAME);
        assert_eq!(report.committed, Some(scene));
        assert_eq!(rig.engine.current_scene(), Some(scene));
        rig
    }

    fn live_geometry_of(gfx: &HeadlessBackend, prefix: &str) -> usize {
        gfx.geometry_labels()
            .iter()
            .filter(|label| label.starts_with(prefix))
            .count()
    }

    #[test]
    fn first_scene_is_promoted_without_a_fade() {
        let mut rig = rig_with(HeadlessBackend::new(), QualityConfig::default());
        rig.engine.start();
        let report = rig.engine.tick(FRAME);

        assert_eq!(report.committed, Some(ProgramName::Particles));
        assert_eq!(report.phase, CrossfadePhase::Idle);
        assert_eq!(rig.engine.current_scene(), Some(ProgramName::Particles));
        assert_eq!(rig.gfx.draw_count("particles"), 1);
    }

    #[test]
    fn outgoing_renders_alone_until_init_resolves_then_crossfades() {
        let mut rig = running(ProgramName::Particles);
        rig.engine.switch_scene(ProgramName::Fluid, Duration::from_secs(1));

        // Initialisation takes a few frames; the current program keeps going.
        for _ in 0..3 {
            let report = rig.engine.tick(FRAME);
            assert_eq!(report.phase, CrossfadePhase::Initializing);
        }
        assert_eq!(rig.gfx.draw_count("fluid"), 0);
        assert_eq!(rig.engine.current_scene(), Some(ProgramName::Particles));

        release(&rig.gfx, ProgramName::Fluid);
        let mut since_init = 0.0;
        let mut completed_at = None;
        for _ in 0..100 {
            let report = rig.engine.tick(FRAME);
            since_init += report.delta;
            if report.completed.is_some() {
                completed_at = Some(since_init);
                break;
            }
            assert_eq!(report.phase, CrossfadePhase::Fading);
        }

        let completed_at = completed_at.expect("crossfade never completed");
        assert!(completed_at >= 0.999 && completed_at < 1.0 + 0.017);
        assert_eq!(rig.engine.current_scene(), Some(ProgramName::Fluid));
        assert_eq!(rig.engine.crossfade().phase, CrossfadePhase::Idle);
        assert_eq!(live_geometry_of(&rig.gfx, "particles/"), 0);
    }

    #[test]
    fn progress_is_monotonic_and_completion_lands_in_the_same_tick() {
        let mut rig = running(ProgramName::Particles);
        rig.engine
            .switch_scene(ProgramName::Tunnel, Duration::from_millis(200));
        release(&rig.gfx, ProgramName::Tunnel);

        let mut last = 0.0;
        loop {
            let report = rig.engine.tick(Duration::from_millis(30));
            if let Some(scene) = report.completed {
                assert_eq!(scene, ProgramName::Tunnel);
                assert_eq!(report.phase, CrossfadePhase::Idle);
                break;
            }
            assert_eq!(report.phase, CrossfadePhase::Fading);
            assert!(report.progress >= last);
            assert!(report.progress < 1.0);
            last = report.progress;
        }
    }

    #[test]
    fn incoming_is_composited_at_current_progress() {
        let mut rig = running(ProgramName::Particles);
        rig.engine.switch_scene(ProgramName::Fluid, Duration::from_millis(100));
        release(&rig.gfx, ProgramName::Fluid);
        rig.gfx.take_composites();

        rig.engine.tick(Duration::from_millis(25));
        rig.engine.tick(Duration::from_millis(25));
        let composites = rig.gfx.take_composites();
        let alphas: Vec<f32> = composites.iter().map(|(_, alpha)| *alpha).collect();
        assert_eq!(alphas.len(), 4);
        assert_eq!(alphas[0], 1.0);
        assert_eq!(alphas[1], 0.0);
        assert_eq!(alphas[2], 1.0);
        assert!((alphas[3] - 0.25).abs() < 1e-6);
        assert_ne!(composites[0].0, composites[1].0);
    }

    #[test]
    fn latest_of_two_rapid_switches_wins() {
        let mut rig = running(ProgramName::Particles);
        rig.engine.switch_scene(ProgramName::Tunnel, Duration::from_millis(100));
        rig.engine.switch_scene(ProgramName::Terrain, Duration::from_millis(100));

        release(&rig.gfx, ProgramName::Terrain);
        for _ in 0..20 {
            rig.engine.tick(FRAME);
        }
        assert_eq!(rig.engine.current_scene(), Some(ProgramName::Terrain));

        // The superseded result arrives late and must not be committed.
        release(&rig.gfx, ProgramName::Tunnel);
        for _ in 0..20 {
            let report = rig.engine.tick(FRAME);
            assert_eq!(report.committed, None);
        }
        assert_eq!(rig.engine.current_scene(), Some(ProgramName::Terrain));
        assert_eq!(rig.engine.crossfade().phase, CrossfadePhase::Idle);
        assert_eq!(rig.gfx.draw_count("tunnel"), 0);
        assert_eq!(live_geometry_of(&rig.gfx, "tunnel/"), 0);
    }

    #[test]
    fn stale_result_arriving_first_is_discarded() {
        let mut rig = running(ProgramName::Particles);
        rig.engine.switch_scene(ProgramName::Tunnel, Duration::from_millis(100));
        let latest = rig.engine.switch_scene(ProgramName::Terrain, Duration::from_millis(100));

        release(&rig.gfx, ProgramName::Tunnel);
        let report = rig.engine.tick(FRAME);
        assert_eq!(report.committed, None);
        assert_eq!(report.phase, CrossfadePhase::Initializing);
        assert_eq!(rig.engine.crossfade().incoming, Some(ProgramName::Terrain));
        assert_eq!(rig.engine.epoch(), latest);
        assert_eq!(live_geometry_of(&rig.gfx, "tunnel/"), 0);

        release(&rig.gfx, ProgramName::Terrain);
        let report = rig.engine.tick(FRAME);
        assert_eq!(report.committed, Some(ProgramName::Terrain));
    }

    #[test]
    fn failed_initialisation_keeps_the_current_program() {
        let mut rig = running(ProgramName::Particles);
        rig.engine.switch_scene(ProgramName::Typography, Duration::from_secs(1));
        let [shader, atlas] = ProgramName::Typography.asset_keys() else {
            unreachable!("typography loads a shader and an atlas");
        };
        rig.gfx.release(shader);
        rig.gfx.fail(atlas, "atlas missing");

        let report = rig.engine.tick(FRAME);
        assert_eq!(report.phase, CrossfadePhase::Idle);
        assert_eq!(report.committed, None);
        assert_eq!(rig.engine.current_scene(), Some(ProgramName::Particles));
        assert_eq!(live_geometry_of(&rig.gfx, "typography/"), 0);

        let before = rig.gfx.draw_count("particles");
        rig.engine.tick(FRAME);
        assert_eq!(rig.gfx.draw_count("particles"), before + 1);
    }

    #[test]
    fn switching_mid_fade_aborts_the_incoming_program() {
        let mut rig = running(ProgramName::Particles);
        rig.engine.switch_scene(ProgramName::Fluid, Duration::from_secs(1));
        release(&rig.gfx, ProgramName::Fluid);
        rig.engine.tick(FRAME);
        rig.engine.tick(FRAME);
        assert_eq!(rig.engine.crossfade().phase, CrossfadePhase::Fading);

        rig.engine.switch_scene(ProgramName::Tunnel, Duration::from_secs(1));
        assert_eq!(rig.engine.crossfade().phase, CrossfadePhase::Initializing);
        assert_eq!(rig.engine.crossfade().progress, 0.0);
        assert_eq!(rig.engine.incoming_scene(), None);
        assert_eq!(live_geometry_of(&rig.gfx, "fluid/"), 0);
        assert_eq!(rig.engine.current_scene(), Some(ProgramName::Particles));
    }

    #[test]
    fn disposed_program_is_never_drawn_again() {
        let mut rig = running(ProgramName::Particles);
        rig.engine.switch_scene(ProgramName::Terrain, Duration::from_millis(50));
        release(&rig.gfx, ProgramName::Terrain);
        loop {
            if rig.engine.tick(FRAME).completed.is_some() {
                break;
            }
        }

        let drawn = rig.gfx.draw_count("particles");
        for _ in 0..50 {
            rig.engine.tick(FRAME);
        }
        assert_eq!(rig.gfx.draw_count("particles"), drawn);
        assert!(rig.gfx.draw_count("terrain") > 50);
    }

    #[test]
    fn zero_duration_switch_completes_on_commit() {
        let mut rig = running(ProgramName::Particles);
        rig.engine.switch_scene(ProgramName::Fluid, Duration::ZERO);
        release(&rig.gfx, ProgramName::Fluid);

        let report = rig.engine.tick(FRAME);
        assert_eq!(report.committed, Some(ProgramName::Fluid));
        assert_eq!(report.completed, Some(ProgramName::Fluid));
    }

    #[test]
    fn keeps_rendering_without_any_audio_frames() {
        let mut rig = rig_with(HeadlessBackend::new(), QualityConfig::default());
        rig.engine.start();
        for _ in 0..600 {
            rig.engine.tick(FRAME);
        }
        assert_eq!(*rig.engine.frame(), AudioFrame::neutral());
        assert_eq!(rig.gfx.draw_count("particles"), 600);
    }

    #[test]
    fn programs_see_the_latest_published_frame() {
        let mut rig = rig_with(HeadlessBackend::new(), QualityConfig::default());
        rig.engine.start();
        rig.bus
            .publish(AudioFrame {
                time: 4.5,
                tempo: 128.0,
                ..AudioFrame::neutral()
            })
            .unwrap();
        rig.engine.tick(FRAME);
        assert_eq!(rig.engine.frame().time, 4.5);
    }

    #[test]
    fn repeated_palette_is_idempotent() {
        let mut rig = running(ProgramName::Particles);
        let palette = Palette::from_pixels(vec![[30, 120, 200]; 8]);

        rig.engine.set_palette(palette);
        rig.engine.tick(Duration::ZERO);
        let first = (rig.gfx.clear_color(), rig.gfx.uniforms("particles/points"));

        rig.engine.set_palette(palette);
        rig.engine.tick(Duration::ZERO);
        let second = (rig.gfx.clear_color(), rig.gfx.uniforms("particles/points"));

        assert_eq!(first, second);
        assert_eq!(first.0, Some(palette.background));
        assert_eq!(*rig.engine.palette(), palette);
    }

    #[test]
    fn palette_reaches_a_program_committed_later() {
        let mut rig = running(ProgramName::Particles);
        let palette = Palette::from_pixels(vec![[200, 20, 20]; 8]);
        rig.engine.set_palette(palette);

        rig.engine.switch_scene(ProgramName::Tunnel, Duration::from_secs(1));
        release(&rig.gfx, ProgramName::Tunnel);
        rig.engine.tick(FRAME);

        let uniforms = rig.gfx.uniforms("tunnel/rings").unwrap();
        assert!(uniforms.ends_with(&crate::program::palette_uniforms(&palette)));
    }

    #[test]
    fn set_quality_resizes_and_reconfigures_both_slots() {
        let mut rig = running(ProgramName::Particles);
        let state = rig.engine.set_quality(QualityPatch {
            resolution_scale: Some(0.5),
            bloom: Some(false),
            ..QualityPatch::default()
        });

        assert_eq!(state.resolution_scale, 0.5);
        assert_eq!(rig.engine.render_extent(), Extent::new(320, 180));
        for slot in &rig.engine.slots {
            assert_eq!(rig.gfx.target_extent(slot.target()), Some(Extent::new(320, 180)));
            assert_eq!(rig.gfx.target_quality(slot.target()), Some(state));
        }
        assert_eq!(rig.gfx.camera_aspect(), Some(640.0 / 360.0));
    }

    #[test]
    fn slow_frames_shrink_the_render_targets() {
        let mut rig = rig_with(
            HeadlessBackend::new(),
            QualityConfig {
                sample_window: 1,
                ..QualityConfig::default()
            },
        );
        rig.engine.start();
        let report = rig.engine.tick(Duration::from_millis(50));

        assert!(report.resized);
        assert!(rig.engine.quality().resolution_scale < 1.0);
        assert_eq!(rig.engine.render_extent(), Extent::new(576, 324));
    }

    #[test]
    fn viewport_changes_update_targets_and_aspect() {
        let mut rig = running(ProgramName::Particles);
        rig.engine.set_viewport(Extent::new(1000, 500));
        assert_eq!(rig.engine.render_extent(), Extent::new(1000, 500));
        assert_eq!(rig.gfx.camera_aspect(), Some(2.0));
    }

    #[test]
    fn unknown_scene_names_are_skipped() {
        let mut rig = running(ProgramName::Particles);
        let epoch = rig.engine.epoch();
        assert_eq!(rig.engine.request_scene("Kaleidoscope", Duration::from_secs(1)), None);
        assert_eq!(rig.engine.epoch(), epoch);
        assert!(rig.engine.request_scene("fluid", Duration::from_secs(1)).is_some());
        assert_eq!(rig.engine.crossfade().incoming, Some(ProgramName::Fluid));
    }

    #[test]
    fn independent_engines_share_nothing() {
        let mut first = running(ProgramName::Particles);
        let mut second = running(ProgramName::Terrain);
        first.engine.switch_scene(ProgramName::Fluid, Duration::ZERO);
        release(&first.gfx, ProgramName::Fluid);
        first.engine.tick(FRAME);
        second.engine.tick(FRAME);

        assert_eq!(first.engine.current_scene(), Some(ProgramName::Fluid));
        assert_eq!(second.engine.current_scene(), Some(ProgramName::Terrain));
    }

    #[test]
    fn dropping_the_engine_releases_everything() {
        let rig = running(ProgramName::Fluid);
        let Rig { gfx, bus, mut engine } = rig;
        engine.switch_scene(ProgramName::Tunnel, Duration::from_secs(1));
        release(&gfx, ProgramName::Tunnel);
        engine.tick(FRAME);
        assert!(gfx.live_targets() > 0);

        drop(engine);
        assert_eq!(gfx.live_targets(), 0);
        assert_eq!(gfx.live_geometry(), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
