mod sources;

use std::{path::PathBuf, rc::Rc, time::Duration};

use clap::{Args, Parser, Subcommand};
use futures::executor::block_on;
use pulse_visuals_core::{
    AppConfig, ArtworkCache, Cue, CueStore, Director, DirectorEvent, Engine, FeatureExtractor,
    FileArtworkSource, FileStore, FrameBus, GraphicsBackend, HeadlessBackend, KeyValueStore,
    ProgramName, TrackMetadata,
};
use tracing_subscriber::EnvFilter;

use sources::{ClickTrack, DescriptorFile, SampleSource, WavSource};

fn main() -> pulse_visuals_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    let store: Rc<dyn KeyValueStore> = Rc::new(FileStore::open(&cli.store)?);

    match cli.command {
        Commands::Run(args) => run(&config, store, args),
        Commands::Cue { command } => match command {
            CueCommand::Add { track, bar, scene } => add_cue(store, &track, bar, &scene),
            CueCommand::List { track } => list_cues(store, &track),
        },
    }
}

fn run(config: &AppConfig, store: Rc<dyn KeyValueStore>, args: RunArgs) -> pulse_visuals_core::Result<()> {
    let fps = clamp_fps(args.fps);
    let frame_time = Duration::from_secs_f32(1.0 / fps);

    let mut source: Box<dyn SampleSource> = match &args.input {
        Some(path) => Box::new(WavSource::open(path)?),
        None => Box::new(ClickTrack::new(
            config.audio.sample_rate,
            args.bpm,
            config.director.beats_per_bar,
        )?),
    };
    let metadata: Rc<dyn TrackMetadata> = match &args.descriptors {
        Some(path) => Rc::new(DescriptorFile::load(path)?),
        None => Rc::new(DescriptorFile::default()),
    };

    let gfx = Rc::new(HeadlessBackend::new());
    let backend: Rc<dyn GraphicsBackend> = gfx.clone();
    let bus = FrameBus::new();
    let mut engine = Engine::new(
        backend,
        bus.subscribe(),
        config.engine.clone(),
        config.quality.clone(),
    )?;
    let mut director = Director::new(
        config.director.clone(),
        bus.subscribe(),
        CueStore::new(store.clone()),
        metadata,
    );

    match &args.scene {
        Some(scene) => {
            if engine
                .request_scene(scene, config.engine.default_crossfade())
                .is_none()
            {
                engine.start();
            }
        }
        None => {
            engine.start();
        }
    }
    if let Some(track) = &args.track {
        director.set_track(track);
    }
    if let Some(url) = &args.artwork {
        let cache = ArtworkCache::new(store.clone());
        match block_on(cache.palette(url, &FileArtworkSource::new())) {
            Ok(palette) => engine.set_palette(palette),
            Err(err) => tracing::warn!(url, error = %err, "artwork unavailable, keeping default palette"),
        }
    }

    tracing::info!(ticks = args.ticks, fps, input = ?args.input, bpm = args.bpm, "starting headless run");

    let mut extractor = FeatureExtractor::with_sample_rate(source.sample_rate());
    let mut block = vec![0.0; config.audio.block_size.max(2)];
    let mut analysed_seconds = 0.0_f32;
    let mut exhausted = false;
    let mut switches = 0_usize;

    for tick in 0..args.ticks {
        let playback = engine.elapsed() + frame_time.as_secs_f32();
        while !exhausted && analysed_seconds < playback {
            if !source.read_block(&mut block) {
                exhausted = true;
                tracing::info!(tick, "audio input finished");
                break;
            }
            analysed_seconds += block.len() as f32 / extractor.sample_rate() as f32;
            match extractor.process_block(&block) {
                Ok(frame) => {
                    bus.publish(frame)?;
                }
                Err(err) => tracing::warn!(error = %err, "skipping audio block"),
            }
        }

        for event in director.tick(&mut engine) {
            switches += 1;
            match event {
                DirectorEvent::Cue { bar, scene, epoch } => {
                    tracing::debug!(tick, bar, %scene, epoch, "director cue")
                }
                DirectorEvent::Heuristic { scene, epoch } => {
                    tracing::debug!(tick, %scene, epoch, "director default scene")
                }
            }
        }

        let report = engine.tick(frame_time);
        gfx.take_draws();
        gfx.take_composites();
        if let Some(scene) = report.completed {
            tracing::info!(tick, %scene, "now showing");
        }
        if report.resized {
            tracing::debug!(tick, extent = %engine.render_extent(), "render targets resized");
        }
    }

    tracing::info!(
        scene = ?engine.current_scene(),
        phase = ?engine.crossfade().phase,
        bar = ?director.current_bar(),
        tempo = extractor.tempo(),
        switches,
        draws = gfx.total_draws(),
        scale = engine.quality().resolution_scale,
        "run finished"
    );
    Ok(())
}

const MIN_FPS: f32 = 1.0;
const MAX_FPS: f32 = 1_000.0;
const DEFAULT_FPS: f32 = 60.0;

/// Simulated refresh rate, kept within `[MIN_FPS, MAX_FPS]`.
fn clamp_fps(requested: f32) -> f32 {
    if requested.is_finite() && requested > 0.0 {
        requested.clamp(MIN_FPS, MAX_FPS)
    } else {
        DEFAULT_FPS
    }
}

fn add_cue(store: Rc<dyn KeyValueStore>, track: &str, bar: u32, scene: &str) -> pulse_visuals_core::Result<()> {
    let scene: ProgramName = scene.parse()?;
    let cues = CueStore::new(store).add(track, Cue::switch_scene(bar, scene))?;
    tracing::info!(track, bar, %scene, total = cues.len(), "cue added");
    Ok(())
}

fn list_cues(store: Rc<dyn KeyValueStore>, track: &str) -> pulse_visuals_core::Result<()> {
    let cues = CueStore::new(store).load(track)?;
    println!("{}", serde_json::to_string_pretty(&cues)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive visual engine", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Key-value store holding cue lists and cached artwork.
    #[arg(long, global = true, default_value = "pulse-visuals-store.json")]
    store: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the engine and director headlessly over an audio input.
    Run(RunArgs),
    /// Manage per-track cue lists.
    Cue {
        #[command(subcommand)]
        command: CueCommand,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// WAV file to analyse. Without it a click track is generated.
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// Tempo of the generated click track.
    #[arg(long, default_value_t = 120.0)]
    bpm: f32,
    /// Number of render ticks to run.
    #[arg(long, default_value_t = 600)]
    ticks: u32,
    /// Simulated display refresh rate.
    #[arg(long, default_value_t = 60.0)]
    fps: f32,
    /// Scene to start with instead of the configured one.
    #[arg(long)]
    scene: Option<String>,
    /// Track id used for cues and the per-track default scene.
    #[arg(long)]
    track: Option<String>,
    /// Cover art location (local path or file:// url) to derive the palette from.
    #[arg(long)]
    artwork: Option<String>,
    /// JSON object of track id to descriptors, standing in for the music service.
    #[arg(long)]
    descriptors: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum CueCommand {
    /// Append a scene switch at the given bar.
    Add {
        track: String,
        bar: u32,
        scene: String,
    },
    /// Print the stored cues of a track.
    List { track: String },
}
