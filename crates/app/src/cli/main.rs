//! CyberTune CLI Application

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use cybertune_core::domain::{
    Band, EngineConfig, EngineHandle, EngineParts, SampleRate, SpectrumSnapshot, BAND_COUNT,
};
use cybertune_infra::audio::{decode_wav, OutputConfig, OutputStream};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cybertune")]
#[command(about = "A ten-band real-time equalizer", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play a WAV file through the equalizer
    Play(PlayArgs),
    /// List the available presets
    Presets,
    /// Show the band pass-bands for a sample rate
    Bands {
        #[arg(long, default_value_t = 44100)]
        sample_rate: u32,
    },
}

#[derive(Args)]
struct PlayArgs {
    /// WAV file to play
    file: PathBuf,

    /// Preset applied before any --band
    #[arg(short, long)]
    preset: Option<String>,

    /// Band gain as INDEX=DB, e.g. --band 0=6 (repeatable)
    #[arg(short, long = "band", value_parser = parse_band, allow_hyphen_values = true)]
    bands: Vec<(usize, f32)>,

    /// Bass boost in dB (0-15)
    #[arg(long)]
    bass: Option<f32>,

    /// Treble boost in dB (0-15)
    #[arg(long)]
    treble: Option<f32>,

    /// Enable the bass booster
    #[arg(long)]
    boost: bool,

    /// Pre-amp factor (0-2)
    #[arg(long)]
    preamp: Option<f32>,

    /// Master volume (0-1)
    #[arg(long)]
    volume: Option<f32>,

    /// Print spectrum snapshots as JSON lines
    #[arg(long)]
    json: bool,

    /// Milliseconds between spectrum lines
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,
}

fn parse_band(value: &str) -> Result<(usize, f32), String> {
    let (index, db) = value
        .split_once('=')
        .ok_or_else(|| format!("expected INDEX=DB, got '{value}'"))?;
    let index: usize = index
        .trim()
        .parse()
        .map_err(|_| format!("invalid band index '{index}'"))?;
    if index >= BAND_COUNT {
        return Err(format!("band index {index} out of range 0..{BAND_COUNT}"));
    }
    let db: f32 = db
        .trim()
        .parse()
        .map_err(|_| format!("invalid gain '{db}'"))?;
    Ok((index, db))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Command::Play(args) => play(config, args).await,
        Command::Presets => list_presets(&config),
        Command::Bands { sample_rate } => list_bands(sample_rate),
    }
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        // An explicit file must exist and be valid
        Some(path) => EngineConfig::load_from_file(path)
            .await
            .with_context(|| format!("loading {}", path.display())),
        None => match EngineConfig::default_path() {
            Ok(path) => Ok(EngineConfig::load_or_default(path).await),
            Err(e) => {
                warn!(error = %e, "No config directory, using defaults");
                Ok(EngineConfig::default())
            }
        },
    }
}

async fn play(mut config: EngineConfig, args: PlayArgs) -> anyhow::Result<()> {
    if let Some(preset) = &args.preset {
        config.equalizer.preset = Some(preset.clone());
    }

    let file = args.file.clone();
    let track = tokio::task::spawn_blocking(move || decode_wav(file)).await??;

    let EngineParts {
        handle,
        processor,
        spectrum,
    } = EngineParts::new(&config)?;
    apply_controls(&handle, &args)?;

    let _worker = spectrum.spawn()?;
    let output_config = OutputConfig::for_track(&track, handle.block_size());
    handle.load(track)?;
    let stream = OutputStream::open_default(output_config, processor)?;

    if !handle.play() {
        bail!("nothing to play");
    }
    info!(
        file = %args.file.display(),
        device = stream.device_name(),
        seconds = handle.duration_frames() as f64 / f64::from(output_config.sample_rate),
        "Playing"
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(10)));
    let mut last_sequence = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                let snapshot = handle.spectrum().latest();
                if snapshot.sequence != last_sequence {
                    last_sequence = snapshot.sequence;
                    print_spectrum(&snapshot, handle.position_seconds(), args.json)?;
                }
                if !handle.is_playing() {
                    info!("End of track");
                    break;
                }
            }
        }
    }

    stream.stop()?;
    let cursor = handle.cursor();
    if cursor.oversized_blocks() > 0 {
        warn!(
            count = cursor.oversized_blocks(),
            "Device asked for blocks larger than the engine block size"
        );
    }
    debug!(
        dropped = handle.spectrum().dropped(),
        "Spectrum updates dropped"
    );
    Ok(())
}

fn apply_controls(handle: &EngineHandle, args: &PlayArgs) -> anyhow::Result<()> {
    for &(index, db) in &args.bands {
        handle.set_band_gain(index, db)?;
    }
    if let Some(db) = args.bass {
        handle.set_bass_boost(db);
    }
    if let Some(db) = args.treble {
        handle.set_treble_boost(db);
    }
    if args.boost {
        handle.set_booster_active(true);
    }
    if let Some(factor) = args.preamp {
        handle.set_preamp(factor);
    }
    if let Some(volume) = args.volume {
        handle.set_master_volume(volume);
    }
    debug!(params = ?handle.params(), "Controls applied");
    Ok(())
}

fn print_spectrum(snapshot: &SpectrumSnapshot, seconds: f64, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }

    const LEVELS: &[u8] = b" .:-=+*#%@";
    let peak = snapshot.peak();
    let bars: String = snapshot
        .magnitudes
        .iter()
        .map(|&m| {
            let level = if peak > 0.0 { m / peak } else { 0.0 };
            let index = (level * (LEVELS.len() - 1) as f32).round() as usize;
            LEVELS[index.min(LEVELS.len() - 1)] as char
        })
        .collect();
    println!("{seconds:7.2}s |{bars}|");
    Ok(())
}

fn list_presets(config: &EngineConfig) -> anyhow::Result<()> {
    let bank = config.preset_bank()?;
    for name in bank.names() {
        let gains = bank.get(name)?;
        let gains: Vec<String> = gains.iter().map(|g| format!("{g:+.0}")).collect();
        println!("{name:<12} {}", gains.join(" "));
    }
    Ok(())
}

fn list_bands(sample_rate: u32) -> anyhow::Result<()> {
    if sample_rate == 0 {
        bail!("sample rate must be positive");
    }
    let rate = SampleRate::from_hz(sample_rate);
    println!("{:>5} {:>9} {:>9} {:>9}", "band", "center", "low", "high");
    for index in 0..BAND_COUNT {
        let band = Band::new(index, rate);
        let note = if band.is_degenerate() { "  bypassed" } else { "" };
        println!(
            "{:>5} {:>9.1} {:>9.1} {:>9.1}{note}",
            band.label(),
            band.center_hz,
            band.low_hz,
            band.high_hz
        );
    }
    Ok(())
}
