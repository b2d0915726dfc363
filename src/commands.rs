// Command handlers
// Each subcommand loads settings and a clip payload, then drives the player
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::audio::clip::{default_download_name, download_clip, sniff_container};
use crate::audio::decoder::{decode_bytes, DecodeOptions};
use crate::audio::{
    AudioBackend, AudioClip, CpalBackend, PlaybackController, PlaybackParams, PlaybackSnapshot,
    PlayerEvent, PlayerStatus,
};
use crate::settings::PlayerSettings;

/// Play generated speech clips with pitch/speed control and a spectrum visualizer
#[derive(Parser, Debug)]
#[command(name = "neonvoice")]
#[command(version)]
pub struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true, value_name = "FILE", env = "NEONVOICE_SETTINGS")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a clip with interactive controls on stdin
    Play(PlayArgs),
    /// Decode a clip and print what it contains as JSON
    Info(PayloadArgs),
    /// Save the original encoded clip to disk
    Download(DownloadArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PayloadArgs {
    /// File holding the clip as base64 text
    #[arg(value_name = "PAYLOAD")]
    pub payload: PathBuf,

    /// The payload file holds encoded audio bytes rather than base64 text
    #[arg(long)]
    pub raw: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PlayArgs {
    #[command(flatten)]
    pub payload: PayloadArgs,

    /// Playback speed (0.5-2.0)
    #[arg(long)]
    pub speed: Option<f64>,

    /// Pitch offset in steps of 100 cents (-10 to 10)
    #[arg(long, allow_hyphen_values = true)]
    pub pitch: Option<f64>,

    /// Output volume (0.0-1.0)
    #[arg(long)]
    pub volume: Option<f32>,

    /// Write the last visualizer frame to this PNG on exit
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub payload: PayloadArgs,

    /// Target directory (defaults to the configured download directory)
    #[arg(long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// File name (defaults to `<prefix>-<timestamp>.<ext>`)
    #[arg(long)]
    pub name: Option<String>,
}

pub async fn execute(cli: Cli) -> Result<()> {
    let settings = load_settings(cli.settings.as_deref())?;

    match cli.command {
        Command::Play(args) => play(&settings, args).await,
        Command::Info(args) => {
            let clip = load_payload(&args)?;
            let info = clip_info(&clip, &settings.decode_options())?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Command::Download(args) => {
            let clip = load_payload(&args.payload)?;
            let dir = args.out_dir.unwrap_or_else(|| settings.download_dir());
            let name = args
                .name
                .unwrap_or_else(|| default_download_name(&settings.download.file_prefix, &clip));
            let path = download_clip(&clip, &dir, &name)
                .with_context(|| format!("Failed to save clip to {}", dir.display()))?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<PlayerSettings> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match PlayerSettings::default_path() {
            Some(p) => p,
            None => {
                debug!("No config directory on this platform, using default settings");
                return Ok(PlayerSettings::default());
            }
        },
    };
    PlayerSettings::load(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

/// Read a clip payload from disk
pub fn load_payload(args: &PayloadArgs) -> Result<AudioClip> {
    let path = &args.payload;
    if args.raw {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read clip {}", path.display()))?;
        Ok(AudioClip::from_bytes(&bytes))
    } else {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read clip payload {}", path.display()))?;
        Ok(AudioClip::from_base64(text))
    }
}

/// What `info` reports about a decoded clip
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipInfo {
    pub container: Option<&'static str>,
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: usize,
    pub frames: usize,
    pub encoded_bytes: usize,
}

pub fn clip_info(clip: &AudioClip, options: &DecodeOptions) -> Result<ClipInfo> {
    let bytes = clip.bytes()?;
    let buffer = decode_bytes(&bytes, options).context("Failed to decode clip")?;
    Ok(ClipInfo {
        container: sniff_container(&bytes).map(|kind| kind.extension()),
        duration_secs: buffer.duration_secs(),
        sample_rate: buffer.sample_rate(),
        channels: buffer.channels(),
        frames: buffer.frames(),
        encoded_bytes: bytes.len(),
    })
}

/// One line typed at the `play` prompt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostCommand {
    TogglePlay,
    Reset,
    Speed(f64),
    Pitch(f64),
    Volume(f32),
    Download,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Option<HostCommand>> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next();

    let number = |name: &str| -> Result<f64> {
        let Some(text) = arg else {
            bail!("{} needs a value", name);
        };
        text.parse::<f64>()
            .with_context(|| format!("Invalid {} value {:?}", name, text))
    };

    let command = match verb {
        "p" => HostCommand::TogglePlay,
        "r" => HostCommand::Reset,
        "s" => HostCommand::Speed(number("speed")?),
        "t" => HostCommand::Pitch(number("pitch")?),
        "v" => HostCommand::Volume(number("volume")? as f32),
        "d" => HostCommand::Download,
        "q" => HostCommand::Quit,
        other => bail!("Unknown command {:?} (p, r, s <x>, t <x>, v <x>, d, q)", other),
    };
    Ok(Some(command))
}

enum Flow {
    Continue,
    Quit,
}

async fn apply_command<B: AudioBackend>(
    player: &mut PlaybackController<B>,
    command: HostCommand,
    clip: &AudioClip,
    settings: &PlayerSettings,
) -> Result<Flow> {
    match command {
        HostCommand::TogglePlay => {
            if player.is_playing() {
                player.pause();
            } else {
                player.play().await?;
            }
        }
        HostCommand::Reset => player.reset(),
        HostCommand::Speed(speed) => player.set_speed(speed)?,
        HostCommand::Pitch(pitch) => player.set_pitch(pitch)?,
        HostCommand::Volume(volume) => player.set_volume(volume)?,
        HostCommand::Download => {
            let name = default_download_name(&settings.download.file_prefix, clip);
            let path = player.download(clip, &settings.download_dir(), &name)?;
            info!("Saved clip to {}", path.display());
        }
        HostCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn status_label(status: PlayerStatus) -> &'static str {
    match status {
        PlayerStatus::Idle => "idle",
        PlayerStatus::Loaded => "ready",
        PlayerStatus::Playing => "playing",
        PlayerStatus::Paused => "paused",
        PlayerStatus::Ended => "ended",
    }
}

pub fn progress_line(snapshot: &PlaybackSnapshot) -> String {
    format!(
        "{:>6.1}s / {:.1}s  {:<7}  speed {:.2}x  pitch {:+.0}  vol {:.0}%",
        snapshot.position_secs,
        snapshot.duration_secs,
        status_label(snapshot.status),
        snapshot.speed,
        snapshot.pitch,
        snapshot.volume * 100.0
    )
}

fn print_progress(snapshot: &PlaybackSnapshot) {
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "\r{}", progress_line(snapshot));
    let _ = stdout.flush();
}

/// Frame loop: ticks the player and applies input lines until the clip ends,
/// `q` is read or `shutdown` resolves
async fn drive<B, R, F>(
    player: &mut PlaybackController<B>,
    events: &mut broadcast::Receiver<PlayerEvent>,
    input: R,
    shutdown: F,
    clip: &AudioClip,
    settings: &PlayerSettings,
) -> Result<()>
where
    B: AudioBackend,
    R: AsyncBufRead + Unpin,
    F: Future,
{
    let mut frames = tokio::time::interval(Duration::from_millis(settings.visualizer.frame_interval_ms));
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut lines = input.lines();
    let mut input_open = true;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = frames.tick() => {
                player.tick();
                print_progress(&player.snapshot());
            }
            line = lines.next_line(), if input_open => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    input_open = false;
                    continue;
                };
                let command = match parse_command(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("{:#}", e);
                        continue;
                    }
                };
                match apply_command(player, command, clip, settings).await {
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => warn!("{:#}", e),
                }
            }
            event = events.recv() => match event {
                Ok(PlayerEvent::Ended { .. }) => {
                    print_progress(&player.snapshot());
                    break;
                }
                Ok(event) => debug!("Player event: {:?}", event),
                Err(RecvError::Lagged(skipped)) => debug!("Skipped {} player events", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = &mut shutdown => {
                info!("Interrupted");
                break;
            }
        }
    }
    Ok(())
}

async fn play(settings: &PlayerSettings, args: PlayArgs) -> Result<()> {
    let clip = load_payload(&args.payload)?;

    let params = PlaybackParams {
        speed: args.speed.unwrap_or(settings.playback.speed),
        pitch: args.pitch.unwrap_or(settings.playback.pitch),
        volume: args.volume.unwrap_or(settings.playback.volume),
    };

    let backend = CpalBackend::new(settings.decode_options(), settings.analyser_config())
        .context("Failed to open audio output")?;
    let mut player = PlaybackController::new(backend, params, settings.visual_style())
        .context("Invalid playback parameters")?;

    player.load_clip(&clip).context("Failed to load clip")?;
    let mut events = player.subscribe();
    player.play().await.context("Failed to start playback")?;

    let outcome = drive(
        &mut player,
        &mut events,
        BufReader::new(tokio::io::stdin()),
        tokio::signal::ctrl_c(),
        &clip,
        settings,
    )
    .await;
    println!();
    outcome?;

    player.pause();
    if let Some(path) = &args.snapshot {
        player
            .save_frame(path)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        info!("Wrote visualizer frame to {}", path.display());
    }
    Ok(())
}
