// Playback controller
// Transport state machine, buffer-time position tracking and the per-frame loops

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbaImage;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, DecodedBuffer, PlaybackSession, SessionParams, CENTS_PER_PITCH_STEP};
use super::clip::{download_clip, AudioClip};
use crate::error::{PlayerError, Result};
use crate::visualizer::{SpectrumRenderer, VisualStyle};

pub const MIN_SPEED: f64 = 0.5;
pub const MAX_SPEED: f64 = 2.0;
pub const MIN_PITCH: f64 = -10.0;
pub const MAX_PITCH: f64 = 10.0;

pub fn validate_speed(speed: f64) -> Result<()> {
    if speed.is_finite() && (MIN_SPEED..=MAX_SPEED).contains(&speed) {
        Ok(())
    } else {
        Err(PlayerError::InvalidParameter(format!(
            "Speed must be within {}..={}, got {}",
            MIN_SPEED, MAX_SPEED, speed
        )))
    }
}

pub fn validate_pitch(pitch: f64) -> Result<()> {
    if pitch.is_finite() && (MIN_PITCH..=MAX_PITCH).contains(&pitch) {
        Ok(())
    } else {
        Err(PlayerError::InvalidParameter(format!(
            "Pitch must be within {}..={}, got {}",
            MIN_PITCH, MAX_PITCH, pitch
        )))
    }
}

pub fn validate_volume(volume: f32) -> Result<()> {
    if volume.is_finite() && (0.0..=1.0).contains(&volume) {
        Ok(())
    } else {
        Err(PlayerError::InvalidParameter(format!(
            "Volume must be within 0..=1, got {}",
            volume
        )))
    }
}

/// User-adjustable playback parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackParams {
    pub speed: f64,
    pub pitch: f64,
    pub volume: f32,
}

impl Default for PlaybackParams {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 0.0,
            volume: 1.0,
        }
    }
}

/// Clamp a runtime volume into 0..=1. Only NaN and infinities are refused.
fn clamp_volume(volume: f32) -> Result<f32> {
    if !volume.is_finite() {
        return Err(PlayerError::InvalidParameter(format!(
            "Volume must be a number, got {}",
            volume
        )));
    }
    Ok(volume.clamp(0.0, 1.0))
}

impl PlaybackParams {
    fn session_params(&self) -> SessionParams {
        SessionParams {
            speed: self.speed,
            detune_cents: self.pitch * CENTS_PER_PITCH_STEP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Idle,
    Loaded,
    Playing,
    Paused,
    Ended,
}

/// Read-only view of the playback state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSnapshot {
    pub status: PlayerStatus,
    pub is_playing: bool,
    pub position_secs: f64,
    pub duration_secs: f64,
    pub speed: f64,
    pub pitch: f64,
    pub volume: f32,
}

/// Notifications for whoever renders the player
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlayerEvent {
    ClipReady { duration_secs: f64 },
    Started { position_secs: f64 },
    Paused { position_secs: f64 },
    Ended { duration_secs: f64 },
    Reset,
}

/// One play run: a live session plus where it started
struct ActiveRun<S> {
    session: S,
    /// Backend clock reading when the run (or last rebase) started
    started_at: f64,
    /// Buffer-time position at `started_at`
    accumulated: f64,
}

impl<S> ActiveRun<S> {
    /// Buffer-time position at `now`, never behind the start and never past the end
    fn position_at(&self, now: f64, speed: f64, duration: f64) -> f64 {
        let elapsed = (now - self.started_at).max(0.0);
        (self.accumulated + elapsed * speed).min(duration)
    }
}

enum Transport<S> {
    Idle,
    Loaded(Arc<DecodedBuffer>),
    Playing(Arc<DecodedBuffer>, ActiveRun<S>),
    Paused(Arc<DecodedBuffer>),
    Ended(Arc<DecodedBuffer>),
}

/// Per-frame loops that run while playing
#[derive(Debug, Default)]
struct FrameLoops {
    tracking: bool,
    visualizer: bool,
}

impl FrameLoops {
    fn start(&mut self) {
        self.tracking = true;
        self.visualizer = true;
    }

    fn cancel(&mut self) {
        self.tracking = false;
        self.visualizer = false;
    }
}

pub struct PlaybackController<B: AudioBackend> {
    backend: B,
    transport: Transport<B::Session>,
    /// Buffer-time position in seconds
    position: f64,
    params: PlaybackParams,
    loops: FrameLoops,
    renderer: SpectrumRenderer,
    spectrum: Vec<u8>,
    events: broadcast::Sender<PlayerEvent>,
}

impl<B: AudioBackend> PlaybackController<B> {
    pub fn new(mut backend: B, mut params: PlaybackParams, style: VisualStyle) -> Result<Self> {
        validate_speed(params.speed)?;
        validate_pitch(params.pitch)?;
        params.volume = clamp_volume(params.volume)?;
        backend.set_gain(params.volume);

        let (events, _) = broadcast::channel(64);
        let mut renderer = SpectrumRenderer::new(style);
        renderer.draw_idle();
        let spectrum = vec![0; backend.frequency_bin_count()];

        Ok(Self {
            backend,
            transport: Transport::Idle,
            position: 0.0,
            params,
            loops: FrameLoops::default(),
            renderer,
            spectrum,
            events,
        })
    }

    pub fn params(&self) -> PlaybackParams {
        self.params
    }

    /// Latest visualizer frame
    pub fn canvas(&self) -> &RgbaImage {
        self.renderer.canvas()
    }

    /// Write the latest visualizer frame as a PNG
    pub fn save_frame(&self, path: &Path) -> Result<()> {
        self.renderer.save_png(path)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> PlayerStatus {
        match self.transport {
            Transport::Idle => PlayerStatus::Idle,
            Transport::Loaded(_) => PlayerStatus::Loaded,
            Transport::Playing(..) => PlayerStatus::Playing,
            Transport::Paused(_) => PlayerStatus::Paused,
            Transport::Ended(_) => PlayerStatus::Ended,
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.transport, Transport::Playing(..))
    }

    fn buffer(&self) -> Option<&Arc<DecodedBuffer>> {
        match &self.transport {
            Transport::Idle => None,
            Transport::Loaded(b) | Transport::Paused(b) | Transport::Ended(b) => Some(b),
            Transport::Playing(b, _) => Some(b),
        }
    }

    pub fn duration(&self) -> f64 {
        self.buffer().map(|b| b.duration_secs()).unwrap_or(0.0)
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            status: self.status(),
            is_playing: self.is_playing(),
            position_secs: self.position,
            duration_secs: self.duration(),
            speed: self.params.speed,
            pitch: self.params.pitch,
            volume: self.params.volume,
        }
    }

    /// Decode a clip and make it the current one.
    ///
    /// A clip that fails to decode leaves the current state alone, including
    /// a playing session.
    pub fn load_clip(&mut self, clip: &AudioClip) -> Result<()> {
        let bytes = clip.bytes()?;
        let buffer = self.backend.decode(&bytes).inspect_err(|e| {
            warn!("Clip rejected: {}", e);
        })?;

        self.release_transport();
        self.loops.cancel();

        let duration = buffer.duration_secs();
        self.transport = Transport::Loaded(Arc::new(buffer));
        self.position = 0.0;
        self.renderer.draw_idle();

        info!("Clip ready: {:.2}s", duration);
        self.emit(PlayerEvent::ClipReady {
            duration_secs: duration,
        });
        Ok(())
    }

    /// Start (or resume) playback from the current position
    pub async fn play(&mut self) -> Result<()> {
        let (buffer, offset) = match &self.transport {
            Transport::Idle => return Err(PlayerError::NotReady),
            Transport::Playing(..) => return Ok(()),
            Transport::Ended(b) => (Arc::clone(b), 0.0),
            Transport::Loaded(b) | Transport::Paused(b) => (Arc::clone(b), self.position),
        };

        self.backend.resume().await?;

        let session = self
            .backend
            .start_session(Arc::clone(&buffer), offset, self.params.session_params())?;
        let started_at = self.backend.now();

        self.position = offset;
        self.transport = Transport::Playing(
            buffer,
            ActiveRun {
                session,
                started_at,
                accumulated: offset,
            },
        );
        self.loops.start();

        debug!("Playing from {:.3}s at {}x", offset, self.params.speed);
        self.emit(PlayerEvent::Started {
            position_secs: offset,
        });
        Ok(())
    }

    /// Stop the session and keep the position. No-op unless playing.
    pub fn pause(&mut self) {
        let now = self.backend.now();
        match std::mem::replace(&mut self.transport, Transport::Idle) {
            Transport::Playing(buffer, mut run) => {
                run.session.stop();
                self.loops.cancel();

                let duration = buffer.duration_secs();
                self.position = run.position_at(now, self.params.speed, duration);
                if self.position >= duration {
                    self.finish(buffer);
                    return;
                }

                self.transport = Transport::Paused(buffer);
                self.draw_stopped();
                debug!("Paused at {:.3}s", self.position);
                self.emit(PlayerEvent::Paused {
                    position_secs: self.position,
                });
            }
            other => self.transport = other,
        }
    }

    /// Stop everything and rewind to the start
    pub fn reset(&mut self) {
        let buffer = self.release_transport();
        self.loops.cancel();
        self.position = 0.0;
        self.transport = match buffer {
            Some(b) => Transport::Loaded(b),
            None => Transport::Idle,
        };
        self.renderer.draw_idle();
        self.emit(PlayerEvent::Reset);
    }

    /// Change the playback rate. A live session keeps running; only the
    /// rate at which position accumulates from now on changes.
    pub fn set_speed(&mut self, speed: f64) -> Result<()> {
        validate_speed(speed)?;

        let now = self.backend.now();
        let duration = self.duration();
        if let Transport::Playing(_, run) = &mut self.transport {
            let position = run.position_at(now, self.params.speed, duration);
            run.accumulated = position;
            run.started_at = now;
            run.session.set_speed(speed);
            self.position = position;
        }
        self.params.speed = speed;
        Ok(())
    }

    /// Change the pitch offset (-10..=10 steps of 100 cents)
    pub fn set_pitch(&mut self, pitch: f64) -> Result<()> {
        validate_pitch(pitch)?;

        if let Transport::Playing(_, run) = &mut self.transport {
            run.session.set_detune(pitch * CENTS_PER_PITCH_STEP);
        }
        self.params.pitch = pitch;
        Ok(())
    }

    /// Set the output volume (0.0 to 1.0). Works with or without a session.
    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        let volume = clamp_volume(volume)?;
        self.backend.set_gain(volume);
        self.params.volume = volume;
        Ok(())
    }

    /// Save the original encoded payload. Playback state is untouched.
    pub fn download(&self, clip: &AudioClip, dir: &Path, filename: &str) -> Result<PathBuf> {
        download_clip(clip, dir, filename)
    }

    /// Host frame callback: run each active loop once
    pub fn tick(&mut self) {
        if self.loops.tracking {
            self.track_position();
        }
        if self.loops.visualizer {
            self.draw_spectrum();
        }
    }

    fn track_position(&mut self) {
        let now = self.backend.now();
        let Transport::Playing(buffer, run) = &self.transport else {
            self.loops.tracking = false;
            return;
        };
        let duration = buffer.duration_secs();
        let position = run.position_at(now, self.params.speed, duration);
        self.position = position;

        if position >= duration {
            if let Transport::Playing(buffer, mut run) =
                std::mem::replace(&mut self.transport, Transport::Idle)
            {
                run.session.stop();
                self.finish(buffer);
            }
        }
    }

    fn draw_spectrum(&mut self) {
        match self.backend.frequency_data(&mut self.spectrum) {
            Ok(()) => self.renderer.draw_bars(&self.spectrum),
            Err(e) => warn!("Skipping visualizer frame: {}", e),
        }
    }

    /// Single redraw after playback stops: baseline at the start, otherwise
    /// the last spectrum frame stays up
    fn draw_stopped(&mut self) {
        if self.position <= 0.0 {
            self.renderer.draw_idle();
        }
    }

    /// Clip ran out. The session must already be stopped.
    fn finish(&mut self, buffer: Arc<DecodedBuffer>) {
        let duration = buffer.duration_secs();
        self.position = duration;
        self.transport = Transport::Ended(buffer);
        self.loops.cancel();
        self.draw_stopped();

        info!("Playback ended at {:.2}s", duration);
        self.emit(PlayerEvent::Ended {
            duration_secs: duration,
        });
    }

    /// Stop any live session and hand back the current buffer
    fn release_transport(&mut self) -> Option<Arc<DecodedBuffer>> {
        match std::mem::replace(&mut self.transport, Transport::Idle) {
            Transport::Idle => None,
            Transport::Loaded(b) | Transport::Paused(b) | Transport::Ended(b) => Some(b),
            Transport::Playing(b, mut run) => {
                run.session.stop();
                Some(b)
            }
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl<B: AudioBackend> Drop for PlaybackController<B> {
    fn drop(&mut self) {
        self.release_transport();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::mock::{MockBackend, MockState};
    use crate::audio::decoder::tests::wav_bytes;
    use image::Rgba;
    use std::rc::Rc;

    fn controller() -> (PlaybackController<MockBackend>, Rc<MockState>) {
        let backend = MockBackend::new();
        let state = backend.handle();
        let controller =
            PlaybackController::new(backend, PlaybackParams::default(), VisualStyle::default())
                .unwrap();
        (controller, state)
    }

    fn clip(seconds: f32) -> AudioClip {
        AudioClip::from_bytes(&wav_bytes(8000, seconds))
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    fn drain(rx: &mut broadcast::Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_play_without_clip_is_not_ready() {
        let (mut player, state) = controller();
        assert!(matches!(player.play().await, Err(PlayerError::NotReady)));
        assert_eq!(player.status(), PlayerStatus::Idle);
        assert!(state.started.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_load_exposes_duration_and_emits_ready() {
        let (mut player, _state) = controller();
        let mut rx = player.subscribe();

        player.load_clip(&clip(10.0)).unwrap();

        let snap = player.snapshot();
        assert_eq!(snap.status, PlayerStatus::Loaded);
        assert!(!snap.is_playing);
        assert_close(snap.duration_secs, 10.0);
        assert_close(snap.position_secs, 0.0);
        assert_eq!(drain(&mut rx), vec![PlayerEvent::ClipReady { duration_secs: 10.0 }]);
    }

    #[tokio::test]
    async fn test_pause_advances_by_elapsed_times_speed() {
        for speed in [0.5, 1.0, 1.5, 2.0] {
            let (mut player, state) = controller();
            player.load_clip(&clip(10.0)).unwrap();
            player.set_speed(speed).unwrap();

            player.play().await.unwrap();
            state.advance(3.0);
            player.pause();

            assert_eq!(player.status(), PlayerStatus::Paused);
            assert_close(player.position(), 3.0 * speed);
        }
    }

    #[tokio::test]
    async fn test_resume_starts_at_paused_offset() {
        let (mut player, state) = controller();
        player.load_clip(&clip(10.0)).unwrap();

        player.play().await.unwrap();
        state.advance(2.0);
        player.tick();
        assert_close(player.position(), 2.0);
        player.pause();

        player.play().await.unwrap();
        state.advance(3.0);
        player.tick();
        assert_close(player.position(), 5.0);

        let started = state.started.borrow();
        assert_eq!(started.len(), 2);
        assert_close(started[0].offset_secs, 0.0);
        assert_close(started[1].offset_secs, 2.0);
        assert_eq!(*state.stopped.borrow(), vec![started[0].id]);
        assert_eq!(state.resumes.get(), 2);
    }

    #[tokio::test]
    async fn test_end_transitions_once() {
        let (mut player, state) = controller();
        player.load_clip(&clip(10.0)).unwrap();
        player.set_speed(2.0).unwrap();
        let mut rx = player.subscribe();

        player.play().await.unwrap();
        state.advance(5.0);
        player.tick();

        assert_eq!(player.status(), PlayerStatus::Ended);
        assert!(!player.is_playing());
        assert_close(player.position(), 10.0);
        assert_eq!(state.live.get(), None);

        state.advance(1.0);
        player.tick();
        player.pause();

        let ended = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, PlayerEvent::Ended { .. }))
            .count();
        assert_eq!(ended, 1);
    }

    #[tokio::test]
    async fn test_position_monotonic_and_bounded() {
        let (mut player, state) = controller();
        player.load_clip(&clip(4.0)).unwrap();
        player.set_speed(1.5).unwrap();
        player.play().await.unwrap();

        let mut last = 0.0;
        for _ in 0..10 {
            state.advance(0.35);
            player.tick();
            let position = player.position();
            assert!(position >= last, "position went backwards");
            assert!(position <= 4.0);
            last = position;
        }
        assert_eq!(player.status(), PlayerStatus::Ended);
    }

    #[tokio::test]
    async fn test_loading_while_playing_replaces_session() {
        let (mut player, state) = controller();
        player.load_clip(&clip(10.0)).unwrap();
        player.play().await.unwrap();
        state.advance(4.0);
        player.tick();

        player.load_clip(&clip(3.0)).unwrap();

        assert_eq!(state.live.get(), None);
        let snap = player.snapshot();
        assert_eq!(snap.status, PlayerStatus::Loaded);
        assert_close(snap.position_secs, 0.0);
        assert_close(snap.duration_secs, 3.0);

        // Old loops must not touch the new clip
        let calls = state.analysis_calls.get();
        player.tick();
        assert_eq!(state.analysis_calls.get(), calls);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_current_playback() {
        let (mut player, state) = controller();
        player.load_clip(&clip(10.0)).unwrap();
        player.play().await.unwrap();
        state.advance(1.0);
        player.tick();

        let err = player
            .load_clip(&AudioClip::from_bytes(&[0x13; 256]))
            .unwrap_err();
        assert!(matches!(err, PlayerError::Decode(_)));

        assert!(player.is_playing());
        assert!(state.live.get().is_some());
        assert_close(player.duration(), 10.0);
        assert_close(player.position(), 1.0);
    }

    #[tokio::test]
    async fn test_failed_first_load_stays_idle() {
        let (mut player, _state) = controller();
        let err = player.load_clip(&AudioClip::from_base64("%%%")).unwrap_err();
        assert!(matches!(err, PlayerError::Decode(_)));
        assert_eq!(player.status(), PlayerStatus::Idle);
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let (mut player, state) = controller();
        player.load_clip(&clip(10.0)).unwrap();
        player.play().await.unwrap();
        state.advance(2.5);
        player.tick();

        player.reset();
        let once = player.snapshot();
        player.reset();
        let twice = player.snapshot();

        assert_eq!(once, twice);
        assert_eq!(once.status, PlayerStatus::Loaded);
        assert_close(once.position_secs, 0.0);
        assert_eq!(state.live.get(), None);
        assert_eq!(state.stopped.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_speed_change_only_affects_future_accumulation() {
        let (mut player, state) = controller();
        player.load_clip(&clip(10.0)).unwrap();
        player.play().await.unwrap();

        state.advance(2.0);
        player.set_speed(2.0).unwrap();
        player.tick();
        assert_close(player.position(), 2.0);

        state.advance(1.0);
        player.tick();
        assert_close(player.position(), 4.0);

        assert_eq!(state.started.borrow().len(), 1);
        let id = state.started.borrow()[0].id;
        assert_eq!(*state.speed_updates.borrow(), vec![(id, 2.0)]);
    }

    #[tokio::test]
    async fn test_pitch_maps_to_detune_cents() {
        let (mut player, state) = controller();
        player.load_clip(&clip(10.0)).unwrap();
        player.set_pitch(-4.0).unwrap();
        player.play().await.unwrap();
        assert_close(state.started.borrow()[0].params.detune_cents, -400.0);

        player.set_pitch(3.0).unwrap();
        let id = state.started.borrow()[0].id;
        assert_eq!(*state.detune_updates.borrow(), vec![(id, 300.0)]);
    }

    #[tokio::test]
    async fn test_invalid_parameters_rejected() {
        let (mut player, _state) = controller();
        assert!(player.set_speed(0.0).is_err());
        assert!(player.set_speed(f64::NAN).is_err());
        assert!(player.set_speed(2.5).is_err());
        assert!(player.set_pitch(11.0).is_err());
        assert!(player.set_volume(f32::NAN).is_err());
        assert_eq!(player.params(), PlaybackParams::default());
    }

    #[tokio::test]
    async fn test_volume_applies_without_session() {
        let (mut player, state) = controller();
        player.set_volume(0.4).unwrap();
        assert_eq!(state.gain.get(), 0.4);

        player.set_volume(3.0).unwrap();
        assert_eq!(state.gain.get(), 1.0);
        assert_eq!(player.snapshot().volume, 1.0);
    }

    #[tokio::test]
    async fn test_backend_failure_surfaces_on_play() {
        let (mut player, state) = controller();
        player.load_clip(&clip(2.0)).unwrap();
        state.fail_resume.set(true);

        let err = player.play().await.unwrap_err();
        assert!(matches!(err, PlayerError::BackendUnavailable(_)));
        assert_eq!(player.status(), PlayerStatus::Loaded);
        assert!(state.started.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_play_after_end_restarts_from_zero() {
        let (mut player, state) = controller();
        player.load_clip(&clip(1.0)).unwrap();
        player.play().await.unwrap();
        state.advance(2.0);
        player.tick();
        assert_eq!(player.status(), PlayerStatus::Ended);

        player.play().await.unwrap();
        assert_close(player.position(), 0.0);
        assert_close(state.started.borrow()[1].offset_secs, 0.0);
    }

    #[tokio::test]
    async fn test_pause_past_end_counts_as_ended() {
        let (mut player, state) = controller();
        player.load_clip(&clip(1.0)).unwrap();
        let mut rx = player.subscribe();
        player.play().await.unwrap();
        state.advance(5.0);
        player.pause();

        assert_eq!(player.status(), PlayerStatus::Ended);
        assert_close(player.position(), 1.0);
        assert!(drain(&mut rx).contains(&PlayerEvent::Ended { duration_secs: 1.0 }));
    }

    #[tokio::test]
    async fn test_pause_when_not_playing_is_noop() {
        let (mut player, _state) = controller();
        player.pause();
        assert_eq!(player.status(), PlayerStatus::Idle);

        player.load_clip(&clip(1.0)).unwrap();
        player.pause();
        assert_eq!(player.status(), PlayerStatus::Loaded);
    }

    #[tokio::test]
    async fn test_visualizer_bars_then_baseline() {
        let (mut player, state) = controller();
        *state.spectrum.borrow_mut() = vec![255; 32];
        player.load_clip(&clip(10.0)).unwrap();
        assert_eq!(player.canvas().get_pixel(5, 95), &Rgba([0, 0, 0, 0]));

        player.play().await.unwrap();
        state.advance(0.1);
        player.tick();
        assert_ne!(player.canvas().get_pixel(5, 95), &Rgba([0, 0, 0, 0]));

        player.reset();
        assert_eq!(player.canvas().get_pixel(5, 95), &Rgba([0, 0, 0, 0]));
        assert_eq!(player.canvas().get_pixel(5, 48), &Rgba([0x00, 0xf0, 0xff, 77]));
    }

    #[tokio::test]
    async fn test_loops_cancelled_when_paused() {
        let (mut player, state) = controller();
        player.load_clip(&clip(10.0)).unwrap();
        player.play().await.unwrap();
        player.tick();
        assert_eq!(state.analysis_calls.get(), 1);

        player.pause();
        state.advance(1.0);
        player.tick();
        assert_eq!(state.analysis_calls.get(), 1);
    }

    #[tokio::test]
    async fn test_analysis_failure_does_not_stop_playback() {
        let (mut player, state) = controller();
        state.fail_analysis.set(true);
        player.load_clip(&clip(10.0)).unwrap();
        player.play().await.unwrap();

        state.advance(1.0);
        player.tick();
        player.tick();

        assert!(player.is_playing());
        assert_eq!(state.analysis_calls.get(), 2);
        assert_close(player.position(), 1.0);
    }

    #[tokio::test]
    async fn test_download_leaves_state_alone() {
        let (mut player, _state) = controller();
        let clip = clip(1.0);
        player.load_clip(&clip).unwrap();
        let before = player.snapshot();

        let dir = tempfile::tempdir().unwrap();
        let path = player.download(&clip, dir.path(), "clip.wav").unwrap();

        assert_eq!(std::fs::read(path).unwrap(), clip.bytes().unwrap());
        assert_eq!(player.snapshot(), before);
    }

    #[tokio::test]
    async fn test_transport_events_in_order() {
        let (mut player, state) = controller();
        player.load_clip(&clip(10.0)).unwrap();
        let mut rx = player.subscribe();

        player.play().await.unwrap();
        state.advance(2.0);
        player.pause();
        player.play().await.unwrap();
        player.reset();

        assert_eq!(
            drain(&mut rx),
            vec![
                PlayerEvent::Started { position_secs: 0.0 },
                PlayerEvent::Paused { position_secs: 2.0 },
                PlayerEvent::Started { position_secs: 2.0 },
                PlayerEvent::Reset,
            ]
        );
    }

    #[tokio::test]
    async fn test_play_while_playing_is_noop() {
        let (mut player, state) = controller();
        player.load_clip(&clip(10.0)).unwrap();
        let mut rx = player.subscribe();

        player.play().await.unwrap();
        state.advance(1.0);
        player.play().await.unwrap();

        assert_eq!(state.started.borrow().len(), 1);
        assert!(state.stopped.borrow().is_empty());
        assert_eq!(drain(&mut rx).len(), 1);
        player.tick();
        assert_close(player.position(), 1.0);
    }

    #[tokio::test]
    async fn test_pause_at_start_draws_baseline() {
        let (mut player, state) = controller();
        *state.spectrum.borrow_mut() = vec![255; 32];
        player.load_clip(&clip(10.0)).unwrap();

        player.play().await.unwrap();
        player.tick();
        assert_ne!(player.canvas().get_pixel(5, 95), &Rgba([0, 0, 0, 0]));

        player.pause();
        assert_close(player.position(), 0.0);
        assert_eq!(player.canvas().get_pixel(5, 95), &Rgba([0, 0, 0, 0]));
        assert_eq!(player.canvas().get_pixel(5, 48), &Rgba([0x00, 0xf0, 0xff, 77]));
    }

    #[tokio::test]
    async fn test_pause_midway_keeps_last_frame() {
        let (mut player, state) = controller();
        *state.spectrum.borrow_mut() = vec![255; 32];
        player.load_clip(&clip(10.0)).unwrap();

        player.play().await.unwrap();
        state.advance(1.5);
        player.tick();
        let frame = player.canvas().clone();

        player.pause();
        assert_eq!(player.canvas(), &frame);
        assert_ne!(player.canvas().get_pixel(5, 95), &Rgba([0, 0, 0, 0]));
    }

    #[tokio::test]
    async fn test_constructor_clamps_volume() {
        let backend = MockBackend::new();
        let state = backend.handle();
        let params = PlaybackParams {
            volume: 1.5,
            ..Default::default()
        };
        let player = PlaybackController::new(backend, params, VisualStyle::default()).unwrap();
        assert_eq!(player.params().volume, 1.0);
        assert_eq!(state.gain.get(), 1.0);

        let params = PlaybackParams {
            volume: -0.5,
            ..Default::default()
        };
        let player =
            PlaybackController::new(MockBackend::new(), params, VisualStyle::default()).unwrap();
        assert_eq!(player.params().volume, 0.0);

        let params = PlaybackParams {
            volume: f32::NAN,
            ..Default::default()
        };
        assert!(PlaybackController::new(MockBackend::new(), params, VisualStyle::default()).is_err());
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&PlayerEvent::Ended { duration_secs: 2.0 }).unwrap();
        assert_eq!(json, r#"{"event":"ended","duration_secs":2.0}"#);
    }
}
