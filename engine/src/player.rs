// --- Playback supervisor ------------------------------------------------------
//
// Owns the single playback session: one mpv process, one control socket, one
// `PlaybackState`. All mutation goes through `&mut self`; the API layer keeps
// the supervisor behind a single mutex so at most one operation is in flight.
//
// Local state records *intent*. mpv is the source of truth for what is really
// on screen, so queries refresh from it and mutating commands never roll back
// local state when the channel fails.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::ipc::{MediaChannel, MpvCommand, SeekMode};
use crate::process::MediaProcess;

/// Pause between tearing a session down and starting the next one, so the
/// display, audio device and socket path are released first.
const SETTLE_DELAY: Duration = Duration::from_millis(500);
/// Grace before seeking into a freshly launched session.
const SEEK_GRACE: Duration = Duration::from_millis(500);
const SOCKET_WAIT: Duration = Duration::from_secs(5);
const SOCKET_POLL: Duration = Duration::from_millis(100);
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// URI prefixes passed to mpv untouched instead of being resolved locally.
const REMOTE_SCHEMES: &[&str] = &["rtsp://", "http://", "https://"];

pub const DEFAULT_VOLUME: i64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("video file not found: {0}")]
    NotFound(String),
    #[error("failed to start playback: {0}")]
    LaunchFailure(String),
    #[error("player did not acknowledge {0}")]
    CommandFailure(&'static str),
    #[error("{0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
}

impl PlaybackStatus {
    pub fn is_active(self) -> bool {
        self != PlaybackStatus::Stopped
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlaybackStatus::Stopped => "stopped",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    /// Absolute file path or stream URI; `Some` exactly when not stopped.
    pub source: Option<String>,
    pub position: f64,
    pub duration: f64,
    /// Always within 0..=100.
    pub volume: i64,
    #[serde(rename = "loop")]
    pub loop_playback: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Stopped,
            source: None,
            position: 0.0,
            duration: 0.0,
            volume: DEFAULT_VOLUME,
            loop_playback: true,
        }
    }
}

/// Window rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Geometry {
    pub fn fullscreen(display: Resolution) -> Self {
        Self {
            x: 0,
            y: 0,
            width: display.width as i32,
            height: display.height as i32,
        }
    }

    /// X11-style geometry string, `WxH+X+Y`.
    pub fn to_mpv_arg(self) -> String {
        format!("{}x{}{:+}{:+}", self.width, self.height, self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Payload of `GET /api/v1/status`, and exactly what the watchdog polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(flatten)]
    pub state: PlaybackState,
    pub geometry: Geometry,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayRequest {
    pub source: String,
    pub loop_playback: Option<bool>,
    pub volume: Option<i64>,
    pub seek_to: Option<f64>,
}

impl PlayRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub media_dir: PathBuf,
    pub socket_path: PathBuf,
    pub display: Resolution,
}

pub fn is_remote_source(source: &str) -> bool {
    REMOTE_SCHEMES.iter().any(|s| source.starts_with(s))
}

pub fn clamp_volume(volume: i64) -> i64 {
    volume.clamp(0, 100)
}

pub struct Supervisor<C, P> {
    config: PlayerConfig,
    channel: C,
    process: P,
    state: PlaybackState,
    geometry: Geometry,
    display: Resolution,
}

impl<C: MediaChannel, P: MediaProcess> Supervisor<C, P> {
    pub fn new(config: PlayerConfig, channel: C, process: P) -> Self {
        // A socket left behind by a crashed run would fool the readiness poll.
        remove_socket(&config.socket_path);
        let display = config.display;
        Self {
            geometry: Geometry::fullscreen(display),
            display,
            config,
            channel,
            process,
            state: PlaybackState::default(),
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn display_resolution(&self) -> Resolution {
        self.display
    }

    pub fn set_display_resolution(&mut self, res: Resolution) {
        info!("display resolution set to {}x{}", res.width, res.height);
        self.display = res;
    }

    pub fn media_dir(&self) -> &Path {
        &self.config.media_dir
    }

    /// Map a request source to what mpv gets: stream URIs untouched, file
    /// names resolved inside the media directory.
    pub fn resolve_source(&self, source: &str) -> Result<String, PlayerError> {
        if is_remote_source(source) {
            return Ok(source.to_string());
        }

        let rel = Path::new(source);
        let inside = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if source.trim().is_empty() || !inside {
            return Err(PlayerError::NotFound(source.to_string()));
        }

        let path = self.config.media_dir.join(rel);
        if !path.is_file() {
            return Err(PlayerError::NotFound(source.to_string()));
        }
        Ok(path.to_string_lossy().to_string())
    }

    pub async fn play(&mut self, req: PlayRequest) -> Result<PlaybackState, PlayerError> {
        let source = self.resolve_source(&req.source)?;

        if let Some(lp) = req.loop_playback {
            self.state.loop_playback = lp;
        }
        if let Some(v) = req.volume {
            self.state.volume = clamp_volume(v);
        }

        self.launch(source, req.seek_to).await?;
        Ok(self.state.clone())
    }

    /// Start mpv on an already-resolved source with the current geometry,
    /// volume and loop flag.
    async fn launch(&mut self, source: String, seek_to: Option<f64>) -> Result<(), PlayerError> {
        if self.process.is_running() || self.state.status.is_active() {
            self.stop().await;
            tokio::time::sleep(SETTLE_DELAY).await;
        } else {
            remove_socket(&self.config.socket_path);
        }

        let args = self.build_args(&source);
        info!(
            "starting mpv: {source} (geometry {})",
            self.geometry.to_mpv_arg()
        );

        let pid = self
            .process
            .spawn(&args)
            .map_err(|e| PlayerError::LaunchFailure(e.to_string()))?;

        // No handshake exists: the control socket appearing is the only
        // readiness signal mpv gives us.
        let mut waited = Duration::ZERO;
        while !self.config.socket_path.exists() && waited < SOCKET_WAIT {
            if !self.process.is_running() {
                break;
            }
            tokio::time::sleep(SOCKET_POLL).await;
            waited += SOCKET_POLL;
        }

        if !self.config.socket_path.exists() {
            warn!(
                "mpv (pid {pid}) did not create {} within {}s",
                self.config.socket_path.display(),
                SOCKET_WAIT.as_secs()
            );
            self.stop().await;
            return Err(PlayerError::LaunchFailure(
                "control socket not created".to_string(),
            ));
        }

        self.state.status = PlaybackStatus::Playing;
        self.state.source = Some(source);
        self.state.position = 0.0;
        self.state.duration = 0.0;
        info!("mpv started (pid {pid})");

        if let Some(pos) = seek_to.filter(|p| *p > 0.0) {
            tokio::time::sleep(SEEK_GRACE).await;
            self.seek(pos).await;
        }
        Ok(())
    }

    /// Tear the session down. Safe to call in any state.
    pub async fn stop(&mut self) -> PlaybackState {
        if self.process.is_running() {
            self.process.terminate(TERMINATE_GRACE).await;
            info!("mpv stopped");
        }

        self.state.status = PlaybackStatus::Stopped;
        self.state.source = None;
        self.state.position = 0.0;
        self.state.duration = 0.0;

        remove_socket(&self.config.socket_path);
        self.state.clone()
    }

    /// Toggle playing <-> paused. No-op when stopped.
    pub async fn pause(&mut self) -> PlaybackStatus {
        let (pause, next) = match self.state.status {
            PlaybackStatus::Playing => (true, PlaybackStatus::Paused),
            PlaybackStatus::Paused => (false, PlaybackStatus::Playing),
            PlaybackStatus::Stopped => return PlaybackStatus::Stopped,
        };

        self.command(MpvCommand::SetProperty("pause", json!(pause)))
            .await;
        self.state.status = next;
        info!("playback {}", if pause { "paused" } else { "resumed" });
        next
    }

    /// Absolute seek. Out-of-range targets are mpv's to clamp.
    pub async fn seek(&mut self, position: f64) -> bool {
        let acked = self
            .command(MpvCommand::Seek(position, SeekMode::Absolute))
            .await;
        info!("seeked to {position}s");
        acked
    }

    pub async fn seek_relative(&mut self, seconds: f64) -> bool {
        let acked = self
            .command(MpvCommand::Seek(seconds, SeekMode::Relative))
            .await;
        info!("seeked {seconds:+}s");
        acked
    }

    /// Returns the clamped volume that was stored.
    pub async fn set_volume(&mut self, volume: i64) -> i64 {
        let volume = clamp_volume(volume);
        self.state.volume = volume;
        self.command(MpvCommand::SetProperty("volume", json!(volume)))
            .await;
        info!("volume set to {volume}");
        volume
    }

    /// Store the new window rectangle. mpv cannot move its window, so an
    /// active session is restarted in place: same source, position, loop,
    /// volume and pause state. The restart runs to completion.
    pub async fn set_geometry(&mut self, geometry: Geometry) -> Result<Geometry, PlayerError> {
        self.geometry = geometry;
        info!("geometry updated: {}", geometry.to_mpv_arg());

        if !self.state.status.is_active() {
            return Ok(geometry);
        }
        let Some(source) = self.state.source.clone() else {
            return Ok(geometry);
        };

        let position = self.query_position().await.unwrap_or(self.state.position);
        let was_paused = self.state.status == PlaybackStatus::Paused;

        self.stop().await;
        tokio::time::sleep(SETTLE_DELAY).await;
        self.launch(source, Some(position)).await?;

        if was_paused {
            tokio::time::sleep(SETTLE_DELAY).await;
            self.pause().await;
        }
        Ok(geometry)
    }

    /// Full state + geometry. Position and duration are refreshed from mpv
    /// while a session is active; failed queries keep the cached values.
    pub async fn status(&mut self) -> StatusSnapshot {
        if self.state.status.is_active() {
            if let Some(pos) = self.query_position().await {
                self.state.position = pos;
            }
            if let Some(dur) = self.query_f64("duration").await {
                self.state.duration = dur;
            }
        }
        StatusSnapshot {
            state: self.state.clone(),
            geometry: self.geometry,
        }
    }

    async fn query_position(&mut self) -> Option<f64> {
        self.query_f64("time-pos").await
    }

    async fn query_f64(&mut self, property: &'static str) -> Option<f64> {
        self.channel
            .send(MpvCommand::GetProperty(property))
            .await
            .and_then(|r| r.as_f64())
    }

    /// Fire a mutating command. Failure is logged, never rolled back.
    async fn command(&mut self, command: MpvCommand) -> bool {
        let verb = command.verb();
        match self.channel.send(command).await {
            Some(reply) if reply.is_success() => true,
            Some(reply) => {
                warn!(
                    "mpv rejected {verb}: {}",
                    reply.error.as_deref().unwrap_or("unknown error")
                );
                false
            }
            None => {
                warn!("{}", PlayerError::CommandFailure(verb));
                false
            }
        }
    }

    fn build_args(&self, source: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "--no-border",
            "--no-osc",
            "--no-osd-bar",
            "--really-quiet",
            "--keep-open=yes",
            // GPU output on X11 via EGL
            "--vo=gpu",
            "--gpu-context=x11egl",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push(format!("--geometry={}", self.geometry.to_mpv_arg()));
        args.push("--autofit-larger=100%x100%".into());
        args.push(format!(
            "--input-ipc-server={}",
            self.config.socket_path.display()
        ));
        args.push(format!("--volume={}", self.state.volume));
        args.push(
            if self.state.loop_playback {
                "--loop-playlist=inf"
            } else {
                "--loop-playlist=no"
            }
            .into(),
        );

        args.extend(
            [
                "--force-window=yes",
                "--idle=yes",
                "--ontop=yes",
                "--cursor-autohide=always",
                "--keepaspect=no",
                "--video-aspect-override=-1",
                // hardware decode
                "--hwdec=auto",
                "--hwdec-codecs=all",
                "--cache=yes",
                "--demuxer-max-bytes=50M",
                "--demuxer-max-back-bytes=25M",
                "--vd-lavc-threads=4",
                // RTSP over TCP survives lossy links far better than UDP
                "--network-timeout=10",
                "--rtsp-transport=tcp",
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        args.push(source.to_string());
        args
    }
}

fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove {}: {e}", path.display()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ipc::MpvReply;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Records commands; answers `get_property` from a settable table.
    #[derive(Clone, Default)]
    pub(crate) struct FakeChannel {
        pub sent: Arc<Mutex<Vec<MpvCommand>>>,
        pub properties: Arc<Mutex<HashMap<&'static str, Value>>>,
        pub offline: Arc<Mutex<bool>>,
    }

    impl FakeChannel {
        pub(crate) fn set(&self, name: &'static str, value: Value) {
            self.properties.lock().unwrap().insert(name, value);
        }

        pub(crate) fn sent(&self) -> Vec<MpvCommand> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl MediaChannel for FakeChannel {
        async fn send(&self, command: MpvCommand) -> Option<MpvReply> {
            if *self.offline.lock().unwrap() {
                return None;
            }
            self.sent.lock().unwrap().push(command.clone());
            let data = match &command {
                MpvCommand::GetProperty(name) => self.properties.lock().unwrap().get(name).cloned(),
                MpvCommand::SetProperty(name, value) => {
                    self.properties.lock().unwrap().insert(*name, value.clone());
                    None
                }
                MpvCommand::Seek(..) => None,
            };
            Some(MpvReply {
                data,
                error: Some("success".into()),
            })
        }
    }

    /// Creates the control socket file on spawn, like a healthy mpv would.
    #[derive(Clone)]
    pub(crate) struct FakeProcess {
        socket: PathBuf,
        pub creates_socket: Arc<Mutex<bool>>,
        pub running: Arc<Mutex<bool>>,
        pub spawns: Arc<Mutex<Vec<Vec<String>>>>,
        pub terminations: Arc<Mutex<u32>>,
    }

    impl FakeProcess {
        pub(crate) fn new(socket: PathBuf) -> Self {
            Self {
                socket,
                creates_socket: Arc::new(Mutex::new(true)),
                running: Arc::new(Mutex::new(false)),
                spawns: Arc::new(Mutex::new(Vec::new())),
                terminations: Arc::new(Mutex::new(0)),
            }
        }
    }

    impl MediaProcess for FakeProcess {
        fn spawn(&mut self, args: &[String]) -> anyhow::Result<u32> {
            self.spawns.lock().unwrap().push(args.to_vec());
            *self.running.lock().unwrap() = true;
            if *self.creates_socket.lock().unwrap() {
                std::fs::write(&self.socket, b"")?;
            }
            Ok(4242)
        }

        fn is_running(&mut self) -> bool {
            *self.running.lock().unwrap()
        }

        async fn terminate(&mut self, _grace: Duration) {
            *self.running.lock().unwrap() = false;
            *self.terminations.lock().unwrap() += 1;
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        media: PathBuf,
        socket: PathBuf,
        channel: FakeChannel,
        process: FakeProcess,
        sup: Supervisor<FakeChannel, FakeProcess>,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("videos");
        std::fs::create_dir_all(&media).unwrap();
        std::fs::write(media.join("intro.mp4"), b"fake").unwrap();
        let socket = dir.path().join("mpv.sock");

        let channel = FakeChannel::default();
        let process = FakeProcess::new(socket.clone());
        let config = PlayerConfig {
            media_dir: media.clone(),
            socket_path: socket.clone(),
            display: Resolution::default(),
        };
        let sup = Supervisor::new(config, channel.clone(), process.clone());
        Harness {
            _dir: dir,
            media,
            socket,
            channel,
            process,
            sup,
        }
    }

    #[tokio::test]
    async fn initial_state_matches_defaults() {
        let h = harness();
        let st = h.sup.state();
        assert_eq!(st.status, PlaybackStatus::Stopped);
        assert_eq!(st.source, None);
        assert_eq!(st.volume, 50);
        assert!(st.loop_playback);
        assert_eq!(h.sup.geometry(), Geometry { x: 0, y: 0, width: 1920, height: 1080 });
    }

    #[tokio::test]
    async fn display_resolution_is_stored_without_touching_geometry() {
        let mut h = harness();
        h.sup.set_display_resolution(Resolution { width: 1280, height: 720 });
        assert_eq!(h.sup.display_resolution(), Resolution { width: 1280, height: 720 });
        assert_eq!(h.sup.geometry().width, 1920);
    }

    #[test]
    fn geometry_formats_as_x11_string() {
        let g = Geometry { x: 960, y: 0, width: 960, height: 1080 };
        assert_eq!(g.to_mpv_arg(), "960x1080+960+0");
        let g = Geometry { x: -10, y: 5, width: 640, height: 360 };
        assert_eq!(g.to_mpv_arg(), "640x360-10+5");
    }

    #[test]
    fn volume_is_clamped_into_range() {
        for (input, want) in [(-20, 0), (0, 0), (37, 37), (100, 100), (250, 100)] {
            assert_eq!(clamp_volume(input), want);
        }
    }

    #[test]
    fn status_snapshot_serializes_flat_with_loop_key() {
        let snap = StatusSnapshot {
            state: PlaybackState::default(),
            geometry: Geometry { x: 0, y: 0, width: 1920, height: 1080 },
        };
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["status"], "stopped");
        assert_eq!(v["loop"], true);
        assert_eq!(v["source"], Value::Null);
        assert_eq!(v["geometry"]["width"], 1920);
    }

    #[tokio::test(start_paused = true)]
    async fn play_local_file_resolves_to_absolute_path() {
        let mut h = harness();
        let st = h.sup.play(PlayRequest::new("intro.mp4")).await.unwrap();

        assert_eq!(st.status, PlaybackStatus::Playing);
        let want = h.media.join("intro.mp4").to_string_lossy().to_string();
        assert_eq!(st.source.as_deref(), Some(want.as_str()));
        assert!(Path::new(&want).is_absolute());

        let spawns = h.process.spawns.lock().unwrap().clone();
        assert_eq!(spawns.len(), 1);
        assert_eq!(spawns[0].last(), Some(&want));
    }

    #[tokio::test(start_paused = true)]
    async fn play_remote_source_passes_through() {
        let mut h = harness();
        let uri = "rtsp://camera.local:554/stream1";
        let st = h.sup.play(PlayRequest::new(uri)).await.unwrap();
        assert_eq!(st.source.as_deref(), Some(uri));
        assert_eq!(st.status, PlaybackStatus::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn play_missing_file_is_not_found() {
        let mut h = harness();
        let err = h.sup.play(PlayRequest::new("nope.mp4")).await.unwrap_err();
        assert!(matches!(err, PlayerError::NotFound(_)));
        assert_eq!(h.sup.state().status, PlaybackStatus::Stopped);
        assert!(h.process.spawns.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn play_rejects_paths_outside_media_dir() {
        let mut h = harness();
        for src in ["../etc/passwd", "/etc/passwd", ""] {
            let err = h.sup.play(PlayRequest::new(src)).await.unwrap_err();
            assert!(matches!(err, PlayerError::NotFound(_)), "{src}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn play_fails_when_socket_never_appears() {
        let mut h = harness();
        *h.process.creates_socket.lock().unwrap() = false;

        let err = h.sup.play(PlayRequest::new("intro.mp4")).await.unwrap_err();
        assert!(matches!(err, PlayerError::LaunchFailure(_)));
        assert_eq!(h.sup.state().status, PlaybackStatus::Stopped);
        assert_eq!(h.sup.state().source, None);
        // The half-started process is not left behind.
        assert!(!*h.process.running.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn play_applies_loop_volume_and_seek() {
        let mut h = harness();
        let req = PlayRequest {
            source: "intro.mp4".into(),
            loop_playback: Some(false),
            volume: Some(140),
            seek_to: Some(33.0),
        };
        let st = h.sup.play(req).await.unwrap();
        assert_eq!(st.volume, 100);
        assert!(!st.loop_playback);

        let args = h.process.spawns.lock().unwrap()[0].clone();
        assert!(args.contains(&"--volume=100".to_string()));
        assert!(args.contains(&"--loop-playlist=no".to_string()));
        assert!(args.contains(&"--geometry=1920x1080+0+0".to_string()));
        assert!(args
            .iter()
            .any(|a| a == &format!("--input-ipc-server={}", h.socket.display())));

        assert_eq!(
            h.channel.sent(),
            vec![MpvCommand::Seek(33.0, SeekMode::Absolute)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn play_while_active_stops_previous_session_first() {
        let mut h = harness();
        h.sup.play(PlayRequest::new("intro.mp4")).await.unwrap();
        h.sup.play(PlayRequest::new("rtsp://cam/1")).await.unwrap();

        assert_eq!(*h.process.terminations.lock().unwrap(), 1);
        assert_eq!(h.process.spawns.lock().unwrap().len(), 2);
        assert_eq!(h.sup.state().source.as_deref(), Some("rtsp://cam/1"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let mut h = harness();
        let first = h.sup.stop().await;
        let second = h.sup.stop().await;
        assert_eq!(first, second);
        assert_eq!(first.status, PlaybackStatus::Stopped);

        h.sup.play(PlayRequest::new("intro.mp4")).await.unwrap();
        assert!(h.socket.exists());
        let st = h.sup.stop().await;
        assert_eq!(st.status, PlaybackStatus::Stopped);
        assert_eq!(st.source, None);
        assert_eq!(st.position, 0.0);
        assert!(!h.socket.exists());
        assert_eq!(h.sup.stop().await, st);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_toggles_and_is_noop_when_stopped() {
        let mut h = harness();
        assert_eq!(h.sup.pause().await, PlaybackStatus::Stopped);
        assert!(h.channel.sent().is_empty());

        h.sup.play(PlayRequest::new("intro.mp4")).await.unwrap();
        assert_eq!(h.sup.pause().await, PlaybackStatus::Paused);
        assert_eq!(h.sup.pause().await, PlaybackStatus::Playing);
        assert_eq!(
            h.channel.sent(),
            vec![
                MpvCommand::SetProperty("pause", json!(true)),
                MpvCommand::SetProperty("pause", json!(false)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_keeps_intent_when_channel_is_down() {
        let mut h = harness();
        h.sup.play(PlayRequest::new("intro.mp4")).await.unwrap();
        *h.channel.offline.lock().unwrap() = true;
        assert_eq!(h.sup.pause().await, PlaybackStatus::Paused);
        assert_eq!(h.sup.state().status, PlaybackStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn seeks_forward_unclamped() {
        let mut h = harness();
        h.sup.play(PlayRequest::new("intro.mp4")).await.unwrap();
        assert!(h.sup.seek(-5.0).await);
        assert!(h.sup.seek_relative(99999.0).await);
        assert_eq!(
            h.channel.sent(),
            vec![
                MpvCommand::Seek(-5.0, SeekMode::Absolute),
                MpvCommand::Seek(99999.0, SeekMode::Relative),
            ]
        );
    }

    #[tokio::test]
    async fn set_volume_stores_clamped_value() {
        let mut h = harness();
        for (input, want) in [(-1, 0), (64, 64), (101, 100), (i64::MAX, 100)] {
            assert_eq!(h.sup.set_volume(input).await, want);
            assert_eq!(h.sup.state().volume, want);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn status_refreshes_position_and_keeps_stale_on_failure() {
        let mut h = harness();
        h.sup.play(PlayRequest::new("intro.mp4")).await.unwrap();
        h.channel.set("time-pos", json!(12.5));
        h.channel.set("duration", json!(300.0));

        let snap = h.sup.status().await;
        assert_eq!(snap.state.position, 12.5);
        assert_eq!(snap.state.duration, 300.0);

        *h.channel.offline.lock().unwrap() = true;
        let snap = h.sup.status().await;
        assert_eq!(snap.state.position, 12.5);
        assert_eq!(snap.state.duration, 300.0);
    }

    #[tokio::test]
    async fn status_while_stopped_does_not_query() {
        let mut h = harness();
        let snap = h.sup.status().await;
        assert_eq!(snap.state.status, PlaybackStatus::Stopped);
        assert!(h.channel.sent().is_empty());
    }

    #[tokio::test]
    async fn set_geometry_while_stopped_only_stores() {
        let mut h = harness();
        let g = Geometry { x: 0, y: 540, width: 1920, height: 540 };
        assert_eq!(h.sup.set_geometry(g).await.unwrap(), g);
        assert_eq!(h.sup.geometry(), g);
        assert!(h.process.spawns.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn set_geometry_restarts_and_preserves_session() {
        let mut h = harness();
        let req = PlayRequest {
            source: "intro.mp4".into(),
            loop_playback: Some(false),
            volume: Some(70),
            seek_to: None,
        };
        let before = h.sup.play(req).await.unwrap();
        h.channel.set("time-pos", json!(84.2));

        let g = Geometry { x: 1280, y: 720, width: 640, height: 360 };
        h.sup.set_geometry(g).await.unwrap();

        let after = h.sup.state().clone();
        assert_eq!(after.status, PlaybackStatus::Playing);
        assert_eq!(after.source, before.source);
        assert_eq!(after.volume, 70);
        assert!(!after.loop_playback);

        let spawns = h.process.spawns.lock().unwrap().clone();
        assert_eq!(spawns.len(), 2);
        assert!(spawns[1].contains(&"--geometry=640x360+1280+720".to_string()));
        assert!(spawns[1].contains(&"--volume=70".to_string()));

        let sent = h.channel.sent();
        assert!(sent.contains(&MpvCommand::Seek(84.2, SeekMode::Absolute)));

        let snap = h.sup.status().await;
        assert!((snap.state.position - 84.2).abs() < 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn set_geometry_restores_pause() {
        let mut h = harness();
        h.sup.play(PlayRequest::new("rtsp://cam/1")).await.unwrap();
        h.sup.pause().await;

        let g = Geometry { x: 0, y: 0, width: 960, height: 1080 };
        h.sup.set_geometry(g).await.unwrap();

        assert_eq!(h.sup.state().status, PlaybackStatus::Paused);
        assert_eq!(h.sup.state().source.as_deref(), Some("rtsp://cam/1"));
        let pauses: Vec<_> = h
            .channel
            .sent()
            .into_iter()
            .filter(|c| matches!(c, MpvCommand::SetProperty("pause", _)))
            .collect();
        assert_eq!(
            pauses,
            vec![
                MpvCommand::SetProperty("pause", json!(true)),
                MpvCommand::SetProperty("pause", json!(true)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn set_geometry_surfaces_relaunch_failure() {
        let mut h = harness();
        h.sup.play(PlayRequest::new("intro.mp4")).await.unwrap();
        *h.process.creates_socket.lock().unwrap() = false;

        let g = Geometry { x: 0, y: 0, width: 800, height: 600 };
        let err = h.sup.set_geometry(g).await.unwrap_err();
        assert!(matches!(err, PlayerError::LaunchFailure(_)));
        assert_eq!(h.sup.geometry(), g);
        assert_eq!(h.sup.state().status, PlaybackStatus::Stopped);
    }
}
