// --- Health watchdog ------------------------------------------------------------
//
// An independent poll loop that sees the supervisor only through its public
// HTTP API, exactly as an operator's client would. Each tick classifies the
// session, first match wins:
//
//   reported-stopped  status=stopped after a monitored source was active;
//                     restart once `stopped_threshold` reports in a row
//   process-died      status=playing but no player process exists
//   frozen            status=playing and the position has not moved more than
//                     `freeze_epsilon` for `freeze_threshold`
//
// Restarts are capped. Hitting the cap starts a cooldown during which nothing
// is checked, after which monitoring resumes from a clean slate.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::player::{PlaybackStatus, StatusSnapshot, DEFAULT_VOLUME};

const STATUS_TIMEOUT: Duration = Duration::from_secs(2);
/// A server-side play may take stop grace + settle + socket wait.
const PLAY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub api_base: String,
    pub interval: Duration,
    pub freeze_threshold: Duration,
    pub freeze_epsilon: f64,
    pub stopped_threshold: u32,
    pub restart_cap: u32,
    pub cooldown: Duration,
    /// Extra wait after a restart the API refused.
    pub failure_wait: Duration,
    /// Source prefixes that are watched; anything else is left alone.
    pub monitored_schemes: Vec<String>,
    pub process_name: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:5000".into(),
            interval: Duration::from_secs(5),
            freeze_threshold: Duration::from_secs(15),
            freeze_epsilon: 0.1,
            stopped_threshold: 2,
            restart_cap: 3,
            cooldown: Duration::from_secs(60),
            failure_wait: Duration::from_secs(10),
            monitored_schemes: vec!["rtsp://".into()],
            process_name: "mpv".into(),
        }
    }
}

impl WatchdogConfig {
    pub fn is_monitored(&self, source: &str) -> bool {
        self.monitored_schemes.iter().any(|s| source.starts_with(s.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Stopped,
    ProcessDied,
    Frozen,
}

impl FailureReason {
    fn as_str(self) -> &'static str {
        match self {
            FailureReason::Stopped => "stopped",
            FailureReason::ProcessDied => "process_died",
            FailureReason::Frozen => "frozen",
        }
    }
}

/// What one tick concluded. Drives the loop's sleep and the tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Inside a cooldown window; nothing was checked.
    Backoff,
    /// Status endpoint unreachable.
    Unreachable,
    /// Nothing monitored.
    Idle,
    Healthy,
    /// A failure was observed but has not reached its threshold.
    Failing,
    Restarted(FailureReason),
    RestartFailed(FailureReason),
    /// The restart cap was hit; cooldown started instead of a restart.
    CooldownStarted(FailureReason),
}

/// Body of the restart call, same shape as `POST /api/v1/play`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestartRequest {
    pub source: String,
    #[serde(rename = "loop")]
    pub loop_playback: bool,
    pub volume: i64,
}

/// The supervisor's public surface, as the watchdog sees it.
pub trait PlayerApi: Send + Sync {
    fn status(&self) -> impl Future<Output = anyhow::Result<StatusSnapshot>> + Send;
    fn play(&self, req: &RestartRequest) -> impl Future<Output = anyhow::Result<()>> + Send;
}

pub struct HttpPlayerApi {
    client: reqwest::Client,
    base: String,
}

impl HttpPlayerApi {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }
}

impl PlayerApi for HttpPlayerApi {
    async fn status(&self) -> anyhow::Result<StatusSnapshot> {
        let resp = self
            .client
            .get(format!("{}/api/v1/status", self.base))
            .timeout(STATUS_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn play(&self, req: &RestartRequest) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(format!("{}/api/v1/play", self.base))
            .json(req)
            .timeout(PLAY_TIMEOUT)
            .send()
            .await?;
        let code = resp.status();
        if !code.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("HTTP {code}: {}", body.trim());
        }
        Ok(())
    }
}

/// Independent view of whether the player process exists.
pub trait ProcessProbe: Send {
    fn is_alive(&mut self) -> bool;
    /// Force-kill every player instance. Returns how many were signalled.
    fn kill_strays(&mut self) -> usize;
}

pub struct SysinfoProbe {
    sys: System,
    name: String,
}

impl SysinfoProbe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            sys: System::new(),
            name: name.into(),
        }
    }

    fn refresh(&mut self) {
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );
    }
}

impl ProcessProbe for SysinfoProbe {
    fn is_alive(&mut self) -> bool {
        self.refresh();
        // An unreaped crash still shows up by name as a zombie.
        self.sys
            .processes_by_exact_name(self.name.as_ref())
            .any(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
    }

    fn kill_strays(&mut self) -> usize {
        self.refresh();
        self.sys
            .processes_by_exact_name(self.name.as_ref())
            .filter(|p| p.kill())
            .count()
    }
}

/// Per-stream bookkeeping, rebuilt from observations. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchdogSession {
    pub last_source: Option<String>,
    pub last_loop: bool,
    pub last_volume: i64,
    /// Last position that counted as progress, and when it was seen.
    pub last_position: Option<(f64, Instant)>,
    pub consecutive_failures: u32,
    pub restart_attempts: u32,
    pub in_backoff: bool,
    pub backoff_until: Option<Instant>,
}

impl Default for WatchdogSession {
    fn default() -> Self {
        Self {
            last_source: None,
            last_loop: true,
            last_volume: DEFAULT_VOLUME,
            last_position: None,
            consecutive_failures: 0,
            restart_attempts: 0,
            in_backoff: false,
            backoff_until: None,
        }
    }
}

/// Operator-facing telemetry, served at `/api/v1/watchdog`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WatchdogStats {
    pub enabled: bool,
    /// Unix millis of the last tick.
    pub last_check_ms: Option<u64>,
    pub monitoring: Option<String>,
    pub consecutive_failures: u32,
    pub restart_attempts: u32,
    pub total_restarts: u64,
    /// RFC 3339.
    pub last_restart_at: Option<String>,
    pub last_restart_reason: Option<FailureReason>,
    pub last_error: Option<String>,
    pub in_backoff: bool,
    pub backoff_remaining_sec: Option<u64>,
}

pub type SharedStats = Arc<Mutex<WatchdogStats>>;

pub struct Watchdog<A, P> {
    config: WatchdogConfig,
    api: A,
    probe: P,
    session: WatchdogSession,
    stats: SharedStats,
}

impl<A: PlayerApi, P: ProcessProbe> Watchdog<A, P> {
    pub fn new(config: WatchdogConfig, api: A, probe: P, stats: SharedStats) -> Self {
        Self {
            config,
            api,
            probe,
            session: WatchdogSession::default(),
            stats,
        }
    }

    pub fn session(&self) -> &WatchdogSession {
        &self.session
    }

    /// Poll forever.
    pub async fn run(mut self) {
        info!(
            "watchdog: started (api {}, every {}s, watching {:?})",
            self.config.api_base,
            self.config.interval.as_secs(),
            self.config.monitored_schemes
        );
        self.stats.lock().await.enabled = true;

        loop {
            let tick = self.tick().await;
            let wait = match tick {
                Tick::RestartFailed(_) => self.config.interval + self.config.failure_wait,
                _ => self.config.interval,
            };
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn tick(&mut self) -> Tick {
        let tick = self.evaluate().await;
        self.publish().await;
        tick
    }

    async fn evaluate(&mut self) -> Tick {
        let now = Instant::now();

        if self.session.in_backoff {
            match self.session.backoff_until {
                Some(until) if now < until => return Tick::Backoff,
                _ => {
                    info!("watchdog: cooldown elapsed, resuming monitoring");
                    self.session.in_backoff = false;
                    self.session.backoff_until = None;
                }
            }
        }

        let status = match self.api.status().await {
            Ok(s) => s,
            Err(e) => {
                warn!("watchdog: failed to get status: {e}");
                self.stats.lock().await.last_error = Some(format!("status: {e}"));
                return Tick::Unreachable;
            }
        };
        let st = &status.state;

        let monitored = st
            .source
            .as_deref()
            .filter(|s| self.config.is_monitored(s));

        if let Some(source) = monitored {
            if self.session.last_source.as_deref() != Some(source) {
                info!("watchdog: monitoring {source}");
                self.session.last_position = None;
            }
            self.session.last_source = Some(source.to_string());
            self.session.last_loop = st.loop_playback;
            self.session.last_volume = st.volume;
        } else if st.status == PlaybackStatus::Stopped && self.session.last_source.is_some() {
            // A stopped report carries no source; judge it against the
            // stream we were watching.
        } else {
            if let Some(prev) = self.session.last_source.as_deref() {
                info!("watchdog: {prev} no longer playing a monitored source, stopping monitoring");
            }
            self.session = WatchdogSession::default();
            return Tick::Idle;
        }

        match st.status {
            PlaybackStatus::Stopped => {
                self.session.consecutive_failures += 1;
                warn!(
                    "watchdog: stream reported stopped ({}/{})",
                    self.session.consecutive_failures, self.config.stopped_threshold
                );
                if self.session.consecutive_failures >= self.config.stopped_threshold {
                    self.trigger(FailureReason::Stopped, now).await
                } else {
                    Tick::Failing
                }
            }
            PlaybackStatus::Playing if !self.probe.is_alive() => {
                warn!(
                    "watchdog: status says playing but no {} process exists",
                    self.config.process_name
                );
                self.trigger(FailureReason::ProcessDied, now).await
            }
            PlaybackStatus::Playing => self.observe_position(st.position, now).await,
            PlaybackStatus::Paused => {
                // Paused streams are not frozen ones.
                self.session.last_position = None;
                Tick::Healthy
            }
        }
    }

    async fn observe_position(&mut self, position: f64, now: Instant) -> Tick {
        let Some((last, since)) = self.session.last_position else {
            self.session.last_position = Some((position, now));
            self.session.consecutive_failures = 0;
            return Tick::Healthy;
        };

        // abs(): a loop wrap-around jumps backwards and is still progress.
        if (position - last).abs() > self.config.freeze_epsilon {
            if self.session.restart_attempts > 0 || self.session.consecutive_failures > 0 {
                info!("watchdog: stream recovered (position {position:.1}s)");
            }
            self.session.consecutive_failures = 0;
            self.session.restart_attempts = 0;
            self.session.last_position = Some((position, now));
            return Tick::Healthy;
        }

        let stalled = now.duration_since(since);
        if stalled >= self.config.freeze_threshold {
            warn!(
                "watchdog: position stuck at {position:.1}s for {}s",
                stalled.as_secs()
            );
            return self.trigger(FailureReason::Frozen, now).await;
        }
        debug!(
            "watchdog: position unchanged at {position:.1}s for {}s",
            stalled.as_secs()
        );
        Tick::Healthy
    }

    async fn trigger(&mut self, reason: FailureReason, now: Instant) -> Tick {
        if self.session.restart_attempts >= self.config.restart_cap {
            warn!(
                "watchdog: {} restarts without recovery, cooling down for {}s",
                self.session.restart_attempts,
                self.config.cooldown.as_secs()
            );
            self.session.in_backoff = true;
            self.session.backoff_until = Some(now + self.config.cooldown);
            self.session.restart_attempts = 0;
            self.session.consecutive_failures = 0;
            self.session.last_position = None;
            return Tick::CooldownStarted(reason);
        }

        let Some(source) = self.session.last_source.clone() else {
            return Tick::Idle;
        };
        self.session.restart_attempts += 1;

        // The supervisor's own stop may not get through to a wedged player.
        let killed = self.probe.kill_strays();
        if killed > 0 {
            info!(
                "watchdog: killed {killed} stray {} process(es)",
                self.config.process_name
            );
        }

        info!(
            "watchdog: restarting {source} ({}, attempt {}/{})",
            reason.as_str(),
            self.session.restart_attempts,
            self.config.restart_cap
        );
        let req = RestartRequest {
            source,
            loop_playback: self.session.last_loop,
            volume: self.session.last_volume,
        };

        match self.api.play(&req).await {
            Ok(()) => {
                info!("watchdog: stream restarted");
                self.session.consecutive_failures = 0;
                self.session.last_position = None;

                let mut stats = self.stats.lock().await;
                stats.total_restarts += 1;
                stats.last_restart_reason = Some(reason);
                stats.last_restart_at = time::OffsetDateTime::now_utc()
                    .format(&time::format_description::well_known::Rfc3339)
                    .ok();
                stats.last_error = None;
                Tick::Restarted(reason)
            }
            Err(e) => {
                warn!("watchdog: restart failed: {e}");
                self.stats.lock().await.last_error = Some(format!("restart: {e}"));
                Tick::RestartFailed(reason)
            }
        }
    }

    async fn publish(&self) {
        let now = Instant::now();
        let mut stats = self.stats.lock().await;
        stats.last_check_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()
            .map(|d| d.as_millis() as u64);
        stats.monitoring = self.session.last_source.clone();
        stats.consecutive_failures = self.session.consecutive_failures;
        stats.restart_attempts = self.session.restart_attempts;
        stats.in_backoff = self.session.in_backoff;
        stats.backoff_remaining_sec = self
            .session
            .backoff_until
            .map(|until| until.saturating_duration_since(now).as_secs());
    }
}
