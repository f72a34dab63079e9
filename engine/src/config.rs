// --- Configuration ------------------------------------------------------------
//
// Everything is environment-driven so the systemd unit stays the single place
// an installer has to touch. Unset variables fall back to the defaults below.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::player::{PlayerConfig, Resolution};
use crate::watchdog::WatchdogConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub db_path: String,
    pub mpv: String,
    pub player: PlayerConfig,
    pub watchdog_enabled: bool,
    pub watchdog: WatchdogConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind: SocketAddr = parse_or(&get, "KIOSKPLAY_BIND", "0.0.0.0:5000".parse()?)?;

        let mut media_dir = PathBuf::from(
            get("KIOSKPLAY_MEDIA_DIR").unwrap_or_else(|| "/opt/kioskplay/shared/videos".into()),
        );
        if media_dir.is_relative() {
            media_dir = std::env::current_dir()
                .context("resolving KIOSKPLAY_MEDIA_DIR")?
                .join(media_dir);
        }

        let display = match get("KIOSKPLAY_DISPLAY") {
            Some(s) => parse_resolution(&s)
                .with_context(|| format!("KIOSKPLAY_DISPLAY={s:?} is not WIDTHxHEIGHT"))?,
            None => Resolution::default(),
        };

        let player = PlayerConfig {
            media_dir,
            socket_path: PathBuf::from(
                get("KIOSKPLAY_MPV_SOCKET").unwrap_or_else(|| "/tmp/mpvsocket-kioskplay".into()),
            ),
            display,
        };

        let watchdog_enabled = !matches!(
            get("KIOSKPLAY_WATCHDOG").as_deref().map(str::trim),
            Some("off" | "0" | "false" | "no")
        );

        let defaults = WatchdogConfig::default();
        let watchdog = WatchdogConfig {
            api_base: get("KIOSKPLAY_WATCHDOG_API")
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", bind.port())),
            interval: secs_or(&get, "KIOSKPLAY_WATCHDOG_INTERVAL_SEC", defaults.interval)?,
            freeze_threshold: secs_or(&get, "KIOSKPLAY_WATCHDOG_FREEZE_SEC", defaults.freeze_threshold)?,
            freeze_epsilon: parse_or(&get, "KIOSKPLAY_WATCHDOG_FREEZE_EPSILON", defaults.freeze_epsilon)?,
            stopped_threshold: parse_or(
                &get,
                "KIOSKPLAY_WATCHDOG_STOPPED_THRESHOLD",
                defaults.stopped_threshold,
            )?
            .max(1),
            restart_cap: parse_or(&get, "KIOSKPLAY_WATCHDOG_RESTART_CAP", defaults.restart_cap)?,
            cooldown: secs_or(&get, "KIOSKPLAY_WATCHDOG_COOLDOWN_SEC", defaults.cooldown)?,
            failure_wait: secs_or(&get, "KIOSKPLAY_WATCHDOG_FAILURE_WAIT_SEC", defaults.failure_wait)?,
            monitored_schemes: match get("KIOSKPLAY_WATCHDOG_SCHEMES") {
                Some(list) => list
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                None => defaults.monitored_schemes,
            },
            process_name: get("KIOSKPLAY_WATCHDOG_PROCESS").unwrap_or(defaults.process_name),
        };

        Ok(Self {
            bind,
            db_path: get("KIOSKPLAY_DB_PATH")
                .unwrap_or_else(|| "/opt/kioskplay/shared/kioskplay.db".into()),
            mpv: get("KIOSKPLAY_MPV").unwrap_or_else(|| "mpv".into()),
            player,
            watchdog_enabled,
            watchdog,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
        None => Ok(default),
    }
}

fn secs_or(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> anyhow::Result<Duration> {
    let secs: f64 = parse_or(get, key, default.as_secs_f64())?;
    if !secs.is_finite() || secs < 0.0 {
        anyhow::bail!("invalid {key}={secs}: must be a non-negative number of seconds");
    }
    Ok(Duration::from_secs_f64(secs))
}

pub fn parse_resolution(s: &str) -> Option<Resolution> {
    let (w, h) = s.trim().split_once(['x', 'X'])?;
    let width: u32 = w.trim().parse().ok()?;
    let height: u32 = h.trim().parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some(Resolution { width, height })
}
