// --- External player process ------------------------------------------------

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Lifecycle of the one external player instance the supervisor owns.
pub trait MediaProcess: Send {
    /// Launch with the given arguments. Returns the pid.
    fn spawn(&mut self, args: &[String]) -> anyhow::Result<u32>;

    /// True while the last spawned instance has not exited.
    fn is_running(&mut self) -> bool;

    /// Ask the process to exit, wait up to `grace`, then force-kill.
    fn terminate(&mut self, grace: Duration) -> impl Future<Output = ()> + Send;
}

pub struct MpvProcess {
    program: String,
    child: Option<Child>,
}

impl MpvProcess {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            child: None,
        }
    }
}

impl MediaProcess for MpvProcess {
    fn spawn(&mut self, args: &[String]) -> anyhow::Result<u32> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn {}: {e}", self.program))?;
        let pid = child
            .id()
            .ok_or_else(|| anyhow::anyhow!("{} exited before reporting a pid", self.program))?;
        self.child = Some(child);
        Ok(pid)
    }

    fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(es)) => {
                info!("{} exited: {es}", self.program);
                self.child = None;
                false
            }
            Err(e) => {
                warn!("{} try_wait error: {e}", self.program);
                false
            }
        }
    }

    async fn terminate(&mut self, grace: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Some(pid) = child.id() {
            // SIGTERM lets mpv release the display and audio device cleanly.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                warn!("SIGTERM to {} (pid {pid}) failed", self.program);
            }
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(es)) => info!("{} stopped: {es}", self.program),
            Ok(Err(e)) => warn!("{} wait error: {e}", self.program),
            Err(_) => {
                warn!(
                    "{} ignored SIGTERM for {}ms, killing",
                    self.program,
                    grace.as_millis()
                );
                if let Err(e) = child.kill().await {
                    warn!("{} kill failed: {e}", self.program);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_missing_binary_fails() {
        let mut p = MpvProcess::new("/nonexistent/kioskplay-mpv");
        assert!(p.spawn(&[]).is_err());
        assert!(!p.is_running());
    }

    #[tokio::test]
    async fn terminate_stops_a_running_child() {
        let mut p = MpvProcess::new("sleep");
        p.spawn(&["30".to_string()]).unwrap();
        assert!(p.is_running());

        p.terminate(Duration::from_secs(2)).await;
        assert!(!p.is_running());
    }

    #[tokio::test]
    async fn terminate_without_child_is_a_noop() {
        let mut p = MpvProcess::new("mpv");
        p.terminate(Duration::from_millis(10)).await;
        assert!(!p.is_running());
    }
}
