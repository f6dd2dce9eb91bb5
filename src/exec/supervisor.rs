//! Shell process supervision.
//!
//! One [`Supervisor::run`] call spawns `<shell> -c <command>` in a fresh
//! process group, captures bounded output, and then walks a fixed
//! termination escalation: TERM the group, wait half the timeout, KILL the
//! group, wait unbounded.
//!
//! Known limitation: a child that moves itself into a new process group or
//! session is out of reach of the group signal and survives the escalation.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{Pid, Uid, User};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use crate::config::ExecConfig;
use crate::error::ExecError;

/// Resolved uid/gid pair for the privilege drop.
#[derive(Debug, Clone, Copy)]
struct DropIds {
    uid: u32,
    gid: u32,
}

/// Spawns and supervises one shell command at a time.
#[derive(Debug, Clone)]
pub struct Supervisor {
    shell: PathBuf,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    output_cap: usize,
    path_env: String,
    drop_ids: Option<DropIds>,
}

impl Supervisor {
    /// Build a supervisor from configuration, resolving and validating the
    /// execution user up front.
    ///
    /// Refuses a configured user that resolves to uid/gid 0, and refuses to
    /// run without a configured user while the process itself is root.
    pub fn new(config: &ExecConfig) -> Result<Self, ExecError> {
        let drop_ids = match &config.user {
            Some(name) => {
                let user = User::from_name(name)
                    .map_err(ExecError::UserLookup)?
                    .ok_or_else(|| ExecError::UnknownUser(name.clone()))?;
                let ids = DropIds {
                    uid: user.uid.as_raw(),
                    gid: user.gid.as_raw(),
                };
                if ids.uid == 0 || ids.gid == 0 {
                    return Err(ExecError::RootUser(name.clone()));
                }
                Some(ids)
            }
            None => {
                if Uid::effective().is_root() {
                    return Err(ExecError::RunningAsRoot);
                }
                None
            }
        };

        Ok(Supervisor {
            shell: config.shell.clone(),
            working_dir: config.working_dir.clone(),
            timeout: config.timeout(),
            output_cap: config.output_cap,
            path_env: config.path_env.clone(),
            drop_ids,
        })
    }

    /// Run one shell command and return its captured output lines.
    ///
    /// Output is stdout followed by stderr, decoded lossily and truncated to
    /// the byte cap. A timed-out command is not an error; whatever output
    /// was captured before the escalation is returned.
    pub async fn run(&self, command: &str) -> Result<Vec<String>, ExecError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .env("PATH", &self.path_env)
            .process_group(0);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        if let Some(ids) = self.drop_ids {
            cmd.uid(ids.uid).gid(ids.gid);
        }

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            shell: self.shell.display().to_string(),
            source,
        })?;
        let pid = child.id().map(|p| Pid::from_raw(p as i32));
        debug!(?pid, command, "spawned");

        let out_buf = Arc::new(Mutex::new(Vec::new()));
        let err_buf = Arc::new(Mutex::new(Vec::new()));
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let mut out_task = {
            let buf = Arc::clone(&out_buf);
            let cap = self.output_cap;
            tokio::spawn(async move {
                if let Some(stream) = stdout {
                    read_capped(stream, cap, &buf).await;
                }
            })
        };
        let mut err_task = {
            let buf = Arc::clone(&err_buf);
            let cap = self.output_cap;
            tokio::spawn(async move {
                if let Some(stream) = stderr {
                    read_capped(stream, cap, &buf).await;
                }
            })
        };

        // Read phase: until both streams end (EOF or cap) or the deadline.
        let deadline = Instant::now() + self.timeout;
        let _ = timeout_at(deadline, join(&mut out_task, &mut err_task)).await;

        // The group is signaled even when the process exited on its own:
        // children it left behind still share the group.
        let escalation = match pid {
            Some(pid) => self.terminate_group(pid, &mut child).await,
            None => {
                let _ = child.wait().await;
                Ok(())
            }
        };

        out_task.abort();
        err_task.abort();
        escalation?;

        let mut combined = std::mem::take(&mut *out_buf.lock());
        combined.extend_from_slice(&err_buf.lock());
        combined.truncate(self.output_cap);

        let text = String::from_utf8_lossy(&combined);
        Ok(text.lines().map(str::to_owned).collect())
    }

    /// TERM the group, wait up to half the timeout, KILL the group, wait
    /// unbounded for the zombie to be reaped.
    async fn terminate_group(
        &self,
        pid: Pid,
        child: &mut tokio::process::Child,
    ) -> Result<(), ExecError> {
        match killpg(pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                // Whole group already gone; just reap.
                let _ = child.wait().await;
                return Ok(());
            }
            Err(errno) => warn!(%pid, %errno, "SIGTERM to process group failed"),
        }

        if timeout(self.timeout / 2, child.wait()).await.is_ok() {
            return Ok(());
        }

        debug!(%pid, "process ignored SIGTERM, sending SIGKILL");
        match killpg(pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {
                let _ = child.wait().await;
                Ok(())
            }
            Err(errno) => Err(ExecError::Unkillable {
                pid: pid.as_raw(),
                source: errno,
            }),
        }
    }
}

/// Read a stream into a shared buffer, stopping at EOF or the byte cap.
async fn read_capped<R: AsyncRead + Unpin>(mut stream: R, cap: usize, buf: &Mutex<Vec<u8>>) {
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut guard = buf.lock();
                let room = cap.saturating_sub(guard.len());
                guard.extend_from_slice(&chunk[..n.min(room)]);
                if guard.len() >= cap {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecConfig;

    /// `None` when running as root: the supervisor refuses that by design,
    /// so these tests are skipped under a root test runner.
    fn supervisor_with(config: ExecConfig) -> Option<Supervisor> {
        if Uid::effective().is_root() {
            return None;
        }
        Some(Supervisor::new(&config).expect("supervisor config is valid"))
    }

    fn supervisor(timeout_secs: f64) -> Option<Supervisor> {
        supervisor_with(ExecConfig {
            timeout_secs,
            ..ExecConfig::default()
        })
    }

    #[tokio::test]
    async fn test_captures_stdout_lines() {
        let Some(supervisor) = supervisor(5.0) else { return };
        let lines = supervisor.run("echo one; echo two").await.unwrap();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_captures_stderr_after_stdout() {
        let Some(supervisor) = supervisor(5.0) else { return };
        let lines = supervisor.run("echo out; echo err 1>&2").await.unwrap();
        assert_eq!(lines, vec!["out", "err"]);
    }

    #[tokio::test]
    async fn test_no_output() {
        let Some(supervisor) = supervisor(5.0) else { return };
        let lines = supervisor.run("true").await.unwrap();
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn test_env_is_fixed() {
        let Some(supervisor) = supervisor(5.0) else { return };
        let lines = supervisor
            .run("echo \"$PATH\"; echo \"x${SOME_UNSET_MARKER}x\"")
            .await
            .unwrap();
        assert_eq!(lines, vec!["/usr/bin:/bin", "xx"]);
    }

    #[tokio::test]
    async fn test_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let Some(supervisor) = supervisor_with(ExecConfig {
            working_dir: Some(dir.path().to_path_buf()),
            ..ExecConfig::default()
        }) else {
            return;
        };
        let lines = supervisor.run("pwd").await.unwrap();
        assert_eq!(lines.len(), 1);
        // Canonicalize both sides; /tmp may be a symlink.
        assert_eq!(
            std::fs::canonicalize(&lines[0]).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_output_cap_enforced() {
        let Some(supervisor) = supervisor_with(ExecConfig {
            output_cap: 1000,
            timeout_secs: 1.0,
            ..ExecConfig::default()
        }) else {
            return;
        };
        let lines = supervisor
            .run("head -c 100000 /dev/zero | tr '\\0' 'a'")
            .await
            .unwrap();
        let total: usize = lines.iter().map(String::len).sum();
        assert!(total <= 1000, "captured {total} bytes");
    }

    #[tokio::test]
    async fn test_timeout_returns_partial_output() {
        let Some(supervisor) = supervisor(0.4) else { return };
        let start = std::time::Instant::now();
        let lines = supervisor.run("echo partial; sleep 30").await.unwrap();
        assert_eq!(lines, vec!["partial"]);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_term_ignoring_process_is_killed() {
        // The shell traps TERM and respawns sleeps, so only the KILL phase
        // can end it.
        let Some(supervisor) = supervisor(0.4) else { return };
        let start = std::time::Instant::now();
        let lines = supervisor
            .run("trap '' TERM; echo tough; while :; do sleep 1; done")
            .await
            .unwrap();
        assert_eq!(lines, vec!["tough"]);
        // timeout + timeout/2 plus slack, nowhere near unbounded.
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_child_processes_are_signaled() {
        // The background child shares the process group; the escalation must
        // end it along with the shell.
        let Some(supervisor) = supervisor(0.4) else { return };
        let start = std::time::Instant::now();
        let _ = supervisor.run("sleep 30 & wait").await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unknown_user_rejected() {
        let result = Supervisor::new(&ExecConfig {
            user: Some("no-such-user-shrike-test".into()),
            ..ExecConfig::default()
        });
        assert!(matches!(result, Err(ExecError::UnknownUser(_))));
    }

    #[tokio::test]
    async fn test_root_user_rejected() {
        let result = Supervisor::new(&ExecConfig {
            user: Some("root".into()),
            ..ExecConfig::default()
        });
        assert!(matches!(result, Err(ExecError::RootUser(_))));
    }
}
