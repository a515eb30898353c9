//! Process-local helper-script supervisor backing the `startup_script`
//! tool.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::RwLock as StdRwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use mcpproxy_protocol::ProxyError;
use serde::Serialize;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptStatus {
    pub configured: Option<String>,
    pub running: bool,
    pub pid: Option<u32>,
    pub last_exit_code: Option<i32>,
    pub restarts: u64,
}

pub struct ScriptSupervisor {
    path: StdRwLock<Option<PathBuf>>,
    child: Mutex<Option<Child>>,
    last_exit_code: StdRwLock<Option<i32>>,
    restarts: AtomicU64,
}

impl ScriptSupervisor {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: StdRwLock::new(path),
            child: Mutex::new(None),
            last_exit_code: StdRwLock::new(None),
            restarts: AtomicU64::new(0),
        }
    }

    fn configured_path(&self) -> Option<PathBuf> {
        self.path
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub async fn status(&self) -> ScriptStatus {
        let mut guard = self.child.lock().await;
        let mut running = false;
        let mut pid = None;
        if let Some(child) = guard.as_mut() {
            match child.try_wait() {
                Ok(None) => {
                    running = true;
                    pid = child.id();
                }
                Ok(Some(status)) => {
                    self.record_exit(status.code());
                    *guard = None;
                }
                Err(_) => {
                    *guard = None;
                }
            }
        }
        ScriptStatus {
            configured: self
                .configured_path()
                .map(|path| path.display().to_string()),
            running,
            pid,
            last_exit_code: *self
                .last_exit_code
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }

    pub async fn start(&self) -> Result<ScriptStatus, ProxyError> {
        let Some(path) = self.configured_path() else {
            return Err(ProxyError::internal(
                "no startup script configured; use operation `update` first",
            ));
        };
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut()
            && matches!(child.try_wait(), Ok(None))
        {
            return Err(ProxyError::internal("startup script is already running"));
        }

        let mut command = Command::new(&path);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            command.process_group(0);
        }
        let child = command.spawn().map_err(|err| {
            ProxyError::transport(format!(
                "failed to start script `{}`: {err}",
                path.display()
            ))
        })?;
        info!("startup script `{}` started (pid {:?})", path.display(), child.id());
        *guard = Some(child);
        drop(guard);
        Ok(self.status().await)
    }

    pub async fn stop(&self) -> Result<ScriptStatus, ProxyError> {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                unsafe {
                    libc_killpg(pid);
                }
            }
            let _ = child.kill().await;
            if let Ok(Some(status)) = child.try_wait() {
                self.record_exit(status.code());
            }
        }
        drop(guard);
        Ok(self.status().await)
    }

    pub async fn restart(&self) -> Result<ScriptStatus, ProxyError> {
        self.stop().await?;
        self.restarts.fetch_add(1, Ordering::Relaxed);
        self.start().await
    }

    pub async fn update(&self, path: PathBuf) -> Result<ScriptStatus, ProxyError> {
        {
            let mut guard = self
                .path
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard = Some(path);
        }
        Ok(self.status().await)
    }

    fn record_exit(&self, code: Option<i32>) {
        let mut guard = self
            .last_exit_code
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = code;
    }
}

#[cfg(unix)]
unsafe fn libc_killpg(pid: u32) {
    // SIGTERM to the script's process group; `kill` below escalates.
    unsafe {
        libc::killpg(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn start_without_configuration_is_rejected() {
        let supervisor = ScriptSupervisor::new(None);
        let err = supervisor.start().await.expect_err("must reject");
        assert_eq!(err.kind(), mcpproxy_protocol::ErrorKind::Internal);
    }

    #[tokio::test]
    async fn status_reports_configuration() {
        let supervisor = ScriptSupervisor::new(Some(PathBuf::from("/opt/boot.sh")));
        let status = supervisor.status().await;
        assert_eq!(status.configured.as_deref(), Some("/opt/boot.sh"));
        assert!(!status.running);
        assert_eq!(status.restarts, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_stop_cycle_tracks_the_child() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let script_path = dir.path().join("boot.sh");
        std::fs::write(&script_path, "#!/bin/sh\nsleep 30\n").expect("write script");
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");

        let supervisor = ScriptSupervisor::new(None);
        supervisor
            .update(script_path)
            .await
            .expect("update");
        let started = supervisor.start().await.expect("start");
        assert!(started.running);
        assert!(started.pid.is_some());

        let stopped = supervisor.stop().await.expect("stop");
        assert!(!stopped.running);
    }
}
