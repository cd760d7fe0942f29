//! Kernel process lifecycle and message bridging.
//!
//! `KernelManager` spawns the `rill-kernel` binary and bridges it behind two
//! channels: an unbounded request sender draining into the child's stdin and
//! an event receiver fed from its stdout. All IPC is asynchronous and
//! non-blocking from the host's perspective; process death surfaces as a
//! `KernelEvent::Died` on the event channel.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

use super::protocol::{
    KernelNotification, KernelRequest, read_frame_async, write_frame_async,
};

/// Environment variable overriding the kernel binary location.
pub const KERNEL_BINARY_ENV: &str = "RILL_KERNEL_PATH";

/// How long to wait for the spawn handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a graceful shutdown may take before the process is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Event observed on the kernel's outbound channel.
#[derive(Debug)]
pub enum KernelEvent {
    /// A notification frame from the kernel.
    Notification(KernelNotification),
    /// The process exited or its channel closed; all session state is gone.
    Died { reason: String },
}

/// Handle to a running kernel process.
pub struct KernelManager {
    child: Child,
    requests: mpsc::UnboundedSender<KernelRequest>,
    events: Option<mpsc::UnboundedReceiver<KernelEvent>>,
    writer_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
}

impl KernelManager {
    /// Spawn a kernel process and verify it is alive with a ping.
    ///
    /// Looks for the `rill-kernel` binary in the following order:
    /// 1. `RILL_KERNEL_PATH` environment variable
    /// 2. Same directory as the current executable
    /// 3. System PATH
    /// 4. `target/{debug,release}` during development
    pub async fn spawn() -> Result<Self> {
        let kernel_path = Self::find_kernel_binary()?;

        let mut child = Command::new(&kernel_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // kernel logs pass through for debugging
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Ipc(format!(
                    "failed to spawn kernel process '{}': {e}",
                    kernel_path.display()
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Ipc("failed to get kernel stdin".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Ipc("failed to get kernel stdout".to_string()))?;

        let (requests, mut request_rx) = mpsc::unbounded_channel::<KernelRequest>();
        let (event_tx, mut events) = mpsc::unbounded_channel::<KernelEvent>();

        let writer_task = tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                if let Err(e) = write_frame_async(&mut stdin, &request).await {
                    tracing::warn!("kernel request write failed: {e}");
                    break;
                }
            }
        });

        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame_async::<_, KernelNotification>(&mut stdout).await {
                    Ok(Some(notification)) => {
                        if event_tx
                            .send(KernelEvent::Notification(notification))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = event_tx.send(KernelEvent::Died {
                            reason: "kernel process closed its output stream".to_string(),
                        });
                        break;
                    }
                    Err(e) => {
                        let _ = event_tx.send(KernelEvent::Died {
                            reason: e.to_string(),
                        });
                        break;
                    }
                }
            }
        });

        let mut manager = Self {
            child,
            requests,
            events: None,
            writer_task,
            reader_task,
        };

        // Verify the kernel is alive before handing it out.
        manager.send(KernelRequest::Ping)?;
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, events.recv()).await {
            Ok(Some(KernelEvent::Notification(KernelNotification::Pong))) => {}
            Ok(Some(KernelEvent::Died { reason })) => return Err(Error::KernelDied(reason)),
            Ok(other) => {
                return Err(Error::Ipc(format!(
                    "unexpected handshake response from kernel: {other:?}"
                )));
            }
            Err(_) => return Err(Error::Ipc("kernel handshake timed out".to_string())),
        }

        manager.events = Some(events);
        Ok(manager)
    }

    fn find_kernel_binary() -> Result<PathBuf> {
        let kernel_name = if cfg!(windows) {
            "rill-kernel.exe"
        } else {
            "rill-kernel"
        };

        if let Ok(path) = std::env::var(KERNEL_BINARY_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
        }

        if let Ok(exe_path) = std::env::current_exe()
            && let Some(exe_dir) = exe_path.parent()
        {
            let kernel_path = exe_dir.join(kernel_name);
            if kernel_path.exists() {
                return Ok(kernel_path);
            }
        }

        if let Ok(path) = which::which(kernel_name) {
            return Ok(path);
        }

        // For development: try target/debug or target/release.
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            for profile in &["debug", "release"] {
                let path = PathBuf::from(&manifest_dir)
                    .join("..")
                    .join("..")
                    .join("target")
                    .join(profile)
                    .join(kernel_name);
                if path.exists() {
                    return Ok(path.canonicalize().unwrap_or(path));
                }
            }
        }

        Err(Error::Ipc(format!(
            "could not find {kernel_name} binary; set {KERNEL_BINARY_ENV} or ensure it is in PATH"
        )))
    }

    /// Send a request to the kernel.
    pub fn send(&self, request: KernelRequest) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| Error::KernelDied("kernel request channel closed".to_string()))
    }

    /// A clonable handle for enqueuing requests.
    pub fn sender(&self) -> mpsc::UnboundedSender<KernelRequest> {
        self.requests.clone()
    }

    /// Take the outbound event channel. Yields `None` after the first call;
    /// exactly one reader may own the stream.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<KernelEvent>> {
        self.events.take()
    }

    /// Process id of the kernel, if still running.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Tear down and respawn the kernel process. All prior session state is
    /// forfeit; the caller must re-register cells.
    pub async fn restart(&mut self) -> Result<()> {
        let fresh = Self::spawn().await?;
        let old = std::mem::replace(self, fresh);
        old.kill().await;
        Ok(())
    }

    /// Ask the kernel to exit cleanly, killing it after a grace period.
    pub async fn shutdown(mut self) {
        let _ = self.send(KernelRequest::Shutdown);
        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!("kernel exited with status {status}");
            }
            Ok(Err(e)) => {
                tracing::warn!("failed to wait for kernel: {e}");
            }
            Err(_) => {
                tracing::warn!("kernel did not exit in time, killing");
                let _ = self.child.kill().await;
            }
        }
        self.writer_task.abort();
        self.reader_task.abort();
    }

    async fn kill(mut self) {
        let _ = self.child.kill().await;
        self.writer_task.abort();
        self.reader_task.abort();
    }
}

impl Drop for KernelManager {
    fn drop(&mut self) {
        // kill_on_drop reaps the child; stop the bridge tasks here.
        self.writer_task.abort();
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests require the rill-kernel binary to be built.
    // Run `cargo build -p rill-kernel` first.

    #[tokio::test]
    #[ignore = "Requires rill-kernel binary"]
    async fn test_spawn_and_ping() {
        let manager = KernelManager::spawn().await.unwrap();
        assert!(manager.pid().is_some());
        manager.shutdown().await;
    }

    #[tokio::test]
    #[ignore = "Requires rill-kernel binary"]
    async fn test_death_is_reported() {
        let mut manager = KernelManager::spawn().await.unwrap();
        let mut events = manager.take_events().unwrap();
        manager.child.kill().await.unwrap();
        loop {
            match events.recv().await {
                Some(KernelEvent::Died { .. }) => break,
                Some(KernelEvent::Notification(_)) => continue,
                None => panic!("event channel closed without a death event"),
            }
        }
    }
}
