//! Ownership of live preview-server processes.
//!
//! The [`Supervisor`] is the only holder of process handles. Each live
//! process has one registry entry keyed by deployment id, plus a watcher
//! task that owns the `Child`, drains its output, and reaps it. The
//! registry is never persisted: a pid recorded before a restart says
//! nothing reliable about what runs under it now, so Recovery relaunches
//! instead of re-attaching.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use preview_core::config::PreviewProgram;
use preview_core::error::{PreviewError, Result};
use preview_core::ports::PortAllocator;
use preview_core::{Deployment, DeploymentDb, DeploymentStatus};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Notify;

/// Stderr lines kept per process for the failure diagnostic.
const STDERR_TAIL_LINES: usize = 20;

struct Supervised {
    pid: Option<u32>,
    generation: u64,
    /// Asks the watcher to kill the child outright.
    kill: Arc<Notify>,
}

type Registry = Arc<Mutex<HashMap<String, Supervised>>>;

fn lock(registry: &Registry) -> std::sync::MutexGuard<'_, HashMap<String, Supervised>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Supervisor {
    store: Arc<DeploymentDb>,
    ports: Arc<PortAllocator>,
    program: PreviewProgram,
    registry: Registry,
    generation: AtomicU64,
}

impl Supervisor {
    pub fn new(store: Arc<DeploymentDb>, ports: Arc<PortAllocator>, program: PreviewProgram) -> Self {
        Self {
            store,
            ports,
            program,
            registry: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Launch the preview program for `id` on `port`, rooted at `working_dir`.
    ///
    /// On success the process is registered and the record is `running`
    /// before this returns; a watcher task reaps it later. On failure
    /// nothing is registered, the port is released and the record is
    /// `failed`. Must be called from within a tokio runtime.
    pub fn start(&self, id: &str, port: u16, working_dir: &Path) -> Result<()> {
        match self.launch(id, port, working_dir) {
            Ok(pid) => {
                tracing::info!(id, port, pid, "preview server running");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(id, port, "preview server failed to start: {e}");
                self.ports.release(port);
                if let Err(store_err) =
                    self.store
                        .update_status(id, DeploymentStatus::Failed, Some(&e.to_string()))
                {
                    tracing::warn!(id, "could not record start failure: {store_err}");
                }
                Err(e)
            }
        }
    }

    fn launch(&self, id: &str, port: u16, working_dir: &Path) -> Result<u32> {
        if self.is_supervised(id) {
            return Err(PreviewError::Process(format!(
                "a preview server is already supervised for {id}"
            )));
        }

        let program = which::which(&self.program.program).map_err(|_| {
            PreviewError::Process(format!(
                "preview program '{}' not found on PATH",
                self.program.program
            ))
        })?;

        let mut child = Command::new(&program)
            .args(self.program.argv(port))
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PreviewError::Process(format!("failed to spawn '{}': {e}", self.program.program))
            })?;

        let pid = child.id();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let kill = Arc::new(Notify::new());
        lock(&self.registry).insert(
            id.to_string(),
            Supervised {
                pid,
                generation,
                kill: Arc::clone(&kill),
            },
        );

        if let Err(e) = self.store.update_status(id, DeploymentStatus::Running, None) {
            lock(&self.registry).remove(id);
            let _ = child.start_kill();
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
            return Err(e);
        }

        let watcher = Watcher {
            id: id.to_string(),
            port,
            generation,
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            ports: Arc::clone(&self.ports),
        };
        tokio::spawn(watcher.run(child, kill));

        Ok(pid.unwrap_or_default())
    }

    /// Send the graceful termination signal to `id`'s process.
    ///
    /// The entry leaves the registry as soon as the signal is sent; the
    /// watcher reaps the process whenever it actually exits. Fails with
    /// `NotSupervised` when nothing is tracked for `id` (already stopped,
    /// already exited, or lost across a restart) and with `Supervision`
    /// when the signal could not be delivered.
    pub fn stop(&self, id: &str) -> Result<Deployment> {
        {
            let mut registry = lock(&self.registry);
            let entry = registry
                .get(id)
                .ok_or_else(|| PreviewError::NotSupervised(id.to_string()))?;
            match terminate(entry) {
                Ok(true) => {}
                // Reaped in the moment before its watcher took the lock.
                Ok(false) => return Err(PreviewError::NotSupervised(id.to_string())),
                Err(reason) => {
                    return Err(PreviewError::Supervision {
                        id: id.to_string(),
                        reason,
                    })
                }
            }
            registry.remove(id);
        }
        tracing::info!(id, "preview server stopped");
        self.store.update_status(id, DeploymentStatus::Stopped, None)
    }

    /// Signal every live process without touching the store.
    ///
    /// Used on server shutdown: records stay non-terminal so Recovery
    /// relaunches them on the next start.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<(String, Supervised)> = lock(&self.registry).drain().collect();
        for (id, entry) in &drained {
            if let Err(reason) = terminate(entry) {
                tracing::warn!(id = %id, "could not signal preview server: {reason}");
            }
        }
        drained.len()
    }

    pub fn is_supervised(&self, id: &str) -> bool {
        lock(&self.registry).contains_key(id)
    }

    pub fn live_count(&self) -> usize {
        lock(&self.registry).len()
    }
}

/// SIGTERM the entry's process. `Ok(false)` when it is already gone.
///
/// The watcher drops the entry as soon as it reaps the child, before it
/// drains the pipes, so a registered pid is stale for at most that instant.
#[cfg(unix)]
fn terminate(entry: &Supervised) -> std::result::Result<bool, String> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = entry.pid else {
        entry.kill.notify_one();
        return Ok(true);
    };
    let raw = i32::try_from(pid).map_err(|_| format!("pid {pid} out of range"))?;
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(not(unix))]
fn terminate(entry: &Supervised) -> std::result::Result<bool, String> {
    entry.kill.notify_one();
    Ok(true)
}

// ---------------------------------------------------------------------------
// Exit watcher
// ---------------------------------------------------------------------------

struct Watcher {
    id: String,
    port: u16,
    generation: u64,
    registry: Registry,
    store: Arc<DeploymentDb>,
    ports: Arc<PortAllocator>,
}

impl Watcher {
    async fn run(self, mut child: Child, kill: Arc<Notify>) {
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stdout = child
            .stdout
            .take()
            .map(|s| tokio::spawn(pump(self.id.clone(), s, None)));
        let stderr = child
            .stderr
            .take()
            .map(|s| tokio::spawn(pump(self.id.clone(), s, Some(Arc::clone(&tail)))));

        let status = loop {
            tokio::select! {
                res = child.wait() => break res,
                _ = kill.notified() => {
                    let _ = child.start_kill();
                }
            }
        };

        // The pid is free for reuse from here on.
        let ours = {
            let mut registry = lock(&self.registry);
            let matches = registry
                .get(&self.id)
                .is_some_and(|e| e.generation == self.generation);
            if matches {
                registry.remove(&self.id);
            }
            matches
        };

        // Grandchildren may keep the pipes open; do not wait on them for long.
        let _ = tokio::time::timeout(Duration::from_millis(250), async {
            if let Some(h) = stdout {
                let _ = h.await;
            }
            if let Some(h) = stderr {
                let _ = h.await;
            }
        })
        .await;
        self.ports.release(self.port);

        if !ours {
            tracing::info!(id = %self.id, "preview server exited");
            return;
        }

        let reason = describe_exit(&status, &tail.lock().unwrap_or_else(PoisonError::into_inner));
        tracing::warn!(id = %self.id, "{reason}");
        if let Err(e) = self
            .store
            .update_status(&self.id, DeploymentStatus::Failed, Some(&reason))
        {
            tracing::warn!(id = %self.id, "could not record unexpected exit: {e}");
        }
    }
}

async fn pump<R>(id: String, reader: R, tail: Option<Arc<Mutex<VecDeque<String>>>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(id = %id, "{line}");
        if let Some(tail) = &tail {
            let mut t = tail.lock().unwrap_or_else(PoisonError::into_inner);
            if t.len() == STDERR_TAIL_LINES {
                t.pop_front();
            }
            t.push_back(line);
        }
    }
}

fn describe_exit(status: &std::io::Result<ExitStatus>, tail: &VecDeque<String>) -> String {
    let head = match status {
        Ok(s) => match s.code() {
            Some(code) => format!("preview server exited unexpectedly with code {code}"),
            None => "preview server terminated by signal".to_string(),
        },
        Err(e) => format!("preview server wait failed: {e}"),
    };
    if tail.is_empty() {
        head
    } else {
        let joined: Vec<&str> = tail.iter().map(String::as_str).collect();
        format!("{head}\nstderr: {}", joined.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
