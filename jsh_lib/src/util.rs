use std::{
    fmt,
    process::ExitStatus,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::{
    io,
    process::Child,
    sync::{mpsc, oneshot},
};
use tracing::{error, info, warn};

static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(0);

/// Shell-side identity of a spawned process. Unlike the OS pid it is never
/// reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u64);

impl ProcessId {
    fn next() -> Self {
        ProcessId(NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sent on the shell's exit channel when a process ends on its own.
#[derive(Debug)]
pub struct ProcessExit {
    pub id: ProcessId,
    pub pid: u32,
    pub status: io::Result<ExitStatus>,
}

/// Owning handle to a running process. The process itself lives in a
/// watcher task; the handle can ask that task to kill it and wait for the
/// final status. Dropping the handle releases it without touching the process.
#[derive(Debug)]
pub struct ProcessHandle {
    id: ProcessId,
    pid: u32,
    kill_tx: Option<oneshot::Sender<()>>,
    done_rx: oneshot::Receiver<Option<ExitStatus>>,
}

impl ProcessHandle {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Kills the process and waits until it has actually exited.
    /// Returns the exit status if one could be collected.
    pub async fn terminate(mut self) -> Option<ExitStatus> {
        if let Some(kill_tx) = self.kill_tx.take() {
            if kill_tx.send(()).is_err() {
                info!("process {} already exited before kill", self.pid);
            }
        }
        match self.done_rx.await {
            Ok(status) => status,
            Err(_) => {
                warn!("watcher of process {} ended without a status", self.pid);
                None
            }
        }
    }

    /// Handle for a process that has already gone away.
    #[cfg(test)]
    pub(crate) fn detached(id: ProcessId, pid: u32) -> Self {
        let (kill_tx, _) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let _ = done_tx.send(None);
        Self {
            id,
            pid,
            kill_tx: Some(kill_tx),
            done_rx,
        }
    }
}

/// Hands `process` to a watcher task and returns the handle that owns it.
pub fn watch_process(
    process: Child,
    exit_channel: &mpsc::UnboundedSender<ProcessExit>,
) -> io::Result<ProcessHandle> {
    let pid = process.id().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::Other,
            "process was reaped before it could be watched",
        )
    })?;
    let id = ProcessId::next();
    let (kill_tx, kill_rx) = oneshot::channel::<()>();
    let (done_tx, done_rx) = oneshot::channel::<Option<ExitStatus>>();
    let _ = tokio::spawn(manage_process(
        id,
        pid,
        process,
        exit_channel.clone(),
        done_tx,
        kill_rx,
    ));
    Ok(ProcessHandle {
        id,
        pid,
        kill_tx: Some(kill_tx),
        done_rx,
    })
}

async fn manage_process(
    id: ProcessId,
    pid: u32,
    mut process: Child,
    exit_channel: mpsc::UnboundedSender<ProcessExit>,
    done_channel: oneshot::Sender<Option<ExitStatus>>,
    mut kill_signal: oneshot::Receiver<()>,
) {
    // wait for either the process to finish or a kill request; a dropped
    // kill sender disables that branch and leaves the process alone
    tokio::select! {
        status = process.wait() => {
            let done = status.as_ref().ok().copied();
            if exit_channel.send(ProcessExit { id, pid, status }).is_err() {
                info!("exit channel closed, dropping exit of process {}", pid);
            }
            let _ = done_channel.send(done);
            return;
        }
        Ok(()) = &mut kill_signal => {}
    }

    let status = match process.kill().await {
        Ok(()) => process.wait().await,
        Err(kill_error) => {
            error!("unexpected error when killing process {}: {}", pid, kill_error);
            process.wait().await
        }
    };
    match &status {
        Ok(status) => info!("process {} killed, status {}", pid, status),
        Err(wait_error) => error!("could not wait for process {}: {}", pid, wait_error),
    }
    if done_channel.send(status.ok()).is_err() {
        info!("nobody waiting on kill of process {}", pid);
    }
}
