//! Input-reader task and the one-line hand-off to the job-control loop.
//!
//! The reader publishes a line on a channel of capacity one and then waits
//! for an explicit "consumed" message before it reads the next one, so at
//! most one unprocessed line exists at any time.

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
};
use tracing::{error, info};

use crate::error::ShellError;

/// The loop's end of the hand-off.
#[derive(Debug)]
pub struct Handoff {
    lines: mpsc::Receiver<String>,
    consumed: mpsc::Sender<()>,
}

impl Handoff {
    /// Next line, or `None` once the reader has stopped.
    pub async fn recv(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Lets the reader go on to the next line.
    pub fn consumed(&self) -> Result<(), ShellError> {
        match self.consumed.try_send(()) {
            Ok(()) => Ok(()),
            // an acknowledgement is already pending: the protocol is broken
            Err(TrySendError::Full(())) => Err(ShellError::Handoff),
            Err(TrySendError::Closed(())) => {
                info!("reader already stopped");
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
pub struct ReaderHandle {
    shutdown: watch::Sender<bool>,
    consumed: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ReaderHandle {
    /// Stops the reader and waits until its task has finished.
    pub async fn shutdown(self) -> Result<(), ShellError> {
        if self.shutdown.send(true).is_err() {
            info!("reader already stopped before shutdown");
        }
        // unblocks a reader waiting for an acknowledgement
        let _ = self.consumed.try_send(());
        self.task.await?;
        Ok(())
    }
}

/// Starts the reader task on `input`.
pub fn spawn_reader<R>(input: R) -> (ReaderHandle, Handoff)
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (lines_tx, lines_rx) = mpsc::channel(1);
    let (consumed_tx, consumed_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(read_lines(input, lines_tx, consumed_rx, shutdown_rx));
    (
        ReaderHandle {
            shutdown: shutdown_tx,
            consumed: consumed_tx.clone(),
            task,
        },
        Handoff {
            lines: lines_rx,
            consumed: consumed_tx,
        },
    )
}

async fn read_lines<R>(
    input: R,
    lines: mpsc::Sender<String>,
    mut consumed: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut input = input.lines();
    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            line = input.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("end of input");
                break;
            }
            Err(e) => {
                error!("could not read command line: {}", e);
                break;
            }
        };
        if lines.send(line).await.is_err() {
            info!("job-control loop is gone, reader stopping");
            break;
        }
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            ack = consumed.recv() => {
                if ack.is_none() {
                    break;
                }
            }
        }
    }
    info!("reader stopped");
}
