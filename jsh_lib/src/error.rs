use std::io;

use jsh_data::JobId;
use thiserror::Error;

use crate::util::ProcessId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command line")]
    EmptyCommandLine,
    #[error("empty pipe stage")]
    EmptyPipeStage,
    #[error("command line too long ({len} characters, at most {max})")]
    CommandLineTooLong { len: usize, max: usize },
    #[error("too many pipe stages ({count}, at most {max})")]
    TooManyStages { count: usize, max: usize },
}

#[derive(Debug, Error)]
pub enum WaitSetError {
    #[error("could not grow the wait set: {0}")]
    Grow(#[from] std::collections::TryReserveError),
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("no free job slot")]
    NoFreeJobSlot,
    #[error("stage {stage} ({application}): {source}")]
    SyscallFailure {
        stage: usize,
        application: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    WaitSet(#[from] WaitSetError),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReapError {
    #[error("process {0} is not in the wait set")]
    NotWaited(ProcessId),
    #[error("process {0} is not owned by any running job")]
    NoOwningJob(ProcessId),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KillError {
    #[error("job id {0} out of range")]
    OutOfRange(JobId),
    #[error("no such job: {0}")]
    NoSuchJob(JobId),
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("command line hand-off channel closed unexpectedly")]
    Handoff,
    #[error("command line reader task failed: {0}")]
    Reader(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
