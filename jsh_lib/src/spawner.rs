//! Turns a parsed command line into running, registered processes.

use std::{
    fs::{File, OpenOptions},
    io::{self, PipeReader},
    path::Path,
    process::Stdio,
};

use tokio::{process::Command, sync::mpsc};
use tracing::{error, info, instrument};

use crate::{
    error::SpawnError,
    parser::{ParsedJob, Parser, ProcessDescriptor},
    registry::{JobId, Registry},
    util::{watch_process, ProcessExit, ProcessHandle, ProcessId},
};

pub struct Spawner {
    parser: Parser,
    exits: mpsc::UnboundedSender<ProcessExit>,
    // where stages without a pipe or file write to; None inherits ours
    output: Option<File>,
}

impl Spawner {
    pub fn new(
        parser: Parser,
        exits: mpsc::UnboundedSender<ProcessExit>,
        output: Option<File>,
    ) -> Self {
        Self {
            parser,
            exits,
            output,
        }
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    /// Reserves a job slot, parses `line` and spawns its pipeline.
    #[instrument(skip(self, registry))]
    pub async fn spawn_job(&self, registry: &mut Registry, line: &str) -> Result<JobId, SpawnError> {
        if registry.allocate_job().is_none() {
            return Err(SpawnError::NoFreeJobSlot);
        }
        let job = self.parser.parse(line)?;
        self.spawn_parsed(registry, job).await
    }

    /// Spawns every stage of `job` and registers the result as one job.
    /// On failure nothing stays registered and every spawned process is
    /// killed.
    #[instrument(skip(self, registry, job), fields(command_line = %job.command_line))]
    pub async fn spawn_parsed(
        &self,
        registry: &mut Registry,
        job: ParsedJob,
    ) -> Result<JobId, SpawnError> {
        let id = registry.allocate_job().ok_or(SpawnError::NoFreeJobSlot)?;
        let processes = self.spawn_stages(&job.stages).await?;
        let pids: Vec<u32> = processes.iter().map(ProcessHandle::pid).collect();
        let ids: Vec<ProcessId> = processes.iter().map(ProcessHandle::id).collect();
        if let Err(wait_set_error) = registry.append_waitable(&ids) {
            error!("could not register job processes: {}", wait_set_error);
            recover(processes).await;
            return Err(wait_set_error.into());
        }
        info!(
            "job {} spawned with pids {:?}, foreground: {}",
            id, pids, job.foreground
        );
        registry.install(id, job.foreground, job.command_line, processes);
        Ok(id)
    }

    async fn spawn_stages(
        &self,
        stages: &[ProcessDescriptor],
    ) -> Result<Vec<ProcessHandle>, SpawnError> {
        let mut processes = Vec::with_capacity(stages.len());
        let mut previous_read = None;
        for (i, stage) in stages.iter().enumerate() {
            match self.spawn_stage(i, stage, &mut previous_read) {
                Ok(process) => processes.push(process),
                Err(source) => {
                    error!("stage {} ({}) failed: {}", i, stage.application, source);
                    recover(processes).await;
                    return Err(SpawnError::SyscallFailure {
                        stage: i,
                        application: stage.application.clone(),
                        source,
                    });
                }
            }
        }
        Ok(processes)
    }

    /// Spawns one stage. `previous_read` holds the read end of the pipe from
    /// the previous stage and is replaced by this stage's read end.
    fn spawn_stage(
        &self,
        i: usize,
        stage: &ProcessDescriptor,
        previous_read: &mut Option<PipeReader>,
    ) -> io::Result<ProcessHandle> {
        // both pipe ends are created close-on-exec; moving one into a child's
        // Stdio is what makes it that child's stdin/stdout
        let (stdout, next_read) = if stage.piped_output {
            let (reader, writer) = io::pipe()?;
            (Stdio::from(writer), Some(reader))
        } else if let Some(path) = &stage.output_file {
            (Stdio::from(open_out_file(path)?), None)
        } else {
            (self.inherited_output()?, None)
        };

        let stdin = if stage.piped_input {
            match previous_read.take() {
                Some(reader) => Stdio::from(reader),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "no pipe from the previous stage",
                    ))
                }
            }
        } else if let Some(path) = &stage.input_file {
            Stdio::from(open_in_file(path)?)
        } else {
            Stdio::inherit()
        };

        let argv = stage.argv();
        let mut command = Command::new(&stage.application);
        command.args(&argv[1..]).stdin(stdin).stdout(stdout);
        #[cfg(unix)]
        {
            // the first stage leads a new process group
            if i == 0 {
                command.process_group(0);
            }
        }
        let process = command.spawn();
        // closes our copies of this stage's pipe ends and files right away,
        // otherwise readers further down never see end-of-file
        drop(command);
        *previous_read = next_read;

        let process = process?;
        info!("stage {} spawned: {:?}", i, argv);
        watch_process(process, &self.exits)
    }

    fn inherited_output(&self) -> io::Result<Stdio> {
        match &self.output {
            Some(file) => Ok(Stdio::from(file.try_clone()?)),
            None => Ok(Stdio::inherit()),
        }
    }
}

fn open_out_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))
}

fn open_in_file(path: &Path) -> io::Result<File> {
    File::open(path).map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))
}

/// Kills everything spawned so far for a job that could not be completed.
async fn recover(processes: Vec<ProcessHandle>) {
    for process in processes {
        let pid = process.pid();
        match process.terminate().await {
            Some(status) => info!("rolled back process {}: {}", pid, status),
            None => error!("could not collect status of rolled back process {}", pid),
        }
    }
}
