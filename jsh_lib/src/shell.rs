//! The job-control loop.

use std::fs::File;

use tokio::{io::AsyncBufRead, sync::mpsc};
use tracing::{info, instrument, warn};

use crate::{
    builtins::{Builtin, BuiltinOutcome},
    config::ShellConfig,
    console::Console,
    error::{ParseError, ShellError, SpawnError},
    parser::Parser,
    reader::{spawn_reader, Handoff, ReaderHandle},
    registry::{JobId, JobStatus, Registry},
    spawner::Spawner,
    terminal::Terminal,
    util::ProcessExit,
};

/// What a single command line turned into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Job(JobId),
    /// Only builtin effects, nothing was spawned.
    Builtin,
    Exit,
}

pub struct Shell {
    config: ShellConfig,
    registry: Registry,
    spawner: Spawner,
    console: Console,
    // job that owns the input device; no lines are taken while it is set
    foreground: Option<JobId>,
    exits: mpsc::UnboundedReceiver<ProcessExit>,
    // set when stdin is a terminal that foreground jobs must own
    terminal: Option<Terminal>,
}

impl Shell {
    /// Shell on the process's own stdout and stderr. When stdin is a
    /// terminal, foreground jobs are given control of it.
    pub fn new(config: ShellConfig) -> Self {
        let console = Console::stdio(&config.prompt);
        let mut shell = Self::with_console(config, console, None);
        shell.terminal = Terminal::from_stdin();
        shell
    }

    /// Shell writing to `console`. Spawned stages without a pipe or `>` file
    /// write to `child_output` when given, otherwise they inherit stdout.
    pub fn with_console(config: ShellConfig, console: Console, child_output: Option<File>) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let parser = Parser::new(config.max_cmdline, config.max_stages);
        Self {
            registry: Registry::new(config.max_jobs),
            spawner: Spawner::new(parser, exit_tx, child_output),
            console,
            foreground: None,
            exits: exit_rx,
            terminal: None,
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn foreground(&self) -> Option<JobId> {
        self.foreground
    }

    /// Parses `line` and either runs it as a builtin or spawns it as a job.
    #[instrument(skip(self))]
    pub async fn execute(&mut self, line: &str) -> Result<Outcome, ShellError> {
        let job = self
            .spawner
            .parser()
            .parse(line)
            .map_err(SpawnError::from)?;
        if let Some(builtin) = Builtin::from_job(&job) {
            let outcome = builtin
                .run(&job.stages[0], &mut self.registry, &mut self.console)
                .await?;
            return Ok(match outcome {
                BuiltinOutcome::Done => Outcome::Builtin,
                BuiltinOutcome::Exit => Outcome::Exit,
            });
        }
        let foreground = job.foreground;
        let id = self.spawner.spawn_parsed(&mut self.registry, job).await?;
        if foreground {
            self.foreground = Some(id);
            self.give_terminal(id);
        }
        Ok(Outcome::Job(id))
    }

    /// Reads lines from `input` and runs them until `exit`, end of input or
    /// a fatal error. Every job is terminated before this returns.
    pub async fn run<R>(&mut self, input: R) -> Result<(), ShellError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (reader, mut handoff) = spawn_reader(input);
        let result = self.control_loop(&mut handoff).await;
        let shutdown = self.shutdown(reader).await;
        result.and(shutdown)
    }

    async fn control_loop(&mut self, handoff: &mut Handoff) -> Result<(), ShellError> {
        self.console.prompt()?;
        loop {
            tokio::select! {
                Some(exit) = self.exits.recv() => self.on_exit(exit, handoff)?,
                line = handoff.recv(), if self.foreground.is_none() => match line {
                    Some(line) => {
                        if !self.on_line(&line, handoff).await? {
                            return Ok(());
                        }
                    }
                    None => {
                        info!("input closed");
                        return Ok(());
                    }
                },
                else => {
                    warn!("no more events to wait for");
                    return Ok(());
                }
            }
        }
    }

    /// Handles one consumed line. Returns false when the shell should stop.
    async fn on_line(&mut self, line: &str, handoff: &Handoff) -> Result<bool, ShellError> {
        match self.execute(line).await {
            Ok(Outcome::Exit) => return Ok(false),
            // the reader stays blocked until this job is done
            Ok(Outcome::Job(id)) if self.foreground == Some(id) => return Ok(true),
            Ok(_) => {}
            Err(ShellError::Spawn(SpawnError::Parse(ParseError::EmptyCommandLine))) => {}
            Err(ShellError::Spawn(error @ SpawnError::SyscallFailure { .. }))
                if !self.config.keep_going =>
            {
                return Err(error.into())
            }
            Err(ShellError::Spawn(error)) => self.console.error(&format!("jsh: {}", error))?,
            Err(fatal) => return Err(fatal),
        }
        handoff.consumed()?;
        self.console.prompt()?;
        Ok(true)
    }

    fn on_exit(&mut self, exit: ProcessExit, handoff: &Handoff) -> Result<(), ShellError> {
        match &exit.status {
            Ok(status) => info!("process {} exited: {}", exit.pid, status),
            Err(e) => warn!("process {} exited, status unknown: {}", exit.pid, e),
        }
        let id = match self.registry.reap(exit.id) {
            Ok(id) => id,
            Err(e) => {
                warn!("{}", e);
                return Ok(());
            }
        };
        if self.foreground == Some(id) && self.registry.status(id) == JobStatus::Terminated {
            info!("foreground job {} done", id);
            self.foreground = None;
            self.take_terminal();
            handoff.consumed()?;
            self.console.prompt()?;
        }
        Ok(())
    }

    async fn shutdown(&mut self, reader: ReaderHandle) -> Result<(), ShellError> {
        info!("shutting down");
        self.registry.terminate_all().await;
        if self.foreground.take().is_some() {
            self.take_terminal();
        }
        reader.shutdown().await
    }

    fn give_terminal(&self, id: JobId) {
        let terminal = match &self.terminal {
            Some(terminal) => terminal,
            None => return,
        };
        let group = match self.registry.job(id).and_then(|job| job.process_group()) {
            Some(group) => group,
            None => return,
        };
        // fails when the whole group already exited; its exit takes it back
        if let Err(e) = terminal.give_to(group) {
            warn!("could not hand the terminal to job {}: {}", id, e);
        }
    }

    fn take_terminal(&self) {
        if let Some(terminal) = &self.terminal {
            if let Err(e) = terminal.take_back() {
                warn!("could not take the terminal back: {}", e);
            }
        }
    }
}
