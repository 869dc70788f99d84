//! Commands the shell runs itself instead of spawning.

use std::{
    env,
    fs::{File, OpenOptions},
    io::{self, Write},
};

use tracing::{info, instrument};

use crate::{
    console::Console,
    parser::{ParsedJob, ProcessDescriptor},
    registry::{JobId, JobSummary, Registry},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Builtin {
    Jobs { json: bool },
    Kill(Option<String>),
    Exit,
    Cd(Option<String>),
    Pwd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuiltinOutcome {
    Done,
    Exit,
}

impl Builtin {
    /// Recognizes a builtin. Only single-stage lines qualify, so
    /// `jobs | cat` still spawns.
    pub fn from_job(job: &ParsedJob) -> Option<Self> {
        if job.stages.len() != 1 {
            return None;
        }
        let mut argv = job.stages[0].argv().into_iter();
        let name = argv.next()?;
        let first = argv.next();
        match name.as_str() {
            "jobs" => Some(Builtin::Jobs {
                json: first.as_deref() == Some("-j"),
            }),
            "kill" => Some(Builtin::Kill(first)),
            "exit" => Some(Builtin::Exit),
            "cd" => Some(Builtin::Cd(first)),
            "pwd" => Some(Builtin::Pwd),
            _ => None,
        }
    }

    /// Runs the builtin. User mistakes are reported on the console; only a
    /// failure to write to the console itself is returned.
    #[instrument(skip(stage, registry, console))]
    pub async fn run(
        &self,
        stage: &ProcessDescriptor,
        registry: &mut Registry,
        console: &mut Console,
    ) -> io::Result<BuiltinOutcome> {
        match self {
            Builtin::Jobs { json } => {
                let jobs = registry.list_jobs();
                with_output(stage, console, "jobs", |out| write_jobs(out, &jobs, *json))?;
            }
            Builtin::Kill(id) => kill(id.as_deref(), stage, registry, console).await?,
            Builtin::Exit => return Ok(BuiltinOutcome::Exit),
            Builtin::Cd(dir) => cd(dir.as_deref(), console)?,
            Builtin::Pwd => match env::current_dir() {
                Ok(dir) => with_output(stage, console, "pwd", |out| {
                    writeln!(out, "{}", dir.display())
                })?,
                Err(e) => console.error(&format!("pwd: {}", e))?,
            },
        }
        Ok(BuiltinOutcome::Done)
    }
}

fn write_jobs(out: &mut dyn Write, jobs: &[JobSummary], json: bool) -> io::Result<()> {
    for job in jobs {
        if json {
            let line = serde_json::to_string(job)?;
            writeln!(out, "{}", line)?;
        } else {
            writeln!(out, "{}", job)?;
        }
    }
    out.flush()
}

async fn kill(
    arg: Option<&str>,
    stage: &ProcessDescriptor,
    registry: &mut Registry,
    console: &mut Console,
) -> io::Result<()> {
    let arg = match arg {
        Some(arg) => arg,
        None => return console.error("kill: job id not provided"),
    };
    let id = match arg.parse::<usize>() {
        Ok(id) => JobId(id),
        Err(_) => return console.error(&format!("kill: invalid job id: {}", arg)),
    };
    match registry.kill_job(id).await {
        Ok(summary) => {
            info!("job {} killed", id);
            with_output(stage, console, "kill", |out| {
                writeln!(out, "{}", summary)?;
                out.flush()
            })
        }
        Err(e) => console.error(&format!("kill: {}", e)),
    }
}

fn cd(dir: Option<&str>, console: &mut Console) -> io::Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => return console.error("cd: directory not provided"),
    };
    if let Err(e) = env::set_current_dir(dir) {
        info!("cd to {} failed: {}", dir, e);
        return console.error(&format!("cd: directory not found: {}", dir));
    }
    Ok(())
}

/// Runs `write` against the stage's `>` file when it has one, otherwise
/// against the console.
fn with_output<F>(
    stage: &ProcessDescriptor,
    console: &mut Console,
    name: &str,
    write: F,
) -> io::Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let path = match &stage.output_file {
        Some(path) => path,
        None => return write(console.out()),
    };
    let opened: io::Result<File> = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path);
    match opened.and_then(|mut file| write(&mut file)) {
        Ok(()) => Ok(()),
        Err(e) => console.error(&format!("{}: {}: {}", name, path.display(), e)),
    }
}

#[cfg(test)]
mod test {
    use std::{
        io::Write,
        sync::{Arc, Mutex},
    };

    use lazy_static::lazy_static;
    use tokio::runtime::Runtime;

    use super::{Builtin, BuiltinOutcome};
    use crate::{console::Console, parser::parse, registry::Registry, util::ProcessId};

    lazy_static! {
        static ref RUNTIME: Runtime = Runtime::new().unwrap();
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn console() -> (Console, Capture, Capture) {
        let out = Capture::default();
        let err = Capture::default();
        let console = Console::new(Box::new(out.clone()), Box::new(err.clone()), "");
        (console, out, err)
    }

    fn run(line: &str, registry: &mut Registry, console: &mut Console) -> BuiltinOutcome {
        let job = parse(line).unwrap();
        let builtin = Builtin::from_job(&job).unwrap();
        RUNTIME
            .block_on(builtin.run(&job.stages[0], registry, console))
            .unwrap()
    }

    #[test]
    fn test_recognition() {
        let from = |line: &str| Builtin::from_job(&parse(line).unwrap());
        assert_eq!(Some(Builtin::Jobs { json: false }), from("jobs"));
        assert_eq!(Some(Builtin::Jobs { json: true }), from("jobs -j"));
        assert_eq!(Some(Builtin::Kill(Some("3".to_string()))), from("kill 3"));
        assert_eq!(Some(Builtin::Exit), from("  exit "));
        assert_eq!(Some(Builtin::Cd(None)), from("cd"));
        assert_eq!(None, from("jobs | cat"));
        assert_eq!(None, from("ls -l"));
    }

    #[test]
    fn test_jobs_lists_and_reclaims() {
        let mut registry = Registry::new(4);
        let running = registry.install_for_test("sleep 10 &", &[10]);
        let finished = registry.install_for_test("echo hi", &[11]);
        assert_eq!(finished, registry.reap(ProcessId(11)).unwrap());
        let (mut console, out, _) = console();

        assert_eq!(BuiltinOutcome::Done, run("jobs", &mut registry, &mut console));
        assert_eq!(
            format!("[{}] RUNNING\t\tsleep 10 &\n[{}] TERMINATED\t\techo hi\n", running, finished),
            out.text()
        );
        RUNTIME.block_on(registry.terminate_all());
    }

    #[test]
    fn test_jobs_json() {
        let mut registry = Registry::new(2);
        registry.install_for_test("cat", &[20]);
        let (mut console, out, _) = console();
        run("jobs -j", &mut registry, &mut console);
        let value: serde_json::Value = serde_json::from_str(out.text().trim()).unwrap();
        assert_eq!("cat", value["command_line"]);
        assert_eq!("Running", value["status"]);
        RUNTIME.block_on(registry.terminate_all());
    }

    #[test]
    fn test_jobs_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.txt");
        let mut registry = Registry::new(2);
        registry.install_for_test("cat", &[30]);
        let (mut console, out, _) = console();
        run(&format!("jobs > {}", path.display()), &mut registry, &mut console);
        assert_eq!("", out.text());
        assert_eq!("[0] RUNNING\t\tcat\n", std::fs::read_to_string(&path).unwrap());
        RUNTIME.block_on(registry.terminate_all());
    }

    #[test]
    fn test_kill() {
        let mut registry = Registry::new(2);
        registry.install_for_test("sleep 10", &[40]);
        let (mut console, out, err) = console();

        run("kill", &mut registry, &mut console);
        run("kill x", &mut registry, &mut console);
        run("kill 1", &mut registry, &mut console);
        run("kill 5", &mut registry, &mut console);
        assert_eq!(
            "kill: job id not provided\n\
             kill: invalid job id: x\n\
             kill: no such job: 1\n\
             kill: job id 5 out of range\n",
            err.text()
        );

        run("kill 0", &mut registry, &mut console);
        assert_eq!("[0] TERMINATED\t\tsleep 10\n", out.text());
        assert_eq!(1, registry.wait_set().len());
    }

    #[test]
    fn test_exit() {
        let mut registry = Registry::new(1);
        let (mut console, _, _) = console();
        assert_eq!(BuiltinOutcome::Exit, run("exit", &mut registry, &mut console));
    }

    #[test]
    fn test_cd_errors() {
        let mut registry = Registry::new(1);
        let (mut console, _, err) = console();
        run("cd", &mut registry, &mut console);
        run("cd /no/such/dir/anywhere", &mut registry, &mut console);
        assert_eq!(
            "cd: directory not provided\ncd: directory not found: /no/such/dir/anywhere\n",
            err.text()
        );
    }

    #[test]
    fn test_kill_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("killed.txt");
        let mut registry = Registry::new(1);
        registry.install_for_test("sleep 10 &", &[50]);
        let (mut console, out, err) = console();
        run(&format!("kill 0 > {}", path.display()), &mut registry, &mut console);
        assert_eq!("", out.text());
        assert_eq!("", err.text());
        assert_eq!(
            "[0] TERMINATED\t\tsleep 10 &\n",
            std::fs::read_to_string(&path).unwrap()
        );
        assert_eq!(1, registry.wait_set().len());
    }
}
