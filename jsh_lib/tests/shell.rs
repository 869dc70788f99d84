use std::{
    fs::{self, File},
    io::{Cursor, Write},
    path::PathBuf,
    sync::{Arc, Mutex, Once},
    time::Duration,
};

use lazy_static::lazy_static;
use tempfile::TempDir;
use tokio::{runtime::Runtime, time::timeout};

use jsh_lib::{
    console::Console,
    registry::{JobId, JobStatus},
    Shell, ShellConfig, ShellError, SpawnError,
};

lazy_static! {
    static ref RUNTIME: Runtime = Runtime::new().unwrap();
}
static INIT: Once = Once::new();

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

struct Harness {
    shell: Shell,
    out: Capture,
    err: Capture,
    dir: TempDir,
    child_output: PathBuf,
}

impl Harness {
    fn new(config: ShellConfig, prompt: &str) -> Self {
        INIT.call_once(|| {
            tracing_subscriber::fmt::init();
        });
        let out = Capture::default();
        let err = Capture::default();
        let console = Console::new(Box::new(out.clone()), Box::new(err.clone()), prompt);
        let dir = tempfile::tempdir().unwrap();
        let child_output = dir.path().join("children.txt");
        let file = File::create(&child_output).unwrap();
        Self {
            shell: Shell::with_console(config, console, Some(file)),
            out,
            err,
            dir,
            child_output,
        }
    }

    fn quiet() -> Self {
        Self::new(
            ShellConfig {
                max_jobs: 64,
                ..ShellConfig::default()
            },
            "",
        )
    }

    fn run(&mut self, lines: &[&str]) -> Result<(), ShellError> {
        let mut script = lines.join("\n");
        script.push('\n');
        let input = Cursor::new(script.into_bytes());
        RUNTIME.block_on(async {
            timeout(Duration::from_secs(20), self.shell.run(input))
                .await
                .expect("shell did not finish")
        })
    }

    fn children(&self) -> String {
        fs::read_to_string(&self.child_output).unwrap()
    }

    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).display().to_string()
    }
}

#[test]
fn test_lines_run_in_order() {
    let mut harness = Harness::quiet();
    let lines: Vec<String> = (0..25).map(|i| format!("echo line-{}", i)).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    harness.run(&refs).unwrap();

    let expected: String = (0..25).map(|i| format!("line-{}\n", i)).collect();
    assert_eq!(expected, harness.children());
    assert_eq!("", harness.err.text());
}

#[test]
fn test_pipeline() {
    let mut harness = Harness::quiet();
    harness.run(&["echo hello | tr a-z A-Z"]).unwrap();
    assert_eq!("HELLO\n", harness.children());
}

#[test]
fn test_redirections() {
    let mut harness = Harness::quiet();
    let first = harness.path("first.txt");
    let second = harness.path("second.txt");
    harness
        .run(&[
            &format!("echo \"some words\" > {}", first),
            &format!("cat < {} | tr a-z A-Z > {}", first, second),
        ])
        .unwrap();
    assert_eq!("SOME WORDS\n", fs::read_to_string(&second).unwrap());
    assert_eq!("", harness.children());
}

#[test]
fn test_background_jobs_are_reported_once() {
    let mut harness = Harness::quiet();
    harness
        .run(&["sleep 0.1 &", "sleep 0.5", "jobs", "jobs"])
        .unwrap();
    assert_eq!(
        "[0] TERMINATED\t\tsleep 0.1 &\n[1] TERMINATED\t\tsleep 0.5\n",
        harness.out.text()
    );
}

#[test]
fn test_kill_background_job() {
    let mut harness = Harness::quiet();
    harness
        .run(&["sleep 30 &", "kill 0", "jobs", "kill 0"])
        .unwrap();
    assert_eq!("[0] TERMINATED\t\tsleep 30 &\n", harness.out.text());
    assert_eq!("kill: no such job: 0\n", harness.err.text());
    assert_eq!(1, harness.shell.registry().wait_set().len());
}

#[test]
fn test_parse_errors_are_reported() {
    let mut harness = Harness::quiet();
    harness.run(&["echo a | | cat", "", "   ", "echo ok"]).unwrap();
    assert_eq!("jsh: empty pipe stage\n", harness.err.text());
    assert_eq!("ok\n", harness.children());
}

#[test]
fn test_spawn_failure_is_fatal() {
    let mut harness = Harness::quiet();
    let result = harness.run(&["/nonexistent/jsh-test-prog", "echo after"]);
    assert!(matches!(
        result,
        Err(ShellError::Spawn(SpawnError::SyscallFailure { stage: 0, .. }))
    ));
    assert_eq!("", harness.children());
}

#[test]
fn test_keep_going_reports_spawn_failure() {
    let mut harness = Harness::new(
        ShellConfig {
            max_jobs: 64,
            keep_going: true,
            ..ShellConfig::default()
        },
        "",
    );
    harness
        .run(&["/nonexistent/jsh-test-prog", "echo after"])
        .unwrap();
    assert!(harness
        .err
        .text()
        .starts_with("jsh: stage 0 (/nonexistent/jsh-test-prog): "));
    assert_eq!("after\n", harness.children());
}

#[test]
fn test_no_free_job_slot_is_reported() {
    let mut harness = Harness::new(
        ShellConfig {
            max_jobs: 1,
            ..ShellConfig::default()
        },
        "",
    );
    harness.run(&["sleep 30 &", "echo nope", "jobs"]).unwrap();
    assert_eq!("jsh: no free job slot\n", harness.err.text());
    assert_eq!("[0] RUNNING\t\tsleep 30 &\n", harness.out.text());
    assert_eq!("", harness.children());
}

#[test]
fn test_exit_terminates_jobs() {
    let mut harness = Harness::quiet();
    harness
        .run(&["sleep 30 &", "sleep 30 | cat &", "exit", "echo never"])
        .unwrap();
    let registry = harness.shell.registry();
    assert_eq!(JobStatus::Empty, registry.status(JobId(0)));
    assert_eq!(JobStatus::Empty, registry.status(JobId(1)));
    assert_eq!(1, registry.wait_set().len());
    assert_eq!("", harness.children());
}

#[test]
fn test_end_of_input_terminates_jobs() {
    let mut harness = Harness::quiet();
    harness.run(&["sleep 30 &"]).unwrap();
    assert_eq!(1, harness.shell.registry().wait_set().len());
    assert_eq!(None, harness.shell.foreground());
}

#[test]
fn test_prompt() {
    let mut harness = Harness::new(
        ShellConfig {
            max_jobs: 8,
            ..ShellConfig::default()
        },
        "$ ",
    );
    // at start, after the foreground job, after the background line
    harness.run(&["echo a", "sleep 0.2 &"]).unwrap();
    assert_eq!("$ $ $ ", harness.out.text());
    assert_eq!("a\n", harness.children());
}
