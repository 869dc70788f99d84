//! Runs the `jsh` binary on a pseudo-terminal.

#![cfg(unix)]

use std::{thread::sleep, time::Duration};

use expectrl::{spawn, Eof, Expect};

const PROMPT: &str = "jsh> ";

fn spawn_shell() -> impl Expect {
    let mut session = spawn(env!("CARGO_BIN_EXE_jsh")).expect("could not spawn jsh");
    session.set_expect_timeout(Some(Duration::from_secs(10)));
    session
}

#[test]
fn test_foreground_job_reads_terminal() {
    let mut shell = spawn_shell();
    shell.expect(PROMPT).unwrap();

    shell.send_line("head -n 1 | tr a-z A-Z").unwrap();
    // give the job time to block on the terminal
    sleep(Duration::from_millis(300));
    shell.send_line("typed-for-child").unwrap();
    shell.expect("TYPED-FOR-CHILD").unwrap();
    shell.expect(PROMPT).unwrap();

    shell.send_line("echo still-alive | tr a-z A-Z").unwrap();
    shell.expect("STILL-ALIVE").unwrap();
    shell.expect(PROMPT).unwrap();

    shell.send_line("exit").unwrap();
    shell.expect(Eof).unwrap();
}

#[test]
fn test_background_job_leaves_terminal_to_shell() {
    let mut shell = spawn_shell();
    shell.expect(PROMPT).unwrap();

    shell.send_line("sleep 30 &").unwrap();
    shell.expect(PROMPT).unwrap();
    shell.send_line("echo next | tr a-z A-Z").unwrap();
    shell.expect("NEXT").unwrap();
    shell.expect(PROMPT).unwrap();

    shell.send_line("exit").unwrap();
    shell.expect(Eof).unwrap();
}
