//! Hands the controlling terminal to foreground jobs and takes it back.
//!
//! The first stage of every pipeline leads its own process group. Unless
//! that group is made the terminal's foreground group, a stage reading the
//! terminal gets SIGTTIN and stops.

use std::io;

#[cfg(unix)]
use nix::{
    sys::signal::{killpg, pthread_sigmask, SigSet, SigmaskHow, Signal},
    unistd::{getpgrp, tcsetpgrp, Pid},
};

/// The terminal on the shell's stdin and the group that owns it while no
/// foreground job runs.
#[cfg(unix)]
#[derive(Debug)]
pub struct Terminal {
    shell_group: Pid,
}

#[cfg(unix)]
impl Terminal {
    /// `None` when stdin is not a terminal.
    pub fn from_stdin() -> Option<Self> {
        use std::io::IsTerminal;

        if !io::stdin().is_terminal() {
            return None;
        }
        Some(Self {
            shell_group: getpgrp(),
        })
    }

    /// Makes `group` the foreground process group and resumes it.
    pub fn give_to(&self, group: u32) -> io::Result<()> {
        let group = Pid::from_raw(group as i32);
        with_sigttou_blocked(|| tcsetpgrp(io::stdin(), group))?;
        // a stage that touched the terminal before the hand-over is stopped
        killpg(group, Signal::SIGCONT)?;
        Ok(())
    }

    pub fn take_back(&self) -> io::Result<()> {
        with_sigttou_blocked(|| tcsetpgrp(io::stdin(), self.shell_group))?;
        Ok(())
    }
}

// tcsetpgrp from a background group raises SIGTTOU unless it is blocked
#[cfg(unix)]
fn with_sigttou_blocked<F>(set_group: F) -> nix::Result<()>
where
    F: FnOnce() -> nix::Result<()>,
{
    let mut block = SigSet::empty();
    block.add(Signal::SIGTTOU);
    let mut previous = SigSet::empty();
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&block), Some(&mut previous))?;
    let result = set_group();
    pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&previous), None)?;
    result
}

#[cfg(not(unix))]
#[derive(Debug)]
pub struct Terminal;

#[cfg(not(unix))]
impl Terminal {
    pub fn from_stdin() -> Option<Self> {
        None
    }

    pub fn give_to(&self, _group: u32) -> io::Result<()> {
        Ok(())
    }

    pub fn take_back(&self) -> io::Result<()> {
        Ok(())
    }
}
