/// Longest command line, in characters, the shell accepts.
pub const MAX_CMDLINE: usize = 32767;

/// Number of job slots, i.e. the most jobs that can exist at once.
pub const MAX_JOBS: usize = 4096;

/// Most processes a single pipeline may have.
pub const MAX_STAGES: usize = 4096;

pub const DEFAULT_PROMPT: &str = "jsh> ";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellConfig {
    pub max_jobs: usize,
    pub max_cmdline: usize,
    pub max_stages: usize,
    /// Printed whenever the shell is ready for a new line. Empty disables it.
    pub prompt: String,
    /// Report spawn failures instead of exiting the shell.
    pub keep_going: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            max_jobs: MAX_JOBS,
            max_cmdline: MAX_CMDLINE,
            max_stages: MAX_STAGES,
            prompt: DEFAULT_PROMPT.to_string(),
            keep_going: false,
        }
    }
}
