use std::process;

use jsh_lib::{
    config::{DEFAULT_PROMPT, MAX_STAGES},
    Shell, ShellConfig,
};
use structopt::StructOpt;
use tokio::{io::BufReader, runtime};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// A small job-control shell
#[derive(StructOpt, Debug)]
#[structopt(name = "jsh")]
struct Opt {
    /// Number of job slots
    #[structopt(long, default_value = "4096")]
    max_jobs: usize,

    /// Longest accepted command line, in characters
    #[structopt(long, default_value = "32767")]
    max_cmdline: usize,

    #[structopt(long, default_value = DEFAULT_PROMPT)]
    prompt: String,

    #[structopt(long)]
    no_prompt: bool,

    /// Report failed spawns instead of exiting
    #[structopt(long)]
    keep_going: bool,

    /// Log filter used when RUST_LOG is not set
    #[structopt(long, default_value = "warn")]
    log_level: String,
}

impl Opt {
    fn config(&self) -> ShellConfig {
        ShellConfig {
            max_jobs: self.max_jobs,
            max_cmdline: self.max_cmdline,
            max_stages: MAX_STAGES,
            prompt: if self.no_prompt {
                String::new()
            } else {
                self.prompt.clone()
            },
            keep_going: self.keep_going,
        }
    }
}

fn main() {
    let opt = Opt::from_args();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&opt.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let runtime = match runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("jsh: could not start runtime: {}", e);
            process::exit(1);
        }
    };
    let config = opt.config();
    info!("starting with {:?}", config);
    let result = runtime.block_on(async {
        let mut shell = Shell::new(config);
        shell.run(BufReader::new(tokio::io::stdin())).await
    });
    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            error!("fatal: {:?}", e);
            eprintln!("jsh: {}", e);
            1
        }
    };
    // a read on stdin may still be parked on a blocking thread
    runtime.shutdown_background();
    process::exit(code);
}
