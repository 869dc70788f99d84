pub mod builtins;
pub mod config;
pub mod console;
pub mod error;
pub mod parser;
pub mod reader;
pub mod registry;
pub mod shell;
pub mod spawner;
pub mod terminal;
pub mod util;

pub use config::ShellConfig;
pub use error::{ParseError, ShellError, SpawnError};
pub use shell::{Outcome, Shell};
