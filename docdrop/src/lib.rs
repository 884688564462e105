pub mod cli;
pub mod load_config;
pub mod logging;
pub mod ssh;
pub mod watcher;

pub use cli::{run, Cli, Commands};
