/// CLI argument parsing and command handling - Gateway
mod args;
mod commands;

pub use args::{Cli, Commands, OutputFormat};
pub use commands::{add_entry, collect_stats, format_entry, handle_command, show_version, IndexStats};
