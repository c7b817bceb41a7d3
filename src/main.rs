use anyhow::Result;
use clap::Parser;
use tracing::debug;

use resource_cache_index::{
    app::load_config,
    cli::{handle_command, Cli},
    utils::{init_logger, level_for},
};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Configuration decides the default log level, so it is loaded first
    let config = load_config(cli.config.as_deref())?;
    init_logger(&level_for(cli.verbose, &config.log_level));
    debug!("Loaded configuration: {:?}", config);

    handle_command(&cli, &config)
}
