use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cache-index")]
#[command(version)]
#[command(about = "Inspect and maintain a recently-used resource cache index", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Index file to operate on (overrides the configured cache dir)
    #[arg(short, long, env = "CACHE_INDEX_FILE")]
    pub index: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List all entries, most recently used first
    List {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Look up the entry of a resource
    Find {
        url: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// Remove the entry of a resource
    Remove {
        url: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// Mark an entry as accessed
    Touch {
        id: String,
        /// Access time in milliseconds since the epoch (defaults to now)
        #[arg(long)]
        at: Option<i64>,
    },
    /// Record a new entry
    Add {
        id: String,
        url: String,
        #[arg(long)]
        version: Option<String>,
        /// Access time in milliseconds since the epoch (defaults to now)
        #[arg(long)]
        at: Option<i64>,
    },
    /// Rewrite the index file with only the live entries
    Compact,
    /// Remove all entries
    Clear,
    /// Show entry and file statistics
    Stats,
    /// Initialize configuration
    Init,
    /// Show version information
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    Text,
    /// JSON structured output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add() {
        let cli = Cli::try_parse_from([
            "cache-index",
            "-i",
            "/tmp/recently_used",
            "add",
            "1/11",
            "https://example.com/app.jar",
            "--version",
            "1.2",
            "--at",
            "42",
        ])
        .unwrap();

        assert_eq!(cli.index, Some(PathBuf::from("/tmp/recently_used")));
        match cli.command {
            Commands::Add { id, url, version, at } => {
                assert_eq!(id, "1/11");
                assert_eq!(url, "https://example.com/app.jar");
                assert_eq!(version.as_deref(), Some("1.2"));
                assert_eq!(at, Some(42));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_list_format_defaults_to_text() {
        let cli = Cli::try_parse_from(["cache-index", "list"]).unwrap();
        assert!(matches!(cli.command, Commands::List { format: OutputFormat::Text }));

        let cli = Cli::try_parse_from(["cache-index", "list", "--format", "json"]).unwrap();
        assert!(matches!(cli.command, Commands::List { format: OutputFormat::Json }));
    }

    #[test]
    fn test_command_is_required() {
        assert!(Cli::try_parse_from(["cache-index"]).is_err());
    }
}
