use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::{
    app::{init_config, Config},
    cache::{self, CacheEntry, CacheId, CacheIndexHolder, CacheKey},
};

use super::{Cli, Commands, OutputFormat};

/// Handle CLI subcommands
pub fn handle_command(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Commands::Init => {
            println!("Initializing cache-index configuration...");
            match init_config()? {
                Some(path) => println!("Configuration written to {}", path.display()),
                None => println!("Configuration already exists, left untouched"),
            }
            return Ok(());
        }
        Commands::Version => {
            show_version();
            return Ok(());
        }
        _ => {}
    }

    let holder = open_index(cli, config)?;
    match &cli.command {
        Commands::List { format } => {
            let entries = holder.get_synchronized(|index| index.all_entries())?;
            print_entries(&entries, *format)?;
        }
        Commands::Find { url, version } => {
            let key = CacheKey::parse(url, version.as_deref())?;
            match holder.get_synchronized(|index| index.find_by_key(&key).cloned())? {
                Some(entry) => println!("{}", format_entry(&entry)),
                None => println!("{} {}", "No entry for".yellow(), key),
            }
        }
        Commands::Remove { url, version } => {
            let key = CacheKey::parse(url, version.as_deref())?;
            match holder.run_synchronized(|session| session.remove_entry(&key))? {
                Some(entry) => println!("{} {}", "Removed".green(), format_entry(&entry)),
                None => println!("{} {}", "No entry for".yellow(), key),
            }
        }
        Commands::Touch { id, at } => {
            let timestamp = at.unwrap_or_else(now_millis);
            if holder.run_synchronized(|session| session.mark_accessed(id, timestamp))? {
                println!("{} {} at {}", "Touched".green(), id, format_timestamp(timestamp));
            } else {
                println!("{} {}", "No entry with id".yellow(), id);
            }
        }
        Commands::Add { id, url, version, at } => {
            let entry = add_entry(&holder, id, url, version.as_deref(), at.unwrap_or_else(now_millis))?;
            println!("{} {}", "Added".green(), format_entry(&entry));
        }
        Commands::Compact => {
            let before = file_size(&holder)?;
            let live = holder.run_synchronized(|session| {
                session.request_compaction();
                session.len()
            })?;
            let after = file_size(&holder)?;
            info!("Compacted {} ({} -> {} bytes)", holder.path().display(), before, after);
            println!(
                "{} {} entries, {} -> {} bytes",
                "Compacted".green(),
                live,
                before,
                after
            );
        }
        Commands::Clear => {
            let removed = holder.run_synchronized(|session| session.clear())?;
            println!("{} {} entries", "Removed".green(), removed);
        }
        Commands::Stats => {
            let stats = collect_stats(&holder)?;
            print_stats(&stats);
        }
        Commands::Init | Commands::Version => {}
    }
    Ok(())
}

fn open_index(cli: &Cli, config: &Config) -> Result<CacheIndexHolder> {
    let path = match &cli.index {
        Some(path) => path.clone(),
        None => config.index_path()?,
    };
    cache::init(&path, config.compaction_policy())
        .with_context(|| format!("Failed to open cache index {}", path.display()))
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Record `url` (and `version`) as stored in bucket `id`
pub fn add_entry(
    holder: &CacheIndexHolder,
    id: &str,
    url: &str,
    version: Option<&str>,
    timestamp: i64,
) -> Result<CacheEntry> {
    let key = CacheKey::parse(url, version)?;
    let entry = holder.run_synchronized(|session| session.create_entry(key, id, timestamp))?;
    Ok(entry)
}

/// Summary of one index file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub path: PathBuf,
    pub entries: usize,
    pub log_lines: usize,
    pub file_size: u64,
    /// Entry count per host, sorted by host
    pub domains: BTreeMap<String, usize>,
}

pub fn collect_stats(holder: &CacheIndexHolder) -> Result<IndexStats> {
    let (entries, log_lines) =
        holder.run_synchronized(|session| Ok((session.all_entries()?, session.log_line_count())))?;

    let mut domains = BTreeMap::new();
    for entry in &entries {
        let domain = CacheId::domain_of(entry.key());
        let host = domain.value().unwrap_or("<none>").to_string();
        *domains.entry(host).or_insert(0) += 1;
    }

    Ok(IndexStats {
        path: holder.path().to_path_buf(),
        entries: entries.len(),
        log_lines,
        file_size: file_size(holder)?,
        domains,
    })
}

fn file_size(holder: &CacheIndexHolder) -> Result<u64> {
    let metadata = std::fs::metadata(holder.path())
        .with_context(|| format!("Failed to stat {}", holder.path().display()))?;
    Ok(metadata.len())
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|time| time.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// One-line rendering: `id  location [version]  last accessed`
pub fn format_entry(entry: &CacheEntry) -> String {
    let version = entry
        .key()
        .version()
        .map(|v| format!(" [{}]", v))
        .unwrap_or_default();
    format!(
        "{}  {}{}  {}",
        entry.id().cyan(),
        entry.key().location(),
        version,
        format_timestamp(entry.last_accessed()).dimmed()
    )
}

fn print_entries(entries: &[CacheEntry], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(entries)?),
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("{}", "Cache index is empty".yellow());
            }
            for entry in entries {
                println!("  {}", format_entry(entry));
            }
        }
    }
    Ok(())
}

fn print_stats(stats: &IndexStats) {
    println!("Cache index: {}", stats.path.display().to_string().bold());
    println!("  Entries:   {}", stats.entries);
    println!("  Log lines: {}", stats.log_lines);
    println!("  File size: {} bytes", stats.file_size);
    if !stats.domains.is_empty() {
        println!("\n  Domains:");
        for (host, count) in &stats.domains {
            println!("    • {} ({})", host.green(), count);
        }
    }
}

/// Show version information
pub fn show_version() {
    println!("cache-index v{}", env!("CARGO_PKG_VERSION"));
    println!("   Recently-used index for downloaded resource caches");
}
