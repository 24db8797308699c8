//! EconWatch CLI: fetch, inspect and cache-manage economic indicator datasets.
//!
//! Commands:
//! - `fetch`: run the store → live → fallback cycle for one dataset or all of them
//! - `show`: print a dataset or reading, served from the TTL cache when fresh
//! - `datasets`: list every dataset and reading with its cache lifetime and store status
//! - `cache status`: report cache entries, their size and age
//! - `cache clear`: remove one cache entry or all of them

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use econwatch_core::cache::DataCache;
use econwatch_core::config::EconConfig;
use econwatch_core::fetch::{CannedTransport, FetchContext, HttpTransport, Transport};
use econwatch_core::orchestrator::{DatasetId, DatasetOutcome, Orchestrator, SnapshotId};
use econwatch_core::store::DataStore;
use econwatch_core::table::SeriesTable;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "econwatch",
    about = "EconWatch CLI: economic indicator acquisition and caching"
)]
struct Cli {
    /// Path to a TOML config file. Missing file means defaults.
    #[arg(long, global = true, default_value = "econwatch.toml")]
    config: PathBuf,

    /// Offline mode: no network access, every live fetch falls back.
    #[arg(long, global = true, default_value_t = false)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one dataset, or every dataset and reading.
    Fetch {
        /// Dataset name (e.g. cpi, exchange_rates). All when omitted.
        dataset: Option<String>,

        /// Bypass the store and fetch live.
        #[arg(long, default_value_t = false)]
        refresh: bool,

        /// Write the full snapshot as JSON to this path (all datasets only).
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Print a dataset or a reading, cached for its source's TTL.
    Show {
        /// Dataset or reading name (see `econwatch datasets`).
        name: String,

        /// Number of rows to print for datasets.
        #[arg(long, default_value_t = 12)]
        rows: usize,
    },
    /// List datasets and readings.
    Datasets,
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cache entries, size and age.
    Status,
    /// Remove one cached dataset/reading, or everything.
    Clear {
        /// Dataset or reading name. Everything when omitted.
        name: Option<String>,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = EconConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    match cli.command {
        Commands::Fetch {
            dataset,
            refresh,
            snapshot,
        } => run_fetch(&config, cli.offline, dataset, refresh, snapshot),
        Commands::Show { name, rows } => run_show(&config, cli.offline, &name, rows),
        Commands::Datasets => run_datasets(&config),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&config),
            CacheAction::Clear { name } => run_cache_clear(&config, name.as_deref()),
        },
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("econwatch=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var_os("ECONWATCH_LOG_JSON").is_some() {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn build_orchestrator(config: &EconConfig, offline: bool) -> Result<Orchestrator> {
    let transport: Arc<dyn Transport> = if offline {
        Arc::new(CannedTransport::new())
    } else {
        Arc::new(
            HttpTransport::new(config.http.timeout(), &config.http.user_agent)
                .context("building HTTP client")?,
        )
    };
    let ctx = FetchContext::new(transport, config.sources.clone(), today())
        .with_period_policy(config.scrape.period_policy());
    let store = DataStore::new(config.paths.store_dir.clone());
    Ok(Orchestrator::new(ctx, store).with_windows(config.windows))
}

fn parse_dataset(name: &str) -> Result<DatasetId> {
    name.parse::<DatasetId>().map_err(|e| {
        let valid: Vec<&str> = DatasetId::ALL.iter().map(|d| d.name()).collect();
        anyhow!("{e}. Valid: {}", valid.join(", "))
    })
}

fn cache_key(prefix: &str, name: &str) -> String {
    format!("{prefix}:{name}")
}

fn run_fetch(
    config: &EconConfig,
    offline: bool,
    dataset: Option<String>,
    refresh: bool,
    snapshot_path: Option<PathBuf>,
) -> Result<()> {
    let orchestrator = build_orchestrator(config, offline)?;

    if let Some(name) = dataset {
        if snapshot_path.is_some() {
            bail!("--snapshot is only valid when fetching every dataset");
        }
        let id = parse_dataset(&name)?;
        let outcome = if refresh {
            orchestrator.refresh(id)
        } else {
            orchestrator.dataset(id)
        };
        print_outcome(id.name(), &outcome);
        print_table(&outcome.table, 12);
        return Ok(());
    }

    let snapshot = if refresh {
        orchestrator.refresh_all()
    } else {
        orchestrator.fetch_all()
    };

    println!();
    println!("=== Fetch cycle {} ===", snapshot.as_of);
    println!("{:<24} {:<10} {:>6} {:>8}", "Dataset", "Source", "Rows", "Errors");
    println!("{}", "-".repeat(51));
    for (name, outcome) in &snapshot.tables {
        println!(
            "{:<24} {:<10} {:>6} {:>8}",
            name,
            format!("{:?}", outcome.provenance),
            outcome.table.len(),
            outcome.errors.len()
        );
    }
    println!();
    println!("{:<24} {:<10}", "Reading", "Source");
    println!("{}", "-".repeat(34));
    for (name, reading) in &snapshot.readings {
        println!("{:<24} {:<10}", name, format!("{:?}", reading.provenance));
    }
    if !snapshot.errors.is_empty() {
        println!();
        for e in &snapshot.errors {
            println!("WARNING: {e}");
        }
    }

    if let Some(path) = snapshot_path {
        write_json(&path, &snapshot)?;
        println!();
        println!("Snapshot saved to: {}", path.display());
    }
    Ok(())
}

fn run_show(config: &EconConfig, offline: bool, name: &str, rows: usize) -> Result<()> {
    let cache = DataCache::new(config.paths.cache_dir.clone());
    let orchestrator = build_orchestrator(config, offline)?;

    if let Ok(id) = name.parse::<DatasetId>() {
        let max_age = config.cache_ttl.max_age(id.ttl_class());
        let outcome: DatasetOutcome =
            cache.get_or_fetch(&cache_key("dataset", name), max_age, || orchestrator.dataset(id));
        print_outcome(name, &outcome);
        print_table(&outcome.table, rows);
        return Ok(());
    }

    let id = name.parse::<SnapshotId>().map_err(|_| {
        anyhow!("unknown dataset or reading '{name}'. Run `econwatch datasets` for the list")
    })?;
    let max_age = config.cache_ttl.max_age(id.ttl_class());
    let reading = cache.get_or_fetch(&cache_key("reading", name), max_age, || {
        orchestrator.reading(id)
    });
    println!("{name} ({:?})", reading.provenance);
    if let Some(e) = &reading.error {
        println!("WARNING: {e}");
    }
    println!("{}", serde_json::to_string_pretty(&reading.value)?);
    Ok(())
}

fn run_datasets(config: &EconConfig) -> Result<()> {
    let store = DataStore::new(config.paths.store_dir.clone());
    let stored = store.list_datasets().context("listing store")?;

    println!("{:<24} {:<10} {:<8}", "Dataset", "TTL", "Stored");
    println!("{}", "-".repeat(44));
    for id in DatasetId::ALL {
        let ttl = config.cache_ttl.max_age(id.ttl_class());
        let present = stored.iter().any(|s| s == id.name());
        println!(
            "{:<24} {:<10} {:<8}",
            id.name(),
            format_duration(ttl),
            if present { "yes" } else { "no" }
        );
    }
    println!();
    println!("{:<24} {:<10}", "Reading", "TTL");
    println!("{}", "-".repeat(35));
    for id in SnapshotId::ALL {
        let ttl = config.cache_ttl.max_age(id.ttl_class());
        println!("{:<24} {:<10}", id.name(), format_duration(ttl));
    }
    Ok(())
}

fn run_cache_status(config: &EconConfig) -> Result<()> {
    let cache = DataCache::new(config.paths.cache_dir.clone());
    if !cache.dir().exists() {
        println!("Cache directory does not exist: {}", cache.dir().display());
        return Ok(());
    }
    let info = cache.info().context("reading cache directory")?;
    if info.entries.is_empty() {
        println!("Cache is empty: {}", cache.dir().display());
        return Ok(());
    }

    println!("Cache: {}", cache.dir().display());
    println!("Entries: {}", info.entries.len());
    println!("Total size: {}", format_size(info.total_bytes));
    println!();
    println!("{:<32} {:<22} {:>10} {:>10}", "Key", "File", "Age", "Size");
    println!("{}", "-".repeat(77));
    for entry in &info.entries {
        println!(
            "{:<32} {:<22} {:>10} {:>10}",
            entry.key.as_deref().unwrap_or("(unreadable)"),
            entry.file,
            format_duration(entry.age),
            format_size(entry.size_bytes)
        );
    }
    Ok(())
}

fn run_cache_clear(config: &EconConfig, name: Option<&str>) -> Result<()> {
    let cache = DataCache::new(config.paths.cache_dir.clone());
    let removed = match name {
        None => cache.clear(None).context("clearing cache")?,
        Some(name) => {
            let prefix = if name.parse::<DatasetId>().is_ok() {
                "dataset"
            } else if name.parse::<SnapshotId>().is_ok() {
                "reading"
            } else {
                bail!("unknown dataset or reading '{name}'");
            };
            cache
                .clear(Some(&cache_key(prefix, name)))
                .with_context(|| format!("clearing cache entry for {name}"))?
        }
    };
    info!(removed, "cache cleared");
    println!("Removed {removed} cache entr{}.", if removed == 1 { "y" } else { "ies" });
    Ok(())
}

fn print_outcome(name: &str, outcome: &DatasetOutcome) {
    println!();
    println!("=== {name} ===");
    println!("Source:  {:?}", outcome.provenance);
    println!("Rows:    {}", outcome.table.len());
    let rows = outcome.table.rows();
    if let (Some(oldest), Some(newest)) = (rows.last(), rows.first()) {
        println!("Range:   {} to {}", oldest.date, newest.date);
    }
    for e in &outcome.errors {
        println!("WARNING: {e}");
    }
    println!();
}

fn print_table(table: &SeriesTable, rows: usize) {
    let header: Vec<String> = table.columns().iter().map(|c| format!("{c:>14}")).collect();
    println!("{:<12}{}", "date", header.join(""));
    for row in table.rows().iter().take(rows) {
        let cells: Vec<String> = row
            .values
            .iter()
            .map(|v| match v {
                Some(x) => format!("{x:>14.3}"),
                None => format!("{:>14}", "-"),
            })
            .collect();
        println!("{:<12}{}", row.date, cells.join(""));
    }
    if table.len() > rows {
        println!("... {} more rows", table.len() - rows);
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{:.1}h", secs as f64 / 3600.0)
    } else {
        format!("{:.1}d", secs as f64 / 86_400.0)
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_pick_a_readable_unit() {
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(900)), "15m");
        assert_eq!(format_duration(Duration::from_secs(6 * 3600)), "6.0h");
    }

    #[test]
    fn unknown_dataset_lists_valid_names() {
        let err = parse_dataset("gdp").unwrap_err().to_string();
        assert!(err.contains("unknown dataset 'gdp'"));
        assert!(err.contains("live_register"));
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["econwatch", "fetch", "cpi", "--refresh", "--offline"])
            .unwrap();
        assert!(cli.offline);
        match cli.command {
            Commands::Fetch {
                dataset, refresh, ..
            } => {
                assert_eq!(dataset.as_deref(), Some("cpi"));
                assert!(refresh);
            }
            _ => panic!("expected fetch"),
        }
    }
}
