use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgGroup, Command};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info};

use oversight::audit::file_store::read_entries;
use oversight::audit::{
    merkle_root, validate_entries, AuditRecord, LedgerStore, LedgerValidation, SqliteLedgerStore,
    StoredEntry,
};
use oversight::database::Database;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("verify-ledger")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Verify the integrity of an oversight audit ledger")
        .arg(
            Arg::new("database")
                .short('d')
                .long("database")
                .value_name("URL")
                .help("SQLite database URL holding the audit_records table"),
        )
        .arg(
            Arg::new("jsonl")
                .short('j')
                .long("jsonl")
                .value_name("PATH")
                .help("Path to a JSON-lines ledger file"),
        )
        .group(
            ArgGroup::new("source")
                .args(["database", "jsonl"])
                .required(true),
        )
        .arg(
            Arg::new("merkle-root")
                .short('m')
                .long("merkle-root")
                .value_name("HASH")
                .help("Expected Merkle root of all record hashes"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let entries = match (
        matches.get_one::<String>("database"),
        matches.get_one::<String>("jsonl"),
    ) {
        (Some(url), _) => load_from_database(url).await?,
        (None, Some(path)) => load_from_file(path)?,
        (None, None) => return Err(anyhow!("Either --database or --jsonl is required")),
    };

    let expected_root = matches.get_one::<String>("merkle-root");
    if let Err(e) = verify(&entries, expected_root.map(String::as_str), verbose, quiet) {
        error!("Ledger verification failed: {}", e);
        std::process::exit(1);
    }

    if !quiet {
        println!("✓ Ledger verification completed successfully");
    }
    Ok(())
}

async fn load_from_database(url: &str) -> Result<Vec<StoredEntry>> {
    info!("Verifying SQLite ledger: {}", url);
    let database = Database::connect(url).await?;
    let store = SqliteLedgerStore::new(database.pool().clone());
    Ok(store.scan_entries().await?)
}

fn load_from_file(path: &str) -> Result<Vec<StoredEntry>> {
    info!("Verifying JSONL ledger: {}", path);
    if !Path::new(path).exists() {
        return Err(anyhow!("Ledger file not found: {}", path));
    }
    Ok(read_entries(Path::new(path))?)
}

fn verify(
    entries: &[StoredEntry],
    expected_root: Option<&str>,
    verbose: bool,
    quiet: bool,
) -> Result<()> {
    if entries.is_empty() {
        return Err(anyhow!("Ledger is empty"));
    }

    if verbose {
        println!("Loaded {} ledger entries", entries.len());
    }

    let validation = validate_entries(entries);
    if !quiet {
        print_validation(&validation, verbose);
    }

    let records: Vec<&AuditRecord> = entries
        .iter()
        .filter_map(|entry| match entry {
            StoredEntry::Record(record) => Some(record),
            StoredEntry::Malformed(_) => None,
        })
        .collect();

    // An undecodable entry still contributes whatever hash it carries.
    let leaves: Vec<String> = entries
        .iter()
        .map(|entry| match entry {
            StoredEntry::Record(record) => record.record_hash.clone(),
            StoredEntry::Malformed(malformed) => malformed.record_hash.clone().unwrap_or_default(),
        })
        .collect();
    let root = merkle_root(&leaves).ok_or_else(|| anyhow!("Could not compute Merkle root"))?;
    if verbose {
        println!("Merkle root: {}", root);
    }

    if let Some(expected) = expected_root {
        if expected != root {
            return Err(anyhow!("Merkle root mismatch. Expected: {}, Got: {}", expected, root));
        }
        if verbose {
            println!("✓ Merkle root matches expected value");
        }
    }

    if verbose {
        print_summary(&records);
    }

    if !validation.valid {
        return Err(anyhow!(
            "{} of {} records are broken",
            validation.invalid_count,
            validation.total_records
        ));
    }
    Ok(())
}

fn print_validation(validation: &LedgerValidation, verbose: bool) {
    println!("{}", validation.summary());
    for chain_break in &validation.breaks {
        println!(
            "  ✗ #{} {}: {:?} {}",
            chain_break.sequence,
            chain_break.record_id.as_deref().unwrap_or("-"),
            chain_break.kind,
            chain_break.description
        );
    }
    if verbose && validation.valid {
        println!("✓ Hash chain integrity verified");
    }
}

fn print_summary(records: &[&AuditRecord]) {
    let (first, last) = match (records.first(), records.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return,
    };

    println!("\nLedger Summary:");
    println!("  Total records: {}", records.len());
    println!("  First record: {}", first.timestamp);
    println!("  Last record: {}", last.timestamp);
    println!("  Head hash: {}", last.record_hash);

    let mut by_action = BTreeMap::new();
    for record in records {
        *by_action.entry(record.action.as_str()).or_insert(0usize) += 1;
    }
    println!("\nAction distribution:");
    for (action, count) in by_action {
        println!("  {}: {}", action, count);
    }
}
