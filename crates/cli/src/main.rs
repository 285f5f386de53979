//! # CLI — Granite interactive shell
//!
//! A REPL-style command-line interface for the Granite storage engine.
//! Reads commands from stdin, executes them against the engine, and prints
//! results to stdout. Works interactively or scripted (pipe commands via
//! stdin).
//!
//! ## Commands
//!
//! ```text
//! INSERT key value [ts]  Insert a row (ts defaults to now, in millis)
//! GET key                Print every version of a key
//! QUERY lo hi            Range scan (both bounds inclusive)
//! FLUSH                  Flush the memtable to a new part
//! MERGE                  Run one merge round if eligible
//! OPTIMIZE               Flush, then merge until within max_parts
//! STATS                  Print engine counters
//! EXIT / QUIT            Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! GRANITE_DATA_DIR        Base data directory       (default: "data/granite")
//! GRANITE_FLUSH_ROWS      Memtable flush threshold  (default: 1000)
//! GRANITE_MAX_PARTS       Merge eligibility bound   (default: 10)
//! GRANITE_MERGE_INTERVAL  Worker period in seconds  (default: 30)
//! GRANITE_BG_MERGE        Background merging on/off (default: "true")
//! ```

use std::io::{self, BufRead, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use engine::{Config, MergeTree};
use tracing_subscriber::{fmt, EnvFilter};

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn print_stats(tree: &MergeTree) {
    println!("parts:        {}", tree.part_count());
    println!("total rows:   {}", tree.total_rows());
    println!("memory usage: {} bytes", tree.memory_usage());
    println!("disk usage:   {} bytes", tree.disk_usage());
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let data_dir = env_or("GRANITE_DATA_DIR", "data/granite");
    let flush_rows: usize = env_or("GRANITE_FLUSH_ROWS", "1000").parse().unwrap_or(1000);
    let max_parts: usize = env_or("GRANITE_MAX_PARTS", "10").parse().unwrap_or(10);
    let merge_interval: u64 = env_or("GRANITE_MERGE_INTERVAL", "30").parse().unwrap_or(30);
    let bg_merge: bool = env_or("GRANITE_BG_MERGE", "true").parse().unwrap_or(true);

    let tree = MergeTree::open(
        &data_dir,
        Config {
            memtable_flush_threshold: flush_rows,
            max_parts,
            merge_interval_seconds: merge_interval,
            enable_background_merge: bg_merge,
            ..Config::default()
        },
    )?;

    println!(
        "Granite started (dir={data_dir}, flush={flush_rows} rows, max_parts={max_parts}, \
         interval={merge_interval}s, bg_merge={bg_merge})"
    );
    println!("Commands: INSERT key value [ts] | GET key | QUERY lo hi");
    println!("          FLUSH | MERGE | OPTIMIZE | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "INSERT" => match (parts.next(), parts.next()) {
                    (Some(key), Some(value)) => {
                        let ts = parts
                            .next()
                            .and_then(|t| t.parse().ok())
                            .unwrap_or_else(now_millis);
                        match tree.insert(key, value, ts) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR {e}"),
                        }
                    }
                    _ => println!("ERR usage: INSERT key value [ts]"),
                },
                "GET" => match parts.next() {
                    Some(key) => match tree.query_key(key) {
                        Ok(rows) if rows.is_empty() => println!("(nil)"),
                        Ok(rows) => {
                            for row in &rows {
                                println!("{} -> {} (ts: {})", row.key, row.value, row.timestamp);
                            }
                            println!("({} versions)", rows.len());
                        }
                        Err(e) => println!("ERR {e}"),
                    },
                    None => println!("ERR usage: GET key"),
                },
                "QUERY" => match (parts.next(), parts.next()) {
                    (Some(lo), Some(hi)) => match tree.query(lo, hi) {
                        Ok(rows) => {
                            for row in &rows {
                                println!("{} -> {} (ts: {})", row.key, row.value, row.timestamp);
                            }
                            println!("({} rows)", rows.len());
                        }
                        Err(e) => println!("ERR {e}"),
                    },
                    _ => println!("ERR usage: QUERY lo hi"),
                },
                "FLUSH" => match tree.flush_memtable() {
                    Ok(()) => println!("OK ({} parts)", tree.part_count()),
                    Err(e) => println!("ERR {e}"),
                },
                "MERGE" => match tree.merge_parts_sync() {
                    Ok(()) => println!("OK ({} parts)", tree.part_count()),
                    Err(e) => println!("ERR {e}"),
                },
                "OPTIMIZE" => match tree.optimize() {
                    Ok(()) => println!("OK ({} parts)", tree.part_count()),
                    Err(e) => println!("ERR {e}"),
                },
                "STATS" => print_stats(&tree),
                "EXIT" | "QUIT" => {
                    tree.shutdown();
                    println!("bye");
                    break;
                }
                other => println!("ERR unknown command: {other}"),
            }
        }
        print!("> ");
        io::stdout().flush().ok();
    }

    Ok(())
}
