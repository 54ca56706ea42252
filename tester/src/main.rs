use std::time::Duration;

use clap::{Parser, Subcommand};
use log::error;
use pcache::{CacheError, CacheStats, ConfigError, PageCacheConfig, PageId};
use thiserror::Error;

use crate::{
    performance::{mixed_workload::MixedWorkload, resize_under_load::ResizeUnderLoad},
    suite::{Suite, TestResult},
    workload::Workload,
};

mod performance;
mod suite;
mod workload;

#[derive(Parser)]
#[command(name = "tester")]
#[command(about = "pcache stress tester running concurrent transactions against one cache", long_about = None)]
struct Cli {
    /// Page size in bytes, overrides PCACHE_PAGE_SIZE
    #[arg(long)]
    page_size: Option<usize>,

    /// Number of pool slots, overrides PCACHE_CAPACITY
    #[arg(long)]
    capacity: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all available test cases
    List,

    /// Run a specific test case
    Run {
        /// Name of the test case to run
        test: String,

        /// How many times to run the test and average the time
        runs: u32,

        /// Number of concurrent transactions
        #[arg(long, default_value_t = 8)]
        threads: usize,

        /// Run only read transactions. Otherwise the first transaction is a writer
        #[arg(long)]
        read_only: bool,

        /// Fetches done by every transaction
        #[arg(long, default_value_t = 10_000)]
        ops: usize,

        /// Number of distinct page ids
        #[arg(long, default_value_t = 1024)]
        keys: u32,

        /// Maximum number of pages held by a transaction at once
        #[arg(long, default_value_t = 4)]
        hold: usize,
    },
}

#[derive(Debug, Error)]
enum TesterError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("page {page_id} has unexpected content")]
    Corrupted { page_id: PageId },

    #[error("test run before its setup")]
    NotSetUp,

    #[error("worker thread panicked")]
    WorkerPanicked,

    #[error("cache left in inconsistent state: {stats:?}")]
    Inconsistent { stats: CacheStats },

    #[error("page size {0} leaves no room for page stamp")]
    PageTooSmall(usize),

    #[error("unknown test: {0}")]
    UnknownTest(String),
}

fn load_config(cli: &Cli) -> Result<PageCacheConfig, TesterError> {
    let mut config = PageCacheConfig::from_env()?;
    if let Some(page_size) = cli.page_size {
        config.page_size = page_size;
    }
    if let Some(capacity) = cli.capacity {
        config.capacity = capacity;
    }
    config.validate()?;
    if config.page_size <= workload::STAMP_LEN {
        return Err(TesterError::PageTooSmall(config.page_size));
    }
    Ok(config)
}

fn run_test(
    test: &str,
    runs: u32,
    config: PageCacheConfig,
    workload: Workload,
) -> Result<Vec<TestResult>, TesterError> {
    let mut test_results = Vec::with_capacity(runs as _);
    for _ in 0..runs {
        let result = match test {
            "mixed_workload" => MixedWorkload::new(config, workload.clone()).run_suite()?,
            "resize_under_load" => ResizeUnderLoad::new(config, workload.clone()).run_suite()?,
            _ => return Err(TesterError::UnknownTest(test.to_string())),
        };
        test_results.push(result);
    }
    Ok(test_results)
}

fn main() -> Result<(), TesterError> {
    env_logger::init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::List => {
            println!("Available tests:");
            println!("  - mixed_workload: readers and writers fetching random pages concurrently");
            println!("  - resize_under_load: mixed workload while the cache is resized repeatedly");
            Ok(())
        }
        Command::Run {
            test,
            runs,
            threads,
            read_only,
            ops,
            keys,
            hold,
        } => {
            let workload = Workload {
                threads,
                writers: if read_only { 0 } else { threads.min(1) },
                ops_per_thread: ops,
                keys: keys.max(1),
                max_held: hold.max(1),
            };
            let test_results = run_test(&test, runs, config, workload).inspect_err(|e| {
                error!("test '{test}' failed: {e}");
            })?;

            report_stats(&test, &test_results);
            Ok(())
        }
    }
}

fn report_stats(test_name: &str, results: &[TestResult]) {
    if results.is_empty() {
        println!("No runs executed for test '{}'.", test_name);
        return;
    }

    let total: Duration = results.iter().map(|r| &r.duration).copied().sum();
    let mean = total / results.len() as u32;
    let ops: u64 = results.iter().map(|r| r.fetches).sum();

    println!("Test '{}':", test_name);
    println!("  Runs: {}", results.len());
    println!("  Mean time: {:.3?}", mean);
    println!("  Fetches/s: {:.0}", ops as f64 / total.as_secs_f64());

    for (i, r) in results.iter().enumerate() {
        println!(
            "  Run {:>3}: {:.3?} fetches {} misses {} private {} | capacity {} slots {} recyclable {} free {}",
            i + 1,
            r.duration,
            r.fetches,
            r.misses,
            r.private,
            r.stats.capacity,
            r.stats.slots,
            r.stats.recyclable,
            r.stats.free,
        );
    }
}
