//! 压测入口
//!
//! 用法：
//!   kv-load-bench -i -T 100000000 -w 1000000 -r 1000000   # 先灌数再随机读写
//!   kv-load-bench -T 100000000 -r 1000000 -w 0            # 只做随机读
//!   kv-load-bench -i -b false -T 1000000 -w 0 -r 0        # 顺序灌数

use clap::{ArgAction, Parser};
use kv_load_bench::config::{ErrorPolicy, MAX_OPEN_FILES, WorkloadSpec, defaults, messages};
use kv_load_bench::error::{ErrorContext, Result};
use kv_load_bench::orchestrator::Orchestrator;
use kv_load_bench::store::{DefaultStore, Store, StoreOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;
#[cfg(not(feature = "rocksdb"))]
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kv-load-bench", about = "Ordered key-value store load benchmark")]
struct Cli {
    /// Insert kvs before the test.
    #[arg(short = 'i', long)]
    needs_init: bool,

    /// Number of kvs to insert before the test; also the random keyspace.
    #[arg(short = 'T', long, default_value_t = defaults::TOTAL_RECORDS)]
    total_records: u64,

    /// Number of random writes during the test.
    #[arg(short = 'w', long, default_value_t = defaults::WRITE_OPS)]
    write_ops: u64,

    /// Number of random reads during the test.
    #[arg(short = 'r', long, default_value_t = defaults::READ_OPS)]
    read_ops: u64,

    /// Use batched inserts for the initial load.
    #[arg(short = 'b', long, default_value_t = true, action = ArgAction::Set)]
    batch_mode: bool,

    /// Cache size in MB.
    #[arg(short = 'c', long, default_value_t = defaults::CACHE_SIZE_MB)]
    cache_size_mb: usize,

    /// Number of worker threads.
    #[arg(short = 't', long, default_value_t = defaults::THREADS)]
    threads: u64,

    /// Data directory for the store.
    #[arg(short = 'p', long, default_value = defaults::DATA_DIR)]
    data_dir: PathBuf,

    /// Log level, 3 and above prints per-thread progress.
    #[arg(short = 'l', long, default_value_t = defaults::LOG_LEVEL)]
    log_level: u8,

    /// Fixed base seed for the random workloads.
    #[arg(long)]
    seed: Option<u64>,

    /// Pause between warm-up and timed reads, in seconds.
    #[arg(long, default_value_t = kv_load_bench::config::SETTLE_DELAY_SECS)]
    settle_secs: u64,

    /// Stop a worker at its first failed operation.
    #[arg(long)]
    fail_fast: bool,
}

impl Cli {
    fn into_spec(self) -> WorkloadSpec {
        WorkloadSpec {
            needs_init: self.needs_init,
            total_records: self.total_records,
            write_ops: self.write_ops,
            read_ops: self.read_ops,
            thread_count: self.threads,
            batch_mode: self.batch_mode,
            cache_size_mb: self.cache_size_mb,
            data_dir: self.data_dir,
            log_level: self.log_level,
            seed: self.seed,
            settle_delay: Duration::from_secs(self.settle_secs),
            error_policy: if self.fail_fast {
                ErrorPolicy::FailFast
            } else {
                ErrorPolicy::Ignore
            },
        }
    }
}

fn init_tracing(spec: &WorkloadSpec) {
    let filter = EnvFilter::builder()
        .with_default_directive(spec.level_filter().into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(spec: WorkloadSpec) -> Result<()> {
    spec.validate().with_context(messages::INVALID_SPEC)?;

    #[cfg(not(feature = "rocksdb"))]
    warn!("built without the rocksdb feature, data is kept in memory only");

    let store = DefaultStore::open(StoreOptions::new(
        &spec.data_dir,
        spec.cache_size_mb,
        MAX_OPEN_FILES,
    ))
    .with_context(messages::STORE_OPEN_FAILED)?;

    let outcome = Orchestrator::new(spec, &store)
        .and_then(|orchestrator| orchestrator.run())
        .with_context(messages::PHASE_FAILED);
    let closed = store.close();
    outcome?;
    closed
}

fn main() -> ExitCode {
    let spec = Cli::parse().into_spec();
    init_tracing(&spec);

    match run(spec) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "benchmark aborted");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_flags_match_defaults() {
        let spec = Cli::parse_from(["kv-load-bench"]).into_spec();
        assert!(!spec.needs_init);
        assert!(spec.batch_mode);
        assert_eq!(spec.thread_count, 32);
        assert_eq!(spec.cache_size_mb, 512);
        assert_eq!(spec.log_level, 3);
        assert_eq!(spec.error_policy, ErrorPolicy::Ignore);
    }

    #[test]
    fn short_flags_are_parsed() {
        let spec = Cli::parse_from([
            "kv-load-bench", "-i", "-T", "1000", "-w", "10", "-r", "20", "-b", "false", "-c",
            "64", "-t", "2", "-p", "/tmp/db", "-l", "1", "--seed", "9", "--settle-secs", "0",
            "--fail-fast",
        ])
        .into_spec();
        assert!(spec.needs_init);
        assert!(!spec.batch_mode);
        assert_eq!(spec.total_records, 1000);
        assert_eq!(spec.write_ops, 10);
        assert_eq!(spec.read_ops, 20);
        assert_eq!(spec.cache_size_mb, 64);
        assert_eq!(spec.thread_count, 2);
        assert_eq!(spec.data_dir, PathBuf::from("/tmp/db"));
        assert_eq!(spec.seed, Some(9));
        assert!(spec.settle_delay.is_zero());
        assert_eq!(spec.error_policy, ErrorPolicy::FailFast);
    }
}
