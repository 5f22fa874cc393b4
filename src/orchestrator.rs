//! 压测编排模块
//!
//! 按 Idle -> Loading -> Writing -> WarmupRead -> TimedRead -> Done 的顺序推进，
//! 操作数为 0 或未开启的阶段直接跳过。每个阶段切分任务、
//! 每份任务起一个线程、全部结束后计时并输出报告。

use crate::config::{WARMUP_DIVISOR, WorkloadSpec};
use crate::error::{BenchError, Result};
use crate::metrics::{MetricsSnapshot, delta, format_cache_call_detail};
use crate::partition::{assigned, partition};
use crate::store::{CacheCallDetail, Store, StoreMetrics};
use crate::workload::{Pattern, Worker, WorkerStats, seed_for};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// 编排状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Loading,
    Writing,
    WarmupRead,
    TimedRead,
    Done,
}

impl Stage {
    /// 下一个状态，Done 为终态
    pub fn next(self) -> Stage {
        match self {
            Stage::Idle => Stage::Loading,
            Stage::Loading => Stage::Writing,
            Stage::Writing => Stage::WarmupRead,
            Stage::WarmupRead => Stage::TimedRead,
            Stage::TimedRead | Stage::Done => Stage::Done,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Idle => "Idle",
            Stage::Loading => "Init write",
            Stage::Writing => "Random update",
            Stage::WarmupRead => "Warm up read",
            Stage::TimedRead => "Random read",
            Stage::Done => "Done",
        }
    }
}

/// 单个阶段的结果
#[derive(Clone, Debug)]
pub struct PhaseReport {
    pub stage: Stage,
    pub pattern: Pattern,
    /// 配置的操作数
    pub ops: u64,
    /// 切分后实际分配的操作数
    pub assigned: u64,
    pub elapsed: Duration,
    pub stats: WorkerStats,
    pub before: MetricsSnapshot,
    pub after: MetricsSnapshot,
}

impl PhaseReport {
    /// 吞吐 = ops * 1000 / 毫秒，耗时为 0 时记 0
    pub fn throughput(&self) -> f64 {
        let ms = self.elapsed_ms();
        if ms > 0.0 {
            self.ops as f64 * 1000.0 / ms
        } else {
            0.0
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }

    /// 阶段前后的缓存计数差
    pub fn delta(&self) -> MetricsSnapshot {
        delta(&self.before, &self.after)
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{}: {} ops in {:.2} ms ({:.2} ops/s)",
            self.stage.label(),
            self.ops,
            self.elapsed_ms(),
            self.throughput()
        )
    }
}

/// 整次运行的结果
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub phases: Vec<PhaseReport>,
    pub final_metrics: StoreMetrics,
    pub cache_calls: CacheCallDetail,
}

impl RunSummary {
    pub fn phase(&self, stage: Stage) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.stage == stage)
    }
}

/// 压测编排器
pub struct Orchestrator<'s, S: Store> {
    spec: WorkloadSpec,
    store: &'s S,
}

impl<'s, S: Store> Orchestrator<'s, S> {
    pub fn new(spec: WorkloadSpec, store: &'s S) -> Result<Self> {
        spec.validate()?;
        Ok(Self { spec, store })
    }

    pub fn spec(&self) -> &WorkloadSpec {
        &self.spec
    }

    /// 某个状态要执行的负载与操作数，需要跳过时返回 `None`
    pub fn stage_plan(&self, stage: Stage) -> Option<(Pattern, u64)> {
        let spec = &self.spec;
        let keyspace = spec.total_records;
        match stage {
            Stage::Loading if spec.needs_init && spec.total_records > 0 => {
                let pattern = if spec.batch_mode {
                    Pattern::Batch
                } else {
                    Pattern::Sequential
                };
                Some((pattern, spec.total_records))
            }
            Stage::Writing if spec.write_ops > 0 => {
                Some((Pattern::RandomWrite { keyspace }, spec.write_ops))
            }
            Stage::WarmupRead if spec.read_ops > 0 && keyspace / WARMUP_DIVISOR > 0 => {
                Some((Pattern::RandomRead { keyspace }, keyspace / WARMUP_DIVISOR))
            }
            Stage::TimedRead if spec.read_ops > 0 => {
                Some((Pattern::RandomRead { keyspace }, spec.read_ops))
            }
            _ => None,
        }
    }

    /// 依次执行所有阶段
    pub fn run(&self) -> Result<RunSummary> {
        let spec = &self.spec;
        println!("Threads: {}", spec.thread_count);
        println!(
            "Total data: {} while needInit={}",
            spec.total_records, spec.needs_init
        );
        println!(
            "Ops: {} write ops and {} read ops",
            spec.write_ops, spec.read_ops
        );

        let mut phases = Vec::new();
        let mut stage = Stage::Idle;
        loop {
            stage = stage.next();
            if stage == Stage::Done {
                break;
            }
            let Some((pattern, ops)) = self.stage_plan(stage) else {
                debug!(?stage, "stage skipped");
                continue;
            };
            if stage == Stage::TimedRead && !spec.settle_delay.is_zero() {
                info!(delay = ?spec.settle_delay, "waiting for background work to settle");
                thread::sleep(spec.settle_delay);
            }
            let report = self.run_phase(stage, pattern, ops)?;
            self.print_phase(&report);
            phases.push(report);
        }

        let summary = RunSummary {
            phases,
            final_metrics: self.store.metrics(),
            cache_calls: self.store.cache_calls(),
        };
        println!("Final DB State \n{}", summary.final_metrics);
        println!("{}", format_cache_call_detail(&summary.cache_calls));
        Ok(summary)
    }

    /// 执行一个阶段：切分、起线程、等待全部结束
    pub fn run_phase(&self, stage: Stage, pattern: Pattern, ops: u64) -> Result<PhaseReport> {
        let shares = partition(ops, self.spec.thread_count)?;
        let assigned = assigned(&shares);
        if assigned < ops {
            debug!(?stage, dropped = ops - assigned, "uneven split, remainder dropped");
        }

        let store = self.store;
        let seed = self.spec.seed;
        let policy = self.spec.error_policy;
        info!(?stage, pattern = pattern.name(), ops, threads = shares.len(), "phase started");

        let before = MetricsSnapshot::capture(store);
        let start = Instant::now();
        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = shares
                .iter()
                .map(|&share| {
                    s.spawn(move || {
                        Worker::new(share.thread_id, seed_for(seed, share.thread_id))
                            .policy(policy)
                            .run(pattern, share.op_count, store)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        });
        let elapsed = start.elapsed();
        let after = MetricsSnapshot::capture(store);

        let mut stats = WorkerStats::default();
        let mut first_err = None;
        for result in results {
            match result {
                Ok(Ok(s)) => stats.merge(&s),
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(_) => {
                    first_err.get_or_insert(BenchError::Worker(format!(
                        "{} worker panicked",
                        pattern.name()
                    )));
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        Ok(PhaseReport {
            stage,
            pattern,
            ops,
            assigned,
            elapsed,
            stats,
            before,
            after,
        })
    }

    fn print_phase(&self, report: &PhaseReport) {
        match report.stage {
            Stage::WarmupRead => {
                println!("\n{}", format_cache_call_detail(&self.store.cache_calls()));
                println!("========= Warm up done ===============");
            }
            Stage::TimedRead => {
                let d = report.delta();
                println!("{}", report.summary_line());
                println!(
                    "Filter: Hit Count {}; Miss Count: {}",
                    d.filter_hits, d.filter_misses
                );
                println!(
                    "BlockCache: Hit Count {}; Miss Count: {}",
                    d.block_cache_hits, d.block_cache_misses
                );
                println!(
                    "TableCache: Hit Count {}; Miss Count: {}",
                    d.table_cache_hits, d.table_cache_misses
                );
                println!("Avg I/O per Get ≈ {:.4}", d.avg_io_per_get(report.ops));
                println!("Read hit rate: {:.2}%", report.stats.hit_rate() * 100.0);
            }
            _ => {
                println!("{}", report.summary_line());
                println!("DB State \n{}", self.store.metrics());
            }
        }
        if report.stats.failed > 0 {
            println!(
                "{}: {} of {} operations failed",
                report.stage.label(),
                report.stats.failed,
                report.assigned
            );
        }
    }
}
