//! YCSB trace driver.
//!
//! Loads a pool (creating it if missing), replays a load-phase trace
//! single-threaded, replays a run-phase trace across worker threads, and
//! writes `<name>_throughput.res` and `<name>_latency.res` next to the
//! run file.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use strata::config::StrataConfig;
use strata::workload::{self, Op};
use strata::{MappedPool, StrataIndex};

#[derive(Parser, Debug)]
#[command(name = "ycsb", about = "Replay YCSB traces against a pool-resident index")]
struct Args {
    /// Pool file; created if it does not exist.
    pool_file: PathBuf,
    /// Load-phase trace, replayed single-threaded.
    load_file: PathBuf,
    /// Run-phase trace, partitioned across threads.
    run_file: PathBuf,
    /// Number of worker threads for the run phase.
    thread_num: usize,
    /// Basename for the result files; defaults to the run file's stem.
    #[arg(long)]
    name: Option<String>,
    /// Pool size in bytes when creating a fresh pool.
    #[arg(long)]
    pool_size: Option<u64>,
}

fn apply<P: strata::PmemPool>(index: &StrataIndex<u64, u64, P>, op: Op) {
    match op {
        Op::Insert(key) => {
            if let Err(err) = index.insert(key, key) {
                tracing::error!(key, error = %err, "insert failed");
            }
        }
        Op::Read(key) => {
            index.contains(&key);
        }
        Op::Update(key) => {
            index.update(&key, key);
        }
        Op::Delete(key) => {
            index.erase(&key);
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() as f64) * p).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if args.thread_num == 0 {
        return Err("thread_num must be at least 1".into());
    }

    let config = StrataConfig::load_from_env()?;
    let pool_size = args.pool_size.unwrap_or(config.pool_options().size);

    let (pool, index) = if args.pool_file.exists() {
        let pool = Arc::new(MappedPool::open(&args.pool_file)?);
        let index = StrataIndex::<u64, u64, _>::open(Arc::clone(&pool))?;
        (pool, index)
    } else {
        let pool = Arc::new(MappedPool::create(&args.pool_file, pool_size)?);
        let index =
            StrataIndex::<u64, u64, _>::create(Arc::clone(&pool), &config.index_options())?;
        (pool, index)
    };

    // Load phase: single-threaded population.
    let load_ops = workload::load_trace(&args.load_file)?;
    let load_start = Instant::now();
    for &op in &load_ops {
        apply(&index, op);
    }
    let load_secs = load_start.elapsed().as_secs_f64();
    tracing::info!(
        ops = load_ops.len(),
        secs = load_secs,
        "load phase complete"
    );

    // Run phase: partitioned across worker threads, per-op latencies.
    let run_ops = workload::load_trace(&args.run_file)?;
    let chunk = run_ops.len().div_ceil(args.thread_num);
    let run_start = Instant::now();
    let mut latencies: Vec<u64> = Vec::new();
    if !run_ops.is_empty() {
        let collected = thread::scope(|scope| {
            let mut handles = Vec::new();
            for part in run_ops.chunks(chunk) {
                let index = &index;
                handles.push(scope.spawn(move || {
                    let mut nanos = Vec::with_capacity(part.len());
                    for &op in part {
                        let begin = Instant::now();
                        apply(index, op);
                        nanos.push(begin.elapsed().as_nanos() as u64);
                    }
                    nanos
                }));
            }
            handles
                .into_iter()
                .flat_map(|h| h.join().expect("worker thread panicked"))
                .collect::<Vec<_>>()
        });
        latencies = collected;
    }
    let run_secs = run_start.elapsed().as_secs_f64();
    tracing::info!(
        ops = run_ops.len(),
        secs = run_secs,
        threads = args.thread_num,
        "run phase complete"
    );

    let name = args.name.unwrap_or_else(|| {
        args.run_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ycsb".to_string())
    });
    let out_dir = args
        .run_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let throughput = format!(
        "load_ops {}\nload_secs {:.6}\nload_ops_per_sec {:.0}\n\
         run_ops {}\nrun_secs {:.6}\nrun_ops_per_sec {:.0}\n\
         threads {}\ncapacity {}\ndepth {}\n",
        load_ops.len(),
        load_secs,
        load_ops.len() as f64 / load_secs.max(f64::EPSILON),
        run_ops.len(),
        run_secs,
        run_ops.len() as f64 / run_secs.max(f64::EPSILON),
        args.thread_num,
        index.capacity(),
        index.depth(),
    );
    fs::write(out_dir.join(format!("{name}_throughput.res")), throughput)?;

    latencies.sort_unstable();
    let mean = if latencies.is_empty() {
        0
    } else {
        latencies.iter().sum::<u64>() / latencies.len() as u64
    };
    let latency = format!(
        "count {}\nmean_ns {}\np50_ns {}\np90_ns {}\np99_ns {}\np999_ns {}\nmax_ns {}\n",
        latencies.len(),
        mean,
        percentile(&latencies, 0.50),
        percentile(&latencies, 0.90),
        percentile(&latencies, 0.99),
        percentile(&latencies, 0.999),
        latencies.last().copied().unwrap_or(0),
    );
    fs::write(out_dir.join(format!("{name}_latency.res")), latency)?;

    drop(index);
    drop(pool);
    Ok(())
}
