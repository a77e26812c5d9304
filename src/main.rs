use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use infercore::bench::{self, DEFAULT_MAX_CONTEXT_LEN};
use infercore::{EngineConfig, Result, SleepExecutor};

const MB: f64 = 1024.0 * 1024.0;

#[derive(Parser, Debug)]
#[command(name = "infercore")]
#[command(about = "Batching scheduler and paged KV cache benchmarks")]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Command,
}

/// Engine settings; flags take precedence over the config file.
#[derive(Args, Debug)]
struct ConfigOverrides {
    /// JSON engine configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Total blocks in the KV cache pool
    #[arg(long, global = true)]
    num_blocks: Option<usize>,

    /// Tokens per block
    #[arg(long, global = true)]
    block_size: Option<usize>,

    /// Maximum requests per batch
    #[arg(long, global = true)]
    max_batch_size: Option<usize>,

    /// Batch wait timeout in milliseconds
    #[arg(long, global = true)]
    batch_timeout_ms: Option<u64>,

    /// Synthetic cost of one decode step in milliseconds
    #[arg(long, global = true)]
    step_delay_ms: Option<u64>,

    /// Return a request's blocks to the pool when it finishes
    #[arg(long, global = true)]
    release: bool,
}

impl ConfigOverrides {
    fn resolve(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_json_file(path)?,
            None => EngineConfig::default(),
        };

        if let Some(n) = self.num_blocks {
            config.cache.num_blocks = n;
        }
        if let Some(n) = self.block_size {
            config.cache.block_size = n;
        }
        if let Some(n) = self.max_batch_size {
            config.scheduler.max_batch_size = n;
        }
        if let Some(ms) = self.batch_timeout_ms {
            config.scheduler.batch_timeout_ms = ms;
        }
        if let Some(ms) = self.step_delay_ms {
            config.scheduler.step_delay_ms = ms;
        }
        if self.release {
            config.scheduler.release_on_completion = true;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push requests from many producer threads and report throughput
    Bench {
        /// Number of requests (one producer thread each)
        #[arg(long, default_value = "50")]
        requests: usize,
    },
    /// Compare contiguous and paged cache memory for a set of users
    Memtest {
        /// Number of simulated users
        #[arg(long, default_value = "50")]
        users: usize,

        /// Prompt tokens per user
        #[arg(long, default_value = "64")]
        prompt_len: usize,

        /// Context length the contiguous layout reserves per user
        #[arg(long, default_value_t = DEFAULT_MAX_CONTEXT_LEN)]
        max_context_len: usize,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = cli.overrides.resolve()?;
    println!("infercore v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Bench { requests } => {
            let executor = SleepExecutor::from_config(&config.scheduler);
            let summary = bench::run_throughput(config, requests, executor)?;

            println!("\n========================================");
            println!("Total Requests:   {}", summary.total_requests);
            println!("Completed:        {}", summary.completed_requests);
            println!("Batches:          {}", summary.batches);
            println!("Total Time:       {:.3} s", summary.elapsed.as_secs_f64());
            println!("Throughput:       {:.2} req/s", summary.throughput());
            println!("Mean Latency:     {} ms", summary.mean_latency.as_millis());
            println!("Max Latency:      {} ms", summary.max_latency.as_millis());
            println!("Dropped Tokens:   {}", summary.dropped_tokens);
            println!(
                "Cache Reserved:   {:.2} MB",
                summary.memory.reserved_bytes as f64 / MB
            );
            println!(
                "Cache Used:       {:.2} MB",
                summary.memory.used_bytes as f64 / MB
            );
            println!("========================================");
        }
        Command::Memtest {
            users,
            prompt_len,
            max_context_len,
        } => {
            let comparison =
                bench::run_memory_comparison(config.cache, users, prompt_len, max_context_len)?;

            println!("\n[Results]");
            println!("----------------------------------------");
            println!("Users Simulated:    {}", comparison.users);
            println!("Tokens per User:    {}", comparison.prompt_len);
            for (name, footprint) in [
                ("Contiguous", comparison.contiguous),
                ("Paged", comparison.paged),
            ] {
                println!("----------------------------------------");
                println!("{name}");
                println!(
                    "  Memory RESERVED:  {:.2} MB",
                    footprint.reserved_bytes as f64 / MB
                );
                println!(
                    "  Memory USED:      {:.2} MB",
                    footprint.used_bytes as f64 / MB
                );
                println!(
                    "  WASTED MEMORY:    {:.2} %",
                    footprint.waste_ratio() * 100.0
                );
            }
            println!("========================================");
        }
    }

    Ok(())
}
