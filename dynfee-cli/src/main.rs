//! dynfee CLI: drive the fee controller offline.
//!
//! Commands:
//! - `replay`: run a CSV observation script through the engine hook, one JSON line per transaction
//! - `simulate`: seeded random walk of one pool, printed as a table
//! - `config`: print the default controller configuration as TOML

mod script;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use dynfee_core::{
    ControllerConfig, FeeController, ManualClock, PoolId, TracingListener, TransactionOutcome,
};

#[derive(Parser)]
#[command(name = "dynfee", about = "dynfee CLI: volatility-driven fee controller")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a CSV script of `entity,position[,timestamp]` rows.
    Replay {
        /// Path to the CSV script.
        #[arg(long)]
        input: PathBuf,

        /// Controller config (TOML). Defaults to the reference parameters.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write JSON lines here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Fee the engine charges when the controller has no record.
        #[arg(long, default_value_t = 3000)]
        engine_default_fee: u32,
    },
    /// Simulate a random walk of one pool and print the fee path.
    Simulate {
        /// Controller config (TOML). Defaults to the reference parameters.
        #[arg(long)]
        config: Option<PathBuf>,

        /// RNG seed.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Number of transactions.
        #[arg(long, default_value_t = 50)]
        steps: usize,

        /// Maximum tick move per ordinary transaction.
        #[arg(long, default_value_t = 20)]
        step_ticks: i64,

        /// Insert a burst every N transactions (0 disables bursts).
        #[arg(long, default_value_t = 15)]
        burst_every: usize,

        /// Tick size of a burst move.
        #[arg(long, default_value_t = 200)]
        burst_ticks: i64,
    },
    /// Print the default configuration as TOML.
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            input,
            config,
            output,
            engine_default_fee,
        } => run_replay(&input, config.as_deref(), output.as_deref(), engine_default_fee),
        Commands::Simulate {
            config,
            seed,
            steps,
            step_ticks,
            burst_every,
            burst_ticks,
        } => run_simulate(config.as_deref(), seed, steps, step_ticks, burst_every, burst_ticks),
        Commands::Config => {
            print!("{}", ControllerConfig::default().to_toml()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ControllerConfig> {
    let config = match path {
        Some(path) => ControllerConfig::from_file(path)?,
        None => ControllerConfig::default(),
    };
    debug!(fingerprint = %config.fingerprint(), "controller config loaded");
    Ok(config)
}

fn run_replay(
    input: &Path,
    config_path: Option<&Path>,
    output: Option<&Path>,
    engine_default_fee: u32,
) -> Result<()> {
    let config = load_config(config_path)?;
    let fingerprint = config.fingerprint();

    let file = File::open(input).with_context(|| format!("open {}", input.display()))?;
    let rows = script::read_script(file)?;
    if rows.is_empty() {
        bail!("{} contains no rows", input.display());
    }

    // Rows without timestamps are stamped one second apart from the epoch,
    // so replays of the same script produce the same state digest.
    let clock = Arc::new(ManualClock::default());
    let mut hook = FeeController::with_clock(config, clock.clone())?;

    let mut sink: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };

    let summary = script::replay(&mut hook, &rows, engine_default_fee, |line| {
        clock.advance_millis(1000);
        serde_json::to_writer(&mut sink, line)?;
        sink.write_all(b"\n")?;
        Ok(())
    })?;
    sink.flush()?;

    let registry = hook.registry();
    eprintln!("rows:          {}", summary.rows);
    eprintln!("entities:      {}", summary.registrations);
    eprintln!("observations:  {}", summary.observations);
    eprintln!("config:        {fingerprint}");
    eprintln!("state digest:  {}", registry.state_digest());
    Ok(())
}

fn run_simulate(
    config_path: Option<&Path>,
    seed: u64,
    steps: usize,
    step_ticks: i64,
    burst_every: usize,
    burst_ticks: i64,
) -> Result<()> {
    if step_ticks < 0 || burst_ticks < 0 {
        bail!("--step-ticks and --burst-ticks must be non-negative");
    }
    let config = load_config(config_path)?;
    let mut hook: FeeController = FeeController::new(config)?;
    hook.subscribe(TracingListener);

    let id = PoolId::from("sim");
    let mut rng = StdRng::seed_from_u64(seed);
    let mut position: i64 = 0;
    hook.initialize(id.clone(), position)?;

    println!(
        "{:>5}  {:>10}  {:>8}  {:>12}  {:>7}  {:>7}",
        "step", "position", "move", "estimate", "charged", "next"
    );
    println!("{}", "-".repeat(60));

    for step in 1..=steps {
        let burst = burst_every > 0 && step % burst_every == 0;
        let (next, delta) = walk_step(&mut rng, position, step_ticks, burst.then_some(burst_ticks))
            .with_context(|| format!("step {step}"))?;
        position = next;

        let charged = hook.pre_transaction(&id).or(config_default_fee(&hook));
        let record = hook.post_transaction(&id, &TransactionOutcome::at_position(position))?;
        println!(
            "{:>5}  {:>10}  {:>8}  {:>12}  {:>7}  {:>7}",
            step, position, delta, record.estimate, charged, record.fee
        );
    }

    let metrics = hook.metrics(&id)?;
    println!();
    println!(
        "final fee {} ({:.2} bp), estimate {}",
        metrics.current_fee,
        metrics.current_fee as f64 / 100.0,
        metrics.volatility_estimate
    );
    Ok(())
}

/// One random-walk move: a uniform step plus an optional burst of either sign.
fn walk_step(
    rng: &mut impl Rng,
    position: i64,
    step_ticks: i64,
    burst_ticks: Option<i64>,
) -> Result<(i64, i64)> {
    if step_ticks < 0 {
        bail!("step bound {step_ticks} is negative");
    }
    let mut delta = rng.gen_range(-step_ticks..=step_ticks);
    if let Some(burst) = burst_ticks {
        let burst = if rng.gen_bool(0.5) {
            burst
        } else {
            match burst.checked_neg() {
                Some(burst) => burst,
                None => bail!("burst {burst} cannot be negated"),
            }
        };
        delta = match delta.checked_add(burst) {
            Some(delta) => delta,
            None => bail!("move {delta} + burst {burst} overflows i64"),
        };
    }
    match position.checked_add(delta) {
        Some(next) => Ok((next, delta)),
        None => bail!("position {position} + move {delta} overflows i64"),
    }
}

fn config_default_fee(hook: &FeeController) -> u32 {
    hook.registry().config().default_fee
}
