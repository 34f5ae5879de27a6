//! cdc-sim - synthetic categorical streams with injected drift
//!
//! Each stream starts with batches drawn uniformly from `{1..categories}` and
//! switches to a skewed regime (category 1 over-represented) at `--drift-at`.
//! Streams run on their own threads; alerts are printed as JSON lines.
//!
//! Usage:
//!   cdc-sim --streams 4 --batches 200 --drift-at 120
//!   cdc-sim --config engine.json --skew 20 --metrics

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::{Parser, ValueEnum};
use crossbeam_channel::unbounded;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cdcstream::{
    AlertCode, Batch, BatchError, ChannelSink, ContextSelection, DilcaArgs, DilcaExtractor, DriftEngine,
    EngineConfig, NominalColumns, metrics,
};

#[derive(Parser)]
#[command(name = "cdc-sim")]
#[command(about = "Run the drift engine over synthetic categorical streams")]
struct Cli {
    /// Independent streams, one thread each
    #[arg(short, long, default_value = "1")]
    streams: usize,

    /// Batches per stream
    #[arg(short, long, default_value = "200")]
    batches: usize,

    /// Index of the first skewed batch (omit for a stationary stream)
    #[arg(short, long)]
    drift_at: Option<usize>,

    /// Records per batch
    #[arg(short, long, default_value = "10")]
    rows: usize,

    /// Attributes per record
    #[arg(short, long, default_value = "5")]
    columns: usize,

    /// Distinct categories per attribute
    #[arg(long, default_value = "9")]
    categories: u32,

    /// Weight of category 1 in the skewed regime (others weigh 1)
    #[arg(long, default_value = "12.0")]
    skew: f64,

    /// Base RNG seed; stream `i` uses `seed + i`
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Engine configuration as JSON (missing keys take defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// DILCA context selection
    #[arg(long, default_value = "relevance-redundancy")]
    context: ContextMode,

    /// Relevance multiplier for `--context relevance`
    #[arg(long, default_value = "1.0")]
    sigma: f64,

    /// Print Prometheus counters before exiting
    #[arg(long)]
    metrics: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum ContextMode {
    RelevanceRedundancy,
    Relevance,
}

struct StreamReport {
    stream: usize,
    processed: u64,
    failed: u64,
    warnings: usize,
    drifts: usize,
    first_drift: Option<u64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Unable to load engine configuration");
            return ExitCode::from(2);
        }
    };
    let args = DilcaArgs {
        nominal_cols: NominalColumns::All,
        context: match cli.context {
            ContextMode::RelevanceRedundancy => ContextSelection::RelevanceRedundancy,
            ContextMode::Relevance => ContextSelection::Relevance { sigma: cli.sigma },
        },
    };
    if cli.categories == 0 || cli.rows == 0 || cli.columns == 0 {
        error!("rows, columns and categories must be positive");
        return ExitCode::from(2);
    }
    let mut weights = vec![1.0; cli.categories as usize];
    weights[0] = cli.skew;
    let skewed = match WeightedIndex::new(&weights) {
        Ok(dist) => dist,
        Err(e) => {
            error!(skew = cli.skew, error = %e, "Invalid skew weight");
            return ExitCode::from(2);
        }
    };

    info!(
        streams = cli.streams,
        batches = cli.batches,
        drift_at = ?cli.drift_at,
        "Starting simulation"
    );

    let (tx, rx) = unbounded();
    let mut handles = Vec::with_capacity(cli.streams);
    for stream in 0..cli.streams {
        let engine = match DriftEngine::new(config.clone(), DilcaExtractor::new(), args.clone()) {
            Ok(engine) => engine.with_sink(ChannelSink::new(tx.clone())),
            Err(e) => {
                error!(error = %e, "Invalid engine configuration");
                return ExitCode::from(2);
            }
        };
        let generator = Generator {
            rng: StdRng::seed_from_u64(cli.seed.wrapping_add(stream as u64)),
            rows: cli.rows,
            columns: cli.columns,
            categories: cli.categories,
            skew: skewed.clone(),
        };
        let batches = cli.batches;
        let drift_at = cli.drift_at;

        handles.push(thread::spawn(move || {
            run_stream(stream, engine, generator, batches, drift_at)
        }));
    }
    // Workers hold the remaining senders; the loop below ends when they finish.
    drop(tx);

    for alert in rx.iter() {
        match serde_json::to_string(&alert) {
            Ok(line) => println!("{line}"),
            Err(e) => error!(error = %e, "Unable to encode alert"),
        }
    }

    let mut failed_workers = 0;
    for handle in handles {
        match handle.join() {
            Ok(report) => eprintln!(
                "stream {:>3}: {} batches ({} failed), {} warnings, {} drifts, first drift at {}",
                report.stream,
                report.processed,
                report.failed,
                report.warnings,
                report.drifts,
                report
                    .first_drift
                    .map_or_else(|| "-".to_string(), |b| b.to_string()),
            ),
            Err(_) => failed_workers += 1,
        }
    }

    if cli.metrics {
        print!("{}", metrics::gather_text());
    }

    if failed_workers > 0 {
        error!(failed_workers, "Stream workers panicked");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, String> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    EngineConfig::from_json(&raw).map_err(|e| e.to_string())
}

fn run_stream(
    stream: usize,
    mut engine: DriftEngine<DilcaExtractor>,
    mut generator: Generator,
    batches: usize,
    drift_at: Option<usize>,
) -> StreamReport {
    let mut report = StreamReport {
        stream,
        processed: 0,
        failed: 0,
        warnings: 0,
        drifts: 0,
        first_drift: None,
    };

    for i in 0..batches {
        let skewed = drift_at.is_some_and(|at| i >= at);
        let batch = match generator.batch(skewed) {
            Ok(batch) => batch,
            Err(e) => {
                error!(stream, batch = i, error = %e, "Unable to generate batch");
                report.failed += 1;
                continue;
            }
        };

        match engine.feed_new_batch(&batch) {
            Ok(outcome) => {
                report.processed += 1;
                match outcome.code {
                    AlertCode::Warning => report.warnings += 1,
                    AlertCode::Drift => {
                        report.drifts += 1;
                        report.first_drift.get_or_insert(outcome.batch_index);
                    }
                    AlertCode::None => {}
                }
            }
            Err(_) => report.failed += 1,
        }
    }
    report
}

struct Generator {
    rng: StdRng,
    rows: usize,
    columns: usize,
    categories: u32,
    skew: WeightedIndex<f64>,
}

impl Generator {
    fn batch(&mut self, skewed: bool) -> Result<Batch, BatchError> {
        let rows: Vec<Vec<u32>> = if skewed {
            (0..self.rows)
                .map(|_| {
                    (0..self.columns)
                        .map(|_| self.skew.sample(&mut self.rng) as u32 + 1)
                        .collect()
                })
                .collect()
        } else {
            (0..self.rows)
                .map(|_| {
                    (0..self.columns)
                        .map(|_| self.rng.random_range(1..=self.categories))
                        .collect()
                })
                .collect()
        };
        Batch::from_unnamed_rows(self.columns, rows)
    }
}
