use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sweep_engine::data::load_bar_file;
use sweep_engine::execution::{ChannelSink, OrderEvent};
use sweep_engine::{BarOutcome, Engine, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "sweep-replay")]
#[command(about = "Replay recorded bars through the value-area sweep engine")]
struct Args {
    /// Bar file (CSV, optionally .zst compressed)
    #[arg(short, long, env = "SWEEP_BARS")]
    bars: PathBuf,

    /// Engine configuration (JSON); defaults apply to missing fields
    #[arg(short, long, env = "SWEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Instrument tick size (falls back to 0.25)
    #[arg(short, long, env = "SWEEP_TICK_SIZE")]
    tick_size: Option<Decimal>,

    /// Override the sweep threshold in ticks
    #[arg(long)]
    sweep_ticks: Option<u32>,

    /// Enable the trailing stop
    #[arg(long)]
    trailing: bool,

    /// Evaluate only the final bar (history warm-up)
    #[arg(long)]
    last_only: bool,

    /// Print verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {:?}", path))?;
            serde_json::from_str(&raw).with_context(|| format!("Failed to parse config: {:?}", path))?
        }
        None => EngineConfig::default(),
    };

    if let Some(ticks) = args.sweep_ticks {
        config.sweep_threshold_ticks = ticks;
    }
    if args.trailing {
        config.use_trailing_stop = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = load_config(&args)?;
    let series = load_bar_file(&args.bars)?;
    info!("Replaying {} bars from {:?}", series.len(), args.bars);

    let (sink, mut rx) = ChannelSink::new();

    // Order events go out as JSON lines, one per request
    let printer = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode order event: {}", e),
            }
            if matches!(event, OrderEvent::Submit(_)) {
                count += 1;
            }
        }
        count
    });

    let mut engine = Engine::new(config, args.tick_size, sink, series.indicators)
        .context("Invalid engine configuration")?;

    let last = series.bars.len().saturating_sub(1);
    let (mut entries, mut skipped, mut failed) = (0usize, 0usize, 0usize);
    let mut recorded_position = 0i64;

    for (index, bar) in series.bars.iter().enumerate() {
        let is_latest = !args.last_only || index == last;
        match engine.on_bar(index, bar, is_latest) {
            BarOutcome::Entered(_) => entries += 1,
            BarOutcome::Skipped(_) | BarOutcome::Rejected(_) => skipped += 1,
            BarOutcome::Failed(_) => failed += 1,
            BarOutcome::Observed | BarOutcome::TrailingExit(_) => {}
        }

        // Recorded fills arrive after the bar that caused them
        if let Some(net) = series.positions[index] {
            if net != recorded_position {
                recorded_position = net;
                engine.on_position_changed(net);
            }
        }
    }

    engine.stop();
    let status = engine.status();
    drop(engine);

    let submitted = printer.await.context("Order printer task failed")?;

    info!(
        "Replay done: {} entries | {} skipped | {} failed | {} orders sent",
        entries, skipped, failed, submitted
    );
    info!("{}", status);

    Ok(())
}
