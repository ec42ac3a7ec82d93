use anyhow::Result;
use carbon_query::{
    CarbonAwareEngine, EngineConfig, ExecutionStrategy, MetricsCollector, QueryAnalyzer, QueryRows, Urgency,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Rows printed before the output is truncated
const PREVIEW_ROWS: usize = 20;

#[derive(Parser)]
#[command(name = "carbon-query")]
#[command(about = "Carbon-aware SQL execution with energy profiling")]
#[command(version)]
struct Args {
    /// JSON config file (environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true)]
    db: Option<String>,

    /// Grid zone for carbon data
    #[arg(long, global = true)]
    zone: Option<String>,

    /// Append every execution record to this JSON-lines file
    #[arg(long, global = true)]
    metrics_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a query on the variant the selector picks
    Run {
        sql: String,

        /// batch, low, medium, high, critical (or 1-5)
        #[arg(short, long, default_value = "medium")]
        urgency: Urgency,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,

        /// Save the session's metrics to this file
        #[arg(long)]
        save_metrics: Option<PathBuf>,
    },
    /// Execute a query once per strategy and compare energy and carbon
    Compare {
        sql: String,
    },
    /// Profile a query on one strategy over repeated trials
    Bench {
        sql: String,

        #[arg(short, long, default_value = "balanced")]
        strategy: ExecutionStrategy,

        /// Trials after one warm-up run (default from config)
        #[arg(short, long)]
        iterations: Option<usize>,
    },
    /// Show the features extracted from a query
    Analyze {
        sql: String,
    },
    /// Show the three compiled variants of a query
    Variants {
        sql: String,
    },
    /// Show the current carbon intensity and forecast
    Carbon {
        /// Forecast horizon in hours (default from config)
        #[arg(long)]
        hours: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command {
        Commands::Run { sql, urgency, json, save_metrics } => run(config, sql, urgency, json, save_metrics).await,
        Commands::Compare { sql } => compare(config, sql).await,
        Commands::Bench { sql, strategy, iterations } => bench(config, sql, strategy, iterations).await,
        Commands::Analyze { sql } => analyze(sql),
        Commands::Variants { sql } => variants(config, sql),
        Commands::Carbon { hours } => carbon(config, hours).await,
    }
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?.with_env_overrides()?,
        None => EngineConfig::from_env()?,
    };

    if let Some(db) = &args.db {
        config.db_path = db.clone();
    }
    if let Some(zone) = &args.zone {
        config.zone = zone.clone();
    }
    if let Some(log) = &args.metrics_log {
        config.metrics_log = Some(log.clone());
    }
    Ok(config)
}

fn build_engine(config: EngineConfig) -> Result<(CarbonAwareEngine, Arc<MetricsCollector>)> {
    let collector = Arc::new(match &config.metrics_log {
        Some(path) => MetricsCollector::with_log_file(path.clone()),
        None => MetricsCollector::new(),
    });
    let engine = CarbonAwareEngine::from_config(config, collector.clone())?;
    Ok((engine, collector))
}

async fn run(
    config: EngineConfig,
    sql: String,
    urgency: Urgency,
    json: bool,
    save_metrics: Option<PathBuf>,
) -> Result<()> {
    let (engine, collector) = build_engine(config)?;
    let outcome = engine.execute(&sql, urgency).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("\n{}", "=".repeat(60));
        println!(" CARBON-AWARE EXECUTION DECISION");
        println!("{}", "=".repeat(60));
        println!("{}", outcome.decision.explain());
        println!(
            "Carbon now: {:.0} gCO2/kWh ({})",
            outcome.carbon.value_gco2_per_kwh, outcome.carbon.source
        );
        println!("{}", "=".repeat(60));

        if let Some(until) = outcome.decision.defer_until(chrono::Utc::now()) {
            println!("\nDeferred: re-submit after {}", until.format("%Y-%m-%d %H:%M UTC"));
        }
        if let Some(measurement) = &outcome.measurement {
            println!("\nMeasured: {}", measurement);
            if let Some(grams) = outcome.carbon_grams() {
                println!("Emitted: {:.6} g CO2", grams);
            }
        }
        if let Some(rows) = &outcome.rows {
            print_rows(rows);
        }
    }

    if let Some(path) = save_metrics {
        collector.save(&path)?;
        info!("Saved metrics to {}", path.display());
    }
    Ok(())
}

async fn compare(config: EngineConfig, sql: String) -> Result<()> {
    let (engine, collector) = build_engine(config)?;
    let comparison = engine.compare_strategies(&sql).await?;

    println!(
        "\nCarbon intensity: {:.0} gCO2/kWh ({})",
        comparison.carbon.value_gco2_per_kwh, comparison.carbon.source
    );
    println!("{:<10} {:>8} {:>12} {:>12} {:>10} {:>14}", "strategy", "rows", "energy (J)", "time (ms)", "power (W)", "carbon (g)");
    for (strategy, run) in comparison.runs.iter() {
        println!(
            "{:<10} {:>8} {:>12.4} {:>12.2} {:>10.2} {:>14.6}",
            strategy.to_string(),
            run.rows.row_count(),
            run.measurement.energy_joules,
            run.measurement.duration_ms,
            run.measurement.power_watts(),
            comparison.carbon_grams(strategy)
        );
    }
    println!("\nLowest energy: {}", comparison.most_efficient());

    let summary = collector.summary();
    println!(
        "Session: {} runs, {:.4} J, {:.6} g CO2",
        summary.count, summary.total_energy_joules, summary.total_carbon_grams
    );
    Ok(())
}

async fn bench(
    config: EngineConfig,
    sql: String,
    strategy: ExecutionStrategy,
    iterations: Option<usize>,
) -> Result<()> {
    let iterations = iterations.unwrap_or(config.profile_iterations);
    let (engine, _collector) = build_engine(config)?;
    let result = engine.benchmark(&sql, strategy, iterations).await?;

    println!("\n{} over {} runs", result.strategy, result.measurement.iterations);
    println!("{}", result.measurement);
    println!(
        "Carbon per run: {:.6} g CO2 at {:.0} gCO2/kWh",
        result.carbon_grams(),
        result.carbon.value_gco2_per_kwh
    );
    Ok(())
}

fn analyze(sql: String) -> Result<()> {
    let features = QueryAnalyzer::new().analyze(&sql);
    println!("{}", serde_json::to_string_pretty(&features)?);
    Ok(())
}

fn variants(config: EngineConfig, sql: String) -> Result<()> {
    let compiler = match config.max_threads {
        Some(threads) => carbon_query::VariantCompiler::with_parallelism(threads),
        None => carbon_query::VariantCompiler::new(),
    };
    for (_, variant) in compiler.compile(&sql).iter() {
        println!("{}", variant);
        if let Some(rewritten) = &variant.rewritten_sql {
            println!("    {}", rewritten.replace('\n', "\n    "));
        }
    }
    Ok(())
}

async fn carbon(config: EngineConfig, hours: Option<i64>) -> Result<()> {
    let source = config.carbon_source()?;
    let now = source.get_current().await?;
    println!(
        "{}: {:.0} gCO2/kWh ({}) [{}]",
        now.zone,
        now.value_gco2_per_kwh,
        now.band(&config.thresholds),
        now.source
    );

    let horizon = chrono::Duration::hours(hours.unwrap_or(config.forecast_horizon_hours));
    let forecast = source.get_forecast(horizon).await?;
    for point in forecast.points() {
        println!(
            "  {}  {:>6.0} ± {:<4.0} gCO2/kWh",
            point.timestamp.format("%Y-%m-%d %H:%M UTC"),
            point.value_gco2_per_kwh,
            point.uncertainty_gco2_per_kwh
        );
    }
    if let Some(min) = forecast.min_point() {
        println!("Cleanest: {:.0} gCO2/kWh at {}", min.value_gco2_per_kwh, min.timestamp.format("%H:%M UTC"));
    }
    Ok(())
}

fn print_rows(rows: &QueryRows) {
    println!("\n{}", rows.columns.join(" | "));
    for row in rows.rows.iter().take(PREVIEW_ROWS) {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        println!("{}", cells.join(" | "));
    }
    if rows.row_count() > PREVIEW_ROWS {
        println!("... {} more rows", rows.row_count() - PREVIEW_ROWS);
    }
    println!("({} rows)", rows.row_count());
}
