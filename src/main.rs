use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use winrate_diagnostics::config::{EngineConfig, LogFormat};
use winrate_diagnostics::engine::{self, DriverAnalysis};
use winrate_diagnostics::features::derive_features;
use winrate_diagnostics::insights;
use winrate_diagnostics::loader;
use winrate_diagnostics::metrics;
use winrate_diagnostics::models::Deal;
use winrate_diagnostics::report;
use winrate_diagnostics::risk::{self, OpenDealRisk};

mod db;

#[derive(Parser)]
#[command(name = "winrate-diagnostics")]
#[command(about = "Explain win rate movement and rank the drivers behind it", long_about = None)]
struct Cli {
    /// TOML configuration file (falls back to WINRATE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print headline win rate metrics for a deal file
    Metrics {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Fit both period models and print the ranked drivers
    Analyze {
        #[arg(long)]
        csv: PathBuf,
        /// Write the full analysis as JSON
        #[arg(long)]
        json: Option<PathBuf>,
        #[arg(long)]
        top_n: Option<usize>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value = "winrate-report.md")]
        out: PathBuf,
    },
    /// Score open deals by revenue at risk
    Risk {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Create or upgrade the database schema
    InitDb,
    /// Analyze a deal file and store the run
    Record {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List recorded runs
    History {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

fn init_logging(config: &EngineConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn load(csv: &Path) -> anyhow::Result<Vec<Deal>> {
    let loaded = loader::load_deals(csv)
        .with_context(|| format!("failed to load {}", csv.display()))?;
    if !loaded.is_valid() {
        eprintln!(
            "{} data quality issue(s) in {}:",
            loaded.issues.len(),
            csv.display()
        );
        for issue in &loaded.issues {
            eprintln!("  - {issue}");
        }
    }
    Ok(loaded.deals)
}

fn percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.1}%", v * 100.0))
        .unwrap_or_else(|| "n/a".to_string())
}

fn open_deal_risks(deals: &[Deal], analysis: &DriverAnalysis) -> Vec<OpenDealRisk> {
    risk::score_open_deals(&derive_features(deals), &analysis.recent_model)
}

fn print_analysis(analysis: &DriverAnalysis, top_n: usize) {
    println!(
        "Compared {} ({} closed) with {} ({} closed).",
        analysis.baseline_period,
        analysis.baseline_closed,
        analysis.recent_period,
        analysis.recent_closed
    );
    let lists = [
        ("Drivers hurting win rate:", &analysis.ranking.negative),
        ("Drivers helping win rate:", &analysis.ranking.positive),
    ];
    for (title, scores) in lists {
        println!("{title}");
        if scores.is_empty() {
            println!("  none");
        }
        for (index, score) in scores.iter().take(top_n).enumerate() {
            println!(
                "  {}. {} {} {} {:+.3} WRDS {:.3} (trend {}, x{:.2}){}",
                index + 1,
                score.driver,
                score.impact.arrow,
                score.impact.feature,
                score.impact.coefficient,
                score.wrds,
                score.trend.direction,
                score.trend_multiplier,
                if score.is_flagged() { " [unstable]" } else { "" }
            );
            if let Some(action) = score.suggested_actions.first() {
                println!("     next: {action}");
            }
        }
    }
    for unscored in &analysis.ranking.unscored {
        println!("Unscored {}: {}", unscored.driver, unscored.reason);
    }
    if !analysis.insights.is_empty() {
        println!("Insights:");
        print!("{}", report::insights_summary(&analysis.insights));
    }
    if !analysis.warnings.is_empty() {
        println!(
            "{} warning(s); see the report for details.",
            analysis.warnings.len()
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    init_logging(&config);

    match cli.command {
        Commands::Metrics { csv } => {
            let deals = derive_features(&load(&csv)?);
            let metrics = metrics::compute(&deals, &config);
            print!("{}", report::metrics_summary(&metrics));
            let min_sample = config.thresholds.min_segment_deals;
            let insights = insights::generate(&deals, &metrics, min_sample);
            if !insights.is_empty() {
                println!("Insights:");
                print!("{}", report::insights_summary(&insights));
            }
        }
        Commands::Analyze { csv, json, top_n } => {
            let deals = load(&csv)?;
            let analysis = engine::run(&deals, &config)
                .context("driver analysis failed")?;
            print_analysis(&analysis, top_n.unwrap_or(config.ranking.top_n));
            if let Some(path) = json {
                let body = serde_json::to_string_pretty(&analysis)?;
                std::fs::write(&path, body)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("Analysis written to {}.", path.display());
            }
        }
        Commands::Report { csv, out } => {
            let deals = load(&csv)?;
            let analysis = engine::run(&deals, &config)
                .context("driver analysis failed")?;
            let risks = open_deal_risks(&deals, &analysis);
            let body = report::build_report(&analysis, config.ranking.top_n, &risks);
            std::fs::write(&out, body)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Risk { csv, limit } => {
            let deals = load(&csv)?;
            let analysis = engine::run(&deals, &config)
                .context("driver analysis failed")?;
            let risks = open_deal_risks(&deals, &analysis);

            if risks.is_empty() {
                println!("No open deals to score.");
                return Ok(());
            }

            println!(
                "Open deals by revenue at risk (${:.0} total):",
                risk::total_revenue_at_risk(&risks)
            );
            for deal in risks.iter().take(limit) {
                println!(
                    "- {} ({}) ${:.0} at {:.1}% win probability, ${:.0} at risk",
                    deal.deal_id,
                    deal.sales_rep_id,
                    deal.amount,
                    deal.win_probability * 100.0,
                    deal.revenue_at_risk
                );
            }
        }
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Record { csv } => {
            let deals = load(&csv)?;
            let analysis = engine::run(&deals, &config)
                .context("driver analysis failed")?;
            let pool = connect().await?;
            db::record_run(&pool, &analysis).await?;
            info!(event_name = "run.recorded", run_id = %analysis.run_id, "analysis stored");
            println!("Recorded run {}.", analysis.run_id);
        }
        Commands::History { limit } => {
            let pool = connect().await?;
            let runs = db::fetch_runs(&pool, limit).await?;

            if runs.is_empty() {
                println!("No runs recorded yet.");
                return Ok(());
            }

            for run in runs {
                println!(
                    "- {} {} {} -> {}: win rate {}, RWWR {}, top negative driver {}",
                    run.generated_at.format("%Y-%m-%d %H:%M"),
                    run.id,
                    run.baseline_period,
                    run.recent_period,
                    percent(run.win_rate),
                    percent(run.revenue_weighted_win_rate),
                    run.top_negative_driver.as_deref().unwrap_or("none")
                );
            }
        }
    }

    Ok(())
}
