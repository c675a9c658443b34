use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cache;
mod cleaner;
mod config;
mod consolidate;
mod error;
mod identity;
mod models;
mod pipeline;
mod progress;
mod ranking;
mod registry;
mod report;
mod schema;
mod storage;
mod summary;
mod table;

use config::Settings;
use pipeline::Pipeline;
use ranking::{Metric, RankingQuery};

#[derive(Parser)]
#[command(name = "simulacros")]
#[command(about = "Consolidates standardized-test rounds into per-student rankings", long_about = None)]
struct Cli {
    /// Directory holding the registry and stored tables
    #[arg(long, global = true, env = "SIMULACROS_DATA_ROOT")]
    data_root: Option<PathBuf>,

    /// TOML file with data_root, max_upload_mb and [[seed]] entries
    #[arg(long, global = true, env = "SIMULACROS_CONFIG")]
    config: Option<PathBuf>,

    /// Upload size limit in megabytes
    #[arg(long, global = true, env = "SIMULACROS_MAX_UPLOAD_MB")]
    max_upload_mb: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the registry with the seed rounds if it does not exist
    Bootstrap,
    /// List registered rounds and their state
    List,
    /// Report every problem in a spreadsheet without registering it
    Check {
        #[arg(long)]
        file: PathBuf,
    },
    /// Validate and store a new round
    Ingest {
        #[arg(long)]
        name: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "cli")]
        user: String,
    },
    /// Replace the stored table of an existing round
    Reingest {
        #[arg(long)]
        id: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "cli")]
        user: String,
    },
    /// Rank students across all ready rounds
    Rank {
        /// `overall`, a subject, an assessment id, or `<id>:<subject>`
        #[arg(long, default_value = "overall")]
        metric: String,
        #[arg(long)]
        min: Option<f64>,
        #[arg(long)]
        max: Option<f64>,
        #[arg(long)]
        grade: Vec<String>,
        #[arg(long)]
        search: Option<String>,
        /// Assessment ids whose scores are shown next to each student
        #[arg(long)]
        include: Vec<String>,
        #[arg(long, default_value_t = 30)]
        limit: usize,
    },
    /// Write the unified per-student table as CSV
    Unified {
        #[arg(long, default_value = "unified.csv")]
        out: PathBuf,
    },
    /// Show the aggregate summary of one round
    Summary {
        #[arg(long)]
        id: String,
    },
    /// Compare weighted averages between two rounds
    Progress {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long, default_value_t = 30)]
        limit: usize,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, default_value_t = 30)]
        limit: usize,
    },
}

fn print_outcome(outcome: &pipeline::IngestOutcome) -> anyhow::Result<()> {
    if outcome.success {
        println!("{}", outcome.message);
        Ok(())
    } else {
        if let Some(assessment) = &outcome.assessment {
            println!("{} is now {}.", assessment.id, assessment.state);
        }
        anyhow::bail!("{}", outcome.message)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simulacros=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    schema::check_synonyms().context("column synonym table is inconsistent")?;
    let settings = Settings::resolve(cli.config.as_deref(), cli.data_root, cli.max_upload_mb)
        .context("failed to resolve settings")?;
    let mut pipeline = Pipeline::open(settings);
    info!(data_root = %pipeline.settings().data_root.display(), "using data root");

    match cli.command {
        Commands::Bootstrap => {
            let assessments = pipeline.registry().bootstrap()?;
            println!("Registry ready with {} assessments.", assessments.len());
        }
        Commands::List => {
            let report = pipeline.load_all()?;
            for assessment in &report.assessments {
                println!(
                    "- {} ({}) {} [{}]",
                    assessment.id, assessment.name, assessment.state, assessment.path
                );
                for error in &assessment.errors {
                    println!("    {error}");
                }
            }
        }
        Commands::Check { file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let frame = cleaner::clean(table::parse_frame(&bytes)?);
            let errors = schema::schema_errors(&frame);
            if !errors.is_empty() {
                for error in &errors {
                    println!("- {error}");
                }
                anyhow::bail!("{} problem(s) found in {}", errors.len(), file.display());
            }
            println!("{} is valid with {} student rows.", file.display(), frame.rows.len());
        }
        Commands::Ingest { name, file, user } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            print_outcome(&pipeline.ingest(&name, &bytes, &user))?;
        }
        Commands::Reingest { id, file, user } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            print_outcome(&pipeline.reingest(&id, &bytes, &user))?;
        }
        Commands::Rank {
            metric,
            min,
            max,
            grade,
            search,
            include,
            limit,
        } => {
            let snapshot = pipeline.snapshot()?;
            for line in &snapshot.report.diagnostics {
                println!("warning: {line}");
            }
            let metric = Metric::parse(&metric);
            metric.check(&snapshot.unified)?;
            let query = RankingQuery {
                metric,
                min_value: min,
                max_value: max,
                grades: grade.into_iter().collect::<BTreeSet<_>>(),
                name_contains: search,
                include_assessments: include,
            };
            let entries = ranking::rank(&snapshot.unified, &query);
            if entries.is_empty() {
                println!("No students match these filters.");
                return Ok(());
            }
            for entry in ranking::top(&entries, limit) {
                let mut line = format!(
                    "{:>3}. {} ({}) {:.2}",
                    entry.rank,
                    entry.identity,
                    entry.grade.as_deref().unwrap_or("-"),
                    entry.metric_value
                );
                for projected in &entry.assessments {
                    match projected.weighted_average {
                        Some(avg) => line.push_str(&format!(" | {} {avg:.1}", projected.assessment_id)),
                        None => line.push_str(&format!(" | {} -", projected.assessment_id)),
                    }
                }
                println!("{line}");
            }
        }
        Commands::Unified { out } => {
            let snapshot = pipeline.snapshot()?;
            std::fs::write(&out, consolidate::to_csv_bytes(&snapshot.unified)?)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "Unified table with {} students written to {}.",
                snapshot.unified.records.len(),
                out.display()
            );
        }
        Commands::Summary { id } => {
            let summary = pipeline.summary(&id)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Progress { from, to, limit } => {
            let snapshot = pipeline.snapshot()?;
            let entries = progress::progression(&snapshot.unified, &from, &to)?;
            if entries.is_empty() {
                println!("No students took both {from} and {to}.");
                return Ok(());
            }
            for entry in entries.iter().take(limit) {
                println!(
                    "- {} {:.1} -> {:.1} ({:+.1})",
                    entry.identity, entry.from, entry.to, entry.delta
                );
            }
        }
        Commands::Report { out, limit } => {
            let snapshot = pipeline.snapshot()?;
            let entries = ranking::rank(&snapshot.unified, &RankingQuery::default());
            let report = report::build_report(&snapshot, &entries, limit);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
