mod config;
mod error;
mod loader;
mod models;
mod pipeline;
mod report;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{AppConfig, FetchFormat};
use crate::loader::discover_latest;
use crate::models::{Market, SectorSlug};
use crate::pipeline::{CycleSummary, Pipeline, ProgressEvent, ReportFiles, SourceOutcome};
use crate::report::ReportWriter;
use crate::scraper::SetScraper;
use crate::storage::{Repository, ALL_SOURCES};

#[derive(Parser)]
#[command(name = "set-etl", about = "SET market data scrape-and-normalize ETL", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape sector index pages: metrics, constituents, combined CSV
    Sectors {
        /// Comma-separated slugs (default: all eight sectors)
        #[arg(long, value_delimiter = ',')]
        sectors: Vec<SectorSlug>,

        /// auto, md or text
        #[arg(long)]
        format: Option<FetchFormat>,

        #[arg(long)]
        no_cache: bool,

        /// Keep the fetched page as <slug>.raw.<md|text>
        #[arg(long)]
        save_raw: bool,

        #[arg(long)]
        save_db: bool,

        #[arg(long)]
        outdir: Option<PathBuf>,

        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Scrape the investor-type trading summary
    Investor {
        /// SET or MAI
        #[arg(long)]
        market: Option<Market>,

        #[arg(long)]
        out_table: Option<PathBuf>,

        #[arg(long)]
        save_db: bool,
    },

    /// Scrape the index overview from the home page
    Index {
        #[arg(long)]
        save_db: bool,
    },

    /// Load an NVDR trading-by-stock workbook (newest nvdr_*.xlsx if omitted)
    Nvdr {
        file: Option<PathBuf>,

        #[arg(long, default_value = "downloads")]
        dir: PathBuf,

        #[arg(long)]
        save_db: bool,
    },

    /// Load a short-sales workbook (newest short_sales_*.xlsx if omitted)
    ShortSales {
        file: Option<PathBuf>,

        #[arg(long, default_value = "downloads")]
        dir: PathBuf,

        #[arg(long)]
        save_db: bool,
    },

    /// Full cycle: investor, index, sectors, NVDR, short sales → DuckDB
    Update {
        #[arg(long, default_value = "downloads")]
        reports_dir: PathBuf,

        #[arg(long)]
        nvdr_file: Option<PathBuf>,

        #[arg(long)]
        short_sales_file: Option<PathBuf>,
    },

    /// Show database statistics
    Stats,

    /// Apply schema migrations without loading data
    Migrate,
}

fn open_repo(config: &AppConfig) -> Result<Arc<Repository>> {
    let repo = Repository::open(&config.storage.db_path)?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }
    Ok(Arc::new(repo))
}

fn build_pipeline(config: &AppConfig, save_db: bool) -> Result<Pipeline> {
    let scraper = SetScraper::new(&config.scraper, config.pipeline.concurrency)?;
    let reports = ReportWriter::new(&config.pipeline.out_dir, config.csv_delimiter())?;
    let mut pipeline =
        Pipeline::new(Arc::new(scraper), config.pipeline.clone()).with_reports(reports);
    if save_db {
        pipeline = pipeline.with_store(open_repo(config)?);
    }
    Ok(pipeline)
}

fn report_file(file: Option<PathBuf>, dir: &Path, prefix: &str) -> Result<PathBuf> {
    match file {
        Some(f) => Ok(f),
        None => discover_latest(dir, prefix)?
            .ok_or_else(|| anyhow::anyhow!("No {}_*.xlsx found in {:?}", prefix, dir)),
    }
}

/// Record the cycle outcome on the `scrape_runs` row opened for it.
fn close_run(repo: &Repository, run_id: i64, summary: &CycleSummary) {
    let failed: Vec<&str> = summary
        .outcomes
        .iter()
        .filter(|o| !o.ok)
        .map(|o| o.source.as_str())
        .collect();
    let error = (!failed.is_empty()).then(|| format!("failed: {}", failed.join(", ")));
    if let Err(e) = repo.finish_scrape_run(
        run_id,
        summary.status().as_str(),
        summary.succeeded(),
        summary.total(),
        error.as_deref(),
    ) {
        warn!("Scrape run log not updated: {:#}", e);
    }
}

fn finish(outcomes: Vec<SourceOutcome>) -> ExitCode {
    let summary = CycleSummary { outcomes };
    summary.log();
    ExitCode::from(summary.status().exit_code())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "set_etl=info,warn",
        1 => "set_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    let code = match cli.command {
        Command::Sectors {
            sectors,
            format,
            no_cache,
            save_raw,
            save_db,
            outdir,
            concurrency,
        } => {
            let _t = utils::Timer::start("Sector scrape");
            if let Some(f) = format {
                config.scraper.format = f;
            }
            config.scraper.no_cache |= no_cache;
            config.pipeline.save_raw |= save_raw;
            if let Some(dir) = outdir {
                config.pipeline.out_dir = dir;
            }
            if let Some(n) = concurrency {
                config.pipeline.concurrency = n.max(1);
            }
            let sectors = if sectors.is_empty() {
                config.pipeline.sectors.clone()
            } else {
                sectors
            };
            info!(
                "Scraping {} sectors → {:?} (concurrency {})",
                sectors.len(),
                config.pipeline.out_dir,
                config.pipeline.concurrency
            );

            let pipeline = build_pipeline(&config, save_db)?;
            finish(pipeline.run_sectors(&sectors, (0, 100)).await)
        }

        Command::Investor {
            market,
            out_table,
            save_db,
        } => {
            let market = market.unwrap_or(config.pipeline.market);
            let pipeline = build_pipeline(&config, save_db)?;
            finish(vec![pipeline.run_investor(market, out_table.as_deref()).await])
        }

        Command::Index { save_db } => {
            let pipeline = build_pipeline(&config, save_db)?;
            finish(vec![pipeline.run_index().await])
        }

        Command::Nvdr { file, dir, save_db } => {
            let path = report_file(file, &dir, "nvdr")?;
            let pipeline = build_pipeline(&config, save_db)?;
            finish(vec![pipeline.run_nvdr(&path)])
        }

        Command::ShortSales { file, dir, save_db } => {
            let path = report_file(file, &dir, "short_sales")?;
            let pipeline = build_pipeline(&config, save_db)?;
            finish(vec![pipeline.run_short_sales(&path)])
        }

        Command::Update {
            reports_dir,
            nvdr_file,
            short_sales_file,
        } => {
            let _t = utils::Timer::start("Update cycle");
            let repo = open_repo(&config)?;
            let run_id = match repo.begin_scrape_run() {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!("Scrape run log not started: {:#}", e);
                    None
                }
            };

            let files = ReportFiles {
                nvdr: nvdr_file.or(discover_latest(&reports_dir, "nvdr")?),
                short_sales: short_sales_file.or(discover_latest(&reports_dir, "short_sales")?),
            };

            let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
            let watcher = tokio::spawn(async move {
                while let Some(e) = rx.recv().await {
                    info!("[{:>3}%] {}: {}", e.percent, e.step, e.message);
                }
            });

            let summary = build_pipeline(&config, false)?
                .with_store(repo.clone())
                .with_progress(tx)
                .update(&files)
                .await;
            // The pipeline (and its sender) is gone; drain the watcher.
            watcher.await.ok();

            if let Some(id) = run_id {
                close_run(&repo, id, &summary);
            }

            finish(summary.outcomes)
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;
            println!("─────────────────────────────────────────────");
            println!("  SET ETL: Database Stats");
            println!("─────────────────────────────────────────────");
            for source in ALL_SOURCES {
                let rows = repo.row_count(source)?;
                let latest = repo.max_trade_date(source)?;
                println!(
                    "  {:<20}: {:>10}  latest {}",
                    source.as_str(),
                    utils::fmt_number(rows),
                    latest.map(|d| d.to_string()).unwrap_or("—".into())
                );
            }
            println!(
                "  {:<20}: {:>10}",
                "sector symbols",
                utils::fmt_number(repo.sector_symbol_count()?)
            );
            if let Some((started, status)) = repo.last_scrape_run()? {
                println!("  Last run            : {} ({})", started, status);
            }
            println!("─────────────────────────────────────────────");
            ExitCode::SUCCESS
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}
