//! Scrape cycle orchestrator: source → normalize → store/report.
//!
//! ## Sector cycle
//!
//! 1. First pass: every sector page is fetched concurrently. The fetcher's
//!    semaphore bounds in-flight requests; results stay isolated per task
//!    until joined here.
//! 2. Retry rounds (default 2) start only once the whole first pass has
//!    been joined, and only if at least one sector succeeded. Failed
//!    sectors are retried one at a time with a short randomized pause.
//! 3. Each usable scrape gets its trade date settled, its records stamped,
//!    its files written and its batch handed to the store.
//!
//! ## Update cycle
//!
//! `update()` runs investor flows, the index overview, the sector cycle and
//! the two downloaded reports in that order, emitting progress events on
//! an optional channel. One source failing never stops the others.

use crate::config::PipelineConfig;
use crate::loader;
use crate::models::{DataSource, Market, Report, SectorSlug, TradeDate};
use crate::report::ReportWriter;
use crate::scraper::dates::{self, ResolvedDate};
use crate::scraper::{MarketDataSource, SectorScrape, metrics};
use crate::storage::MarketStore;
use crate::utils::jitter_between;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

// ── Progress ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub step: String,
    pub percent: u8,
    pub message: String,
    pub details: serde_json::Value,
}

pub type ProgressTx = mpsc::UnboundedSender<ProgressEvent>;

// ── Outcomes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    Success,
    Partial,
    Failed,
}

impl CycleStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Partial => 1,
            Self::Failed => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source: String,
    pub ok: bool,
    pub records: usize,
    pub trade_date: Option<NaiveDate>,
    pub error: Option<String>,
}

impl SourceOutcome {
    fn failed(source: String, error: impl ToString) -> Self {
        Self {
            source,
            ok: false,
            records: 0,
            trade_date: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSummary {
    pub outcomes: Vec<SourceOutcome>,
}

impl CycleSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.ok).count()
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn status(&self) -> CycleStatus {
        match self.succeeded() {
            0 => CycleStatus::Failed,
            n if n < self.total() => CycleStatus::Partial,
            _ => CycleStatus::Success,
        }
    }

    pub fn log(&self) {
        for o in &self.outcomes {
            match &o.error {
                None => info!("[OK] {}: {} records", o.source, o.records),
                Some(e) => warn!("[FAILED] {}: {}", o.source, e),
            }
        }
        info!(
            "Completed: {}/{} sources ({})",
            self.succeeded(),
            self.total(),
            self.status().as_str()
        );
    }
}

/// Downloaded report files to load during `update`.
#[derive(Debug, Clone, Default)]
pub struct ReportFiles {
    pub nvdr: Option<PathBuf>,
    pub short_sales: Option<PathBuf>,
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline {
    source: Arc<dyn MarketDataSource>,
    store: Option<Arc<dyn MarketStore>>,
    reports: Option<ReportWriter>,
    config: PipelineConfig,
    progress: Option<ProgressTx>,
    today: NaiveDate,
}

impl Pipeline {
    pub fn new(source: Arc<dyn MarketDataSource>, config: PipelineConfig) -> Self {
        Self {
            source,
            store: None,
            reports: None,
            config,
            progress: None,
            today: chrono::Local::now().date_naive(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn MarketStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_reports(mut self, reports: ReportWriter) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn with_progress(mut self, tx: ProgressTx) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    fn emit(&self, step: &str, percent: u8, message: String, details: serde_json::Value) {
        debug!("[{:>3}%] {}: {}", percent, step, message);
        if let Some(tx) = &self.progress {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(ProgressEvent {
                step: step.to_string(),
                percent,
                message,
                details,
            });
        }
    }

    /// Source hint, else the store's latest date for `source`, else today.
    fn settle(&self, hint: Option<ResolvedDate>, source: DataSource, label: &str) -> TradeDate {
        let last_known = match hint {
            Some(_) => None,
            None => self
                .store
                .as_ref()
                .and_then(|s| s.latest_trade_date(source)),
        };
        let td = dates::settle_trade_date(hint, last_known, self.today);
        if td.is_degraded() {
            warn!(
                "{}: trade date {} is {:?}, not read unambiguously from the source",
                label, td.date, td.confidence
            );
        }
        td
    }

    // ── Sectors ───────────────────────────────────────────────────────────────

    pub async fn run_sectors(&self, sectors: &[SectorSlug], range: (u8, u8)) -> Vec<SourceOutcome> {
        let (from, to) = range;
        let total = sectors.len().max(1);
        self.emit(
            "sectors",
            from,
            format!("Scraping {} sector pages", sectors.len()),
            serde_json::json!({ "sectors": sectors }),
        );

        let handles: Vec<_> = sectors
            .iter()
            .map(|&slug| {
                let source = Arc::clone(&self.source);
                tokio::spawn(async move { source.fetch_sector(slug).await })
            })
            .collect();

        let mut results: Vec<Result<SectorScrape, String>> = Vec::with_capacity(sectors.len());
        for (done, (slug, handle)) in sectors.iter().zip(handles).enumerate() {
            let result = match handle.await {
                Ok(r) => r.map_err(|e| e.to_string()),
                Err(e) => {
                    error!("Task panic for {}: {}", slug, e);
                    Err(format!("task failed: {e}"))
                }
            };
            if let Err(e) = &result {
                warn!("{}: first pass failed: {}", slug, e);
            }
            results.push(result);

            let percent = from + ((to - from) as usize * (done + 1) / total) as u8;
            self.emit(
                "sectors",
                percent,
                format!("{} fetched", slug),
                serde_json::json!({ "sector": slug, "ok": results[done].is_ok() }),
            );
        }

        self.retry_failed(sectors, &mut results).await;

        let mut outcomes = Vec::with_capacity(sectors.len());
        for (slug, result) in sectors.iter().zip(results) {
            outcomes.push(match result {
                Ok(scrape) => self.finish_sector(scrape),
                Err(e) => SourceOutcome::failed(format!("sector:{slug}"), e),
            });
        }

        if let Some(reports) = &self.reports {
            if outcomes.iter().any(|o| o.ok) {
                if let Err(e) = reports.write_combined() {
                    warn!("Combined CSV not written: {:#}", e);
                }
            }
        }

        outcomes
    }

    async fn retry_failed(
        &self,
        sectors: &[SectorSlug],
        results: &mut [Result<SectorScrape, String>],
    ) {
        if results.iter().all(|r| r.is_err()) {
            if !results.is_empty() {
                warn!("Every sector failed on the first pass; not retrying");
            }
            return;
        }

        let delay = self.config.retry_delay_ms;
        for round in 1..=self.config.retry_rounds {
            let failed: Vec<usize> = (0..results.len())
                .filter(|&i| results[i].is_err())
                .collect();
            if failed.is_empty() {
                break;
            }
            info!("Retry round {}: {} sector(s)", round, failed.len());

            for i in failed {
                tokio::time::sleep(Duration::from_millis(delay) + jitter_between(0, delay)).await;
                let slug = sectors[i];
                results[i] = self
                    .source
                    .fetch_sector(slug)
                    .await
                    .map_err(|e| e.to_string());
                match &results[i] {
                    Ok(_) => info!("{}: recovered on retry {}", slug, round),
                    Err(e) => warn!("{}: retry {} failed: {}", slug, round, e),
                }
            }
        }
    }

    fn finish_sector(&self, mut scrape: SectorScrape) -> SourceOutcome {
        let slug = scrape.slug;
        let hint = metrics::timestamp_hint(&scrape.raw).or(scrape.metrics.trade_date.map(|date| {
            ResolvedDate {
                date,
                ambiguous: false,
            }
        }));
        let td = self.settle(hint, DataSource::SectorData, slug.as_str());
        for r in &mut scrape.records {
            r.trade_date = Some(td.date);
        }

        if let Some(reports) = &self.reports {
            if let Err(e) = reports.write_sector(&scrape, self.config.save_raw) {
                warn!("{}: report files not written: {:#}", slug, e);
            }
        }

        let saved = self
            .store
            .as_ref()
            .map(|s| s.save_sector_data(&scrape.records, slug, td.date))
            .unwrap_or(true);

        SourceOutcome {
            source: format!("sector:{slug}"),
            ok: saved,
            records: scrape.records.len(),
            trade_date: Some(td.date),
            error: (!saved).then(|| "store rejected batch".to_string()),
        }
    }

    // ── Investor flows / index ────────────────────────────────────────────────

    pub async fn run_investor(&self, market: Market, out_table: Option<&Path>) -> SourceOutcome {
        let name = format!("investor:{market}");
        let table = match self.source.fetch_investor_flows(market).await {
            Ok(t) => t,
            Err(e) => return SourceOutcome::failed(name, e),
        };

        let hint = table.trade_date.map(|date| ResolvedDate {
            date,
            ambiguous: false,
        });
        let td = self.settle(hint, DataSource::InvestorSummary, &name);

        if let Some(reports) = &self.reports {
            if let Err(e) = reports.write_investor_table(&table, out_table) {
                warn!("{}: table file not written: {:#}", name, e);
            }
        }

        let saved = self
            .store
            .as_ref()
            .map(|s| s.save_investor_summary(&table, td.date))
            .unwrap_or(true);
        SourceOutcome {
            source: name,
            ok: saved,
            records: table.records.len(),
            trade_date: Some(td.date),
            error: (!saved).then(|| "store rejected batch".to_string()),
        }
    }

    pub async fn run_index(&self) -> SourceOutcome {
        let name = "index".to_string();
        let overview = match self.source.fetch_index_overview().await {
            Ok(o) => o,
            Err(e) => return SourceOutcome::failed(name, e),
        };
        let hint = overview.as_of.map(|date| ResolvedDate {
            date,
            ambiguous: false,
        });
        let td = self.settle(hint, DataSource::SetIndex, &name);
        let saved = self
            .store
            .as_ref()
            .map(|s| s.save_index_metrics(&overview.records, td.date))
            .unwrap_or(true);
        SourceOutcome {
            source: name,
            ok: saved,
            records: overview.records.len(),
            trade_date: Some(td.date),
            error: (!saved).then(|| "store rejected batch".to_string()),
        }
    }

    // ── Downloaded reports ────────────────────────────────────────────────────

    fn finish_report<T>(
        &self,
        name: &str,
        source: DataSource,
        loaded: anyhow::Result<Report<T>>,
        save: impl FnOnce(&dyn MarketStore, &[T], NaiveDate) -> bool,
    ) -> SourceOutcome {
        let report = match loaded {
            Ok(r) => r,
            Err(e) => return SourceOutcome::failed(name.to_string(), format!("{e:#}")),
        };
        let hint = report.trade_date.map(|date| ResolvedDate {
            date,
            ambiguous: false,
        });
        let td = self.settle(hint, source, name);
        let saved = self
            .store
            .as_deref()
            .map(|s| save(s, &report.records, td.date))
            .unwrap_or(true);
        SourceOutcome {
            source: name.to_string(),
            ok: saved,
            records: report.records.len(),
            trade_date: Some(td.date),
            error: (!saved).then(|| "store rejected batch".to_string()),
        }
    }

    pub fn run_nvdr(&self, path: &Path) -> SourceOutcome {
        self.finish_report(
            "nvdr",
            DataSource::NvdrTrading,
            loader::load_nvdr(path),
            |s, records, date| s.save_nvdr_trading(records, date),
        )
    }

    pub fn run_short_sales(&self, path: &Path) -> SourceOutcome {
        self.finish_report(
            "short_sales",
            DataSource::ShortSalesTrading,
            loader::load_short_sales(path),
            |s, records, date| s.save_short_sales_trading(records, date),
        )
    }

    // ── Full cycle ────────────────────────────────────────────────────────────

    pub async fn update(&self, files: &ReportFiles) -> CycleSummary {
        let mut summary = CycleSummary::default();
        self.emit("start", 0, "Update started".into(), serde_json::Value::Null);

        self.emit("investor", 10, "Investor flows".into(), serde_json::Value::Null);
        let outcome = self.run_investor(self.config.market, None).await;
        self.emit("investor", 30, describe(&outcome), outcome_details(&outcome));
        summary.outcomes.push(outcome);

        let outcome = self.run_index().await;
        self.emit("index", 35, describe(&outcome), outcome_details(&outcome));
        summary.outcomes.push(outcome);

        let sectors = self.config.sectors.clone();
        summary
            .outcomes
            .extend(self.run_sectors(&sectors, (35, 90)).await);

        match &files.nvdr {
            Some(path) => {
                let outcome = self.run_nvdr(path);
                self.emit("nvdr", 95, describe(&outcome), outcome_details(&outcome));
                summary.outcomes.push(outcome);
            }
            None => self.emit("nvdr", 95, "No NVDR report; skipped".into(), serde_json::Value::Null),
        }

        match &files.short_sales {
            Some(path) => {
                let outcome = self.run_short_sales(path);
                self.emit("short_sales", 99, describe(&outcome), outcome_details(&outcome));
                summary.outcomes.push(outcome);
            }
            None => self.emit(
                "short_sales",
                99,
                "No short sales report; skipped".into(),
                serde_json::Value::Null,
            ),
        }

        let failed: Vec<&str> = summary
            .outcomes
            .iter()
            .filter(|o| !o.ok)
            .map(|o| o.source.as_str())
            .collect();
        self.emit(
            "complete",
            100,
            format!("{}/{} sources succeeded", summary.succeeded(), summary.total()),
            serde_json::json!({
                "status": summary.status().as_str(),
                "succeeded": summary.succeeded(),
                "total": summary.total(),
                "failed": failed,
            }),
        );
        summary
    }
}

fn describe(o: &SourceOutcome) -> String {
    match &o.error {
        None => format!("{}: {} records", o.source, o.records),
        Some(e) => format!("{}: {}", o.source, e),
    }
}

fn outcome_details(o: &SourceOutcome) -> serde_json::Value {
    serde_json::to_value(o).unwrap_or_default()
}
