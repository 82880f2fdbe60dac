//! File artifacts for a scrape cycle: per-sector metrics and constituents,
//! the combined constituents CSV and the investor-flow table.

use crate::models::{InvestorFlowTable, Period};
use crate::scraper::SectorScrape;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const COMBINED_FILE: &str = "combined_set_constituents.csv";
const CONSTITUENTS_SUFFIX: &str = ".constituents.csv";

pub struct ReportWriter {
    out_dir: PathBuf,
    delimiter: u8,
}

impl ReportWriter {
    pub fn new(out_dir: &Path, delimiter: u8) -> Result<Self> {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("Could not create output dir {:?}", out_dir))?;
        Ok(Self {
            out_dir: out_dir.to_path_buf(),
            delimiter,
        })
    }

    fn writer(&self, path: &Path) -> Result<csv::Writer<std::fs::File>> {
        csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Could not create {:?}", path))
    }

    /// `<slug>.metrics.txt`, `<slug>.constituents.csv` and, when asked,
    /// the raw page as `<slug>.raw.<md|text>`.
    pub fn write_sector(&self, scrape: &SectorScrape, save_raw: bool) -> Result<Vec<PathBuf>> {
        let slug = scrape.slug.as_str();
        let mut written = Vec::with_capacity(3);

        if save_raw {
            let raw = self
                .out_dir
                .join(format!("{slug}.raw.{}", scrape.format_used));
            std::fs::write(&raw, &scrape.raw)
                .with_context(|| format!("Could not write {:?}", raw))?;
            written.push(raw);
        }

        let metrics = self.out_dir.join(format!("{slug}.metrics.txt"));
        std::fs::write(&metrics, scrape.metrics.to_kv_text())
            .with_context(|| format!("Could not write {:?}", metrics))?;
        written.push(metrics);

        let table_path = self.out_dir.join(format!("{slug}{CONSTITUENTS_SUFFIX}"));
        let mut w = self.writer(&table_path)?;
        let mut header = scrape.table.columns().to_vec();
        header.push("Sector".into());
        w.write_record(&header)?;
        for row in scrape.table.rows() {
            w.write_record(row.iter().map(String::as_str).chain([slug]))?;
        }
        w.flush()?;
        debug!("{}: {} rows → {:?}", slug, scrape.table.len(), table_path);
        written.push(table_path);

        Ok(written)
    }

    /// Merge every `*.constituents.csv` in the output directory, in file
    /// name order, under the first file's header.
    pub fn write_combined(&self) -> Result<Option<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.out_dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(CONSTITUENTS_SUFFIX))
                    .unwrap_or(false)
            })
            .collect();
        if files.is_empty() {
            warn!("No constituents files in {:?} to combine", self.out_dir);
            return Ok(None);
        }
        files.sort();

        let mut header: Option<csv::StringRecord> = None;
        let mut rows = Vec::new();
        for path in &files {
            let mut reader = csv::ReaderBuilder::new()
                .delimiter(self.delimiter)
                .flexible(true)
                .from_path(path)
                .with_context(|| format!("Could not read {:?}", path))?;
            let own = reader.headers()?.clone();
            let fields = header.get_or_insert_with(|| own.clone()).clone();

            for record in reader.records() {
                let record = record?;
                // Align by column name; missing columns stay empty.
                let aligned: Vec<String> = fields
                    .iter()
                    .map(|f| {
                        own.iter()
                            .position(|h| h == f)
                            .and_then(|i| record.get(i))
                            .unwrap_or("")
                            .to_string()
                    })
                    .collect();
                rows.push(aligned);
            }
        }

        let combined = self.out_dir.join(COMBINED_FILE);
        let mut w = self.writer(&combined)?;
        if let Some(h) = &header {
            w.write_record(h)?;
        }
        for row in &rows {
            w.write_record(row)?;
        }
        w.flush()?;
        info!(
            "Combined {} files, {} rows → {:?}",
            files.len(),
            rows.len(),
            combined
        );
        Ok(Some(combined))
    }

    /// Investor table as one row per investor type, five columns per period.
    pub fn write_investor_table(
        &self,
        table: &InvestorFlowTable,
        path: Option<&Path>,
    ) -> Result<PathBuf> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| {
            self.out_dir
                .join(format!("investor_table_{}.csv", table.market))
        });
        let mut w = self.writer(&path)?;

        let mut header = vec!["Investor Type".to_string()];
        for label in &table.period_labels {
            for col in ["Buy", "Buy %", "Sell", "Sell %", "Net"] {
                header.push(format!("{label} {col}"));
            }
        }
        w.write_record(&header)?;

        for r in &table.records {
            let mut row = vec![r.investor_type.label().to_string()];
            for (_, f) in r.flows() {
                row.extend(
                    [f.buy_value, f.buy_percent, f.sell_value, f.sell_percent, f.net_value]
                        .iter()
                        .map(|v| v.to_string()),
                );
            }
            w.write_record(&row)?;
        }
        w.flush()?;
        info!(
            "{} investor table ({} rows, {} periods) → {:?}",
            table.market,
            table.records.len(),
            Period::ALL.len(),
            path
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        InvestorFlowRecord, InvestorType, Market, PeriodFlow, RawTable, SectorMetrics, SectorSlug,
    };

    fn scrape(slug: SectorSlug, rows: &[(&str, &str)]) -> SectorScrape {
        let table = RawTable::new(
            vec!["Symbol".into(), "Last".into()],
            rows.iter()
                .map(|(s, l)| vec![s.to_string(), l.to_string()])
                .collect(),
        )
        .unwrap();
        SectorScrape {
            slug,
            format_used: "md",
            raw: "Markdown Content:\n| Symbol | Last |".into(),
            metrics: SectorMetrics::new(slug.as_str()),
            table,
            records: vec![],
        }
    }

    #[test]
    fn sector_files_and_combined_csv() {
        let dir = tempfile::tempdir().unwrap();
        let w = ReportWriter::new(dir.path(), b',').unwrap();

        let files = w
            .write_sector(&scrape(SectorSlug::Tech, &[("DELTA", "150.50")]), true)
            .unwrap();
        assert_eq!(files.len(), 3);
        assert!(dir.path().join("tech.raw.md").exists());
        w.write_sector(&scrape(SectorSlug::Agro, &[("GFPT", "11.20"), ("TFG", "3.50")]), false)
            .unwrap();

        let metrics = std::fs::read_to_string(dir.path().join("agro.metrics.txt")).unwrap();
        assert!(metrics.starts_with("sector=AGRO\n"));

        let csv = std::fs::read_to_string(dir.path().join("agro.constituents.csv")).unwrap();
        assert_eq!(csv, "Symbol,Last,Sector\nGFPT,11.20,agro\nTFG,3.50,agro\n");

        let combined = w.write_combined().unwrap().unwrap();
        let text = std::fs::read_to_string(combined).unwrap();
        assert_eq!(
            text,
            "Symbol,Last,Sector\nGFPT,11.20,agro\nTFG,3.50,agro\nDELTA,150.50,tech\n"
        );
    }

    #[test]
    fn combined_with_nothing_to_merge() {
        let dir = tempfile::tempdir().unwrap();
        let w = ReportWriter::new(&dir.path().join("nested"), b';').unwrap();
        assert!(w.write_combined().unwrap().is_none());
    }

    #[test]
    fn investor_table_layout() {
        let dir = tempfile::tempdir().unwrap();
        let w = ReportWriter::new(dir.path(), b',').unwrap();
        let flow = PeriodFlow {
            buy_value: 1.5,
            buy_percent: 2.0,
            sell_value: 3.0,
            sell_percent: 4.0,
            net_value: -1.5,
        };
        let table = InvestorFlowTable {
            market: Market::Mai,
            as_of: None,
            trade_date: None,
            period_labels: ["Daily".into(), "Month-to-Date".into(), "Year-to-Date".into()],
            records: vec![InvestorFlowRecord {
                investor_type: InvestorType::ALL[0],
                daily: flow,
                month_to_date: flow,
                year_to_date: flow,
            }],
        };
        let path = w.write_investor_table(&table, None).unwrap();
        assert!(path.ends_with("investor_table_MAI.csv"));

        let text = std::fs::read_to_string(path).unwrap();
        let mut lines = text.lines();
        let header: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(header.len(), 16);
        assert_eq!(header[1], "Daily Buy");
        assert_eq!(header[15], "Year-to-Date Net");
        assert!(lines.next().unwrap().ends_with(",-1.5"));
    }
}
