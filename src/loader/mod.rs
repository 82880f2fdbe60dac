//! Loaders for the downloaded exchange workbooks: NVDR trading by stock and
//! daily short sales. Both reports are positional; the header row wording
//! changes between releases, the column order does not.

pub mod xlsx;

use crate::error::ScrapeError;
use crate::models::{NvdrRecord, RawTable, Report, ShortSaleRecord};
use crate::scraper::cleaner::{normalize_symbol, parse_integer, parse_number};
use crate::scraper::dates;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const NVDR_DATE_ROWS: usize = 7;
const SHORT_SALES_DATE_ROWS: usize = 12;

fn cell(row: &[String], i: usize) -> &str {
    row.get(i).map(String::as_str).unwrap_or("")
}

fn int_at(row: &[String], i: usize) -> Option<i64> {
    parse_integer(cell(row, i))
}

fn num_at(row: &[String], i: usize) -> Option<f64> {
    parse_number(cell(row, i))
}

/// First "As of" date (English or Thai) within the leading rows.
fn report_date(table: &RawTable, scan_rows: usize) -> Option<NaiveDate> {
    table
        .grid()
        .take(scan_rows)
        .flat_map(|row| row.iter())
        .find_map(|c| dates::find_as_of(c))
}

pub fn nvdr_report(table: &RawTable, source_name: &str) -> Result<Report<NvdrRecord>, ScrapeError> {
    let trade_date = report_date(table, NVDR_DATE_ROWS);
    if trade_date.is_none() {
        warn!("{}: no 'As of' date in the report heading", source_name);
    }

    let grid: Vec<&[String]> = table.grid().collect();
    let header = grid
        .iter()
        .position(|row| row.iter().any(|c| c.contains("Symbol")))
        .ok_or_else(|| ScrapeError::parse(source_name, "Symbol header row"))?;

    let records: Vec<NvdrRecord> = grid[header + 1..]
        .iter()
        .filter_map(|row| {
            let symbol = normalize_symbol(cell(row, 0))?;
            Some(NvdrRecord {
                symbol,
                volume_buy: int_at(row, 1),
                volume_sell: int_at(row, 2),
                volume_total: int_at(row, 3),
                volume_net: int_at(row, 4),
                volume_percent: num_at(row, 5),
                value_buy: int_at(row, 6),
                value_sell: int_at(row, 7),
                value_total: int_at(row, 8),
                value_net: int_at(row, 9),
                value_percent: num_at(row, 10),
            })
        })
        .collect();

    if records.is_empty() {
        return Err(ScrapeError::parse(source_name, "NVDR rows"));
    }
    debug!("{}: header at grid row {}", source_name, header);
    Ok(Report {
        records,
        trade_date,
    })
}

pub fn short_sales_report(
    table: &RawTable,
    source_name: &str,
) -> Result<Report<ShortSaleRecord>, ScrapeError> {
    let trade_date = report_date(table, SHORT_SALES_DATE_ROWS);
    if trade_date.is_none() {
        warn!("{}: no report date in the heading", source_name);
    }

    // Data rows are the ones whose first cell is a ticker.
    let records: Vec<ShortSaleRecord> = table
        .grid()
        .filter_map(|row| Some((normalize_symbol(cell(row, 0))?, row)))
        .map(|(symbol, row)| ShortSaleRecord {
            symbol,
            short_volume_local: int_at(row, 1),
            short_volume_nvdr: int_at(row, 2),
            short_volume_total: int_at(row, 3),
            short_value_baht: int_at(row, 4),
            short_percentage: num_at(row, 5),
            outstanding_local: int_at(row, 6),
            outstanding_nvdr: int_at(row, 7),
            outstanding_total: int_at(row, 8),
            outstanding_percentage: num_at(row, 9),
        })
        .collect();

    if records.is_empty() {
        return Err(ScrapeError::parse(source_name, "short sales rows"));
    }
    Ok(Report {
        records,
        trade_date,
    })
}

pub fn load_nvdr(path: &Path) -> Result<Report<NvdrRecord>> {
    debug!("Loading NVDR report from {:?}", path);
    let table = xlsx::parse_file(path).with_context(|| format!("Failed to read {:?}", path))?;
    let report = nvdr_report(&table, &path.display().to_string())?;
    info!(
        "NVDR: {} symbols (as of {})",
        report.records.len(),
        report.trade_date.map(|d| d.to_string()).unwrap_or("?".into())
    );
    Ok(report)
}

pub fn load_short_sales(path: &Path) -> Result<Report<ShortSaleRecord>> {
    debug!("Loading short sales report from {:?}", path);
    let table = xlsx::parse_file(path).with_context(|| format!("Failed to read {:?}", path))?;
    let report = short_sales_report(&table, &path.display().to_string())?;
    info!(
        "Short sales: {} symbols (as of {})",
        report.records.len(),
        report.trade_date.map(|d| d.to_string()).unwrap_or("?".into())
    );
    Ok(report)
}

/// Newest `<prefix>_*.xlsx` in `dir`. Download names carry a sortable
/// timestamp, so the lexically greatest name is the latest.
pub fn discover_latest(dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }

    let stem_prefix = format!("{prefix}_");
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path.is_file()
            && path.extension().map(|e| e == "xlsx").unwrap_or(false)
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&stem_prefix))
                .unwrap_or(false);
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files.pop())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::xlsx::tests::{build_xlsx, sheet};
    use tokio_test::{assert_err, assert_ok};

    fn table(rows: &[&[&str]]) -> RawTable {
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let mut grid: Vec<Vec<String>> = rows
            .iter()
            .map(|r| {
                let mut v: Vec<String> = r.iter().map(|s| s.to_string()).collect();
                v.resize(width, String::new());
                v
            })
            .collect();
        let header = grid.remove(0);
        RawTable::new(header, grid).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn nvdr_rows_follow_symbol_header() {
        let t = table(&[
            &["NVDR Trading by Stock"],
            &["As of 15 Aug 2025"],
            &["", "Volume", "", "", "", "", "Value"],
            &["Symbol", "Buy", "Sell", "Total", "Net", "%", "Buy", "Sell", "Total", "Net", "%"],
            &["PTT", "1,000", "400", "1,400", "600", "12.5", "34,500", "13,800", "48,300", "20,700", "11.2"],
            &["AOT", "200", "300", "500", "-100", "3.1", "12,000", "18,000", "30,000", "-6,000", "2.0"],
            &["Total", "1,200", "700", "1,900", "500", "", "", "", "", "", ""],
        ]);
        let report = nvdr_report(&t, "nvdr.xlsx").unwrap();
        assert_eq!(report.trade_date, Some(d(2025, 8, 15)));
        assert_eq!(report.records.len(), 2);

        let ptt = &report.records[0];
        assert_eq!(ptt.symbol, "PTT");
        assert_eq!(ptt.volume_total, Some(1400));
        assert_eq!(ptt.volume_percent, Some(12.5));
        assert_eq!(ptt.value_net, Some(20700));
        assert_eq!(report.records[1].volume_net, Some(-100));
    }

    #[test]
    fn nvdr_without_symbol_header_is_a_parse_error() {
        let t = table(&[&["Heading"], &["PTT", "1"]]);
        assert!(matches!(
            nvdr_report(&t, "x.xlsx"),
            Err(ScrapeError::Parse { .. })
        ));
    }

    #[test]
    fn short_sales_with_thai_heading() {
        let t = table(&[
            &["รายงานการขายชอร์ต"],
            &["ข้อมูล ณ วันที่ 15 ส.ค. 2568"],
            &["หลักทรัพย์", "Local", "NVDR"],
            &["KBANK", "10,000", "2,000", "12,000", "1,704,000", "0.52", "50,000", "5,000", "55,000", "0.02"],
            &["SCB", "5,000", "-", "5,000", "552,500", "0.30", "", "", "", ""],
            &["รวม", "15,000"],
        ]);
        let report = short_sales_report(&t, "short.xlsx").unwrap();
        assert_eq!(report.trade_date, Some(d(2025, 8, 15)));
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].short_value_baht, Some(1_704_000));
        assert_eq!(report.records[0].outstanding_percentage, Some(0.02));
        assert_eq!(report.records[1].short_volume_nvdr, None);
        assert_eq!(report.records[1].outstanding_total, None);
    }

    #[test]
    fn loads_nvdr_workbook_from_disk() {
        let rows = r#"<row r="1"><c r="A1" t="inlineStr"><is><t>NVDR Trading by Stock As of 15 Aug 2025</t></is></c></row>
<row r="2"><c r="A2" t="inlineStr"><is><t>Symbol</t></is></c><c r="B2" t="inlineStr"><is><t>Buy</t></is></c></row>
<row r="3"><c r="A3" t="inlineStr"><is><t>DELTA</t></is></c><c r="B3"><v>5000</v></c></row>"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvdr_20250815_170000.xlsx");
        std::fs::write(&path, build_xlsx(None, &sheet(rows))).unwrap();

        let report = assert_ok!(load_nvdr(&path));
        assert_eq!(report.trade_date, Some(d(2025, 8, 15)));
        assert_eq!(report.records[0].symbol, "DELTA");
        assert_eq!(report.records[0].volume_buy, Some(5000));
    }

    #[test]
    fn corrupt_workbook_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short_sales_20250815.xlsx");
        std::fs::write(&path, b"<html>rate limited</html>").unwrap();
        assert_err!(load_short_sales(&path));
    }

    #[test]
    fn discovers_newest_download() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "nvdr_20250814_170000.xlsx",
            "nvdr_20250815_170000.xlsx",
            "short_sales_20250816_170000.xlsx",
            "nvdr_notes.txt",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let latest = discover_latest(dir.path(), "nvdr").unwrap().unwrap();
        assert!(latest.ends_with("nvdr_20250815_170000.xlsx"));
        assert!(discover_latest(dir.path(), "missing").unwrap().is_none());
        assert!(discover_latest(&dir.path().join("nope"), "nvdr").unwrap().is_none());
    }
}
