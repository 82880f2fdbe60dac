use crate::error::ScrapeError;
use crate::models::{
    IndexMetricRecord, IndexOverview, InvestorFlowRecord, InvestorFlowTable, InvestorType,
    Market, PeriodFlow, RawTable,
};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::cleaner::{
    is_group_label, normalize_symbol, parse_integer, parse_number, strip_markdown_link, to_num,
    unlink,
};
use super::dates;

// ── Content kinds & targets ───────────────────────────────────────────────────

/// What the proxy handed back, judged from the body itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Markdown,
    Html,
    Text,
}

impl ContentKind {
    pub fn sniff(content: &str) -> Self {
        if content.contains("Markdown Content:") || content.lines().any(is_pipe_line) {
            return Self::Markdown;
        }
        let lower = content.to_lowercase();
        if lower.contains("<table") || lower.contains("<html") {
            Self::Html
        } else {
            Self::Text
        }
    }
}

/// Which table on the page we are after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableTarget {
    /// Sector constituents: header has a symbol/ticker column.
    Constituents,
    /// Investor-type trading flows.
    InvestorFlow,
}

const FLOW_KEYWORDS: [&str; 8] = [
    "buy", "sell", "net", "investor", "ซื้อ", "ขาย", "สุทธิ", "นักลงทุน",
];

fn symbol_column(header: &[String]) -> Option<usize> {
    header.iter().position(|h| {
        let h = h.to_lowercase();
        h.contains("symbol") || h.contains("ticker")
    })
}

impl TableTarget {
    fn accepts_header(self, header: &[String]) -> bool {
        match self {
            Self::Constituents => symbol_column(header).is_some(),
            Self::InvestorFlow => {
                let text = header.join(" ").to_lowercase();
                FLOW_KEYWORDS.iter().any(|k| text.contains(k))
            }
        }
    }
}

// ── Strategy pipeline ─────────────────────────────────────────────────────────

type Strategy = fn(&str, TableTarget) -> Option<RawTable>;

static STRATEGIES: [(&str, Strategy); 3] = [
    ("markdown", markdown_table),
    ("html", html_table),
    ("aligned-text", aligned_text_table),
];

fn strategies_for(kind: ContentKind) -> &'static [(&'static str, Strategy)] {
    match kind {
        ContentKind::Markdown => &STRATEGIES[..],
        ContentKind::Html => &STRATEGIES[1..],
        ContentKind::Text => &STRATEGIES[2..],
    }
}

/// Locate the target table in fetched content.
///
/// Strategies run in a fixed order (markdown, HTML, aligned plain text) and
/// the first one that yields a table wins. Output depends only on the input
/// text.
pub fn extract(content: &str, kind: ContentKind, target: TableTarget) -> Option<RawTable> {
    strategies_for(kind).iter().find_map(|(name, strategy)| {
        let table = strategy(content, target)?;
        debug!("{:?} table found by {} strategy ({} rows)", target, name, table.len());
        Some(table)
    })
}

fn is_header_repeat(header: &[String], row: &[String]) -> bool {
    row.len() == header.len()
        && row
            .iter()
            .zip(header)
            .all(|(a, b)| a.trim().eq_ignore_ascii_case(b.trim()))
}

/// Drop rows that carry no data. Constituent rows also lose group-label rows
/// and get their symbol cell replaced by the normalised ticker.
fn clean_rows(header: &[String], rows: Vec<Vec<String>>, target: TableTarget) -> Vec<Vec<String>> {
    let symbol_col = symbol_column(header);
    rows.into_iter()
        .filter_map(|mut row| {
            if row.iter().all(|c| c.trim().is_empty()) || is_header_repeat(header, &row) {
                return None;
            }
            if let (TableTarget::Constituents, Some(col)) = (target, symbol_col) {
                if is_group_label(&strip_markdown_link(&row[col])) {
                    return None;
                }
                row[col] = normalize_symbol(&row[col])?;
            }
            Some(row)
        })
        .collect()
}

// ── Markdown ──────────────────────────────────────────────────────────────────

fn is_pipe_line(line: &str) -> bool {
    let t = line.trim();
    t.len() >= 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_line(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|c| matches!(c, '|' | '-' | ':') || c.is_whitespace())
}

/// Cells between the outer pipes, empty cells kept.
fn split_table_row(line: &str) -> Vec<String> {
    let t = line.trim();
    let t = t.strip_prefix('|').unwrap_or(t);
    let t = t.strip_suffix('|').unwrap_or(t);
    t.split('|').map(|c| c.trim().to_string()).collect()
}

/// Cells between the outer pipes, empty cells dropped.
fn split_md_row(line: &str) -> Vec<String> {
    split_table_row(line)
        .into_iter()
        .filter(|c| !c.is_empty())
        .collect()
}

/// Runs of 3+ consecutive pipe lines.
fn markdown_blocks(content: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for line in content.lines() {
        if is_pipe_line(line) {
            current.push(line.trim());
            continue;
        }
        if current.len() >= 3 {
            blocks.push(std::mem::take(&mut current));
        } else {
            current.clear();
        }
    }
    if current.len() >= 3 {
        blocks.push(current);
    }
    blocks
}

fn markdown_table(content: &str, target: TableTarget) -> Option<RawTable> {
    for block in markdown_blocks(content) {
        if !block.iter().any(|l| is_separator_line(l)) {
            continue;
        }
        let mut rows = block
            .iter()
            .filter(|l| !is_separator_line(l))
            .map(|l| split_table_row(l));
        let Some(header) = rows.next() else {
            continue;
        };
        if !target.accepts_header(&header) {
            continue;
        }
        let body = rows.filter(|r| r.len() == header.len()).collect();
        let body = clean_rows(&header, body, target);
        if let Some(table) = RawTable::new(header, body) {
            return Some(table);
        }
    }
    None
}

// ── HTML ──────────────────────────────────────────────────────────────────────

static SEL_TABLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table").expect("table selector must parse"));
static SEL_THEAD: Lazy<Selector> =
    Lazy::new(|| Selector::parse("thead").expect("thead selector must parse"));
static SEL_TR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("tr selector must parse"));
static SEL_CELL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("th, td").expect("cell selector must parse"));

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn row_cells(row: ElementRef<'_>) -> Vec<String> {
    row.select(&SEL_CELL).map(cell_text).collect()
}

fn in_thead(tr: &ElementRef<'_>) -> bool {
    tr.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().name() == "thead")
}

fn html_table(content: &str, target: TableTarget) -> Option<RawTable> {
    let doc = Html::parse_document(content);

    for table in doc.select(&SEL_TABLE) {
        let mut trs = table.select(&SEL_TR).filter(|tr| !in_thead(tr));
        let header: Vec<String> = match table.select(&SEL_THEAD).next() {
            Some(thead) => thead.select(&SEL_CELL).map(cell_text).collect(),
            None => match trs.next() {
                Some(first) => row_cells(first),
                None => continue,
            },
        };
        if header.is_empty() || !target.accepts_header(&header) {
            continue;
        }

        let width = header.len();
        let body = trs
            .map(row_cells)
            .filter(|cells| !cells.is_empty())
            .map(|mut cells| {
                cells.resize(width, String::new());
                cells
            })
            .collect();
        let body = clean_rows(&header, body, target);
        if let Some(t) = RawTable::new(header, body) {
            return Some(t);
        }
    }
    None
}

// ── Aligned plain text ────────────────────────────────────────────────────────

const MIN_ALIGNED_LINES: usize = 5;
const POSITION_SAMPLE_LINES: usize = 5;
const MAX_COLUMN_BREAKS: usize = 10;

static MULTI_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\S+\s{2,}\S+").expect("multi-column regex must compile"));
static COLUMN_GAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\S+\s{2,}").expect("column gap regex must compile"));

fn aligned_blocks(content: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for line in content.lines() {
        if !line.trim().is_empty() && (MULTI_COLUMN.is_match(line) || line.contains('\t')) {
            current.push(line);
            continue;
        }
        if current.len() >= MIN_ALIGNED_LINES {
            blocks.push(std::mem::take(&mut current));
        } else {
            current.clear();
        }
    }
    if current.len() >= MIN_ALIGNED_LINES {
        blocks.push(current);
    }
    blocks
}

fn char_pos(line: &str, byte: usize) -> usize {
    line[..byte].chars().count()
}

/// Most frequent gap positions (in characters) across the first few lines,
/// ties broken by position, returned left to right.
fn column_breaks(lines: &[&str]) -> Vec<usize> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for line in lines.iter().take(POSITION_SAMPLE_LINES) {
        for m in COLUMN_GAP.find_iter(line) {
            *counts.entry(char_pos(line, m.end())).or_default() += 1;
        }
        for (i, _) in line.match_indices('\t') {
            *counts.entry(char_pos(line, i)).or_default() += 1;
        }
    }

    let mut ranked: Vec<(usize, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut breaks: Vec<usize> = ranked
        .into_iter()
        .take(MAX_COLUMN_BREAKS)
        .map(|(pos, _)| pos)
        .collect();
    breaks.sort_unstable();
    breaks
}

fn split_at_breaks(line: &str, breaks: &[usize]) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let slice = |from: usize, to: usize| -> String {
        let from = from.min(chars.len());
        let to = to.min(chars.len());
        chars[from..to].iter().collect::<String>().trim().to_string()
    };

    let mut cells = Vec::with_capacity(breaks.len() + 1);
    let mut last = 0;
    for &pos in breaks {
        if pos > last {
            cells.push(slice(last, pos));
            last = pos;
        }
    }
    cells.push(slice(last, chars.len()));
    cells
}

fn aligned_header(cell: &str, index: usize) -> String {
    let c = cell.trim().to_lowercase();
    let label = if c.contains("symbol") || c.contains("ticker") {
        "Symbol"
    } else if c.contains("last") || c.contains("price") {
        "Last"
    } else if c.contains("change") {
        "Change"
    } else if c.contains('%') {
        "%Chg"
    } else if c.contains("volume") {
        "Volume"
    } else if c.contains("value") {
        "Value"
    } else {
        return format!("Col{}", index + 1);
    };
    label.to_string()
}

fn parse_aligned_block(lines: &[&str]) -> Option<RawTable> {
    let breaks = column_breaks(lines);
    if breaks.is_empty() {
        return None;
    }

    let parsed: Vec<Vec<String>> = lines
        .iter()
        .map(|l| split_at_breaks(l, &breaks))
        .filter(|r| r.len() >= 3)
        .collect();
    if parsed.len() < 2 {
        return None;
    }

    let header: Vec<String> = parsed[0]
        .iter()
        .enumerate()
        .map(|(i, c)| aligned_header(c, i))
        .collect();
    let rows = parsed
        .into_iter()
        .skip(1)
        .filter(|r| r.len() == header.len())
        .collect();
    RawTable::new(header, rows)
}

fn aligned_score(table: &RawTable, target: TableTarget) -> usize {
    match target {
        TableTarget::Constituents => table
            .find_column(|c| c == "symbol")
            .map(|col| {
                table
                    .rows()
                    .iter()
                    .filter(|r| normalize_symbol(&r[col]).is_some())
                    .count()
            })
            .unwrap_or(0),
        TableTarget::InvestorFlow => table
            .rows()
            .iter()
            .filter(|r| InvestorType::from_label(&r[0]).is_some())
            .count(),
    }
}

/// Whitespace-aligned columns in plain text; keeps the block with the most
/// plausible rows for `target`.
fn aligned_text_table(content: &str, target: TableTarget) -> Option<RawTable> {
    let mut best: Option<(usize, RawTable)> = None;
    for block in aligned_blocks(content) {
        let Some(parsed) = parse_aligned_block(&block) else {
            continue;
        };
        let rows = clean_rows(parsed.columns(), parsed.rows().to_vec(), target);
        let Some(table) = RawTable::new(parsed.columns().to_vec(), rows) else {
            continue;
        };
        let score = aligned_score(&table, target);
        if score > best.as_ref().map_or(0, |(s, _)| *s) {
            best = Some((score, table));
        }
    }
    best.map(|(_, t)| t)
}

// ── Investor-type flows ───────────────────────────────────────────────────────

const FLOW_HEADER: [&str; 16] = [
    "type", "buy", "%", "sell", "%", "net", "buy", "%", "sell", "%", "net", "buy", "%", "sell",
    "%", "net",
];
const DEFAULT_PERIOD_LABELS: [&str; 3] = ["Daily", "Month-to-Date", "Year-to-Date"];
const LABEL_LOOKBACK: usize = 7;
const ROW_SCAN_LIMIT: usize = 39;

fn is_flow_header(line: &str) -> bool {
    if !line.starts_with('|') {
        return false;
    }
    let cells = split_md_row(line);
    cells.len() >= FLOW_HEADER.len()
        && cells
            .iter()
            .zip(FLOW_HEADER)
            .all(|(c, h)| c.eq_ignore_ascii_case(h))
}

fn period_labels_above(lines: &[&str], header_idx: usize) -> [String; 3] {
    let floor = header_idx.saturating_sub(LABEL_LOOKBACK + 1);
    for line in lines[floor + 1..header_idx.max(floor + 1)].iter().rev() {
        if !line.starts_with('|') || is_separator_line(line) {
            continue;
        }
        let cells = split_md_row(line);
        if let [.., daily, mtd, ytd] = cells.as_slice() {
            return [daily.clone(), mtd.clone(), ytd.clone()];
        }
    }
    DEFAULT_PERIOD_LABELS.map(str::to_string)
}

fn flow_record(cells: &[String]) -> Option<InvestorFlowRecord> {
    if cells.len() < FLOW_HEADER.len() {
        return None;
    }
    let investor_type = InvestorType::from_label(&cells[0])?;
    let num = |i: usize| {
        to_num(&cells[i]).unwrap_or_else(|| {
            warn!("{}: unreadable number {:?}, using 0", investor_type.label(), cells[i]);
            0.0
        })
    };
    let flow = |start: usize| PeriodFlow {
        buy_value: num(start),
        buy_percent: num(start + 1),
        sell_value: num(start + 2),
        sell_percent: num(start + 3),
        net_value: num(start + 4),
    };
    Some(InvestorFlowRecord {
        investor_type,
        daily: flow(1),
        month_to_date: flow(6),
        year_to_date: flow(11),
    })
}

/// First row for each investor type, in page order.
fn collect_flows(rows: impl Iterator<Item = Vec<String>>) -> Vec<InvestorFlowRecord> {
    let mut out: Vec<InvestorFlowRecord> = Vec::with_capacity(InvestorType::ALL.len());
    for cells in rows {
        let Some(rec) = flow_record(&cells) else {
            continue;
        };
        if out.iter().any(|r| r.investor_type == rec.investor_type) {
            continue;
        }
        out.push(rec);
        if out.len() == InvestorType::ALL.len() {
            break;
        }
    }
    out
}

fn require_all_types(records: &[InvestorFlowRecord], market: Market) -> Result<(), ScrapeError> {
    if records.len() < InvestorType::ALL.len() {
        return Err(ScrapeError::Validation(format!(
            "{market} investor table: found {} of {} investor types",
            records.len(),
            InvestorType::ALL.len()
        )));
    }
    Ok(())
}

fn as_of_text(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .find(|l| l.to_lowercase().starts_with("as of"))
        .and_then(|l| l.get(5..))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn markdown_investor_flows(content: &str, market: Market) -> Result<InvestorFlowTable, ScrapeError> {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let as_of = as_of_text(&lines);
    let header_idx = lines
        .iter()
        .position(|l| is_flow_header(l))
        .ok_or_else(|| ScrapeError::parse(format!("{market} investor page"), "16-column header"))?;
    let period_labels = period_labels_above(&lines, header_idx);

    let rows = lines[header_idx + 1..]
        .iter()
        .take(ROW_SCAN_LIMIT)
        .take_while(|l| l.starts_with('|'))
        .filter(|l| !is_separator_line(l))
        .map(|l| split_md_row(l));
    let records = collect_flows(rows);
    require_all_types(&records, market)?;

    let trade_date = as_of.as_deref().and_then(dates::resolve);
    Ok(InvestorFlowTable {
        market,
        as_of,
        trade_date,
        period_labels,
        records,
    })
}

fn table_investor_flows(content: &str, market: Market) -> Result<InvestorFlowTable, ScrapeError> {
    let table = extract(content, ContentKind::sniff(content), TableTarget::InvestorFlow)
        .ok_or_else(|| ScrapeError::parse(format!("{market} investor page"), "investor table"))?;

    let rows = table.rows().iter().map(|r| {
        r.iter()
            .filter(|c| !c.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>()
    });
    let records = collect_flows(rows);
    require_all_types(&records, market)?;

    let lines: Vec<&str> = content.lines().map(str::trim).collect();
    let as_of = as_of_text(&lines);
    let trade_date = as_of
        .as_deref()
        .and_then(dates::resolve)
        .or_else(|| dates::find_as_of(content));
    Ok(InvestorFlowTable {
        market,
        as_of,
        trade_date,
        period_labels: DEFAULT_PERIOD_LABELS.map(str::to_string),
        records,
    })
}

/// Investor-type flows for one market.
///
/// The 16-column markdown table is tried first; failing that the generic
/// table strategies are run with the investor keywords. Fewer than four
/// investor types is a validation failure, never a partial result.
pub fn investor_flows(content: &str, market: Market) -> Result<InvestorFlowTable, ScrapeError> {
    match markdown_investor_flows(content, market) {
        Ok(table) => Ok(table),
        Err(md_err) => {
            debug!("{market}: markdown investor parse failed ({md_err}), trying table strategies");
            table_investor_flows(content, market).map_err(|e| match e {
                ScrapeError::Parse { .. } => md_err,
                other => other,
            })
        }
    }
}

// ── Index overview ────────────────────────────────────────────────────────────

static LAST_UPDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Last Update (\d{1,2} \w+ \d{4} \d{2}:\d{2}:\d{2})")
        .expect("last update regex must compile")
});
static SETTRI_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\| \[?SETTRI\]?.*?\| ([\d,]+\.[\d]+) \| ([+-]?[\d,]+\.[\d]+.*?) \|")
        .expect("SETTRI regex must compile")
});
static SIGNED_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[+-]?\d[\d,]*(?:\.\d+)?").expect("number regex must compile"));
static PAREN_PERCENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(\s*([+-]?\d[\d,]*(?:\.\d+)?)\s*%\s*\)").expect("percent regex must compile")
});

fn is_index_header(line: &str) -> bool {
    let cells = split_md_row(line);
    cells.len() >= 5
        && cells[0].eq_ignore_ascii_case("index")
        && cells[1].eq_ignore_ascii_case("last")
        && cells[2].eq_ignore_ascii_case("change")
        && cells[3].to_lowercase().starts_with("volume")
        && cells[4].to_lowercase().starts_with("value")
}

/// "+5.23 (+0.42%)" → (5.23, 0.42)
fn parse_change(cell: &str) -> (Option<f64>, Option<f64>) {
    let cell = cell.replace(['\u{2212}', '\u{2013}'], "-");
    let change = SIGNED_NUMBER
        .find(&cell)
        .and_then(|m| parse_number(m.as_str()));
    let percent = PAREN_PERCENT
        .captures(&cell)
        .and_then(|c| parse_number(&c[1]));
    (change, percent)
}

fn implied_percent(last: f64, change: f64) -> f64 {
    let prev = last - change;
    if prev.abs() < f64::EPSILON {
        return 0.0;
    }
    (change / prev * 10_000.0).round() / 100.0
}

fn index_record(
    name: String,
    last: f64,
    change_cell: &str,
    volume: Option<i64>,
    value: Option<f64>,
    as_of: Option<NaiveDate>,
) -> IndexMetricRecord {
    let (change, percent) = parse_change(change_cell);
    let change = change.unwrap_or(0.0);
    IndexMetricRecord {
        index_name: name,
        last,
        change,
        percent_change: percent.unwrap_or_else(|| implied_percent(last, change)),
        volume,
        value,
        as_of,
    }
}

/// Index levels from the exchange home page.
pub fn index_overview(content: &str) -> Result<IndexOverview, ScrapeError> {
    let timestamp = LAST_UPDATE.captures(content).map(|c| c[1].to_string());
    let as_of = timestamp.as_deref().and_then(dates::resolve);

    let lines: Vec<&str> = content.lines().map(str::trim).collect();
    let mut records = Vec::new();
    if let Some(h) = lines.iter().position(|l| is_pipe_line(l) && is_index_header(l)) {
        for line in lines[h + 1..].iter().take_while(|l| is_pipe_line(l)) {
            if is_separator_line(line) {
                continue;
            }
            let cells = split_md_row(line);
            if cells.len() < 5 {
                continue;
            }
            let name = unlink(&cells[0]);
            if name.is_empty() || name == "---" || name.eq_ignore_ascii_case("index") {
                continue;
            }
            let Some(last) = parse_number(&cells[1]) else {
                debug!("index row {:?} has no level, skipped", name);
                continue;
            };
            records.push(index_record(
                name,
                last,
                &cells[2],
                parse_integer(&cells[3]),
                parse_number(&cells[4]),
                as_of,
            ));
        }
    }

    if !records.iter().any(|r| r.index_name == "SETTRI") {
        if let Some(c) = SETTRI_ROW.captures(content) {
            if let Some(last) = parse_number(&c[1]) {
                records.push(index_record("SETTRI".into(), last, &c[2], None, None, as_of));
            }
        }
    }

    if records.is_empty() {
        return Err(ScrapeError::parse("home page", "index table"));
    }
    Ok(IndexOverview {
        records,
        timestamp,
        as_of,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
