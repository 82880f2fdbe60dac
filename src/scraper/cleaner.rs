use crate::models::{RawTable, SectorRecord, SectorSlug};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

// ── Symbols ───────────────────────────────────────────────────────────────────

static TICKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{2,10}$").expect("ticker regex must compile"));

static MD_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("markdown link regex must compile"));

/// Trailing markers that are not part of the ticker. Checked in order; the
/// first literal match wins even when a longer one would also match.
const SYMBOL_SUFFIXES: [&str; 11] = [
    " CB", " SP", " NVDR", "-W1", "-W2", "-W3", "-W4", "-W5", "-W6", "-R", "-F",
];

/// Words that show up in the symbol column as sector/industry group labels.
const GROUP_LABELS: [&str; 7] = ["SERVICE", "COMM", "HELTH", "MEDIA", "PROF", "TOURISM", "TRANS"];

/// `[TEXT](url)` → `TEXT`; a bare `[TEXT]` loses its brackets too.
pub fn strip_markdown_link(s: &str) -> String {
    let s = s.trim();
    if let Some(c) = MD_LINK.captures(s) {
        return c[1].trim().to_string();
    }
    if s.starts_with('[') {
        if let Some(end) = s.find(']') {
            return s[1..end].trim().to_string();
        }
    }
    s.to_string()
}

/// Replace every markdown link in free text with its label.
pub fn unlink(s: &str) -> String {
    MD_LINK.replace_all(s, "$1").trim().to_string()
}

/// Raw symbol cell → canonical ticker, or `None` when it isn't one.
///
/// "[AOT CB](https://…)" → "AOT", "GRAND-W1" → "GRAND",
/// "SERVICE - Services" → None.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let mut token = strip_markdown_link(raw);
    if token.contains(" - ") {
        return None;
    }

    for suffix in SYMBOL_SUFFIXES {
        if let Some(stripped) = token.strip_suffix(suffix) {
            token = stripped.to_string();
            break;
        }
    }

    let token = token.split_whitespace().next()?;
    TICKER.is_match(token).then(|| token.to_string())
}

/// Category-group row masquerading as a symbol ("COMM - Commerce", "MEDIA").
pub fn is_group_label(cell: &str) -> bool {
    let upper = cell.to_uppercase();
    cell.contains(" - ") || GROUP_LABELS.iter().any(|k| upper.contains(k))
}

// ── Numbers ───────────────────────────────────────────────────────────────────

fn is_blank_number(s: &str) -> bool {
    matches!(s, "" | "-" | "—" | "–" | "N/A" | "n/a")
}

/// Unicode minus and en dash become '-', thousands commas go.
fn clean_numeric(s: &str) -> String {
    s.trim()
        .replace(['\u{2212}', '\u{2013}'], "-")
        .replace(',', "")
        .trim()
        .to_string()
}

/// Lenient float parse: commas, percent signs and a leading '+' are ignored.
pub fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if is_blank_number(t) {
        return None;
    }
    let cleaned = clean_numeric(t).replace('%', "");
    let cleaned = cleaned.trim().trim_start_matches('+');
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Integer parse that tolerates "1,234.00".
pub fn parse_integer(s: &str) -> Option<i64> {
    parse_number(s).map(|v| v as i64)
}

/// Investor-table number: blank or '-' is zero, garbage is `None`.
pub fn to_num(s: &str) -> Option<f64> {
    let t = s.trim();
    if is_blank_number(t) {
        return Some(0.0);
    }
    parse_number(t)
}

// ── Constituents → SectorRecord ───────────────────────────────────────────────

struct SectorColumns {
    symbol: usize,
    open: Option<usize>,
    high: Option<usize>,
    low: Option<usize>,
    last: Option<usize>,
    change: Option<usize>,
    percent_change: Option<usize>,
    bid: Option<usize>,
    offer: Option<usize>,
    volume: Option<usize>,
    value: Option<usize>,
}

impl SectorColumns {
    fn locate(table: &RawTable) -> Option<Self> {
        Some(Self {
            symbol: table.find_column(|c| c.contains("symbol") || c.contains("ticker"))?,
            open: table.find_column(|c| c.starts_with("open")),
            high: table.find_column(|c| c.starts_with("high")),
            low: table.find_column(|c| c.starts_with("low")),
            last: table.find_column(|c| c.starts_with("last") || c.contains("price")),
            percent_change: table.find_column(|c| c.contains('%')),
            change: table.find_column(|c| c.contains("change") && !c.contains('%')),
            bid: table.find_column(|c| c.starts_with("bid")),
            offer: table.find_column(|c| c.starts_with("offer")),
            volume: table.find_column(|c| c.contains("volume")),
            value: table.find_column(|c| c.contains("value")),
        })
    }
}

/// Turn an extracted constituents table into records, dropping any row whose
/// symbol does not normalise.
pub fn sector_records(
    table: &RawTable,
    sector: SectorSlug,
    trade_date: Option<NaiveDate>,
) -> Vec<SectorRecord> {
    let Some(cols) = SectorColumns::locate(table) else {
        debug!("{}: table has no symbol column", sector);
        return Vec::new();
    };

    let text = |row: &[String], idx: Option<usize>| -> String {
        idx.and_then(|i| row.get(i)).map(|s| s.trim().to_string()).unwrap_or_default()
    };
    let num = |row: &[String], idx: Option<usize>| -> Option<f64> {
        idx.and_then(|i| row.get(i)).and_then(|s| parse_number(s))
    };

    let mut out = Vec::with_capacity(table.len());
    for row in table.rows() {
        let Some(symbol) = normalize_symbol(&row[cols.symbol]) else {
            debug!("{}: dropping row with symbol {:?}", sector, row[cols.symbol]);
            continue;
        };
        out.push(SectorRecord {
            symbol,
            open: num(row, cols.open),
            high: num(row, cols.high),
            low: num(row, cols.low),
            last: num(row, cols.last),
            change: text(row, cols.change),
            percent_change: text(row, cols.percent_change),
            bid: text(row, cols.bid),
            offer: text(row, cols.offer),
            volume_shares: cols.volume.and_then(|i| parse_integer(&row[i])),
            value_baht: num(row, cols.value),
            sector,
            trade_date,
        });
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_tickers() {
        for raw in ["SERVICE - Services", "", "1234", "A", "   ", "ptt", "TOOLONGSYMBOLX"] {
            assert_eq!(normalize_symbol(raw), None, "{raw:?} should be rejected");
        }
    }

    #[test]
    fn accepts_tickers_with_decorations() {
        assert_eq!(normalize_symbol("PTT").as_deref(), Some("PTT"));
        assert_eq!(
            normalize_symbol("[AOT CB](https://www.set.or.th/en/market/product/stock/quote/AOT/price)")
                .as_deref(),
            Some("AOT")
        );
        assert_eq!(normalize_symbol("GRAND-W1").as_deref(), Some("GRAND"));
        assert_eq!(normalize_symbol("GRAND CB").as_deref(), Some("GRAND"));
        assert_eq!(normalize_symbol("CPALL NVDR").as_deref(), Some("CPALL"));
        assert_eq!(normalize_symbol("KBANK-R").as_deref(), Some("KBANK"));
        assert_eq!(normalize_symbol("GFPT XD").as_deref(), Some("GFPT"));
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["PTT", "[AOT CB](u)", "GRAND-W1", "BBL SP", "CPALL"] {
            let once = normalize_symbol(raw).unwrap();
            assert_eq!(normalize_symbol(&once).as_deref(), Some(once.as_str()));
        }
    }

    #[test]
    fn suffix_order_is_first_match() {
        // " CB" is checked before "-W1"; only one suffix is ever stripped,
        // so the warrant marker survives and the token is rejected.
        assert_eq!(normalize_symbol("ABC-W1 CB"), None);
        assert_eq!(normalize_symbol("ABC CB").as_deref(), Some("ABC"));
        assert_eq!(strip_markdown_link("[X Y](z)"), "X Y");
        assert_eq!(unlink("[SET50](https://x) index"), "SET50 index");
    }

    #[test]
    fn group_labels_are_detected() {
        assert!(is_group_label("COMM - Commerce"));
        assert!(is_group_label("MEDIA"));
        assert!(!is_group_label("PTT"));
    }

    #[test]
    fn lenient_numbers() {
        assert_eq!(parse_number("1,234.56"), Some(1234.56));
        assert_eq!(parse_number("+0.45%"), Some(0.45));
        assert_eq!(parse_number("\u{2212}12.5"), Some(-12.5));
        assert_eq!(parse_number("–3"), Some(-3.0));
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_integer("12,345,678"), Some(12_345_678));
        assert_eq!(to_num(""), Some(0.0));
        assert_eq!(to_num("-"), Some(0.0));
        assert_eq!(to_num("x1"), None);
    }

    #[test]
    fn sector_records_map_columns_and_drop_bad_symbols() {
        let cols = [
            "Symbol", "Open", "High", "Low", "Last", "Change", "% Change", "Bid", "Offer",
            "Volume (Shares)", "Value ('000 Baht)",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let row = |cells: [&str; 11]| cells.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let table = RawTable::new(
            cols,
            vec![
                row(["[GFPT](u)", "11.10", "11.30", "11.00", "11.20", "+0.10", "+0.90", "11.10", "11.20", "1,234,500", "13,827.40"]),
                row(["1234", "1", "1", "1", "1", "0", "0", "1", "1", "1", "1"]),
            ],
        )
        .unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 8, 21);
        let recs = sector_records(&table, SectorSlug::Agro, date);
        assert_eq!(recs.len(), 1);
        let r = &recs[0];
        assert_eq!(r.symbol, "GFPT");
        assert_eq!(r.last, Some(11.2));
        assert_eq!(r.change, "+0.10");
        assert_eq!(r.percent_change, "+0.90");
        assert_eq!(r.volume_shares, Some(1_234_500));
        assert_eq!(r.value_baht, Some(13_827.4));
        assert_eq!(r.trade_date, date);
    }
}
