use crate::models::{MetricField, MetricValue, SectorMetrics};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::dates;

/// Per-field patterns, highest precedence first. Group 1 is the value.
/// Order matters: on pages where several patterns match, the first one in
/// the list decides what is reported.
const PATTERNS: [(MetricField, &[&str]); 7] = [
    (
        MetricField::IndexValue,
        &[
            r"Last\s*\n\s*([0-9,]+\.?[0-9]*)",
            r"Index[:\s]*([0-9,]+\.?[0-9]*)",
            r"([0-9,]+\.?[0-9]*)\s*Index",
        ],
    ),
    (
        MetricField::Change,
        &[
            r"Last\s*\n\s*[0-9,]+\.?[0-9]*\s*\n\s*([+-]?[0-9,]+\.?[0-9]*)",
            r"Change[:\s]*([+-]?[0-9,]+\.?[0-9]*)",
            r"([+-]?[0-9,]+\.?[0-9]*)\s*Change",
        ],
    ),
    (
        MetricField::PercentChange,
        &[
            r"\(([+-]?[0-9,]+\.?[0-9]*%)\)",
            r"([+-]?[0-9,]+\.?[0-9]*%)\s*Change",
            r"Change[:\s]*[+-]?[0-9,]+\.?[0-9]*\s*\(([+-]?[0-9,]+\.?[0-9]*%)\)",
        ],
    ),
    (
        MetricField::TotalVolume,
        &[
            r"Volume \('000 Shares\)\s*\n\s*([0-9,]+)",
            r"Volume[:\s]*([0-9,]+)",
            r"Total Volume[:\s]*([0-9,]+)",
            r"([0-9,]+)\s*Volume",
        ],
    ),
    (
        MetricField::TotalValue,
        &[
            r"Value \(M\.Baht\)\s*\n\s*([0-9,]+\.?[0-9]*)",
            r"Value[:\s]*([0-9,]+)",
            r"Total Value[:\s]*([0-9,]+)",
            r"([0-9,]+)\s*Value",
        ],
    ),
    (
        MetricField::NumConstituents,
        &[r"([0-9]+)\s*constituents", r"constituents[:\s]*([0-9]+)"],
    ),
    (
        MetricField::TimestampHint,
        &[
            r"Last Update\s+([^,\n]+)",
            r"as of\s+([^,\n]+)",
            r"as at\s+([^,\n]+)",
            r"([A-Za-z]+ \d{1,2},? \d{4})",
        ],
    ),
];

static COMPILED: Lazy<Vec<(MetricField, Vec<Regex>)>> = Lazy::new(|| {
    PATTERNS
        .iter()
        .map(|(field, list)| {
            let regexes = list
                .iter()
                .map(|p| Regex::new(&format!("(?i){p}")).expect("metric pattern must compile"))
                .collect();
            (*field, regexes)
        })
        .collect()
});

/// Lenient numeric coercion; the trimmed raw text is kept when it fails.
fn coerce(raw: &str) -> MetricValue {
    let cleaned = raw.replace(',', "").replace('%', "");
    match cleaned.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => MetricValue::Number(n),
        _ => MetricValue::Text(raw.to_string()),
    }
}

/// Pull the scalar summary fields off a sector page.
///
/// A timestamp hint that resolves to a date also sets `trade_date`.
pub fn extract(content: &str, sector_label: &str) -> SectorMetrics {
    let mut metrics = SectorMetrics::new(sector_label);

    for (field, regexes) in COMPILED.iter() {
        let Some(raw) = regexes
            .iter()
            .find_map(|re| re.captures(content))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
        else {
            continue;
        };

        let value = match field {
            MetricField::TimestampHint => {
                metrics.trade_date = dates::resolve(&raw);
                if metrics.trade_date.is_none() {
                    debug!("{}: timestamp hint {:?} did not resolve", metrics.sector, raw);
                }
                MetricValue::Text(raw)
            }
            _ => coerce(&raw),
        };
        metrics.fields.insert(*field, value);
    }

    metrics
}

/// The first timestamp-hint match in `content`, if any, with its ambiguity flag.
pub fn timestamp_hint(content: &str) -> Option<dates::ResolvedDate> {
    let (_, regexes) = COMPILED
        .iter()
        .find(|(f, _)| *f == MetricField::TimestampHint)?;
    let raw = regexes.iter().find_map(|re| re.captures(content))?;
    dates::resolve_detailed(raw.get(1)?.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const PAGE: &str = "\
AGRO Agro & Food Industry

Last
412.35
-1.52 (-0.37%)

Volume ('000 Shares)
1,234,567

Value (M.Baht)
2,345.67

Last Update 21 Aug 2025 16:59:59
";

    #[test]
    fn extracts_all_fields_from_sector_page() {
        let m = extract(PAGE, "agro");
        assert_eq!(m.sector, "AGRO");
        assert_eq!(m.number(MetricField::IndexValue), Some(412.35));
        assert_eq!(m.number(MetricField::Change), Some(-1.52));
        assert_eq!(m.number(MetricField::PercentChange), Some(-0.37));
        assert_eq!(m.number(MetricField::TotalVolume), Some(1_234_567.0));
        assert_eq!(m.number(MetricField::TotalValue), Some(2_345.67));
        assert_eq!(
            m.get(MetricField::TimestampHint),
            Some(&MetricValue::Text("21 Aug 2025 16:59:59".into()))
        );
        assert_eq!(m.trade_date, NaiveDate::from_ymd_opt(2025, 8, 21));
        assert!(m.get(MetricField::NumConstituents).is_none());
    }

    #[test]
    fn first_pattern_wins_over_later_matches() {
        // Both "Last\n<n>" and "Index: <n>" match; the first listed decides.
        let text = "Index: 999.00\nLast\n100.50\n";
        let m = extract(text, "tech");
        assert_eq!(m.number(MetricField::IndexValue), Some(100.5));
    }

    #[test]
    fn unresolvable_hint_keeps_text_but_no_date() {
        let m = extract("as of yesterday afternoon\n42 constituents", "fincial");
        assert_eq!(
            m.get(MetricField::TimestampHint),
            Some(&MetricValue::Text("yesterday afternoon".into()))
        );
        assert_eq!(m.trade_date, None);
        assert_eq!(m.number(MetricField::NumConstituents), Some(42.0));
    }

    #[test]
    fn non_numeric_capture_is_retained_as_text() {
        assert_eq!(coerce("1,2,3"), MetricValue::Number(123.0));
        assert_eq!(coerce("."), MetricValue::Text(".".into()));
    }

    #[test]
    fn timestamp_hint_carries_ambiguity() {
        let r = timestamp_hint("As of 03/04/2025\n").unwrap();
        assert!(r.ambiguous);
        assert!(timestamp_hint("nothing dated here").is_none());
    }
}
