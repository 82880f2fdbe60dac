//! Free-text timestamp hints → calendar dates.
//!
//! Formats are tried in a fixed order and the first successful parse wins.
//! Slash dates are read day-first before month-first; when both readings
//! are valid and differ the result is marked ambiguous and logged rather
//! than silently trusted.

use crate::models::{DateConfidence, TradeDate};
use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

const DMY_SLASH: &str = "%d/%m/%Y";
const MDY_SLASH: &str = "%m/%d/%Y";

/// (format, carries a time of day)
const FORMATS: [(&str, bool); 7] = [
    ("%d %b %Y", false),
    ("%d %B %Y", false),
    ("%B %d, %Y", false),
    ("%Y-%m-%d", false),
    (DMY_SLASH, false),
    (MDY_SLASH, false),
    ("%d %b %Y %H:%M:%S", true),
];

const THAI_MONTHS: [&str; 12] = [
    "ม.ค.", "ก.พ.", "มี.ค.", "เม.ย.", "พ.ค.", "มิ.ย.", "ก.ค.", "ส.ค.", "ก.ย.", "ต.ค.", "พ.ย.", "ธ.ค.",
];

static THAI_DATE: Lazy<Regex> = Lazy::new(|| {
    let months = THAI_MONTHS
        .iter()
        .map(|m| regex::escape(m))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(\d{{1,2}})\s*({months})\s*(\d{{4}})")).expect("thai date regex must compile")
});

static AS_OF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)as of\s+(\d{1,2} \w+ \d{4})").expect("as-of regex must compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDate {
    pub date: NaiveDate,
    /// A slash date whose day/month swap is also a different valid date.
    pub ambiguous: bool,
}

fn parse_with(s: &str, fmt: &str, with_time: bool) -> Option<NaiveDate> {
    if with_time {
        NaiveDateTime::parse_from_str(s, fmt).ok().map(|dt| dt.date())
    } else {
        NaiveDate::parse_from_str(s, fmt).ok()
    }
}

/// `resolve` with the ambiguity flag kept.
pub fn resolve_detailed(raw: &str) -> Option<ResolvedDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for (fmt, with_time) in FORMATS {
        let Some(date) = parse_with(s, fmt, with_time) else {
            continue;
        };
        let swapped = match fmt {
            DMY_SLASH => parse_with(s, MDY_SLASH, false),
            _ => None,
        };
        let ambiguous = swapped.is_some_and(|other| other != date);
        if ambiguous {
            warn!(
                "Ambiguous slash date {:?}: read as {} (day-first), could also be {:?}",
                s, date, swapped
            );
        }
        return Some(ResolvedDate { date, ambiguous });
    }

    resolve_thai(s).map(|date| ResolvedDate {
        date,
        ambiguous: false,
    })
}

/// Parse a timestamp hint, or `None` when no known format fits.
pub fn resolve(raw: &str) -> Option<NaiveDate> {
    resolve_detailed(raw).map(|r| r.date)
}

/// "15 ส.ค. 2568" (Buddhist era) → 2025-08-15.
pub fn resolve_thai(s: &str) -> Option<NaiveDate> {
    let caps = THAI_DATE.captures(s)?;
    let day: u32 = caps[1].parse().ok()?;
    let month = THAI_MONTHS.iter().position(|m| *m == &caps[2])? as u32 + 1;
    let mut year: i32 = caps[3].parse().ok()?;
    if year > 2400 {
        year -= 543;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// First "As of 15 Aug 2025" (or Thai-form) date in a block of text.
pub fn find_as_of(text: &str) -> Option<NaiveDate> {
    AS_OF
        .captures(text)
        .and_then(|c| resolve(&c[1]))
        .or_else(|| resolve_thai(text))
}

/// Settle a record set's trade date: source hint, else the last date the
/// store knows, else today.
pub fn settle_trade_date(
    hint: Option<ResolvedDate>,
    last_known: Option<NaiveDate>,
    today: NaiveDate,
) -> TradeDate {
    match (hint, last_known) {
        (Some(r), _) => TradeDate {
            date: r.date,
            confidence: if r.ambiguous {
                DateConfidence::Ambiguous
            } else {
                DateConfidence::Source
            },
        },
        (None, Some(date)) => TradeDate {
            date,
            confidence: DateConfidence::LastKnown,
        },
        (None, None) => TradeDate {
            date: today,
            confidence: DateConfidence::Today,
        },
    }
}
