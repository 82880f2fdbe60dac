use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ── Raw table ─────────────────────────────────────────────────────────────────

/// Header plus rows of raw cell strings, as lifted from a page or worksheet.
///
/// Every row has exactly one cell per column and there is at least one row;
/// `RawTable::new` refuses anything else. Labels may repeat (the investor
/// table has several `%` columns), so lookups return the first match.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Option<Self> {
        if columns.is_empty() || rows.is_empty() {
            return None;
        }
        if rows.iter().any(|r| r.len() != columns.len()) {
            return None;
        }
        Some(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// First column whose lowercased label satisfies `pred`.
    pub fn find_column(&self, pred: impl Fn(&str) -> bool) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| pred(c.trim().to_lowercase().as_str()))
    }

    /// Cell lookup by exact column label.
    pub fn cell(&self, row: usize, label: &str) -> Option<&str> {
        let col = self.columns.iter().position(|c| c == label)?;
        self.rows.get(row).map(|r| r[col].as_str())
    }

    /// Header row followed by data rows; positional consumers (worksheet
    /// reports) treat the header as just another line of the sheet.
    pub fn grid(&self) -> impl Iterator<Item = &[String]> {
        std::iter::once(self.columns.as_slice()).chain(self.rows.iter().map(|r| r.as_slice()))
    }
}

// ── Sectors & markets ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectorSlug {
    Agro,
    Consump,
    Fincial,
    Indus,
    Propcon,
    Resourc,
    Service,
    Tech,
}

impl SectorSlug {
    pub const ALL: [SectorSlug; 8] = [
        Self::Agro,
        Self::Consump,
        Self::Fincial,
        Self::Indus,
        Self::Propcon,
        Self::Resourc,
        Self::Service,
        Self::Tech,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agro => "agro",
            Self::Consump => "consump",
            Self::Fincial => "fincial",
            Self::Indus => "indus",
            Self::Propcon => "propcon",
            Self::Resourc => "resourc",
            Self::Service => "service",
            Self::Tech => "tech",
        }
    }
}

impl fmt::Display for SectorSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectorSlug {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|slug| slug.as_str() == s)
            .ok_or_else(|| format!("unknown sector slug '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    #[default]
    Set,
    Mai,
}

impl Market {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Set => "SET",
            Self::Mai => "MAI",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SET" => Ok(Self::Set),
            "MAI" => Ok(Self::Mai),
            other => Err(format!("unknown market '{other}' (expected SET or MAI)")),
        }
    }
}

// ── Trade date ────────────────────────────────────────────────────────────────

/// How a record set's trade date was arrived at. Anything other than
/// `Source` is a degraded condition the caller should log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DateConfidence {
    /// Parsed unambiguously from a timestamp hint in the source.
    Source,
    /// Parsed from the source, but a day/month swap was also a valid date.
    Ambiguous,
    /// No hint; latest trade date known to the store.
    LastKnown,
    /// No hint and nothing stored; wall-clock date.
    Today,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TradeDate {
    pub date: NaiveDate,
    pub confidence: DateConfidence,
}

impl TradeDate {
    pub fn is_degraded(&self) -> bool {
        self.confidence != DateConfidence::Source
    }
}

// ── Sector constituents ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SectorRecord {
    pub symbol: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub last: Option<f64>,
    pub change: String,
    pub percent_change: String,
    pub bid: String,
    pub offer: String,
    pub volume_shares: Option<i64>,
    pub value_baht: Option<f64>,
    pub sector: SectorSlug,
    pub trade_date: Option<NaiveDate>,
}

// ── Sector page metrics ───────────────────────────────────────────────────────

/// Scalar fields pulled off a sector page, in precedence/report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    IndexValue,
    Change,
    PercentChange,
    TotalVolume,
    TotalValue,
    NumConstituents,
    TimestampHint,
}

impl MetricField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IndexValue => "index_value",
            Self::Change => "change",
            Self::PercentChange => "percent_change",
            Self::TotalVolume => "total_volume",
            Self::TotalValue => "total_value",
            Self::NumConstituents => "num_constituents",
            Self::TimestampHint => "timestamp_hint",
        }
    }
}

/// A metric that parsed as a number, or the raw text when it didn't.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectorMetrics {
    pub sector: String,
    pub fields: BTreeMap<MetricField, MetricValue>,
    pub trade_date: Option<NaiveDate>,
}

impl SectorMetrics {
    pub fn new(sector: &str) -> Self {
        Self {
            sector: sector.to_uppercase(),
            fields: BTreeMap::new(),
            trade_date: None,
        }
    }

    pub fn get(&self, field: MetricField) -> Option<&MetricValue> {
        self.fields.get(&field)
    }

    pub fn number(&self, field: MetricField) -> Option<f64> {
        match self.fields.get(&field)? {
            MetricValue::Number(n) => Some(*n),
            MetricValue::Text(_) => None,
        }
    }

    /// Flat `key=value` lines for the reporting collaborator.
    pub fn to_kv_text(&self) -> String {
        let mut out = format!("sector={}\n", self.sector);
        for (field, value) in &self.fields {
            out.push_str(&format!("{}={}\n", field.as_str(), value));
        }
        if let Some(d) = self.trade_date {
            out.push_str(&format!("trade_date={d}\n"));
        }
        out
    }
}

// ── Index overview ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndexMetricRecord {
    pub index_name: String,
    pub last: f64,
    pub change: f64,
    pub percent_change: f64,
    pub volume: Option<i64>,
    pub value: Option<f64>,
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexOverview {
    pub records: Vec<IndexMetricRecord>,
    /// Raw `Last Update ...` text, when the page carried one.
    pub timestamp: Option<String>,
    pub as_of: Option<NaiveDate>,
}

// ── Investor flows ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum InvestorType {
    LocalInstitutions,
    ProprietaryTrading,
    ForeignInvestors,
    LocalIndividuals,
}

impl InvestorType {
    pub const ALL: [InvestorType; 4] = [
        Self::LocalInstitutions,
        Self::ProprietaryTrading,
        Self::ForeignInvestors,
        Self::LocalIndividuals,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::LocalInstitutions => "Local Institutions",
            Self::ProprietaryTrading => "Proprietary Trading",
            Self::ForeignInvestors => "Foreign Investors",
            Self::LocalIndividuals => "Local Individuals",
        }
    }

    pub fn thai_label(self) -> &'static str {
        match self {
            Self::LocalInstitutions => "สถาบันในประเทศ",
            Self::ProprietaryTrading => "บัญชีบริษัทหลักทรัพย์",
            Self::ForeignInvestors => "นักลงทุนต่างประเทศ",
            Self::LocalIndividuals => "นักลงทุนทั่วไปในประเทศ",
        }
    }

    /// Match a row label (English or Thai) to one of the four categories.
    pub fn from_label(s: &str) -> Option<Self> {
        let s = s.trim().trim_matches('*').trim();
        Self::ALL
            .into_iter()
            .find(|t| t.label().eq_ignore_ascii_case(s) || t.thai_label() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Daily,
    MonthToDate,
    YearToDate,
}

impl Period {
    pub const ALL: [Period; 3] = [Self::Daily, Self::MonthToDate, Self::YearToDate];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::MonthToDate => "month_to_date",
            Self::YearToDate => "year_to_date",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PeriodFlow {
    pub buy_value: f64,
    pub buy_percent: f64,
    pub sell_value: f64,
    pub sell_percent: f64,
    pub net_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvestorFlowRecord {
    pub investor_type: InvestorType,
    pub daily: PeriodFlow,
    pub month_to_date: PeriodFlow,
    pub year_to_date: PeriodFlow,
}

impl InvestorFlowRecord {
    pub fn flows(&self) -> [(Period, &PeriodFlow); 3] {
        [
            (Period::Daily, &self.daily),
            (Period::MonthToDate, &self.month_to_date),
            (Period::YearToDate, &self.year_to_date),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvestorFlowTable {
    pub market: Market,
    pub as_of: Option<String>,
    pub trade_date: Option<NaiveDate>,
    pub period_labels: [String; 3],
    pub records: Vec<InvestorFlowRecord>,
}

// ── Downloaded reports ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct NvdrRecord {
    pub symbol: String,
    pub volume_buy: Option<i64>,
    pub volume_sell: Option<i64>,
    pub volume_total: Option<i64>,
    pub volume_net: Option<i64>,
    pub volume_percent: Option<f64>,
    pub value_buy: Option<i64>,
    pub value_sell: Option<i64>,
    pub value_total: Option<i64>,
    pub value_net: Option<i64>,
    pub value_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct ShortSaleRecord {
    pub symbol: String,
    pub short_volume_local: Option<i64>,
    pub short_volume_nvdr: Option<i64>,
    pub short_volume_total: Option<i64>,
    pub short_value_baht: Option<i64>,
    pub short_percentage: Option<f64>,
    pub outstanding_local: Option<i64>,
    pub outstanding_nvdr: Option<i64>,
    pub outstanding_total: Option<i64>,
    pub outstanding_percentage: Option<f64>,
}

/// Records lifted from one downloaded spreadsheet report.
#[derive(Debug, Clone)]
pub struct Report<T> {
    pub records: Vec<T>,
    pub trade_date: Option<NaiveDate>,
}

// ── Persistence sources ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSource {
    SectorData,
    InvestorSummary,
    NvdrTrading,
    ShortSalesTrading,
    SetIndex,
}

impl DataSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SectorData => "sector_data",
            Self::InvestorSummary => "investor_summary",
            Self::NvdrTrading => "nvdr_trading",
            Self::ShortSalesTrading => "short_sales_trading",
            Self::SetIndex => "set_index",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_table_rejects_ragged_rows() {
        let cols = vec!["Symbol".to_string(), "Last".to_string()];
        assert!(RawTable::new(cols.clone(), vec![vec!["PTT".into()]]).is_none());
        assert!(RawTable::new(cols.clone(), vec![]).is_none());

        let t = RawTable::new(cols, vec![vec!["PTT".into(), "34.50".into()]]).unwrap();
        assert_eq!(t.cell(0, "Last"), Some("34.50"));
        assert_eq!(t.find_column(|c| c.contains("symbol")), Some(0));
        assert_eq!(t.grid().count(), 2);
    }

    #[test]
    fn sector_slug_round_trips_through_str() {
        for slug in SectorSlug::ALL {
            assert_eq!(slug.as_str().parse::<SectorSlug>().unwrap(), slug);
        }
        assert!("energy".parse::<SectorSlug>().is_err());
    }

    #[test]
    fn investor_type_matches_english_and_thai() {
        assert_eq!(
            InvestorType::from_label("foreign investors"),
            Some(InvestorType::ForeignInvestors)
        );
        assert_eq!(
            InvestorType::from_label("**Local Individuals**"),
            Some(InvestorType::LocalIndividuals)
        );
        assert_eq!(
            InvestorType::from_label("สถาบันในประเทศ"),
            Some(InvestorType::LocalInstitutions)
        );
        assert_eq!(InvestorType::from_label("Total"), None);
    }

    #[test]
    fn metrics_kv_text_is_flat_and_ordered() {
        let mut m = SectorMetrics::new("agro");
        m.fields.insert(MetricField::Change, MetricValue::Number(-1.5));
        m.fields.insert(MetricField::IndexValue, MetricValue::Number(412.3));
        m.fields
            .insert(MetricField::TotalVolume, MetricValue::Text("n/a".into()));
        m.trade_date = NaiveDate::from_ymd_opt(2025, 8, 21);

        assert_eq!(
            m.to_kv_text(),
            "sector=AGRO\nindex_value=412.3\nchange=-1.5\ntotal_volume=n/a\ntrade_date=2025-08-21\n"
        );
    }
}
