use crate::models::{
    DataSource, IndexMetricRecord, InvestorFlowTable, InvestorType, NvdrRecord, SectorRecord,
    SectorSlug, ShortSaleRecord,
};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use duckdb::{params, Connection};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS sector_data (
    trade_date      DATE     NOT NULL,
    sector          VARCHAR  NOT NULL,
    symbol          VARCHAR  NOT NULL,
    open            DOUBLE,
    high            DOUBLE,
    low             DOUBLE,
    last            DOUBLE,
    -- Kept as displayed ("+0.10", "-")
    change          VARCHAR,
    percent_change  VARCHAR,
    bid             VARCHAR,
    offer           VARCHAR,
    volume_shares   BIGINT,
    value_baht      DOUBLE,
    scraped_at      TIMESTAMP NOT NULL,
    PRIMARY KEY (trade_date, sector, symbol)
);

CREATE TABLE IF NOT EXISTS investor_summary (
    trade_date      DATE     NOT NULL,
    market          VARCHAR  NOT NULL,
    investor_type   VARCHAR  NOT NULL,
    period          VARCHAR  NOT NULL,
    period_label    VARCHAR,
    buy_value       DOUBLE,
    buy_percent     DOUBLE,
    sell_value      DOUBLE,
    sell_percent    DOUBLE,
    net_value       DOUBLE,
    as_of           VARCHAR,
    scraped_at      TIMESTAMP NOT NULL,
    PRIMARY KEY (trade_date, market, investor_type, period)
);

CREATE TABLE IF NOT EXISTS nvdr_trading (
    trade_date      DATE     NOT NULL,
    symbol          VARCHAR  NOT NULL,
    volume_buy      BIGINT,
    volume_sell     BIGINT,
    volume_total    BIGINT,
    volume_net      BIGINT,
    volume_percent  DOUBLE,
    value_buy       BIGINT,
    value_sell      BIGINT,
    value_total     BIGINT,
    value_net       BIGINT,
    value_percent   DOUBLE,
    scraped_at      TIMESTAMP NOT NULL,
    PRIMARY KEY (trade_date, symbol)
);

CREATE TABLE IF NOT EXISTS short_sales_trading (
    trade_date              DATE     NOT NULL,
    symbol                  VARCHAR  NOT NULL,
    short_volume_local      BIGINT,
    short_volume_nvdr       BIGINT,
    short_volume_total      BIGINT,
    short_value_baht        BIGINT,
    short_percentage        DOUBLE,
    outstanding_local       BIGINT,
    outstanding_nvdr        BIGINT,
    outstanding_total       BIGINT,
    outstanding_percentage  DOUBLE,
    scraped_at              TIMESTAMP NOT NULL,
    PRIMARY KEY (trade_date, symbol)
);

CREATE TABLE IF NOT EXISTS set_index (
    trade_date      DATE     NOT NULL,
    index_name      VARCHAR  NOT NULL,
    last            DOUBLE   NOT NULL,
    change          DOUBLE,
    percent_change  DOUBLE,
    volume          BIGINT,
    value           DOUBLE,
    scraped_at      TIMESTAMP NOT NULL,
    PRIMARY KEY (trade_date, index_name)
);

CREATE TABLE IF NOT EXISTS data_timestamps (
    source          VARCHAR  PRIMARY KEY,
    trade_date      DATE     NOT NULL,
    record_count    INTEGER  NOT NULL,
    updated_at      TIMESTAMP NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS scrape_run_ids START 1;

CREATE TABLE IF NOT EXISTS scrape_runs (
    id              INTEGER PRIMARY KEY DEFAULT nextval('scrape_run_ids'),
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    sources_ok      INTEGER DEFAULT 0,
    sources_total   INTEGER DEFAULT 0,
    error_msg       VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_sector_symbol ON sector_data (symbol);
CREATE INDEX IF NOT EXISTS idx_runs_started  ON scrape_runs (started_at);
"#;

pub const ALL_SOURCES: [DataSource; 5] = [
    DataSource::SectorData,
    DataSource::InvestorSummary,
    DataSource::NvdrTrading,
    DataSource::ShortSalesTrading,
    DataSource::SetIndex,
];

// ── Persistence contract ──────────────────────────────────────────────────────

/// Where normalized record sets go. Every save is all-or-nothing and
/// reports acceptance of the whole batch.
pub trait MarketStore: Send + Sync {
    fn save_sector_data(
        &self,
        records: &[SectorRecord],
        sector: SectorSlug,
        trade_date: NaiveDate,
    ) -> bool;
    fn save_investor_summary(&self, table: &InvestorFlowTable, trade_date: NaiveDate) -> bool;
    fn save_nvdr_trading(&self, records: &[NvdrRecord], trade_date: NaiveDate) -> bool;
    fn save_short_sales_trading(&self, records: &[ShortSaleRecord], trade_date: NaiveDate)
        -> bool;
    fn save_index_metrics(&self, records: &[IndexMetricRecord], trade_date: NaiveDate) -> bool;
    /// Most recent trade date stored for `source`.
    fn latest_trade_date(&self, source: DataSource) -> Option<NaiveDate>;
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Mutex<Connection>,
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("DuckDB connection mutex poisoned"))
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.lock()?;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES)
            .context("Index creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![now()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    fn touch_timestamp(
        conn: &Connection,
        source: DataSource,
        trade_date: NaiveDate,
        count: usize,
    ) -> Result<()> {
        conn.execute(
            r#"INSERT INTO data_timestamps (source, trade_date, record_count, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (source) DO UPDATE SET
                   trade_date   = excluded.trade_date,
                   record_count = excluded.record_count,
                   updated_at   = excluded.updated_at"#,
            params![source.as_str(), trade_date, count as i64, now()],
        )?;
        Ok(())
    }

    // ── Sector constituents ───────────────────────────────────────────────────

    /// Replaces whatever was stored for (sector, trade_date).
    pub fn replace_sector_data(
        &self,
        records: &[SectorRecord],
        sector: SectorSlug,
        trade_date: NaiveDate,
    ) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let removed = tx.execute(
            "DELETE FROM sector_data WHERE sector = ? AND trade_date = ?",
            params![sector.as_str(), trade_date],
        )?;
        if removed > 0 {
            debug!("{}: replacing {} rows for {}", sector, removed, trade_date);
        }

        let scraped_at = now();
        let mut seen = HashSet::new();
        for r in records.iter().filter(|r| seen.insert(r.symbol.as_str())) {
            tx.execute(
                r#"INSERT INTO sector_data
                   (trade_date, sector, symbol, open, high, low, last, change,
                    percent_change, bid, offer, volume_shares, value_baht, scraped_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                params![
                    trade_date,
                    sector.as_str(),
                    r.symbol,
                    r.open,
                    r.high,
                    r.low,
                    r.last,
                    r.change,
                    r.percent_change,
                    r.bid,
                    r.offer,
                    r.volume_shares,
                    r.value_baht,
                    scraped_at,
                ],
            )
            .with_context(|| format!("insert {} {}", sector, r.symbol))?;
        }
        Self::touch_timestamp(&tx, DataSource::SectorData, trade_date, seen.len())?;
        tx.commit()?;
        Ok(seen.len())
    }

    // ── Investor flows ────────────────────────────────────────────────────────

    pub fn upsert_investor_summary(
        &self,
        table: &InvestorFlowTable,
        trade_date: NaiveDate,
    ) -> Result<usize> {
        let types = InvestorType::ALL
            .iter()
            .filter(|t| table.records.iter().any(|r| r.investor_type == **t))
            .count();
        if types < InvestorType::ALL.len() {
            bail!(
                "{}: only {} of {} investor types present",
                table.market,
                types,
                InvestorType::ALL.len()
            );
        }

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let scraped_at = now();
        let mut rows = 0usize;
        for r in &table.records {
            for (i, (period, flow)) in r.flows().into_iter().enumerate() {
                tx.execute(
                    r#"INSERT INTO investor_summary
                       (trade_date, market, investor_type, period, period_label,
                        buy_value, buy_percent, sell_value, sell_percent, net_value,
                        as_of, scraped_at)
                       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                       ON CONFLICT (trade_date, market, investor_type, period) DO UPDATE SET
                           period_label = excluded.period_label,
                           buy_value    = excluded.buy_value,
                           buy_percent  = excluded.buy_percent,
                           sell_value   = excluded.sell_value,
                           sell_percent = excluded.sell_percent,
                           net_value    = excluded.net_value,
                           as_of        = COALESCE(excluded.as_of, investor_summary.as_of),
                           scraped_at   = excluded.scraped_at"#,
                    params![
                        trade_date,
                        table.market.as_str(),
                        r.investor_type.label(),
                        period.as_str(),
                        table.period_labels[i],
                        flow.buy_value,
                        flow.buy_percent,
                        flow.sell_value,
                        flow.sell_percent,
                        flow.net_value,
                        table.as_of,
                        scraped_at,
                    ],
                )
                .with_context(|| format!("insert investor row {}", r.investor_type.label()))?;
                rows += 1;
            }
        }
        Self::touch_timestamp(&tx, DataSource::InvestorSummary, trade_date, rows)?;
        tx.commit()?;
        Ok(rows)
    }

    // ── Downloaded reports ────────────────────────────────────────────────────

    pub fn upsert_nvdr(&self, records: &[NvdrRecord], trade_date: NaiveDate) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let scraped_at = now();
        for r in records {
            tx.execute(
                r#"INSERT OR REPLACE INTO nvdr_trading
                   (trade_date, symbol, volume_buy, volume_sell, volume_total, volume_net,
                    volume_percent, value_buy, value_sell, value_total, value_net,
                    value_percent, scraped_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                params![
                    trade_date,
                    r.symbol,
                    r.volume_buy,
                    r.volume_sell,
                    r.volume_total,
                    r.volume_net,
                    r.volume_percent,
                    r.value_buy,
                    r.value_sell,
                    r.value_total,
                    r.value_net,
                    r.value_percent,
                    scraped_at,
                ],
            )
            .with_context(|| format!("insert nvdr {}", r.symbol))?;
        }
        Self::touch_timestamp(&tx, DataSource::NvdrTrading, trade_date, records.len())?;
        tx.commit()?;
        Ok(records.len())
    }

    pub fn upsert_short_sales(
        &self,
        records: &[ShortSaleRecord],
        trade_date: NaiveDate,
    ) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let scraped_at = now();
        for r in records {
            tx.execute(
                r#"INSERT OR REPLACE INTO short_sales_trading
                   (trade_date, symbol, short_volume_local, short_volume_nvdr,
                    short_volume_total, short_value_baht, short_percentage,
                    outstanding_local, outstanding_nvdr, outstanding_total,
                    outstanding_percentage, scraped_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                params![
                    trade_date,
                    r.symbol,
                    r.short_volume_local,
                    r.short_volume_nvdr,
                    r.short_volume_total,
                    r.short_value_baht,
                    r.short_percentage,
                    r.outstanding_local,
                    r.outstanding_nvdr,
                    r.outstanding_total,
                    r.outstanding_percentage,
                    scraped_at,
                ],
            )
            .with_context(|| format!("insert short sale {}", r.symbol))?;
        }
        Self::touch_timestamp(&tx, DataSource::ShortSalesTrading, trade_date, records.len())?;
        tx.commit()?;
        Ok(records.len())
    }

    // ── Index overview ────────────────────────────────────────────────────────

    pub fn upsert_index_metrics(
        &self,
        records: &[IndexMetricRecord],
        trade_date: NaiveDate,
    ) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let scraped_at = now();
        for r in records {
            tx.execute(
                r#"INSERT OR REPLACE INTO set_index
                   (trade_date, index_name, last, change, percent_change, volume, value, scraped_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
                params![
                    r.as_of.unwrap_or(trade_date),
                    r.index_name,
                    r.last,
                    r.change,
                    r.percent_change,
                    r.volume,
                    r.value,
                    scraped_at,
                ],
            )
            .with_context(|| format!("insert index {}", r.index_name))?;
        }
        Self::touch_timestamp(&tx, DataSource::SetIndex, trade_date, records.len())?;
        tx.commit()?;
        Ok(records.len())
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn max_trade_date(&self, source: DataSource) -> Result<Option<NaiveDate>> {
        let conn = self.lock()?;
        let sql = format!("SELECT MAX(trade_date) FROM {}", source.as_str());
        let date: Option<NaiveDate> = conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(date)
    }

    pub fn row_count(&self, source: DataSource) -> Result<i64> {
        let conn = self.lock()?;
        let sql = format!("SELECT COUNT(*) FROM {}", source.as_str());
        Ok(conn.query_row(&sql, [], |r| r.get(0))?)
    }

    pub fn sector_symbol_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(DISTINCT symbol) FROM sector_data", [], |r| {
            r.get(0)
        })?)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self) -> Result<i64> {
        let conn = self.lock()?;
        let id: i64 = conn.query_row(
            "INSERT INTO scrape_runs (started_at, status) VALUES (?, 'running') RETURNING id",
            params![now()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(
        &self,
        run_id: i64,
        status: &str,
        sources_ok: usize,
        sources_total: usize,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               sources_ok = ?, sources_total = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                now(),
                status,
                sources_ok as i64,
                sources_total as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn last_scrape_run(&self) -> Result<Option<(NaiveDateTime, String)>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT started_at, status FROM scrape_runs ORDER BY id DESC LIMIT 1")?;
        let mut rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(rows.next().transpose()?)
    }
}

/// Logs the error chain and reports the batch as rejected.
fn accepted(what: &str, result: Result<usize>) -> bool {
    match result {
        Ok(n) => {
            info!("{}: {} rows saved", what, n);
            true
        }
        Err(e) => {
            warn!("{}: save rejected: {:#}", what, e);
            false
        }
    }
}

impl MarketStore for Repository {
    fn save_sector_data(
        &self,
        records: &[SectorRecord],
        sector: SectorSlug,
        trade_date: NaiveDate,
    ) -> bool {
        accepted(
            &format!("sector_data/{sector}"),
            self.replace_sector_data(records, sector, trade_date),
        )
    }

    fn save_investor_summary(&self, table: &InvestorFlowTable, trade_date: NaiveDate) -> bool {
        accepted(
            &format!("investor_summary/{}", table.market),
            self.upsert_investor_summary(table, trade_date),
        )
    }

    fn save_nvdr_trading(&self, records: &[NvdrRecord], trade_date: NaiveDate) -> bool {
        accepted("nvdr_trading", self.upsert_nvdr(records, trade_date))
    }

    fn save_short_sales_trading(
        &self,
        records: &[ShortSaleRecord],
        trade_date: NaiveDate,
    ) -> bool {
        accepted(
            "short_sales_trading",
            self.upsert_short_sales(records, trade_date),
        )
    }

    fn save_index_metrics(&self, records: &[IndexMetricRecord], trade_date: NaiveDate) -> bool {
        accepted("set_index", self.upsert_index_metrics(records, trade_date))
    }

    fn latest_trade_date(&self, source: DataSource) -> Option<NaiveDate> {
        match self.max_trade_date(source) {
            Ok(date) => date,
            Err(e) => {
                warn!("{}: latest trade date lookup failed: {:#}", source.as_str(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InvestorFlowRecord, Market, PeriodFlow};

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn sector_record(symbol: &str, sector: SectorSlug) -> SectorRecord {
        SectorRecord {
            symbol: symbol.into(),
            open: Some(10.0),
            high: Some(11.0),
            low: Some(9.5),
            last: Some(10.5),
            change: "+0.50".into(),
            percent_change: "+5.00".into(),
            bid: "10.40".into(),
            offer: "10.50".into(),
            volume_shares: Some(1_000),
            value_baht: Some(10_500.0),
            sector,
            trade_date: None,
        }
    }

    fn investor_table(types: &[InvestorType]) -> InvestorFlowTable {
        let flow = PeriodFlow {
            buy_value: 100.0,
            buy_percent: 10.0,
            sell_value: 80.0,
            sell_percent: 8.0,
            net_value: 20.0,
        };
        InvestorFlowTable {
            market: Market::Set,
            as_of: Some("21 Aug 2025".into()),
            trade_date: Some(d(2025, 8, 21)),
            period_labels: ["Daily".into(), "Month-to-Date".into(), "Year-to-Date".into()],
            records: types
                .iter()
                .map(|t| InvestorFlowRecord {
                    investor_type: *t,
                    daily: flow,
                    month_to_date: flow,
                    year_to_date: flow,
                })
                .collect(),
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let repo = repo();
        repo.run_migrations().unwrap();
        for source in ALL_SOURCES {
            assert_eq!(repo.row_count(source).unwrap(), 0);
        }
    }

    #[test]
    fn sector_save_replaces_same_day_rows() {
        let repo = repo();
        let day = d(2025, 8, 21);
        let first = vec![
            sector_record("GFPT", SectorSlug::Agro),
            sector_record("TFG", SectorSlug::Agro),
        ];
        assert!(repo.save_sector_data(&first, SectorSlug::Agro, day));
        assert!(repo.save_sector_data(
            &[sector_record("PTT", SectorSlug::Resourc)],
            SectorSlug::Resourc,
            day
        ));
        assert!(repo.save_sector_data(
            &[sector_record("GFPT", SectorSlug::Agro)],
            SectorSlug::Agro,
            day
        ));

        assert_eq!(repo.row_count(DataSource::SectorData).unwrap(), 2);
        assert_eq!(repo.sector_symbol_count().unwrap(), 2);
        assert_eq!(repo.latest_trade_date(DataSource::SectorData), Some(day));
    }

    #[test]
    fn investor_save_needs_all_four_types() {
        let repo = repo();
        let day = d(2025, 8, 21);
        let partial = investor_table(&InvestorType::ALL[..3]);
        assert!(!repo.save_investor_summary(&partial, day));
        assert_eq!(repo.row_count(DataSource::InvestorSummary).unwrap(), 0);

        let full = investor_table(&InvestorType::ALL);
        assert!(repo.save_investor_summary(&full, day));
        assert_eq!(repo.row_count(DataSource::InvestorSummary).unwrap(), 12);

        // Same day again upserts in place.
        assert!(repo.save_investor_summary(&full, day));
        assert_eq!(repo.row_count(DataSource::InvestorSummary).unwrap(), 12);
    }

    #[test]
    fn report_saves_and_latest_date() {
        let repo = repo();
        assert_eq!(repo.latest_trade_date(DataSource::NvdrTrading), None);

        let nvdr = vec![NvdrRecord {
            symbol: "PTT".into(),
            volume_buy: Some(1_000),
            ..NvdrRecord::default()
        }];
        assert!(repo.save_nvdr_trading(&nvdr, d(2025, 8, 14)));
        assert!(repo.save_nvdr_trading(&nvdr, d(2025, 8, 15)));
        assert_eq!(
            repo.latest_trade_date(DataSource::NvdrTrading),
            Some(d(2025, 8, 15))
        );

        let shorts = vec![
            ShortSaleRecord {
                symbol: "KBANK".into(),
                short_percentage: Some(0.52),
                ..ShortSaleRecord::default()
            },
            ShortSaleRecord {
                symbol: "SCB".into(),
                ..ShortSaleRecord::default()
            },
        ];
        assert!(repo.save_short_sales_trading(&shorts, d(2025, 8, 15)));
        assert_eq!(repo.row_count(DataSource::ShortSalesTrading).unwrap(), 2);
    }

    #[test]
    fn index_rows_prefer_their_own_date() {
        let repo = repo();
        let records = vec![IndexMetricRecord {
            index_name: "SET".into(),
            last: 1_250.5,
            change: -3.2,
            percent_change: -0.26,
            volume: Some(12_345),
            value: Some(45_678.9),
            as_of: Some(d(2025, 8, 20)),
        }];
        assert!(repo.save_index_metrics(&records, d(2025, 8, 21)));
        assert_eq!(
            repo.latest_trade_date(DataSource::SetIndex),
            Some(d(2025, 8, 20))
        );
    }

    #[test]
    fn scrape_run_log() {
        let repo = repo();
        let a = repo.begin_scrape_run().unwrap();
        let b = repo.begin_scrape_run().unwrap();
        assert_ne!(a, b);
        repo.finish_scrape_run(b, "partial", 3, 4, Some("1 source failed"))
            .unwrap();
        let (_, status) = repo.last_scrape_run().unwrap().unwrap();
        assert_eq!(status, "partial");
    }
}
