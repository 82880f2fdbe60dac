pub mod cleaner;
pub mod dates;
pub mod http_client;
pub mod metrics;
pub mod parsers;

use crate::config::{FetchFormat, ScraperConfig};
use crate::error::ScrapeError;
use crate::models::{
    IndexOverview, InvestorFlowTable, Market, RawTable, SectorMetrics, SectorRecord, SectorSlug,
};
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use self::http_client::{FetchOptions, ProxyFetcher};
use self::parsers::{ContentKind, TableTarget};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable data source abstraction.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_sector(&self, slug: SectorSlug) -> Result<SectorScrape, ScrapeError>;
    async fn fetch_investor_flows(&self, market: Market) -> Result<InvestorFlowTable, ScrapeError>;
    async fn fetch_index_overview(&self) -> Result<IndexOverview, ScrapeError>;
}

/// Everything one sector page yielded.
#[derive(Debug, Clone)]
pub struct SectorScrape {
    pub slug: SectorSlug,
    /// "md" or "text": which proxy rendering the data came from.
    pub format_used: &'static str,
    pub raw: String,
    pub metrics: SectorMetrics,
    pub table: RawTable,
    pub records: Vec<SectorRecord>,
}

// ── SET website through the reader proxy ──────────────────────────────────────

pub struct SetScraper {
    fetcher: ProxyFetcher,
    base_url: String,
    options: FetchOptions,
    format: FetchFormat,
}

impl SetScraper {
    pub fn new(config: &ScraperConfig, concurrency: usize) -> Result<Self> {
        Ok(Self::with_fetcher(
            ProxyFetcher::new(config, concurrency)?,
            config,
        ))
    }

    pub fn with_fetcher(fetcher: ProxyFetcher, config: &ScraperConfig) -> Self {
        Self {
            fetcher,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            options: FetchOptions::from_config(config),
            format: config.format,
        }
    }

    /// e.g. agro → /market/index/set/agro
    fn sector_url(&self, slug: SectorSlug) -> String {
        format!("{}/market/index/set/{}", self.base_url, slug)
    }

    fn investor_url(&self, market: Market) -> String {
        format!(
            "{}/market/statistics/investor-type?market={}",
            self.base_url, market
        )
    }

    fn home_url(&self) -> String {
        format!("{}/home", self.base_url)
    }

    async fn fetch_page(&self, url: &str, prefer_text: bool) -> Result<String, ScrapeError> {
        let options = if prefer_text {
            self.options.text()
        } else {
            self.options
        };
        let result = self.fetcher.fetch(url, options).await;
        if !result.is_success() {
            return Err(ScrapeError::Fetch {
                url: url.to_string(),
                status: result.status,
                attempts: result.attempt_count,
            });
        }
        result
            .into_text()
            .filter(|body| !body.trim().is_empty())
            .ok_or_else(|| ScrapeError::parse(url, "page body"))
    }
}

/// Renderings to try, in order: `false` = markdown, `true` = plain text.
fn renderings(format: FetchFormat) -> &'static [bool] {
    match format {
        FetchFormat::Auto => &[false, true],
        FetchFormat::Md => &[false],
        FetchFormat::Text => &[true],
    }
}

fn parse_sector(
    slug: SectorSlug,
    format_used: &'static str,
    raw: String,
    url: &str,
) -> Result<SectorScrape, ScrapeError> {
    let metrics = metrics::extract(&raw, slug.as_str());
    let table = parsers::extract(&raw, ContentKind::sniff(&raw), TableTarget::Constituents)
        .ok_or_else(|| ScrapeError::parse(url, "constituents table"))?;
    let records = cleaner::sector_records(&table, slug, metrics.trade_date);
    if records.is_empty() {
        return Err(ScrapeError::parse(url, "constituent rows"));
    }
    Ok(SectorScrape {
        slug,
        format_used,
        raw,
        metrics,
        table,
        records,
    })
}

#[async_trait]
impl MarketDataSource for SetScraper {
    async fn fetch_sector(&self, slug: SectorSlug) -> Result<SectorScrape, ScrapeError> {
        let url = self.sector_url(slug);
        let mut last_err = None;

        for &prefer_text in renderings(self.format) {
            let format_used = if prefer_text { "text" } else { "md" };
            debug!("{}: fetching {} rendering", slug, format_used);

            let outcome = match self.fetch_page(&url, prefer_text).await {
                Ok(raw) => parse_sector(slug, format_used, raw, &url),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(scrape) => {
                    info!(
                        "{}: {} symbols ({} rendering)",
                        slug,
                        scrape.records.len(),
                        format_used
                    );
                    return Ok(scrape);
                }
                Err(e) => {
                    warn!("{}: {} rendering unusable: {}", slug, format_used, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ScrapeError::parse(url, "constituents table")))
    }

    async fn fetch_investor_flows(&self, market: Market) -> Result<InvestorFlowTable, ScrapeError> {
        let url = self.investor_url(market);
        let raw = self.fetch_page(&url, false).await?;
        let table = parsers::investor_flows(&raw, market)?;
        info!(
            "{}: {} investor types (as of {})",
            market,
            table.records.len(),
            table.as_of.as_deref().unwrap_or("?")
        );
        Ok(table)
    }

    async fn fetch_index_overview(&self) -> Result<IndexOverview, ScrapeError> {
        let url = self.home_url();
        let raw = self.fetch_page(&url, false).await?;
        let overview = parsers::index_overview(&raw)?;
        info!(
            "{} indices, last update {}",
            overview.records.len(),
            overview.timestamp.as_deref().unwrap_or("unknown")
        );
        Ok(overview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::http_client::FetchStatus;
    use crate::scraper::http_client::tests::{ScriptedTransport, ok, test_policy};
    use chrono::NaiveDate;
    use std::sync::Arc;

    const SECTOR_MD: &str = "\
Markdown Content:
AGRO
Last
412.35
-1.52 (-0.37%)

| Symbol | Last | Change | % Change | Volume |
| --- | --- | --- | --- | --- |
| [GFPT](https://www.set.or.th/en/market/product/stock/quote/GFPT/price) | 11.20 | +0.10 | +0.90 | 1,234,500 |
| [TFG CB](https://www.set.or.th/x) | 3.50 | -0.02 | -0.57 | 987,000 |

Last Update 21 Aug 2025 16:59:59
";

    const SECTOR_TEXT: &str = "\
Symbol    Last      Change    Volume
PTT       34.50     +0.25     1,234,500
AOT       61.00     -0.50     987,000
KBANK     142.00    +1.00     456,000
SCB       110.50    0.00      321,000
CPALL     58.25     -0.25     2,100,000
";

    fn scraper(transport: Arc<ScriptedTransport>, format: FetchFormat) -> SetScraper {
        let config = ScraperConfig {
            format,
            ..ScraperConfig::default()
        };
        let fetcher =
            ProxyFetcher::with_transport(transport, &config.proxy_prefix, test_policy(), 4);
        SetScraper::with_fetcher(fetcher, &config)
    }

    #[tokio::test]
    async fn markdown_sector_page() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(SECTOR_MD)]));
        let s = scraper(transport.clone(), FetchFormat::Auto);

        let scrape = s.fetch_sector(SectorSlug::Agro).await.unwrap();
        assert_eq!(scrape.format_used, "md");
        let symbols: Vec<&str> = scrape.records.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["GFPT", "TFG"]);
        assert_eq!(scrape.metrics.trade_date, NaiveDate::from_ymd_opt(2025, 8, 21));
        assert_eq!(scrape.records[0].trade_date, scrape.metrics.trade_date);

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].1,
            "https://r.jina.ai/https://www.set.or.th/en/market/index/set/agro"
        );
    }

    #[tokio::test]
    async fn auto_falls_back_to_text_rendering() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ok("Markdown Content:\nNothing tabular here."),
            ok(SECTOR_TEXT),
        ]));
        let s = scraper(transport.clone(), FetchFormat::Auto);

        let scrape = s.fetch_sector(SectorSlug::Resourc).await.unwrap();
        assert_eq!(scrape.format_used, "text");
        assert_eq!(scrape.records.len(), 5);

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].2.iter().any(|(k, v)| *k == "x-respond-with" && v == "text"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_fetch_is_reported_not_raised() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let s = scraper(transport.clone(), FetchFormat::Md);

        let err = s.fetch_sector(SectorSlug::Tech).await.unwrap_err();
        match err {
            ScrapeError::Fetch {
                status, attempts, ..
            } => {
                assert_eq!(status, FetchStatus::HttpError(500));
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(transport.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn investor_and_index_urls() {
        let s = scraper(Arc::new(ScriptedTransport::new(vec![])), FetchFormat::Auto);
        assert_eq!(
            s.investor_url(Market::Mai),
            "https://www.set.or.th/en/market/statistics/investor-type?market=MAI"
        );
        assert_eq!(s.home_url(), "https://www.set.or.th/en/home");
    }
}
