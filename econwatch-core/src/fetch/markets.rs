//! Market chart source (commodity closes) and government bond page scraping.
//!
//! The chart API has no official contract and changes without notice, so every
//! parse failure is a [`DecodeError`] that the caller turns into fallback data.
//! Container freight, insolvencies and the historical bond spread have no free
//! live feed and are served from [`fallback`] without an error.

use super::{fallback, or_fallback, FetchContext, Fetched, HttpRequest};
use crate::error::{DecodeError, FetchError, SourceError};
use crate::extract::html_table_texts;
use crate::table::{round_to, Provenance, SeriesTable};
use chrono::{Days, NaiveDate, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, info};

pub const BRENT_TICKER: &str = "BZ=F";
pub const NATURAL_GAS_TICKER: &str = "NG=F";

/// USD/MMBtu to an approximate GBp/therm.
const GAS_GBP_THERM_FACTOR: f64 = 2.5;

/// History requested for the latest-commodities snapshot; enough for a year-over-year base.
const SNAPSHOT_DAYS: u64 = 370;

const TEN_YEAR_MARKERS: [&str; 2] = ["10 Year", "10Y"];
const PERCENT_PATTERN: &str = r"(\d+\.\d+)\s*%";

/// Chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    pub price: f64,
    pub wow: f64,
    pub yoy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub price: f64,
    pub high: f64,
    pub low: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommoditySnapshot {
    pub brent: PriceChange,
    pub gas: PriceRange,
}

/// Irish and German 10-year yields, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BondSnapshot {
    pub ireland_10y: f64,
    pub germany_10y: f64,
    pub spread: f64,
    pub as_of: NaiveDate,
}

/// Asia to North Europe container freight, USD per FEU.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContainerCosts {
    pub current: f64,
    pub wow: f64,
    pub yoy: f64,
    pub mom: f64,
    pub as_of: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct MarketFetcher {
    ctx: FetchContext,
}

impl MarketFetcher {
    pub fn new(ctx: FetchContext) -> Self {
        Self { ctx }
    }

    /// Daily bars for the last `days` days, up to the end of today (UTC).
    fn chart_request(&self, ticker: &str, days: u64) -> HttpRequest {
        let today = self.ctx.today;
        let start = today.checked_sub_days(Days::new(days)).unwrap_or(today);
        let end = today.checked_add_days(Days::new(1)).unwrap_or(today);
        let ts = |d: NaiveDate| d.and_time(NaiveTime::MIN).and_utc().timestamp();
        HttpRequest::get(format!(
            "{}/{ticker}",
            self.ctx.sources.market_base.trim_end_matches('/')
        ))
        .query("period1", ts(start))
        .query("period2", ts(end))
        .query("interval", "1d")
    }

    fn try_closes(
        &self,
        ticker: &str,
        days: u64,
        column: &str,
    ) -> Result<SeriesTable, FetchError> {
        let body = self.ctx.get_text(&self.chart_request(ticker, days))?;
        let table = parse_closes(ticker, &body, column)?;
        info!(ticker, rows = table.len(), "closing prices fetched");
        Ok(table)
    }

    /// `brent_price`, newest first.
    pub fn try_brent_crude(&self, days: u64) -> Result<SeriesTable, FetchError> {
        self.try_closes(BRENT_TICKER, days, "brent_price")
    }

    pub fn brent_crude(&self, days: u64) -> Fetched<SeriesTable> {
        or_fallback("brent_crude", self.try_brent_crude(days), || {
            fallback::brent_crude(self.ctx.today)
        })
    }

    /// `gas_price` (USD/MMBtu) and the derived `gas_price_gbp_thm`, newest first.
    pub fn try_natural_gas(&self, days: u64) -> Result<SeriesTable, FetchError> {
        let mut table = self.try_closes(NATURAL_GAS_TICKER, days, "gas_price")?;
        table.add_column("gas_price_gbp_thm", |row| {
            row.values[0].map(|p| p * GAS_GBP_THERM_FACTOR)
        });
        Ok(table)
    }

    pub fn natural_gas(&self, days: u64) -> Fetched<SeriesTable> {
        or_fallback("natural_gas", self.try_natural_gas(days), || {
            fallback::natural_gas(self.ctx.today)
        })
    }

    pub fn try_latest_commodities(&self) -> Result<CommoditySnapshot, FetchError> {
        let brent = self.try_brent_crude(SNAPSHOT_DAYS)?;
        let gas = self.try_natural_gas(SNAPSHOT_DAYS)?;
        Ok(commodity_snapshot(&brent, &gas))
    }

    /// Snapshot from whichever tables [`brent_crude`](Self::brent_crude) and
    /// [`natural_gas`](Self::natural_gas) produced. Live only if both were live.
    /// When both failed the error names both failures.
    pub fn latest_commodities(&self) -> Fetched<CommoditySnapshot> {
        let brent = self.brent_crude(SNAPSHOT_DAYS);
        let gas = self.natural_gas(SNAPSHOT_DAYS);
        let provenance = if brent.is_live() && gas.is_live() {
            Provenance::Live
        } else {
            Provenance::Fallback
        };
        Fetched {
            value: commodity_snapshot(&brent.value, &gas.value),
            provenance,
            error: match (brent.error, gas.error) {
                (Some(b), Some(g)) => Some(SourceError::new("commodities", format!("{b}; {g}"))),
                (b, g) => b.or(g),
            },
        }
    }

    /// 10-year yield from a country's bond page.
    pub fn try_bond_yield(&self, country: &str) -> Result<f64, FetchError> {
        let url = format!(
            "{}/{country}/",
            self.ctx.sources.bond_base.trim_end_matches('/')
        );
        let html = self.ctx.get_text(&HttpRequest::get(url.as_str()))?;
        let value = ten_year_yield(&html).ok_or(FetchError::ExtractionAmbiguous(url))?;
        debug!(country, value, "10-year yield scraped");
        Ok(value)
    }

    pub fn try_bond_yields(&self) -> Result<BondSnapshot, FetchError> {
        let ireland = self.try_bond_yield("ireland")?;
        let germany = self.try_bond_yield("germany")?;
        Ok(BondSnapshot {
            ireland_10y: round_to(ireland, 3),
            germany_10y: round_to(germany, 3),
            spread: round_to(ireland - germany, 3),
            as_of: self.ctx.today,
        })
    }

    pub fn bond_yields(&self) -> Fetched<BondSnapshot> {
        or_fallback("bonds", self.try_bond_yields(), || {
            fallback::bond_yields(self.ctx.today)
        })
    }

    pub fn monthly_bond_data(&self, months: usize) -> Fetched<SeriesTable> {
        Fetched::fixed(fallback::monthly_bonds(self.ctx.today, months))
    }

    pub fn container_costs(&self) -> Fetched<ContainerCosts> {
        Fetched::fixed(fallback::container_costs(self.ctx.today))
    }

    pub fn insolvency_data(&self) -> Fetched<SeriesTable> {
        Fetched::fixed(fallback::insolvency(self.ctx.today))
    }
}

/// Closing prices from a chart response as a one-column table, newest first.
///
/// Days without a close (holidays) are skipped; several bars on one UTC day keep the last.
pub fn parse_closes(ticker: &str, body: &str, column: &str) -> Result<SeriesTable, DecodeError> {
    let resp: ChartResponse = serde_json::from_str(body)
        .map_err(|e| DecodeError::Malformed(format!("{ticker}: chart response: {e}")))?;

    let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
        Some(err) => DecodeError::Malformed(format!("{ticker}: {}: {}", err.code, err.description)),
        None => DecodeError::Malformed(format!("{ticker}: empty result with no error")),
    })?;

    let data = result
        .into_iter()
        .next()
        .ok_or_else(|| DecodeError::Malformed(format!("{ticker}: result array is empty")))?;
    let timestamps = data
        .timestamp
        .ok_or_else(|| DecodeError::Malformed(format!("{ticker}: no timestamps")))?;
    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| DecodeError::Malformed(format!("{ticker}: no quote data")))?;

    let mut table = SeriesTable::new(vec![column.to_string()]);
    for (i, &ts) in timestamps.iter().enumerate() {
        let Some(close) = quote.close.get(i).copied().flatten() else {
            continue;
        };
        let date = chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| DecodeError::Malformed(format!("{ticker}: invalid timestamp {ts}")))?;
        table.push(date, vec![Some(close)]);
    }

    if table.is_empty() {
        return Err(DecodeError::EmptyAfterFilter);
    }
    table.canonicalize();
    Ok(table)
}

/// Latest Brent price with week/year changes, and the gas price with its range.
///
/// An empty table contributes the static snapshot for that commodity; a
/// missing week or year base counts as no change.
pub fn commodity_snapshot(brent: &SeriesTable, gas: &SeriesTable) -> CommoditySnapshot {
    let fixed = fallback::commodities();

    let brent = brent
        .value(0, "brent_price")
        .map(|price| PriceChange {
            price: round_to(price, 2),
            wow: brent.pct_change_since("brent_price", 7).unwrap_or(0.0),
            yoy: brent.pct_change_since("brent_price", 365).unwrap_or(0.0),
        })
        .unwrap_or(fixed.brent);

    let gas = gas
        .value(0, "gas_price_gbp_thm")
        .zip(gas.range("gas_price_gbp_thm"))
        .map(|(price, (high, low))| PriceRange {
            price: round_to(price, 2),
            high: round_to(high, 2),
            low: round_to(low, 2),
        })
        .unwrap_or(fixed.gas);

    CommoditySnapshot { brent, gas }
}

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PERCENT_PATTERN).expect("percent pattern is valid"))
}

/// First percentage in the first table that mentions a 10-year maturity.
pub fn ten_year_yield(html: &str) -> Option<f64> {
    let percent = percent_re();
    html_table_texts(html)
        .iter()
        .filter(|text| TEN_YEAR_MARKERS.iter().any(|m| text.contains(m)))
        .find_map(|text| percent.captures(text)?.get(1)?.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourcesConfig;
    use crate::fetch::{CannedTransport, HttpResponse};
    use serde_json::json;
    use std::sync::Arc;

    const CHART: &str = "https://chart.test/v8/finance/chart";
    const BONDS: &str = "https://bonds.test/country";

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn fetcher(transport: CannedTransport) -> MarketFetcher {
        let sources = SourcesConfig {
            market_base: CHART.into(),
            bond_base: BONDS.into(),
            ..SourcesConfig::default()
        };
        MarketFetcher::new(FetchContext::new(
            Arc::new(transport),
            sources,
            d(2025, 3, 12),
        ))
    }

    fn chart(bars: &[(NaiveDate, Option<f64>)]) -> String {
        let timestamps: Vec<i64> = bars
            .iter()
            .map(|(date, _)| date.and_hms_opt(14, 30, 0).unwrap().and_utc().timestamp())
            .collect();
        let closes: Vec<Option<f64>> = bars.iter().map(|(_, c)| *c).collect();
        json!({
            "chart": {
                "result": [{
                    "timestamp": timestamps,
                    "indicators": {"quote": [{"close": closes}]}
                }],
                "error": null
            }
        })
        .to_string()
    }

    #[test]
    fn parse_closes_skips_missing_and_sorts_newest_first() {
        let body = chart(&[
            (d(2025, 3, 10), Some(70.5)),
            (d(2025, 3, 11), None),
            (d(2025, 3, 12), Some(71.25)),
        ]);
        let t = parse_closes(BRENT_TICKER, &body, "brent_price").unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.rows()[0].date, d(2025, 3, 12));
        assert_eq!(t.value(0, "brent_price"), Some(71.25));
    }

    #[test]
    fn parse_closes_reports_api_errors() {
        let body = r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#;
        let err = parse_closes("XX=F", body, "p").unwrap_err();
        assert!(err.to_string().contains("Not Found"));
        assert!(parse_closes("XX=F", "<html>", "p").is_err());
    }

    #[test]
    fn natural_gas_adds_converted_price() {
        let body = chart(&[(d(2025, 3, 11), Some(4.0)), (d(2025, 3, 12), Some(4.2))]);
        let f = fetcher(
            CannedTransport::new().route(&format!("{CHART}/{NATURAL_GAS_TICKER}"), HttpResponse::ok(body)),
        );
        let t = f.try_natural_gas(30).unwrap();
        assert_eq!(t.columns(), ["gas_price", "gas_price_gbp_thm"]);
        assert_eq!(t.value(0, "gas_price_gbp_thm"), Some(4.2 * 2.5));
    }

    #[test]
    fn week_and_year_changes_use_first_row_at_or_before_cutoff() {
        let brent = SeriesTable::from_rows(
            ["brent_price"],
            [
                (d(2025, 3, 12), vec![Some(100.0)]),
                (d(2025, 3, 5), vec![Some(95.0)]),
                (d(2024, 3, 12), vec![Some(120.0)]),
            ],
        );
        let snap = commodity_snapshot(&brent, &SeriesTable::empty());
        assert_eq!(
            snap.brent,
            PriceChange {
                price: 100.0,
                wow: 5.26,
                yoy: -16.67
            }
        );
        assert_eq!(snap.gas, fallback::commodities().gas);
    }

    #[test]
    fn missing_year_base_is_no_change() {
        let brent = SeriesTable::from_rows(
            ["brent_price"],
            [(d(2025, 3, 12), vec![Some(80.0)]), (d(2025, 3, 4), vec![Some(82.0)])],
        );
        let snap = commodity_snapshot(&brent, &SeriesTable::empty());
        assert_eq!(snap.brent.yoy, 0.0);
        assert_eq!(snap.brent.wow, -2.44);
    }

    #[test]
    fn latest_commodities_is_live_only_when_both_sources_are() {
        let brent = chart(&[(d(2025, 3, 12), Some(75.0))]);
        let f = fetcher(
            CannedTransport::new().route(&format!("{CHART}/{BRENT_TICKER}"), HttpResponse::ok(brent)),
        );
        let snap = f.latest_commodities();
        assert_eq!(snap.provenance, Provenance::Fallback);
        assert_eq!(snap.value.brent.price, 75.0);
        assert_eq!(snap.error.unwrap().source, "natural_gas");
    }

    #[test]
    fn latest_commodities_reports_both_failures() {
        let snap = fetcher(CannedTransport::new()).latest_commodities();
        assert_eq!(snap.provenance, Provenance::Fallback);
        let err = snap.error.unwrap();
        assert_eq!(err.source, "commodities");
        assert!(err.message.contains("brent_crude: "), "{err}");
        assert!(err.message.contains("natural_gas: "), "{err}");
    }

    #[test]
    fn percent_pattern_is_compiled_once() {
        assert!(std::ptr::eq(percent_re(), percent_re()));
    }

    const IRELAND_PAGE: &str = r#"<html><body>
        <table><tr><td>Rating</td><td>AA</td></tr></table>
        <table><tr><th>Maturity</th><th>Yield</th></tr>
               <tr><td>10 Year</td><td>3.125 %</td></tr></table>
        </body></html>"#;
    const GERMANY_PAGE: &str = r#"<table><tr><td>10Y</td><td>2.65%</td></tr></table>"#;

    #[test]
    fn ten_year_yield_needs_marker_table() {
        assert_eq!(ten_year_yield(IRELAND_PAGE), Some(3.125));
        assert_eq!(ten_year_yield(GERMANY_PAGE), Some(2.65));
        assert_eq!(ten_year_yield("<table><tr><td>2Y</td><td>2.1%</td></tr></table>"), None);
    }

    #[test]
    fn bond_yields_compute_spread() {
        let f = fetcher(
            CannedTransport::new()
                .route(&format!("{BONDS}/ireland/"), HttpResponse::ok(IRELAND_PAGE))
                .route(&format!("{BONDS}/germany/"), HttpResponse::ok(GERMANY_PAGE)),
        );
        let b = f.bond_yields();
        assert!(b.is_live());
        assert_eq!(b.value.ireland_10y, 3.125);
        assert_eq!(b.value.germany_10y, 2.65);
        assert_eq!(b.value.spread, 0.475);
    }

    #[test]
    fn bond_page_without_yield_falls_back() {
        let f = fetcher(CannedTransport::new().route(BONDS, HttpResponse::ok("<p>maintenance</p>")));
        let b = f.bond_yields();
        assert_eq!(b.value, fallback::bond_yields(d(2025, 3, 12)));
        assert!(b.error.unwrap().message.contains("no plausible reading"));
    }

    #[test]
    fn static_datasets_are_not_errors() {
        let f = fetcher(CannedTransport::new());
        let container = f.container_costs();
        assert_eq!(container.provenance, Provenance::Fallback);
        assert!(container.error.is_none());
        assert_eq!(container.value.current, 2730.0);
        assert_eq!(f.monthly_bond_data(15).value.len(), 15);
        assert_eq!(f.insolvency_data().value.len(), 5);
    }
}
