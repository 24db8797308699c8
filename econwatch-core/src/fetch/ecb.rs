//! Central-bank series source (SDMX CSV): EUR/GBP and EUR/USD reference rates.

use super::{fallback, or_fallback, FetchContext, Fetched, HttpRequest};
use crate::error::{DecodeError, FetchError};
use crate::normalize::{try_normalize, ColumnMatcher, NormalizeRequest, Shape};
use crate::records::RecordTable;
use crate::table::{round_to, SeriesTable};
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const EXCHANGE_RATE_FLOW: &str = "EXR";
pub const EUR_GBP_KEY: &str = "D.GBP.EUR.SP00.A";
pub const EUR_USD_KEY: &str = "D.USD.EUR.SP00.A";

const SDMX_CSV: &str = "application/vnd.sdmx.data+csv;version=1.0.0";
const PLAIN_CSV: &str = "text/csv";

const TIME_PERIOD: ColumnMatcher = ColumnMatcher::new("TIME_PERIOD", &["time"]);
const OBS_VALUE: ColumnMatcher = ColumnMatcher::exact("OBS_VALUE");

/// Latest reference rates with week-over-week % change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatesSnapshot {
    pub eur_gbp: f64,
    pub eur_usd: f64,
    pub as_of: NaiveDate,
    pub eur_gbp_wow: f64,
    pub eur_usd_wow: f64,
}

#[derive(Debug, Clone)]
pub struct EcbFetcher {
    ctx: FetchContext,
}

impl EcbFetcher {
    pub fn new(ctx: FetchContext) -> Self {
        Self { ctx }
    }

    /// Raw CSV for one series. A 406 is retried once with a plain `text/csv` accept header.
    pub fn try_series_text(
        &self,
        flow: &str,
        key: &str,
        start: NaiveDate,
    ) -> Result<String, FetchError> {
        let request = HttpRequest::get(format!(
            "{}/{flow}/{key}",
            self.ctx.sources.series_base.trim_end_matches('/')
        ))
        .query("startPeriod", start.format("%Y-%m-%d"))
        .query("format", "csvdata");

        match self.ctx.get_text(&request.clone().accept(SDMX_CSV)) {
            Err(e) if e.is_not_acceptable() => {
                warn!(flow, key, "series endpoint rejected accept header, retrying with text/csv");
                self.ctx.get_text(&request.accept(PLAIN_CSV))
            }
            other => other,
        }
    }

    fn try_series(
        &self,
        key: &str,
        column: &'static str,
        start: NaiveDate,
    ) -> Result<SeriesTable, FetchError> {
        let text = self.try_series_text(EXCHANGE_RATE_FLOW, key, start)?;
        let records = RecordTable::from_csv(&text, &[OBS_VALUE])?;
        let request = NormalizeRequest::new(Shape::Single { name: column }).period(&[TIME_PERIOD]);
        Ok(try_normalize(&records, &request)?)
    }

    /// Daily `eur_gbp` and `eur_usd` since `days` ago, outer-joined on date.
    pub fn try_exchange_rates(&self, days: u64) -> Result<SeriesTable, FetchError> {
        let start = self
            .ctx
            .today
            .checked_sub_days(Days::new(days))
            .unwrap_or(self.ctx.today);
        let gbp = self.try_series(EUR_GBP_KEY, "eur_gbp", start)?;
        let usd = self.try_series(EUR_USD_KEY, "eur_usd", start)?;
        let table = gbp.outer_join(&usd);
        info!(rows = table.len(), %start, "exchange rates fetched");
        Ok(table)
    }

    pub fn exchange_rates(&self, days: u64) -> Fetched<SeriesTable> {
        or_fallback("exchange_rates", self.try_exchange_rates(days), || {
            fallback::exchange_rates(self.ctx.today)
        })
    }

    pub fn try_latest_rates(&self) -> Result<RatesSnapshot, FetchError> {
        let table = self.try_exchange_rates(14)?;
        rates_snapshot(&table).ok_or(FetchError::Decode(DecodeError::EmptyAfterFilter))
    }

    /// Live only when the fetched rates yield a snapshot.
    pub fn latest_rates(&self) -> Fetched<RatesSnapshot> {
        or_fallback("latest_rates", self.try_latest_rates(), || {
            fallback::latest_rates(self.ctx.today)
        })
    }

    /// Calendar-month mean rates, newest first, `months` rows at most.
    pub fn try_monthly_averages(&self, months: usize) -> Result<SeriesTable, FetchError> {
        let daily = self.try_exchange_rates(months as u64 * 35)?;
        let mut monthly = monthly_means(&daily);
        monthly.truncate(months);
        Ok(monthly)
    }

    pub fn monthly_averages(&self, months: usize) -> Fetched<SeriesTable> {
        or_fallback(
            "monthly_exchange_rates",
            self.try_monthly_averages(months),
            || fallback::monthly_exchange_rates(self.ctx.today),
        )
    }
}

/// Latest complete row against the first complete row at least a week older.
///
/// `None` when no row has both rates. Without a row a week back both changes are 0.
pub fn rates_snapshot(table: &SeriesTable) -> Option<RatesSnapshot> {
    let gbp = table.column_index("eur_gbp")?;
    let usd = table.column_index("eur_usd")?;
    let pair = |row: &crate::table::SeriesRow| Some((row.values[gbp]?, row.values[usd]?));

    let (latest, (eur_gbp, eur_usd)) = table
        .rows()
        .iter()
        .find_map(|r| pair(r).map(|p| (r, p)))?;

    let cutoff = latest.date.checked_sub_days(Days::new(7))?;
    let base = table
        .rows()
        .iter()
        .filter(|r| r.date <= cutoff)
        .find_map(pair);
    let change = |now: f64, then: f64| {
        if then == 0.0 {
            0.0
        } else {
            round_to((now - then) / then * 100.0, 2)
        }
    };
    let (eur_gbp_wow, eur_usd_wow) = match base {
        Some((g, u)) => (change(eur_gbp, g), change(eur_usd, u)),
        None => (0.0, 0.0),
    };

    Some(RatesSnapshot {
        eur_gbp: round_to(eur_gbp, 3),
        eur_usd: round_to(eur_usd, 3),
        as_of: latest.date,
        eur_gbp_wow,
        eur_usd_wow,
    })
}

/// Mean of each column per calendar month, dated the 1st, rounded to 3 decimals.
pub fn monthly_means(table: &SeriesTable) -> SeriesTable {
    let width = table.columns().len();
    let mut sums: BTreeMap<NaiveDate, Vec<(f64, usize)>> = BTreeMap::new();
    for row in table.rows() {
        let month = row.date.with_day(1).unwrap_or(row.date);
        let acc = sums.entry(month).or_insert_with(|| vec![(0.0, 0); width]);
        for (slot, value) in acc.iter_mut().zip(&row.values) {
            if let Some(v) = value {
                slot.0 += v;
                slot.1 += 1;
            }
        }
    }
    let rows = sums.into_iter().map(|(date, acc)| {
        let values = acc
            .into_iter()
            .map(|(sum, n)| (n > 0).then(|| round_to(sum / n as f64, 3)))
            .collect();
        (date, values)
    });
    let mut out = SeriesTable::from_rows(table.columns().to_vec(), rows);
    out.sort_desc();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourcesConfig;
    use crate::fetch::{CannedTransport, HttpResponse, Transport};
    use crate::table::Provenance;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const BASE: &str = "https://series.test/data";

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, day).unwrap()
    }

    fn ctx(transport: Arc<dyn Transport>) -> FetchContext {
        let sources = SourcesConfig {
            series_base: BASE.into(),
            ..SourcesConfig::default()
        };
        FetchContext::new(transport, sources, d(3, 12))
    }

    fn csv(currency: &str, rows: &[(&str, &str)]) -> String {
        let mut out = String::from("KEY,FREQ,CURRENCY,CURRENCY_DENOM,TIME_PERIOD,OBS_VALUE\n");
        for (date, value) in rows {
            out.push_str(&format!("EXR.D.{currency}.EUR.SP00.A,D,{currency},EUR,{date},{value}\n"));
        }
        out
    }

    fn not_acceptable() -> HttpResponse {
        HttpResponse {
            status: 406,
            body: String::new(),
        }
    }

    fn rates_transport() -> CannedTransport {
        let gbp = csv(
            "GBP",
            &[
                ("2025-03-03", "0.79"),
                ("2025-03-04", "0.80"),
                ("2025-03-10", "0.83"),
                ("2025-03-11", "0.84"),
            ],
        );
        let usd = csv(
            "USD",
            &[
                ("2025-03-03", "1.04"),
                ("2025-03-04", "1.05"),
                ("2025-03-10", "1.08"),
                ("2025-03-11", ""),
            ],
        );
        CannedTransport::new()
            .route_accept(&format!("{BASE}/EXR/{EUR_GBP_KEY}"), SDMX_CSV, HttpResponse::ok(gbp))
            .route_accept(&format!("{BASE}/EXR/{EUR_USD_KEY}"), PLAIN_CSV, HttpResponse::ok(usd))
            .route(&format!("{BASE}/EXR/{EUR_USD_KEY}"), not_acceptable())
    }

    #[test]
    fn exchange_rates_outer_join_and_relaxed_retry() {
        let f = EcbFetcher::new(ctx(Arc::new(rates_transport())));
        let t = f.try_exchange_rates(14).unwrap();
        assert_eq!(t.columns(), ["eur_gbp", "eur_usd"]);
        assert_eq!(t.len(), 4);
        assert_eq!(t.rows()[0].date, d(3, 11));
        assert_eq!(t.value(0, "eur_gbp"), Some(0.84));
        assert_eq!(t.value(0, "eur_usd"), None);
        assert_eq!(t.value(1, "eur_usd"), Some(1.08));
    }

    #[test]
    fn latest_rates_use_latest_complete_row_and_week_old_base() {
        let f = EcbFetcher::new(ctx(Arc::new(rates_transport())));
        let snap = f.try_latest_rates().unwrap();
        // 2025-03-11 has no USD value, so 2025-03-10 is the latest complete row
        assert_eq!(snap.as_of, d(3, 10));
        assert_eq!(snap.eur_gbp, 0.83);
        assert_eq!(snap.eur_usd, 1.08);
        // base is 2025-03-03
        assert_eq!(snap.eur_gbp_wow, 5.06);
        assert_eq!(snap.eur_usd_wow, 3.85);
    }

    struct AlwaysNotAcceptable {
        calls: AtomicUsize,
    }

    impl Transport for AlwaysNotAcceptable {
        fn name(&self) -> &str {
            "406"
        }

        fn get(&self, _request: &HttpRequest) -> Result<HttpResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(not_acceptable())
        }
    }

    #[test]
    fn not_acceptable_is_retried_exactly_once() {
        let transport = Arc::new(AlwaysNotAcceptable {
            calls: AtomicUsize::new(0),
        });
        let f = EcbFetcher::new(ctx(transport.clone()));
        let err = f
            .try_series_text(EXCHANGE_RATE_FLOW, EUR_GBP_KEY, d(3, 1))
            .unwrap_err();
        assert!(err.is_not_acceptable());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn monthly_means_group_by_calendar_month() {
        let t = SeriesTable::from_rows(
            ["eur_gbp"],
            [
                (d(3, 4), vec![Some(0.84)]),
                (d(3, 3), vec![Some(0.82)]),
                (d(2, 28), vec![Some(0.8)]),
                (d(2, 27), vec![None]),
            ],
        );
        let m = monthly_means(&t);
        assert_eq!(m.len(), 2);
        assert_eq!(m.rows()[0].date, d(3, 1));
        assert_eq!(m.value(0, "eur_gbp"), Some(0.83));
        assert_eq!(m.value(1, "eur_gbp"), Some(0.8));
    }

    #[test]
    fn failures_fall_back() {
        let f = EcbFetcher::new(ctx(Arc::new(CannedTransport::new())));
        let rates = f.exchange_rates(30);
        assert_eq!(rates.provenance, Provenance::Fallback);
        assert_eq!(rates.value.len(), 30);

        let monthly = f.monthly_averages(15);
        assert_eq!(monthly.value, fallback::monthly_exchange_rates(d(3, 12)));
        assert_eq!(monthly.error.unwrap().source, "monthly_exchange_rates");

        let latest = f.latest_rates();
        assert_eq!(latest.provenance, Provenance::Fallback);
        assert_eq!(latest.value, fallback::latest_rates(d(3, 12)));
    }

    #[test]
    fn rates_without_a_complete_row_fall_back_with_an_error() {
        let gbp = csv("GBP", &[("2025-03-10", "0.83")]);
        let usd = csv("USD", &[("2025-03-11", "1.08")]);
        let transport = CannedTransport::new()
            .route(&format!("{BASE}/EXR/{EUR_GBP_KEY}"), HttpResponse::ok(gbp))
            .route(&format!("{BASE}/EXR/{EUR_USD_KEY}"), HttpResponse::ok(usd));
        let f = EcbFetcher::new(ctx(Arc::new(transport)));
        assert_eq!(f.try_exchange_rates(14).unwrap().len(), 2);

        let latest = f.latest_rates();
        assert_eq!(latest.provenance, Provenance::Fallback);
        assert_eq!(latest.value, fallback::latest_rates(d(3, 12)));
        assert_eq!(latest.error.unwrap().source, "latest_rates");
    }

    #[test]
    fn empty_table_has_no_snapshot() {
        let t = SeriesTable::new(vec!["eur_gbp".into(), "eur_usd".into()]);
        assert_eq!(rates_snapshot(&t), None);
    }
}
