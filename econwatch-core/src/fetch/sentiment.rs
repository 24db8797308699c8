//! Consumer sentiment index.
//!
//! The monthly press release carries the newest reading; a history-table page
//! supplies earlier months. When both name the same month the release wins.

use super::{fallback, or_fallback, FetchContext, Fetched, HttpRequest};
use crate::error::FetchError;
use crate::extract::{history_rows, html_to_text, ExtractorConfig, ScrapeResult, TextExtractor};
use crate::table::{LatestReading, SeriesTable};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const RELEASE_SOURCE: &str = "sentiment_release";
pub const HISTORY_SOURCE: &str = "sentiment_history";

#[derive(Debug, Clone)]
pub struct SentimentFetcher {
    ctx: FetchContext,
    extractor: TextExtractor,
}

impl SentimentFetcher {
    pub fn new(ctx: FetchContext) -> Self {
        Self {
            ctx,
            extractor: TextExtractor::new(ExtractorConfig::sentiment()),
        }
    }

    /// Reading from the press release page.
    pub fn try_release_reading(&self) -> Result<ScrapeResult, FetchError> {
        let url = self.ctx.sources.sentiment_release.as_str();
        let text = html_to_text(&self.ctx.get_text(&HttpRequest::get(url))?);
        let value = self
            .extractor
            .extract_value(&text)
            .ok_or_else(|| FetchError::ExtractionAmbiguous(url.to_string()))?;
        Ok(self.extractor.attribute(
            value,
            &text,
            self.ctx.today,
            self.ctx.period_policy,
            RELEASE_SOURCE,
        ))
    }

    /// Readings from the history table, newest first.
    pub fn try_history(&self) -> Result<Vec<ScrapeResult>, FetchError> {
        let url = self.ctx.sources.sentiment_history.as_str();
        let html = self.ctx.get_text(&HttpRequest::get(url))?;
        let rows = history_rows(
            &html,
            &self.extractor,
            &self.extractor.config().specific,
            self.ctx.today,
            HISTORY_SOURCE,
        );
        if rows.is_empty() {
            return Err(FetchError::ExtractionAmbiguous(url.to_string()));
        }
        Ok(rows)
    }

    /// Monthly `sentiment`, newest first, at most `months` rows.
    pub fn try_consumer_sentiment(&self, months: usize) -> Result<SeriesTable, FetchError> {
        let mut by_date: BTreeMap<NaiveDate, Vec<Option<f64>>> = BTreeMap::new();
        let mut last_error = None;

        match self.try_history() {
            Ok(rows) => {
                for r in rows {
                    if let Some(date) = r.period.first_day() {
                        by_date.entry(date).or_insert_with(|| vec![Some(r.value)]);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "sentiment history unavailable");
                last_error = Some(e);
            }
        }
        match self.try_release_reading() {
            Ok(r) => {
                if let Some(date) = r.period.first_day() {
                    by_date.insert(date, vec![Some(r.value)]);
                }
            }
            Err(e) => {
                warn!(error = %e, "sentiment release unavailable");
                last_error = Some(e);
            }
        }

        let mut table = SeriesTable::from_rows(["sentiment"], by_date);
        table.sort_desc();
        if months > 0 {
            table.truncate(months);
        }
        if table.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                FetchError::ExtractionAmbiguous(self.ctx.sources.sentiment_release.clone())
            }));
        }
        info!(rows = table.len(), latest = ?table.value(0, "sentiment"), "consumer sentiment");
        Ok(table)
    }

    pub fn consumer_sentiment(&self, months: usize) -> Fetched<SeriesTable> {
        or_fallback(
            "consumer_sentiment",
            self.try_consumer_sentiment(months),
            || {
                let mut table = fallback::sentiment(self.ctx.today);
                if months > 0 {
                    table.truncate(months);
                }
                table
            },
        )
    }

    pub fn try_latest_sentiment(&self) -> Result<LatestReading, FetchError> {
        let table = self.try_consumer_sentiment(15)?;
        table.latest_reading("sentiment").ok_or_else(|| {
            FetchError::ExtractionAmbiguous("fewer than two sentiment readings".into())
        })
    }

    pub fn latest_sentiment(&self) -> Fetched<LatestReading> {
        or_fallback("sentiment_latest", self.try_latest_sentiment(), || {
            fallback::latest_sentiment(self.ctx.today)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourcesConfig;
    use crate::fetch::{CannedTransport, HttpResponse};
    use crate::table::Provenance;
    use std::sync::Arc;

    const RELEASE: &str = "https://bank.test/newsroom";
    const HISTORY: &str = "https://history.test/consumer-confidence";

    fn d(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    fn fetcher(transport: CannedTransport) -> SentimentFetcher {
        let sources = SourcesConfig {
            sentiment_release: RELEASE.into(),
            sentiment_history: HISTORY.into(),
            ..SourcesConfig::default()
        };
        SentimentFetcher::new(FetchContext::new(
            Arc::new(transport),
            sources,
            NaiveDate::from_ymd_opt(2025, 3, 12).unwrap(),
        ))
    }

    const RELEASE_PAGE: &str = "<article><h2>Consumer Sentiment Index</h2>\
        <p>The index rose to 64.9 in February from 61.2 in January.</p></article>";

    const HISTORY_PAGE: &str = "<table>\
        <tr><th>Date</th><th>Value</th></tr>\
        <tr><td>Feb 2025</td><td>63.0</td></tr>\
        <tr><td>Jan 2025</td><td>61.2</td></tr>\
        <tr><td>Dec 2024</td><td>74.1</td></tr>\
        </table>";

    #[test]
    fn release_reading_overrides_history_for_its_month() {
        let f = fetcher(
            CannedTransport::new()
                .route(RELEASE, HttpResponse::ok(RELEASE_PAGE))
                .route(HISTORY, HttpResponse::ok(HISTORY_PAGE)),
        );
        let t = f.try_consumer_sentiment(15).unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.rows()[0].date, d(2025, 2));
        assert_eq!(t.value(0, "sentiment"), Some(64.9));
        assert_eq!(t.value(2, "sentiment"), Some(74.1));

        let latest = f.latest_sentiment();
        assert!(latest.is_live());
        assert_eq!(latest.value.current, 64.9);
        assert_eq!(latest.value.previous, 61.2);
        assert_eq!(latest.value.change, 3.7);
    }

    #[test]
    fn release_values_beyond_sentiment_range_are_ignored() {
        let page = "<p>Sentiment index reading 135.0, the highest ever recorded.</p>";
        let f = fetcher(CannedTransport::new().route(RELEASE, HttpResponse::ok(page)));
        assert!(matches!(
            f.try_release_reading(),
            Err(FetchError::ExtractionAmbiguous(_))
        ));
    }

    #[test]
    fn history_alone_is_enough() {
        let f = fetcher(CannedTransport::new().route(HISTORY, HttpResponse::ok(HISTORY_PAGE)));
        let t = f.consumer_sentiment(2);
        assert!(t.is_live());
        assert_eq!(t.value.len(), 2);
        assert_eq!(t.value.value(0, "sentiment"), Some(63.0));
    }

    #[test]
    fn no_source_falls_back() {
        let f = fetcher(CannedTransport::new());
        let t = f.consumer_sentiment(15);
        assert_eq!(t.provenance, Provenance::Fallback);
        assert_eq!(t.value.value(0, "sentiment"), Some(61.2));
        let latest = f.latest_sentiment();
        assert_eq!(latest.value, fallback::latest_sentiment(d(2025, 3)));
        assert_eq!(latest.error.unwrap().source, "sentiment_latest");
    }
}
