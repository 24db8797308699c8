//! Purchasing managers' indices, scraped.
//!
//! The publisher's hub page is the primary source: it lists the latest
//! manufacturing, services and construction readings side by side. Any index
//! the hub page does not yield is filled from that index's history-table page,
//! which is also the only source for history.

use super::{fallback, or_fallback, FetchContext, Fetched, HttpRequest};
use crate::error::FetchError;
use crate::extract::{history_rows, html_to_text, ExtractorConfig, ScrapeResult, TextExtractor};
use crate::table::{LatestReading, SeriesTable};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const HUB_SOURCE: &str = "pmi_hub";
pub const HISTORY_SOURCE: &str = "pmi_history";

/// Fewer history rows than this is treated as a failed scrape.
const MIN_HISTORY_ROWS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PmiKind {
    Manufacturing,
    Services,
    Construction,
}

impl PmiKind {
    pub const ALL: [PmiKind; 3] = [
        PmiKind::Manufacturing,
        PmiKind::Services,
        PmiKind::Construction,
    ];

    /// Lower-case name, as it appears on the pages and in history URLs.
    pub fn label(&self) -> &'static str {
        match self {
            PmiKind::Manufacturing => "manufacturing",
            PmiKind::Services => "services",
            PmiKind::Construction => "construction",
        }
    }

    /// Column name in the historical table.
    pub fn column(&self) -> &'static str {
        match self {
            PmiKind::Manufacturing => "manufacturing_pmi",
            PmiKind::Services => "services_pmi",
            PmiKind::Construction => "construction_pmi",
        }
    }
}

/// Latest reading of each index; `None` where no source yielded one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PmiSnapshot {
    pub manufacturing: Option<ScrapeResult>,
    pub services: Option<ScrapeResult>,
    pub construction: Option<ScrapeResult>,
}

impl PmiSnapshot {
    pub fn get(&self, kind: PmiKind) -> Option<&ScrapeResult> {
        self.slot(kind).as_ref()
    }

    fn slot(&self, kind: PmiKind) -> &Option<ScrapeResult> {
        match kind {
            PmiKind::Manufacturing => &self.manufacturing,
            PmiKind::Services => &self.services,
            PmiKind::Construction => &self.construction,
        }
    }

    fn slot_mut(&mut self, kind: PmiKind) -> &mut Option<ScrapeResult> {
        match kind {
            PmiKind::Manufacturing => &mut self.manufacturing,
            PmiKind::Services => &mut self.services,
            PmiKind::Construction => &mut self.construction,
        }
    }

    pub fn is_empty(&self) -> bool {
        PmiKind::ALL.iter().all(|k| self.get(*k).is_none())
    }
}

/// Current/previous pair per index, from the historical table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PmiReadings {
    pub manufacturing: Option<LatestReading>,
    pub services: Option<LatestReading>,
    pub construction: Option<LatestReading>,
}

impl PmiReadings {
    pub fn from_table(table: &SeriesTable) -> Self {
        Self {
            manufacturing: table.latest_reading(PmiKind::Manufacturing.column()),
            services: table.latest_reading(PmiKind::Services.column()),
            construction: table.latest_reading(PmiKind::Construction.column()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PmiFetcher {
    ctx: FetchContext,
    extractor: TextExtractor,
}

impl PmiFetcher {
    pub fn new(ctx: FetchContext) -> Self {
        Self {
            ctx,
            extractor: TextExtractor::new(ExtractorConfig::pmi())
                .with_labels(PmiKind::ALL.iter().map(PmiKind::label)),
        }
    }

    /// Visible text of the hub page.
    pub fn try_hub_text(&self) -> Result<String, FetchError> {
        let html = self
            .ctx
            .get_text(&HttpRequest::get(self.ctx.sources.pmi_hub.as_str()))?;
        Ok(html_to_text(&html))
    }

    /// One index from hub text. The period defaults through the period policy
    /// when the page names no month.
    pub fn hub_reading(&self, text: &str, kind: PmiKind) -> Option<ScrapeResult> {
        let value = self.extractor.extract_labelled(text, kind.label())?;
        Some(self.extractor.attribute(
            value,
            text,
            self.ctx.today,
            self.ctx.period_policy,
            HUB_SOURCE,
        ))
    }

    fn history_url(&self, kind: PmiKind) -> String {
        format!(
            "{}/{}-pmi",
            self.ctx.sources.pmi_history_base.trim_end_matches('/'),
            kind.label()
        )
    }

    /// Readings from an index's history table, newest first.
    pub fn try_history(&self, kind: PmiKind) -> Result<Vec<ScrapeResult>, FetchError> {
        let url = self.history_url(kind);
        let html = self.ctx.get_text(&HttpRequest::get(url.as_str()))?;
        let rows = history_rows(
            &html,
            &self.extractor,
            &self.extractor.config().specific,
            self.ctx.today,
            HISTORY_SOURCE,
        );
        if rows.is_empty() {
            return Err(FetchError::ExtractionAmbiguous(url));
        }
        debug!(kind = kind.label(), rows = rows.len(), "history table scraped");
        Ok(rows)
    }

    /// Hub page first, then per-index gap fill from the history pages.
    ///
    /// Fails only when no index could be read from any page.
    pub fn try_latest_pmi(&self) -> Result<PmiSnapshot, FetchError> {
        let mut snapshot = PmiSnapshot::default();
        let mut last_error = None;

        match self.try_hub_text() {
            Ok(text) => {
                for kind in PmiKind::ALL {
                    *snapshot.slot_mut(kind) = self.hub_reading(&text, kind);
                }
            }
            Err(e) => {
                warn!(error = %e, "PMI hub page unavailable");
                last_error = Some(e);
            }
        }

        for kind in PmiKind::ALL {
            if snapshot.get(kind).is_some() {
                continue;
            }
            match self.try_history(kind) {
                Ok(rows) => *snapshot.slot_mut(kind) = rows.into_iter().next(),
                Err(e) => {
                    warn!(kind = kind.label(), error = %e, "PMI history page unavailable");
                    last_error = Some(e);
                }
            }
        }

        if snapshot.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                FetchError::ExtractionAmbiguous(self.ctx.sources.pmi_hub.clone())
            }));
        }
        info!(
            manufacturing = ?snapshot.manufacturing.as_ref().map(|r| r.value),
            services = ?snapshot.services.as_ref().map(|r| r.value),
            construction = ?snapshot.construction.as_ref().map(|r| r.value),
            "latest PMI readings"
        );
        Ok(snapshot)
    }

    pub fn latest_pmi(&self) -> Fetched<PmiSnapshot> {
        or_fallback("pmi_latest", self.try_latest_pmi(), || {
            fallback::latest_pmi(self.ctx.today)
        })
    }

    /// Up to `months` months of all three indices, newest first.
    ///
    /// An index whose page fails is left null; fewer than six months overall is a failure.
    pub fn try_historical_pmi(&self, months: usize) -> Result<SeriesTable, FetchError> {
        let mut by_date: BTreeMap<NaiveDate, Vec<Option<f64>>> = BTreeMap::new();
        let mut last_error = None;

        for (idx, kind) in PmiKind::ALL.into_iter().enumerate() {
            let rows = match self.try_history(kind) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(kind = kind.label(), error = %e, "PMI history page unavailable");
                    last_error = Some(e);
                    continue;
                }
            };
            for reading in rows.into_iter().take(months) {
                let Some(date) = reading.period.first_day() else {
                    continue;
                };
                let cells = by_date
                    .entry(date)
                    .or_insert_with(|| vec![None; PmiKind::ALL.len()]);
                cells[idx].get_or_insert(reading.value);
            }
        }

        let columns = PmiKind::ALL.iter().map(|k| k.column());
        let mut table = SeriesTable::from_rows(columns, by_date);
        table.sort_desc();
        table.truncate(months);

        if table.len() < MIN_HISTORY_ROWS {
            return Err(last_error.unwrap_or_else(|| {
                FetchError::ExtractionAmbiguous(format!(
                    "only {} months of PMI history",
                    table.len()
                ))
            }));
        }
        Ok(table)
    }

    pub fn historical_pmi(&self, months: usize) -> Fetched<SeriesTable> {
        or_fallback("pmi_data", self.try_historical_pmi(months), || {
            let mut table = fallback::pmi(self.ctx.today);
            if months > 0 {
                table.truncate(months);
            }
            table
        })
    }

    pub fn latest_readings(&self) -> Fetched<PmiReadings> {
        self.historical_pmi(15)
            .map(|table| PmiReadings::from_table(&table))
    }
}
