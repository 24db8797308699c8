//! Statistical cube source (JSON-stat 2.0 tables).

use super::{fallback, or_fallback, FetchContext, Fetched, HttpRequest};
use crate::cube::try_decode_cube;
use crate::error::{DecodeError, FetchError};
use crate::normalize::{try_normalize, AnnualChange, ColumnMatcher, NormalizeRequest, RowFilter, Shape};
use crate::records::RecordTable;
use crate::table::SeriesTable;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const LIVE_REGISTER_TABLE: &str = "LRM02";
pub const CPI_TABLE: &str = "CPM01";
pub const CONSTRUCTION_COSTS_TABLE: &str = "BHQ06";
pub const UNEMPLOYMENT_TABLE: &str = "MUM01";

const STATISTIC: ColumnMatcher = ColumnMatcher::new("Statistic", &["statistic"]);
const COMMODITY_GROUP: ColumnMatcher = ColumnMatcher::new("Commodity Group", &["commodity"]);

const ANNUAL_CHANGE: AnnualChange = AnnualChange {
    statistic: STATISTIC,
    published: &["annual", "12 months"],
    index_token: "index",
};

/// Latest monthly unemployment rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateReading {
    pub rate: f64,
    pub as_of: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct CsoFetcher {
    ctx: FetchContext,
}

impl CsoFetcher {
    pub fn new(ctx: FetchContext) -> Self {
        Self { ctx }
    }

    fn table_request(&self, code: &str) -> HttpRequest {
        HttpRequest::get(format!(
            "{}/{code}/JSON-stat/2.0",
            self.ctx.sources.cube_base.trim_end_matches('/')
        ))
        .accept("application/json")
    }

    /// Download and decode one cube table.
    pub fn try_records(&self, code: &str) -> Result<RecordTable, FetchError> {
        let text = self.ctx.get_text(&self.table_request(code))?;
        let payload: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| DecodeError::Malformed(format!("{code}: {e}")))?;
        let records = try_decode_cube(&payload)?;
        debug!(table = code, records = records.len(), "cube decoded");
        Ok(records)
    }

    fn try_table(&self, code: &str, request: &NormalizeRequest) -> Result<SeriesTable, FetchError> {
        let records = self.try_records(code)?;
        let table = try_normalize(&records, request)?;
        info!(table = code, rows = table.len(), columns = ?table.columns(), "cube table normalized");
        Ok(table)
    }

    /// Job seekers per month, one column per published statistic.
    pub fn try_live_register(&self, months: usize) -> Result<SeriesTable, FetchError> {
        let request = NormalizeRequest::new(Shape::Pivot {
            column: STATISTIC,
            rename: &[],
        })
        .filter(RowFilter::AnyColumn { needle: "all ages" })
        .filter(RowFilter::AnyColumn { needle: "both sexes" })
        .window(months);
        self.try_table(LIVE_REGISTER_TABLE, &request)
    }

    pub fn live_register(&self, months: usize) -> Fetched<SeriesTable> {
        or_fallback("live_register", self.try_live_register(months), || {
            fallback::live_register(self.ctx.today)
        })
    }

    /// Annual % change of headline (`cpi`) and core (`core_cpi`) consumer prices.
    pub fn try_cpi(&self, months: usize) -> Result<SeriesTable, FetchError> {
        let request = NormalizeRequest::new(Shape::Pivot {
            column: COMMODITY_GROUP,
            rename: &[
                ("All items", "cpi"),
                ("All items excluding energy and unprocessed food", "core_cpi"),
            ],
        })
        .annual_change(ANNUAL_CHANGE)
        .window(months);
        self.try_table(CPI_TABLE, &request)
    }

    pub fn cpi(&self, months: usize) -> Fetched<SeriesTable> {
        or_fallback("cpi", self.try_cpi(months), || fallback::cpi(self.ctx.today))
    }

    /// Annual % change of the construction cost index (quarterly).
    pub fn try_construction_costs(&self, months: usize) -> Result<SeriesTable, FetchError> {
        let request = NormalizeRequest::new(Shape::Single {
            name: "construction_cost_change",
        })
        .annual_change(ANNUAL_CHANGE)
        .window(months);
        self.try_table(CONSTRUCTION_COSTS_TABLE, &request)
    }

    pub fn construction_costs(&self, months: usize) -> Fetched<SeriesTable> {
        or_fallback(
            "construction_costs",
            self.try_construction_costs(months),
            || fallback::construction_costs(self.ctx.today),
        )
    }

    pub fn try_unemployment_rate(&self) -> Result<RateReading, FetchError> {
        let request = NormalizeRequest::new(Shape::Single { name: "rate" })
            .filter(RowFilter::Column {
                column: STATISTIC,
                any_of: &["rate"],
            })
            .filter(RowFilter::AnyColumn { needle: "both sexes" })
            .filter(RowFilter::AnyColumn { needle: "15 - 74" });
        let table = self.try_table(UNEMPLOYMENT_TABLE, &request)?;
        let idx = table
            .column_index("rate")
            .ok_or_else(|| DecodeError::MissingColumn("rate".into()))?;
        table
            .rows()
            .iter()
            .find_map(|r| r.values[idx].map(|rate| RateReading { rate, as_of: r.date }))
            .ok_or_else(|| FetchError::Decode(DecodeError::EmptyAfterFilter))
    }

    pub fn unemployment_rate(&self) -> Fetched<RateReading> {
        or_fallback("unemployment", self.try_unemployment_rate(), || {
            fallback::unemployment(self.ctx.today)
        })
    }
}
