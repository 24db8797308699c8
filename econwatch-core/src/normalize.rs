//! Turns decoded records into date-keyed [`SeriesTable`]s.
//!
//! Sources label the same concept differently ("Month", "TLIST(M1)",
//! "TIME_PERIOD"), so columns are located through an ordered list of
//! [`ColumnMatcher`]s and period labels through an ordered list of
//! [`PeriodFormat`]s. A request then filters rows, pivots or selects a single
//! value column, optionally derives an annual change, and trims the result to
//! the newest `window` rows.

use crate::error::DecodeError;
use crate::extract::month_from_name;
use crate::records::{describe, Record, RecordTable};
use crate::table::{round_to, SeriesTable};
use chrono::{Months, NaiveDate};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// One column-discovery strategy: an exact name, then substring tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMatcher {
    pub exact: &'static str,
    pub contains: &'static [&'static str],
}

impl ColumnMatcher {
    pub const fn new(exact: &'static str, contains: &'static [&'static str]) -> Self {
        Self { exact, contains }
    }

    pub const fn exact(name: &'static str) -> Self {
        Self::new(name, &[])
    }

    fn matches_exact(&self, field: &str) -> bool {
        field.eq_ignore_ascii_case(self.exact)
    }

    fn matches_token(&self, field: &str) -> bool {
        let lower = field.to_lowercase();
        self.contains.iter().any(|t| lower.contains(&t.to_lowercase()))
    }
}

/// Period columns of cube and series sources.
pub const PERIOD_COLUMNS: &[ColumnMatcher] = &[
    ColumnMatcher::new("Month", &["month"]),
    ColumnMatcher::new("Quarter", &["quarter"]),
    ColumnMatcher::new("TIME_PERIOD", &["time", "period", "date", "tlist"]),
];

/// Index of the first field matched, trying matchers in priority order.
pub fn find_column<S: AsRef<str>>(fields: &[S], matchers: &[ColumnMatcher]) -> Option<usize> {
    matchers.iter().find_map(|m| {
        fields
            .iter()
            .position(|f| m.matches_exact(f.as_ref()))
            .or_else(|| fields.iter().position(|f| m.matches_token(f.as_ref())))
    })
}

/// Period label formats, tried in [`PeriodFormat::ORDER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodFormat {
    /// `2024M03`
    YearMonthCode,
    /// `2024Q1`, dated to the first day of the quarter
    YearQuarterCode,
    /// `2024 March`, `2024 Mar`, `March 2024`
    YearMonthName,
    /// `2024-03-15`, `2024-03`
    Iso,
}

impl PeriodFormat {
    pub const ORDER: [PeriodFormat; 4] = [
        PeriodFormat::YearMonthCode,
        PeriodFormat::YearQuarterCode,
        PeriodFormat::YearMonthName,
        PeriodFormat::Iso,
    ];

    pub fn parse(&self, label: &str) -> Option<NaiveDate> {
        let label = label.trim();
        match self {
            PeriodFormat::YearMonthCode => {
                let (year, month) = label.split_once(['M', 'm'])?;
                ymd(year, month.parse().ok()?)
            }
            PeriodFormat::YearQuarterCode => {
                let compact: String = label.chars().filter(|c| !c.is_whitespace()).collect();
                let (year, quarter) = compact.split_once(['Q', 'q'])?;
                let quarter: u32 = quarter.parse().ok()?;
                if !(1..=4).contains(&quarter) {
                    return None;
                }
                ymd(year, (quarter - 1) * 3 + 1)
            }
            PeriodFormat::YearMonthName => {
                let mut parts = label.split_whitespace();
                let (a, b) = (parts.next()?, parts.next()?);
                if parts.next().is_some() {
                    return None;
                }
                match month_from_name(b) {
                    Some(m) => ymd(a, m),
                    None => ymd(b, month_from_name(a)?),
                }
            }
            PeriodFormat::Iso => {
                let head = label.get(..10).unwrap_or(label);
                NaiveDate::parse_from_str(head, "%Y-%m-%d")
                    .ok()
                    .or_else(|| NaiveDate::parse_from_str(&format!("{label}-01"), "%Y-%m-%d").ok())
            }
        }
    }
}

fn ymd(year: &str, month: u32) -> Option<NaiveDate> {
    if year.len() != 4 {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, 1)
}

/// First format that parses strictly more than half of the non-empty labels.
pub fn detect_period_format<'a>(labels: impl IntoIterator<Item = &'a str>) -> Option<PeriodFormat> {
    let labels: Vec<&str> = labels
        .into_iter()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if labels.is_empty() {
        return None;
    }
    PeriodFormat::ORDER.into_iter().find(|format| {
        let parsed = labels.iter().filter(|l| format.parse(l).is_some()).count();
        parsed * 2 > labels.len()
    })
}

/// Row restriction applied before shaping.
#[derive(Debug, Clone, PartialEq)]
pub enum RowFilter {
    /// Keep rows whose matched column contains any of the tokens.
    /// Skipped when the column is absent.
    Column {
        column: ColumnMatcher,
        any_of: &'static [&'static str],
    },
    /// In every non-period column where some label contains `needle`,
    /// keep only the rows that contain it ("All ages", "Both sexes").
    AnyColumn { needle: &'static str },
}

/// How filtered rows become value columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// One value column per distinct label of `column`. `rename` maps a label
    /// (case-insensitive) to an output name; other labels keep their text.
    Pivot {
        column: ColumnMatcher,
        rename: &'static [(&'static str, &'static str)],
    },
    /// A single value column called `name`.
    Single { name: &'static str },
}

/// Select a published annual-change statistic, or derive one from an index.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnualChange {
    pub statistic: ColumnMatcher,
    /// Tokens identifying a published annual change, e.g. "annual", "12 months".
    pub published: &'static [&'static str],
    /// Token identifying index-level statistics.
    pub index_token: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeRequest {
    pub period: Vec<ColumnMatcher>,
    pub filters: Vec<RowFilter>,
    pub shape: Shape,
    /// Newest rows kept; 0 keeps everything.
    pub window: usize,
    pub derive_annual: Option<AnnualChange>,
}

impl NormalizeRequest {
    pub fn new(shape: Shape) -> Self {
        Self {
            period: PERIOD_COLUMNS.to_vec(),
            filters: Vec::new(),
            shape,
            window: 0,
            derive_annual: None,
        }
    }

    pub fn period(mut self, matchers: &[ColumnMatcher]) -> Self {
        self.period = matchers.to_vec();
        self
    }

    pub fn filter(mut self, filter: RowFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn annual_change(mut self, annual: AnnualChange) -> Self {
        self.derive_annual = Some(annual);
        self
    }
}

/// Normalize records, returning an empty table on any structural anomaly.
pub fn normalize(records: &RecordTable, request: &NormalizeRequest) -> SeriesTable {
    try_normalize(records, request).unwrap_or_else(|e| {
        warn!(error = %e, "normalization produced no table");
        SeriesTable::empty()
    })
}

/// Normalize records, reporting why nothing usable came out.
pub fn try_normalize(
    records: &RecordTable,
    request: &NormalizeRequest,
) -> Result<SeriesTable, DecodeError> {
    if records.is_empty() {
        return Err(DecodeError::Malformed("no records".into()));
    }

    let period_idx = find_column(&records.fields, &request.period)
        .ok_or_else(|| DecodeError::MissingColumn(describe(&request.period)))?;
    let format = detect_period_format(records.distinct(period_idx))
        .ok_or_else(|| DecodeError::UnparsablePeriods(records.fields[period_idx].clone()))?;
    debug!(column = %records.fields[period_idx], ?format, "period column detected");

    let mut rows: Vec<&Record> = records.rows.iter().collect();

    let mut derive = false;
    if let Some(annual) = &request.derive_annual {
        let stat_idx = find_column(&records.fields, &[annual.statistic])
            .ok_or_else(|| DecodeError::MissingColumn(annual.statistic.exact.to_string()))?;
        let published: Vec<&Record> = rows
            .iter()
            .copied()
            .filter(|r| contains_any(&r.labels[stat_idx], annual.published))
            .collect();
        if published.is_empty() {
            let base = latest_base_index(records, stat_idx, annual.index_token)
                .ok_or(DecodeError::EmptyAfterFilter)?;
            debug!(statistic = %base, "annual change not published, deriving from index");
            rows.retain(|r| r.labels[stat_idx] == base);
            derive = true;
        } else {
            rows = published;
        }
    }

    for filter in &request.filters {
        apply_filter(&mut rows, &records.fields, period_idx, filter);
    }
    if rows.is_empty() {
        return Err(DecodeError::EmptyAfterFilter);
    }

    let mut table = match &request.shape {
        Shape::Pivot { column, rename } => {
            let pivot_idx = find_column(&records.fields, &[*column])
                .ok_or_else(|| DecodeError::MissingColumn(column.exact.to_string()))?;
            pivot(&rows, period_idx, format, |r| {
                rename_label(&r.labels[pivot_idx], rename)
            })
        }
        Shape::Single { name } => pivot(&rows, period_idx, format, |_| name.to_string()),
    };

    if derive {
        table = annual_percent_change(&table);
    }

    let mut table = drop_empty_rows(table);
    table.sort_desc();
    if request.window > 0 {
        table.truncate(request.window);
    }
    if table.is_empty() {
        return Err(DecodeError::EmptyAfterFilter);
    }
    Ok(table)
}

fn contains_any(label: &str, tokens: &[&str]) -> bool {
    let lower = label.to_lowercase();
    tokens.iter().any(|t| lower.contains(&t.to_lowercase()))
}

fn apply_filter(rows: &mut Vec<&Record>, fields: &[String], period_idx: usize, filter: &RowFilter) {
    match filter {
        RowFilter::Column { column, any_of } => {
            if let Some(idx) = find_column(fields, &[*column]) {
                rows.retain(|r| contains_any(&r.labels[idx], any_of));
            }
        }
        RowFilter::AnyColumn { needle } => {
            for idx in (0..fields.len()).filter(|&i| i != period_idx) {
                let present = rows.iter().any(|r| contains_any(&r.labels[idx], &[*needle]));
                if present {
                    rows.retain(|r| contains_any(&r.labels[idx], &[*needle]));
                }
            }
        }
    }
}

fn rename_label(label: &str, rename: &[(&str, &str)]) -> String {
    let trimmed = label.trim();
    rename
        .iter()
        .find(|(from, _)| trimmed.eq_ignore_ascii_case(from))
        .map(|(_, to)| to.to_string())
        .unwrap_or_else(|| label.to_string())
}

fn base_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("year pattern is valid"))
}

/// Index statistic with the most recent base year, e.g. "(Base Dec 2016=100)".
fn latest_base_index(records: &RecordTable, stat_idx: usize, index_token: &str) -> Option<String> {
    let year = base_year_re();
    let candidates: Vec<&str> = records
        .distinct(stat_idx)
        .into_iter()
        .filter(|s| contains_any(s, &[index_token]) && !contains_any(s, &["change", "%"]))
        .collect();

    let base_year = |label: &str| -> i32 {
        year.find_iter(label)
            .filter_map(|m| m.as_str().parse().ok())
            .max()
            .unwrap_or(i32::MIN)
    };

    // max_by_key keeps the last maximum; iterate reversed so ties go to the first seen
    candidates
        .into_iter()
        .rev()
        .max_by_key(|s| base_year(*s))
        .map(str::to_string)
}

/// Group rows by date and output column, keeping the first non-null value.
fn pivot(
    rows: &[&Record],
    period_idx: usize,
    format: PeriodFormat,
    column_of: impl Fn(&Record) -> String,
) -> SeriesTable {
    let mut columns: Vec<String> = Vec::new();
    let mut column_slot: HashMap<String, usize> = HashMap::new();
    let mut dates: Vec<NaiveDate> = Vec::new();
    let mut date_slot: HashMap<NaiveDate, usize> = HashMap::new();
    let mut cells: Vec<Vec<Option<f64>>> = Vec::new();

    for row in rows {
        let Some(date) = format.parse(&row.labels[period_idx]) else {
            continue;
        };
        let name = column_of(*row);
        let col = *column_slot.entry(name.clone()).or_insert_with(|| {
            columns.push(name);
            columns.len() - 1
        });
        let slot = *date_slot.entry(date).or_insert_with(|| {
            dates.push(date);
            cells.push(Vec::new());
            dates.len() - 1
        });
        let line = &mut cells[slot];
        if line.len() <= col {
            line.resize(col + 1, None);
        }
        if line[col].is_none() {
            line[col] = row.value;
        }
    }

    SeriesTable::from_rows(columns, dates.into_iter().zip(cells))
}

/// Percentage change of every value against the same column twelve months earlier.
///
/// Works for monthly and quarterly tables alike because the base is looked up
/// by date, not by position. Rows without a base are dropped; results have one
/// decimal place.
pub fn annual_percent_change(table: &SeriesTable) -> SeriesTable {
    let by_date: HashMap<NaiveDate, &Vec<Option<f64>>> =
        table.rows().iter().map(|r| (r.date, &r.values)).collect();

    let rows = table.rows().iter().filter_map(|row| {
        let base = by_date.get(&row.date.checked_sub_months(Months::new(12))?)?;
        let values = row
            .values
            .iter()
            .zip(base.iter())
            .map(|(v, b)| match (v, b) {
                (Some(v), Some(b)) if *b != 0.0 => Some(round_to((v - b) / b * 100.0, 1)),
                _ => None,
            })
            .collect();
        Some((row.date, values))
    });
    drop_empty_rows(SeriesTable::from_rows(table.columns().to_vec(), rows))
}

fn drop_empty_rows(table: SeriesTable) -> SeriesTable {
    let rows = table
        .rows()
        .iter()
        .filter(|r| r.values.iter().any(Option::is_some))
        .map(|r| (r.date, r.values.clone()));
    SeriesTable::from_rows(table.columns().to_vec(), rows)
}
