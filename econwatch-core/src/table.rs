//! Date-keyed metric tables and the point snapshots derived from them.
//!
//! Every source, whatever its wire format, ends up as a [`SeriesTable`]:
//! one `date` key plus an ordered set of named, nullable `f64` metrics.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One dated row of a [`SeriesTable`]. `values` is aligned with the table's columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub date: NaiveDate,
    pub values: Vec<Option<f64>>,
}

/// A table of named numeric metrics keyed by date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesTable {
    columns: Vec<String>,
    rows: Vec<SeriesRow>,
}

impl SeriesTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Empty table with no columns. Callers treat this as "source unavailable".
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from a column list and `(date, values)` pairs.
    ///
    /// Rows shorter than the column list are padded with nulls; longer rows are cut.
    pub fn from_rows<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: impl IntoIterator<Item = (NaiveDate, Vec<Option<f64>>)>,
    ) -> Self {
        let mut table = Self::new(columns.into_iter().map(Into::into).collect());
        for (date, values) in rows {
            table.push(date, values);
        }
        table
    }

    /// Append a row, normalising its width to the column count.
    pub fn push(&mut self, date: NaiveDate, mut values: Vec<Option<f64>>) {
        values.resize(self.columns.len(), None);
        self.rows.push(SeriesRow { date, values });
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[SeriesRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one metric in row order.
    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r.values[idx]).collect())
    }

    /// Value of `name` in row `row`.
    pub fn value(&self, row: usize, name: &str) -> Option<f64> {
        let idx = self.column_index(name)?;
        self.rows.get(row).and_then(|r| r.values[idx])
    }

    /// Rename a column in place. Returns false if `from` does not exist.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        match self.column_index(from) {
            Some(idx) => {
                self.columns[idx] = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Add a derived column computed from each row.
    pub fn add_column(&mut self, name: &str, f: impl Fn(&SeriesRow) -> Option<f64>) {
        let computed: Vec<Option<f64>> = self.rows.iter().map(&f).collect();
        self.columns.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(computed) {
            row.values.push(value);
        }
    }

    /// Sort rows by date, most recent first. Stable, so equal dates keep insertion order.
    pub fn sort_desc(&mut self) {
        self.rows.sort_by(|a, b| b.date.cmp(&a.date));
    }

    pub fn truncate(&mut self, len: usize) {
        self.rows.truncate(len);
    }

    /// Drop rows whose date was already seen earlier in row order.
    pub fn dedup_keep_first(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.rows.retain(|r| seen.insert(r.date));
    }

    /// Drop rows whose date appears again later in row order.
    pub fn dedup_keep_last(&mut self) {
        let mut last: HashMap<NaiveDate, usize> = HashMap::new();
        for (i, row) in self.rows.iter().enumerate() {
            last.insert(row.date, i);
        }
        let mut i = 0;
        self.rows.retain(|r| {
            let keep = last.get(&r.date) == Some(&i);
            i += 1;
            keep
        });
    }

    /// Dedup (last wins) then sort descending: the persisted-table invariant.
    pub fn canonicalize(&mut self) {
        self.dedup_keep_last();
        self.sort_desc();
    }

    /// True when dates are unique and non-increasing.
    pub fn is_canonical(&self) -> bool {
        self.rows.windows(2).all(|w| w[0].date > w[1].date)
    }

    /// Concatenate `other` below `self`, unioning columns.
    ///
    /// Column order is `self`'s columns followed by any new columns from `other`.
    pub fn concat(&self, other: &SeriesTable) -> SeriesTable {
        let mut columns = self.columns.clone();
        for c in &other.columns {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
        let mut out = SeriesTable::new(columns);
        for table in [self, other] {
            let mapping: Vec<usize> = table
                .columns
                .iter()
                .map(|c| out.column_index(c).unwrap_or(usize::MAX))
                .collect();
            for row in &table.rows {
                let mut values = vec![None; out.columns.len()];
                for (src, &dst) in mapping.iter().enumerate() {
                    if dst != usize::MAX {
                        values[dst] = row.values[src];
                    }
                }
                out.rows.push(SeriesRow {
                    date: row.date,
                    values,
                });
            }
        }
        out
    }

    /// Full outer join on date. Duplicate dates on either side keep the first value.
    pub fn outer_join(&self, other: &SeriesTable) -> SeriesTable {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        let width_left = self.columns.len();

        let mut by_date: Vec<(NaiveDate, Vec<Option<f64>>)> = Vec::new();
        let mut index: HashMap<NaiveDate, usize> = HashMap::new();

        for (offset, table) in [(0, self), (width_left, other)] {
            for row in &table.rows {
                let slot = *index.entry(row.date).or_insert_with(|| {
                    by_date.push((row.date, vec![None; columns.len()]));
                    by_date.len() - 1
                });
                for (i, v) in row.values.iter().enumerate() {
                    let cell = &mut by_date[slot].1[offset + i];
                    if cell.is_none() {
                        *cell = *v;
                    }
                }
            }
        }

        let mut out = SeriesTable::from_rows(columns, by_date);
        out.sort_desc();
        out
    }

    /// Latest/previous pair for a metric, skipping rows where it is null.
    ///
    /// Rows are taken in table order, so the table should be sorted descending.
    pub fn latest_reading(&self, name: &str) -> Option<LatestReading> {
        let idx = self.column_index(name)?;
        let mut present = self
            .rows
            .iter()
            .filter_map(|r| r.values[idx].map(|v| (r.date, v)));
        let (as_of, current) = present.next()?;
        let (_, previous) = present.next()?;
        Some(LatestReading {
            current,
            previous,
            change: round_to(current - previous, 2),
            as_of,
        })
    }

    /// Percentage change of the latest value against the first row at least
    /// `days` older than the latest row, scanning most recent to oldest.
    pub fn pct_change_since(&self, name: &str, days: i64) -> Option<f64> {
        let idx = self.column_index(name)?;
        let latest = self.rows.first()?;
        let current = latest.values[idx]?;
        let cutoff = latest.date - Duration::days(days);
        let base = self
            .rows
            .iter()
            .filter(|r| r.date <= cutoff)
            .find_map(|r| r.values[idx])?;
        if base == 0.0 {
            return None;
        }
        Some(round_to((current - base) / base * 100.0, 2))
    }

    /// Max and min of a metric, ignoring nulls.
    pub fn range(&self, name: &str) -> Option<(f64, f64)> {
        let values: Vec<f64> = self.column(name)?.into_iter().flatten().collect();
        if values.is_empty() {
            return None;
        }
        let max = values.iter().cloned().fold(f64::MIN, f64::max);
        let min = values.iter().cloned().fold(f64::MAX, f64::min);
        Some((max, min))
    }
}

/// Two most recent observations of a metric and their difference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatestReading {
    pub current: f64,
    pub previous: f64,
    pub change: f64,
    pub as_of: NaiveDate,
}

impl LatestReading {
    /// Reporting period label, e.g. "March 2025".
    pub fn period_label(&self) -> String {
        self.as_of.format("%B %Y").to_string()
    }
}

/// Where a returned table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    Stored,
    Live,
    Fallback,
}

/// Round half away from zero to `dp` decimal places.
pub fn round_to(value: f64, dp: u32) -> f64 {
    let factor = 10f64.powi(dp as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn push_pads_short_rows() {
        let mut t = SeriesTable::new(vec!["a".into(), "b".into()]);
        t.push(d(2024, 1, 1), vec![Some(1.0)]);
        assert_eq!(t.rows()[0].values, vec![Some(1.0), None]);
    }

    #[test]
    fn dedup_keep_last_retains_later_duplicate() {
        let mut t = SeriesTable::from_rows(
            ["v"],
            vec![
                (d(2024, 1, 1), vec![Some(1.0)]),
                (d(2024, 2, 1), vec![Some(2.0)]),
                (d(2024, 1, 1), vec![Some(3.0)]),
            ],
        );
        t.dedup_keep_last();
        assert_eq!(t.len(), 2);
        assert_eq!(t.value(1, "v"), Some(3.0));
    }

    #[test]
    fn canonicalize_sorts_descending() {
        let mut t = SeriesTable::from_rows(
            ["v"],
            vec![
                (d(2024, 1, 1), vec![Some(1.0)]),
                (d(2024, 3, 1), vec![Some(3.0)]),
                (d(2024, 2, 1), vec![Some(2.0)]),
            ],
        );
        t.canonicalize();
        assert!(t.is_canonical());
        assert_eq!(t.rows()[0].date, d(2024, 3, 1));
    }

    #[test]
    fn concat_unions_columns() {
        let a = SeriesTable::from_rows(["x"], vec![(d(2024, 1, 1), vec![Some(1.0)])]);
        let b = SeriesTable::from_rows(["y", "x"], vec![(d(2024, 2, 1), vec![Some(5.0), Some(2.0)])]);
        let c = a.concat(&b);
        assert_eq!(c.columns(), &["x".to_string(), "y".to_string()]);
        assert_eq!(c.rows()[0].values, vec![Some(1.0), None]);
        assert_eq!(c.rows()[1].values, vec![Some(2.0), Some(5.0)]);
    }

    #[test]
    fn outer_join_fills_missing_sides_with_null() {
        let a = SeriesTable::from_rows(["gbp"], vec![(d(2024, 1, 2), vec![Some(0.86)])]);
        let b = SeriesTable::from_rows(
            ["usd"],
            vec![
                (d(2024, 1, 2), vec![Some(1.09)]),
                (d(2024, 1, 3), vec![Some(1.10)]),
            ],
        );
        let j = a.outer_join(&b);
        assert_eq!(j.len(), 2);
        assert_eq!(j.rows()[0].date, d(2024, 1, 3));
        assert_eq!(j.rows()[0].values, vec![None, Some(1.10)]);
        assert_eq!(j.rows()[1].values, vec![Some(0.86), Some(1.09)]);
    }

    #[test]
    fn latest_reading_skips_nulls() {
        let t = SeriesTable::from_rows(
            ["pmi"],
            vec![
                (d(2025, 3, 1), vec![Some(52.2)]),
                (d(2025, 2, 1), vec![None]),
                (d(2025, 1, 1), vec![Some(52.8)]),
            ],
        );
        let r = t.latest_reading("pmi").unwrap();
        assert_eq!(r.current, 52.2);
        assert_eq!(r.previous, 52.8);
        assert_eq!(r.change, -0.6);
        assert_eq!(r.period_label(), "March 2025");
    }

    #[test]
    fn week_and_year_deltas_use_first_row_at_or_before_cutoff() {
        let day0 = d(2025, 6, 30);
        let t = SeriesTable::from_rows(
            ["close"],
            vec![
                (day0, vec![Some(100.0)]),
                (day0 - Duration::days(7), vec![Some(95.0)]),
                (day0 - Duration::days(365), vec![Some(120.0)]),
            ],
        );
        assert_eq!(t.pct_change_since("close", 7), Some(5.26));
        assert_eq!(t.pct_change_since("close", 365), Some(-16.67));
        assert_eq!(t.pct_change_since("close", 400), None);
    }

    #[test]
    fn range_ignores_nulls() {
        let t = SeriesTable::from_rows(
            ["g"],
            vec![
                (d(2025, 1, 3), vec![Some(3.0)]),
                (d(2025, 1, 2), vec![None]),
                (d(2025, 1, 1), vec![Some(1.5)]),
            ],
        );
        assert_eq!(t.range("g"), Some((3.0, 1.5)));
    }
}
