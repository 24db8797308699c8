//! Labelled observation records: the common shape between decoding and normalization.
//!
//! A cube decodes to one [`Record`] per value with one label per dimension;
//! a CSV series decodes to one record per line with the observation column
//! pulled out as the value and every other column kept as a label.

use crate::error::DecodeError;
use crate::normalize::{find_column, ColumnMatcher};

/// One observation and its categorical labels (aligned with [`RecordTable::fields`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub labels: Vec<String>,
    pub value: Option<f64>,
}

/// Observations sharing a set of categorical fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordTable {
    pub fields: Vec<String>,
    pub rows: Vec<Record>,
}

impl RecordTable {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    /// Distinct labels of one field in first-seen order.
    pub fn distinct(&self, field: usize) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for row in &self.rows {
            let label = row.labels[field].as_str();
            if !out.contains(&label) {
                out.push(label);
            }
        }
        out
    }

    /// Parse CSV text, taking the first column matched by `value_column` as the value.
    ///
    /// Values that do not parse as numbers (blank, "NaN", "-") become nulls.
    pub fn from_csv(text: &str, value_column: &[ColumnMatcher]) -> Result<Self, DecodeError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| DecodeError::Malformed(format!("csv header: {e}")))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let value_idx = find_column(&headers, value_column)
            .ok_or_else(|| DecodeError::MissingColumn(describe(value_column)))?;

        let fields: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != value_idx)
            .map(|(_, h)| h.clone())
            .collect();

        let mut table = RecordTable::new(fields);
        for record in reader.records() {
            let record = record.map_err(|e| DecodeError::Malformed(format!("csv row: {e}")))?;
            let mut labels = Vec::with_capacity(headers.len().saturating_sub(1));
            let mut value = None;
            for i in 0..headers.len() {
                let cell = record.get(i).unwrap_or("");
                if i == value_idx {
                    value = cell.parse::<f64>().ok().filter(|v| v.is_finite());
                } else {
                    labels.push(cell.to_string());
                }
            }
            table.rows.push(Record { labels, value });
        }
        Ok(table)
    }
}

pub(crate) fn describe(matchers: &[ColumnMatcher]) -> String {
    matchers
        .iter()
        .map(|m| m.exact)
        .collect::<Vec<_>>()
        .join("|")
}
