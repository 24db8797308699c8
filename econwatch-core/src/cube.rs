//! JSON-stat cube decoder.
//!
//! A cube is a flat `value` array plus per-dimension category tables. The
//! position of a value encodes its category indices in mixed radix against the
//! dimension sizes, most significant dimension first:
//!
//! ```text
//! id    = [Statistic, Month, Sex]     sizes = [2, 3, 2]
//! i = 7 → 7 % 2 = 1 (Sex), 3 % 3 = 0 (Month), 1 % 2 = 1 (Statistic)
//! ```
//!
//! Malformed payloads decode to an empty table, never an error, because the
//! caller's only reaction is to switch to fallback data.

use crate::error::DecodeError;
use crate::records::{Record, RecordTable};
use serde_json::{Map, Value};
use tracing::warn;

/// Decode a JSON-stat payload into one record per value.
///
/// Fields are named by each dimension's `label` ("Month"), or its id when it
/// has none. Returns an empty table when the payload is malformed.
pub fn decode_cube(payload: &Value) -> RecordTable {
    try_decode_cube(payload).unwrap_or_else(|e| {
        warn!(error = %e, "cube payload could not be decoded");
        RecordTable::default()
    })
}

/// Decode cube text. Invalid JSON behaves like a malformed cube.
pub fn decode_cube_str(text: &str) -> RecordTable {
    match serde_json::from_str::<Value>(text) {
        Ok(payload) => decode_cube(&payload),
        Err(e) => {
            warn!(error = %e, "cube response is not valid JSON");
            RecordTable::default()
        }
    }
}

/// Decode a JSON-stat payload, reporting why it failed.
pub fn try_decode_cube(payload: &Value) -> Result<RecordTable, DecodeError> {
    let ids: Vec<String> = payload
        .get("id")
        .and_then(Value::as_array)
        .ok_or_else(|| DecodeError::Malformed("missing 'id' array".into()))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| DecodeError::Malformed("non-string dimension id".into()))
        })
        .collect::<Result<_, _>>()?;

    if ids.is_empty() {
        return Err(DecodeError::Malformed("no dimensions".into()));
    }

    let dimensions = payload
        .get("dimension")
        .and_then(Value::as_object)
        .ok_or_else(|| DecodeError::Malformed("missing 'dimension' object".into()))?;

    let mut categories: Vec<Vec<String>> = Vec::with_capacity(ids.len());
    let mut fields: Vec<String> = Vec::with_capacity(ids.len());
    for id in &ids {
        let dimension = dimensions
            .get(id)
            .ok_or_else(|| DecodeError::Malformed(format!("dimension '{id}' is not described")))?;
        let category = dimension
            .get("category")
            .ok_or_else(|| DecodeError::Malformed(format!("dimension '{id}' has no category")))?;
        fields.push(
            dimension
                .get("label")
                .and_then(Value::as_str)
                .unwrap_or(id)
                .to_string(),
        );
        let labels = category_labels(id, category)?;
        if labels.is_empty() {
            return Err(DecodeError::EmptyDimension {
                dimension: id.clone(),
            });
        }
        categories.push(labels);
    }

    let sizes: Vec<usize> = categories.iter().map(Vec::len).collect();
    if let Some(declared) = payload.get("size").and_then(Value::as_array) {
        let declared: Vec<usize> = declared
            .iter()
            .filter_map(|v| v.as_u64().map(|n| n as usize))
            .collect();
        if declared != sizes {
            return Err(DecodeError::Malformed(format!(
                "declared sizes {declared:?} disagree with categories {sizes:?}"
            )));
        }
    }

    let expected: usize = sizes.iter().product();
    let values = cube_values(payload.get("value"), expected)?;

    let mut table = RecordTable::new(fields);
    table.rows.reserve(values.len());
    for (i, value) in values.into_iter().enumerate() {
        let labels = unravel(i, &sizes)
            .into_iter()
            .enumerate()
            .map(|(dim, idx)| categories[dim][idx].clone())
            .collect();
        table.rows.push(Record { labels, value });
    }
    Ok(table)
}

/// Mixed-radix decomposition of a flat position into per-dimension indices.
pub fn unravel(mut position: usize, sizes: &[usize]) -> Vec<usize> {
    let mut indices = vec![0; sizes.len()];
    for (slot, &size) in sizes.iter().enumerate().rev() {
        indices[slot] = position % size;
        position /= size;
    }
    indices
}

/// Category labels of one dimension ordered by position.
///
/// `index` may be `{code: position}` or `[code, ...]`; when absent the key
/// order of `label` defines positions. Codes without a label decode to themselves.
fn category_labels(dimension: &str, category: &Value) -> Result<Vec<String>, DecodeError> {
    let empty = Map::new();
    let label_map = category
        .get("label")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let label_for = |code: &str, position: usize| -> String {
        label_map
            .get(code)
            .or_else(|| label_map.get(&position.to_string()))
            .and_then(Value::as_str)
            .unwrap_or(code)
            .to_string()
    };

    match category.get("index") {
        Some(Value::Object(index)) => {
            let mut slots: Vec<Option<String>> = vec![None; index.len()];
            for (code, position) in index {
                let position = position.as_u64().ok_or_else(|| {
                    DecodeError::Malformed(format!("non-integer position for '{dimension}/{code}'"))
                })? as usize;
                let slot = slots.get_mut(position).ok_or_else(|| {
                    DecodeError::Malformed(format!("position {position} out of range in '{dimension}'"))
                })?;
                *slot = Some(label_for(code, position));
            }
            slots
                .into_iter()
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| DecodeError::Malformed(format!("gap in positions of '{dimension}'")))
        }
        Some(Value::Array(index)) => index
            .iter()
            .enumerate()
            .map(|(position, code)| {
                code.as_str()
                    .map(|c| label_for(c, position))
                    .ok_or_else(|| DecodeError::Malformed(format!("non-string code in '{dimension}'")))
            })
            .collect(),
        Some(_) => Err(DecodeError::Malformed(format!(
            "unsupported index type in '{dimension}'"
        ))),
        None => Ok(label_map
            .values()
            .map(|v| v.as_str().unwrap_or_default().to_string())
            .collect()),
    }
}

/// Dense or sparse `value` member, expanded to exactly `expected` slots.
fn cube_values(value: Option<&Value>, expected: usize) -> Result<Vec<Option<f64>>, DecodeError> {
    match value {
        Some(Value::Array(values)) => {
            if values.len() != expected {
                return Err(DecodeError::SizeMismatch {
                    expected,
                    actual: values.len(),
                });
            }
            Ok(values.iter().map(Value::as_f64).collect())
        }
        Some(Value::Object(sparse)) => {
            let mut out = vec![None; expected];
            for (key, v) in sparse {
                let pos: usize = key
                    .parse()
                    .map_err(|_| DecodeError::Malformed(format!("sparse key '{key}'")))?;
                let slot = out.get_mut(pos).ok_or(DecodeError::SizeMismatch {
                    expected,
                    actual: pos + 1,
                })?;
                *slot = v.as_f64();
            }
            Ok(out)
        }
        _ => Err(DecodeError::Malformed("missing 'value' member".into())),
    }
}
