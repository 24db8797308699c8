//! Property tests for cube decoding.
//!
//! Uses proptest to verify:
//! 1. Record count equals the product of the dimension sizes
//! 2. Every record carries exactly one label per dimension
//! 3. Position `i` decodes to the categories given by mixed-radix unravelling
//! 4. A value array of the wrong length decodes to an empty table

use econwatch_core::cube::{decode_cube, try_decode_cube, unravel};
use econwatch_core::error::DecodeError;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_sizes() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..5, 1..5)
}

fn arb_value() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        1 => Just(None),
        4 => (-1000.0..1000.0_f64).prop_map(|v| Some((v * 10.0).round() / 10.0)),
    ]
}

fn category_label(dim: usize, idx: usize) -> String {
    format!("D{dim} category {idx}")
}

fn cube(sizes: &[usize], values: &[Option<f64>]) -> Value {
    let ids: Vec<String> = (0..sizes.len()).map(|d| format!("DIM{d}")).collect();
    let mut dimension = Map::new();
    for (d, &size) in sizes.iter().enumerate() {
        let index: Vec<String> = (0..size).map(|i| format!("C{i}")).collect();
        let label: Map<String, Value> = (0..size)
            .map(|i| (format!("C{i}"), Value::String(category_label(d, i))))
            .collect();
        dimension.insert(
            ids[d].clone(),
            json!({ "label": format!("Dimension {d}"), "category": { "index": index, "label": label } }),
        );
    }
    json!({
        "version": "2.0",
        "class": "dataset",
        "id": ids,
        "size": sizes,
        "dimension": dimension,
        "value": values,
    })
}

fn sizes_and_values() -> impl Strategy<Value = (Vec<usize>, Vec<Option<f64>>)> {
    arb_sizes().prop_flat_map(|sizes| {
        let n: usize = sizes.iter().product();
        (Just(sizes), prop::collection::vec(arb_value(), n))
    })
}

// ── 1-3. Shape ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn record_count_is_product_of_sizes((sizes, values) in sizes_and_values()) {
        let table = try_decode_cube(&cube(&sizes, &values)).unwrap();
        prop_assert_eq!(table.len(), sizes.iter().product::<usize>());
        prop_assert_eq!(table.fields.len(), sizes.len());
        for record in &table.rows {
            prop_assert_eq!(record.labels.len(), sizes.len());
        }
    }

    #[test]
    fn positions_map_to_unravelled_categories((sizes, values) in sizes_and_values()) {
        let table = decode_cube(&cube(&sizes, &values));
        for (i, record) in table.rows.iter().enumerate() {
            let expected: Vec<String> = unravel(i, &sizes)
                .into_iter()
                .enumerate()
                .map(|(d, idx)| category_label(d, idx))
                .collect();
            prop_assert_eq!(&record.labels, &expected);
            prop_assert_eq!(record.value, values[i]);
        }
    }

    #[test]
    fn fields_are_dimension_labels(sizes in arb_sizes()) {
        let n: usize = sizes.iter().product();
        let table = decode_cube(&cube(&sizes, &vec![Some(1.0); n]));
        for (d, field) in table.fields.iter().enumerate() {
            prop_assert_eq!(field, &format!("Dimension {d}"));
        }
    }
}

// ── 4. Length mismatch ───────────────────────────────────────────────

proptest! {
    #[test]
    fn wrong_value_count_decodes_empty(sizes in arb_sizes(), extra in 1usize..4) {
        let n: usize = sizes.iter().product();
        let values = vec![Some(1.0); n + extra];
        let payload = cube(&sizes, &values);
        prop_assert!(decode_cube(&payload).is_empty());
        let is_size_mismatch = matches!(
            try_decode_cube(&payload),
            Err(DecodeError::SizeMismatch { .. })
        );
        prop_assert!(is_size_mismatch);
    }
}
