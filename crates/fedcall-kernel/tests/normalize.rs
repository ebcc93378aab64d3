//! Normalization of realistic engine payloads.

use serde_json::{Value, json};

use fedcall_kernel::{normalize, normalize_partial};

fn chr(values: Value) -> Value {
    json!({"type": "character", "value": values})
}

fn int(values: Value) -> Value {
    json!({"type": "integer", "value": values})
}

fn dbl(values: Value) -> Value {
    json!({"type": "double", "value": values})
}

fn assert_fixed_point(out: &Value) {
    assert_eq!(&normalize(out).unwrap(), out, "normalizing again changed the value");
}

#[test]
fn test_scalar_and_na() {
    let out = normalize(&dbl(json!([3.14]))).unwrap();
    assert_eq!(out, json!(3.14));
    assert_fixed_point(&out);

    let out = normalize(&int(json!(["NA", "2"]))).unwrap();
    assert_eq!(out, json!(["NA", 2]));
    assert_fixed_point(&out);
}

#[test]
fn test_per_study_summary() {
    // Shape of a typical per-study summary: a named list of named vectors.
    let input = json!({
        "type": "list",
        "attributes": {"names": chr(json!(["study1", "study2"]))},
        "value": [
            {
                "type": "list",
                "attributes": {"names": chr(json!(["class", "length", "quantiles & mean"]))},
                "value": [
                    chr(json!(["numeric"])),
                    int(json!([2163])),
                    {
                        "type": "double",
                        "attributes": {"names": chr(json!(["5%", "Mean"]))},
                        "value": [4.1, 5.9]
                    }
                ]
            },
            {
                "type": "list",
                "attributes": {"names": chr(json!(["class", "length", "quantiles & mean"]))},
                "value": [
                    chr(json!(["numeric"])),
                    int(json!(["NA"])),
                    {
                        "type": "double",
                        "attributes": {"names": chr(json!(["5%", "Mean"]))},
                        "value": ["NA", 6.0]
                    }
                ]
            }
        ]
    });
    let out = normalize(&input).unwrap();
    assert_eq!(
        out,
        json!({
            "study1": {"class": "numeric", "length": 2163, "quantiles & mean": {"5%": 4.1, "Mean": 5.9}},
            "study2": {"class": "numeric", "length": "NA", "quantiles & mean": {"5%": "NA", "Mean": 6.0}}
        })
    );
    assert_fixed_point(&out);
}

#[test]
fn test_single_study_column_names() {
    // One server: the per-study list has a single name over a whole vector.
    let input = json!({
        "type": "list",
        "attributes": {"names": chr(json!(["study1"]))},
        "value": [chr(json!(["LAB_TSC", "LAB_HDL"]))]
    });
    let out = normalize(&input).unwrap();
    assert_eq!(out, json!({"study1": ["LAB_TSC", "LAB_HDL"]}));
    assert_fixed_point(&out);
}

#[test]
fn test_matrix_with_short_row_labels_keeps_every_cell() {
    let input = json!({
        "type": "double",
        "attributes": {
            "dim": int(json!([2, 2])),
            "dimnames": {
                "type": "list",
                "value": [chr(json!(["r1"])), chr(json!(["c1", "c2"]))]
            }
        },
        "value": [1, 2, 3, 4]
    });
    let out = normalize(&input).unwrap();
    assert_eq!(out["value"], json!([1.0, 2.0, 3.0, 4.0]));
}

#[test]
fn test_matrix_reconstruction_column_major() {
    let input = json!({
        "type": "integer",
        "attributes": {
            "dim": int(json!([2, 3])),
            "dimnames": {
                "type": "list",
                "value": [chr(json!(["r1", "r2"])), chr(json!(["c1", "c2", "c3"]))]
            }
        },
        "value": [11, 21, 12, 22, 13, 23]
    });
    let out = normalize(&input).unwrap();
    assert_eq!(
        out,
        json!([[null, "c1", "c2", "c3"], ["r1", 11, 12, 13], ["r2", 21, 22, 23]])
    );
    assert_fixed_point(&out);
}

#[test]
fn test_contingency_table_with_axis_titles() {
    // A 2x2 table whose dimnames carry axis titles but no row labels.
    let input = json!({
        "type": "integer",
        "attributes": {
            "dim": int(json!([2, 2])),
            "dimnames": {
                "type": "list",
                "attributes": {"names": chr(json!(["", "GENDER"]))},
                "value": [{"type": "NULL"}, chr(json!(["0", "1"]))]
            }
        },
        "value": [10, 20, 30, 40]
    });
    let out = normalize(&input).unwrap();
    assert_eq!(out, json!({"GENDER": [["0", "1"], [10, 30], [20, 40]]}));
}

#[test]
fn test_one_dimensional_table() {
    let input = json!({
        "type": "integer",
        "attributes": {
            "dim": int(json!([3])),
            "dimnames": {"type": "list", "value": [chr(json!(["a", "b", "c"]))]}
        },
        "value": [4, 5, 6]
    });
    let out = normalize(&input).unwrap();
    assert_eq!(out, json!([["a", "b", "c"], [4, 5, 6]]));
}

#[test]
fn test_data_frame() {
    let input = json!({
        "type": "list",
        "attributes": {
            "names": chr(json!(["LAB_TSC", "GENDER"])),
            "row.names": int(json!(["NA", -3])),
            "class": chr(json!(["data.frame"]))
        },
        "value": [dbl(json!([4.5, "NA", 6.1])), chr(json!(["0", "1", "1"]))]
    });
    let out = normalize(&input).unwrap();
    assert_eq!(
        out,
        json!({
            "value": [
                [null, "LAB_TSC", "GENDER"],
                [1, 4.5, "0"],
                [2, "NA", "1"],
                [3, 6.1, "1"]
            ],
            "class": "data.frame"
        })
    );
}

#[test]
fn test_logarithm_and_complex() {
    let input = json!({
        "type": "double",
        "attributes": {"logarithm": {"type": "logical", "value": [true]}},
        "value": [0.0]
    });
    assert_eq!(normalize(&input).unwrap(), json!(1.0));

    let input = json!({"type": "complex", "value": ["3+4i"]});
    assert_eq!(normalize(&input).unwrap(), json!({"re": 3.0, "im": 4.0}));
}

#[test]
fn test_unknown_attribute_set_passes_through() {
    let input = json!({
        "type": "double",
        "attributes": {"levels": chr(json!(["a", "b"])), "class": chr(json!(["factor"]))},
        "value": [1, 2]
    });
    let out = normalize(&input).unwrap();
    assert_eq!(out, json!({"value": [1.0, 2.0], "levels": ["a", "b"], "class": "factor"}));
}

#[test]
fn test_malformed_node_reported_with_path() {
    let input = json!({
        "type": "list",
        "attributes": {"names": chr(json!(["ok", "bad"]))},
        "value": [int(json!([1])), {"type": "S4", "value": []}]
    });
    let err = normalize(&input).unwrap_err();
    assert_eq!(err.path, "$.value[1].type");

    let partial = normalize_partial(&input);
    assert_eq!(partial.value, json!({"ok": 1, "bad": null}));
    assert_eq!(partial.issues.len(), 1);
}
