use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, AsArray, Float32Array, Float64Array};
use arrow::datatypes::{DataType, Float32Type, Float64Type, Int32Type, Int64Type};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::{Row, Table};
use crate::store::AttrValue;

type Metadata = BTreeMap<String, AttrValue>;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a spectral table from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – Parquet file with `x` and `y` list columns
/// * `.json`    – `[{ "x": [...], "y": [...], ...meta }, ...]`
/// * `.csv`     – columns `x` and `y` containing semicolon-separated floats
pub fn load_table(path: &Path) -> Result<Table> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
}

fn checked_row(x: Vec<f64>, y: Vec<f64>, metadata: Metadata, row: usize) -> Result<Row> {
    if x.len() != y.len() {
        bail!("Row {row}: x has {} values but y has {}", x.len(), y.len());
    }
    Ok(Row { x, y, metadata })
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Records-oriented JSON, as written by `df.to_json(orient='records')`.
fn load_json(path: &Path) -> Result<Table> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut rows = Vec::with_capacity(records.len());
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let x = json_array_to_f64(obj.get("x"), i, "x")?;
        let y = json_array_to_f64(obj.get("y"), i, "y")?;

        let metadata = obj
            .iter()
            .filter(|(key, _)| *key != "x" && *key != "y")
            .filter_map(|(key, val)| json_to_attr(val).map(|v| (key.clone(), v)))
            .collect();

        rows.push(checked_row(x, y, metadata, i)?);
    }

    Ok(Table { rows })
}

fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .with_context(|| format!("Row {row}, {col}[{j}]: not a number"))
        })
        .collect()
}

fn json_to_attr(val: &JsonValue) -> Option<AttrValue> {
    Some(match val {
        JsonValue::Null => return None,
        JsonValue::String(s) => AttrValue::Str(s.clone()),
        JsonValue::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => AttrValue::Int(i),
            (None, Some(f)) => AttrValue::Float(f),
            _ => AttrValue::Str(n.to_string()),
        },
        JsonValue::Bool(b) => AttrValue::Bool(*b),
        other => AttrValue::Str(other.to_string()),
    })
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// Header row with column names; `x` and `y` hold semicolon-separated floats
/// (`"4000.0;3999.0"`). All other columns are metadata.
fn load_csv(path: &Path) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let x_idx = headers
        .iter()
        .position(|h| h == "x")
        .context("CSV missing 'x' column")?;
    let y_idx = headers
        .iter()
        .position(|h| h == "y")
        .context("CSV missing 'y' column")?;

    let mut rows = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;

        let x = parse_semicolon_floats(record.get(x_idx).unwrap_or(""), row_no, "x")?;
        let y = parse_semicolon_floats(record.get(y_idx).unwrap_or(""), row_no, "y")?;

        let metadata = record
            .iter()
            .zip(&headers)
            .enumerate()
            .filter(|(col_idx, _)| *col_idx != x_idx && *col_idx != y_idx)
            .filter_map(|(_, (value, name))| guess_attr_type(value).map(|v| (name.clone(), v)))
            .collect();

        rows.push(checked_row(x, y, metadata, row_no)?);
    }

    Ok(Table { rows })
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f64>> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<f64>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

fn guess_attr_type(s: &str) -> Option<AttrValue> {
    if s.is_empty() {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(AttrValue::Int(i));
    }
    if let Ok(f) = s.parse::<f64>() {
        return Some(AttrValue::Float(f));
    }
    if s == "true" || s == "false" {
        return Some(AttrValue::Bool(s == "true"));
    }
    Some(AttrValue::Str(s.to_string()))
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Expected schema:
/// - `x`: List<Float64> or LargeList<Float64>
/// - `y`: List<Float64> or LargeList<Float64>
/// - Any other columns are metadata (strings, ints, floats, bools)
fn load_parquet(path: &Path) -> Result<Table> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut rows = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        let x_idx = schema
            .index_of("x")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'x' column"))?;
        let y_idx = schema
            .index_of("y")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'y' column"))?;

        let x_col = batch.column(x_idx);
        let y_col = batch.column(y_idx);

        let meta_cols: Vec<(usize, String)> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != x_idx && *i != y_idx)
            .map(|(i, f)| (i, f.name().clone()))
            .collect();

        for row in 0..batch.num_rows() {
            let index = rows.len();
            let x = extract_f64_list(x_col, row)
                .with_context(|| format!("Row {index}: failed to read 'x'"))?;
            let y = extract_f64_list(y_col, row)
                .with_context(|| format!("Row {index}: failed to read 'y'"))?;

            let metadata = meta_cols
                .iter()
                .filter_map(|(col_idx, name)| {
                    extract_attr(batch.column(*col_idx), row).map(|v| (name.clone(), v))
                })
                .collect();

            rows.push(checked_row(x, y, metadata, index)?);
        }
    }

    Ok(Table { rows })
}

// -- Parquet / Arrow helpers --

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => col.as_list_opt::<i32>().context("expected ListArray")?.value(row),
        DataType::LargeList(_) => col
            .as_list_opt::<i64>()
            .context("expected LargeListArray")?
            .value(row),
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    // The inner array can be Float64 or Float32
    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

/// A single metadata cell; nulls yield `None`.
fn extract_attr(col: &Arc<dyn Array>, row: usize) -> Option<AttrValue> {
    if col.is_null(row) {
        return None;
    }
    Some(match col.data_type() {
        DataType::Utf8 => AttrValue::Str(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => AttrValue::Str(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => AttrValue::Int(col.as_primitive::<Int32Type>().value(row) as i64),
        DataType::Int64 => AttrValue::Int(col.as_primitive::<Int64Type>().value(row)),
        DataType::Float32 => AttrValue::Float(col.as_primitive::<Float32Type>().value(row) as f64),
        DataType::Float64 => AttrValue::Float(col.as_primitive::<Float64Type>().value(row)),
        DataType::Boolean => AttrValue::Bool(col.as_boolean().value(row)),
        other => AttrValue::Str(format!("{other:?}")),
    })
}
