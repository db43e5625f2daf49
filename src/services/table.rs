use polars::prelude::*;
use serde::Serialize;
use serde_json::{json, Value};
use std::cmp::Ordering;
use crate::error::AppError;
use crate::services::summary::numeric_values;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnHeader {
    pub name: String,
    pub dtype: String,
}

/// A rendered slice of a frame. `index` holds the original row position of
/// each entry in `rows`.
#[derive(Debug, Clone, Serialize)]
pub struct TableView {
    pub columns: Vec<ColumnHeader>,
    pub index: Vec<usize>,
    pub rows: Vec<Vec<Value>>,
}

impl TableView {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

fn float_to_json(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

pub fn any_to_json(value: AnyValue) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(v) => Value::Bool(v),
        AnyValue::String(v) => Value::String(v.to_string()),
        AnyValue::Int32(v) => json!(v),
        AnyValue::Int64(v) => json!(v),
        AnyValue::UInt32(v) => json!(v),
        AnyValue::UInt64(v) => json!(v),
        AnyValue::Float32(v) => float_to_json(v as f64),
        AnyValue::Float64(v) => float_to_json(v),
        other => Value::String(other.to_string()),
    }
}

pub fn column_headers(df: &DataFrame) -> Vec<ColumnHeader> {
    df.get_columns()
        .iter()
        .map(|series| ColumnHeader {
            name: series.name().to_string(),
            dtype: series.dtype().to_string(),
        })
        .collect()
}

fn lookup<'a>(df: &'a DataFrame, column: &str) -> Result<&'a Series, AppError> {
    df.column(column)
        .map_err(|_| AppError::UnknownColumn(column.to_string()))
}

pub fn table_view(df: &DataFrame, columns: &[String], rows: &[usize]) -> Result<TableView, AppError> {
    let series: Vec<&Series> = columns
        .iter()
        .map(|name| lookup(df, name))
        .collect::<Result<_, _>>()?;

    let mut cells = Vec::with_capacity(rows.len());
    for &row in rows {
        let mut record = Vec::with_capacity(series.len());
        for s in &series {
            record.push(any_to_json(s.get(row)?));
        }
        cells.push(record);
    }

    Ok(TableView {
        columns: series
            .iter()
            .map(|s| ColumnHeader {
                name: s.name().to_string(),
                dtype: s.dtype().to_string(),
            })
            .collect(),
        index: rows.to_vec(),
        rows: cells,
    })
}

fn all_columns(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|s| s.to_string()).collect()
}

/// The first `n` rows, every column.
pub fn preview(df: &DataFrame, n: usize) -> Result<TableView, AppError> {
    let rows: Vec<usize> = (0..df.height().min(n)).collect();
    table_view(df, &all_columns(df), &rows)
}

/// Positions of the `n` rows holding the largest values of `column`, largest
/// first. Equal values keep their original order and missing cells are never
/// selected. Only numeric columns can be ranked.
pub fn top_n(df: &DataFrame, column: &str, n: usize) -> Result<Vec<usize>, AppError> {
    let series = lookup(df, column)?;
    if !series.dtype().is_numeric() {
        return Err(AppError::NotComparable {
            column: column.to_string(),
            dtype: series.dtype().to_string(),
        });
    }

    // integers are compared natively so values beyond 2^53 stay distinct
    let dtype = series.dtype();
    let rows = if matches!(dtype, DataType::UInt64) {
        rank_descending(series.u64()?, n)
    } else if dtype.is_integer() {
        rank_descending(series.cast(&DataType::Int64)?.i64()?, n)
    } else {
        rank_descending(numeric_values(series)?, n)
    };

    Ok(rows)
}

fn rank_descending<T: PartialOrd>(values: impl IntoIterator<Item = Option<T>>, n: usize) -> Vec<usize> {
    let mut ranked: Vec<(usize, T)> = values
        .into_iter()
        .enumerate()
        .filter_map(|(row, value)| value.map(|v| (row, v)))
        .collect();
    // sort_by is stable
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    ranked.truncate(n);

    ranked.into_iter().map(|(row, _)| row).collect()
}

pub fn top_n_view(df: &DataFrame, column: &str, n: usize) -> Result<TableView, AppError> {
    let rows = top_n(df, column, n)?;
    table_view(df, &all_columns(df), &rows)
}

/// The requested columns, in the requested order, for every row.
pub fn project(df: &DataFrame, columns: &[String]) -> Result<TableView, AppError> {
    let rows: Vec<usize> = (0..df.height()).collect();
    table_view(df, columns, &rows)
}
