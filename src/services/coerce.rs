use polars::prelude::*;
use crate::error::AppError;

/// Reads a text cell as a float. Blank, unparseable and `NaN` cells are
/// treated as missing.
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| !v.is_nan())
}

fn to_numeric(series: &Series) -> Result<Series, AppError> {
    let coerced = match series.dtype() {
        dtype if dtype.is_numeric() => series.clone(),
        DataType::String => {
            let values: Vec<Option<f64>> = series
                .str()?
                .into_iter()
                .map(|cell| cell.and_then(parse_numeric))
                .collect();
            Series::new(series.name(), values)
        }
        DataType::Boolean => series.cast(&DataType::Float64)?,
        other => {
            tracing::debug!("Casting column {} from {} to Float64", series.name(), other);
            series
                .cast(&DataType::Float64)
                .unwrap_or_else(|_| Series::full_null(series.name(), series.len(), &DataType::Float64))
        }
    };
    Ok(coerced)
}

/// Returns a copy of `df` in which every named column holds numbers. Cells
/// that cannot be read become missing; the call itself only fails for names
/// that are not columns of `df`.
pub fn coerce_numeric(df: &DataFrame, columns: &[String]) -> Result<DataFrame, AppError> {
    if let Some(missing) = columns.iter().find(|name| df.column(name).is_err()) {
        return Err(AppError::UnknownColumn(missing.clone()));
    }

    let mut coerced_df = df.clone();
    for name in columns {
        let original = df.column(name)?;
        let coerced = to_numeric(original)?;
        let introduced = coerced.null_count().saturating_sub(original.null_count());
        if introduced > 0 {
            tracing::debug!("Coercing {} left {} unparseable cells missing", name, introduced);
        }
        coerced_df.replace(name, coerced)?;
    }

    if !columns.is_empty() {
        tracing::info!("Coerced {} column(s) to numeric: {:?}", columns.len(), columns);
    }
    Ok(coerced_df)
}
