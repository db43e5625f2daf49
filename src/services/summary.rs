use polars::prelude::*;
use rayon::prelude::*;
use serde::Serialize;
use crate::error::AppError;

/// Row labels of the statistics table, in display order.
pub const STATISTICS: [&str; 8] = ["count", "mean", "std", "min", "25%", "50%", "75%", "max"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub column: String,
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub q25: Option<f64>,
    pub q50: Option<f64>,
    pub q75: Option<f64>,
    pub max: Option<f64>,
}

impl ColumnStats {
    /// `values` holds the non-missing cells of one column.
    pub fn compute(column: &str, values: &[f64]) -> Self {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len();
        let mean = (count > 0).then(|| sorted.iter().sum::<f64>() / count as f64);
        let std = mean.filter(|_| count > 1).map(|m| {
            let squares: f64 = sorted.iter().map(|v| (v - m) * (v - m)).sum();
            (squares / (count - 1) as f64).sqrt()
        });

        ColumnStats {
            column: column.to_string(),
            count,
            mean,
            std,
            min: sorted.first().copied(),
            q25: percentile(&sorted, 0.25),
            q50: percentile(&sorted, 0.50),
            q75: percentile(&sorted, 0.75),
            max: sorted.last().copied(),
        }
    }

    pub fn value(&self, statistic: &str) -> Option<f64> {
        match statistic {
            "count" => Some(self.count as f64),
            "mean" => self.mean,
            "std" => self.std,
            "min" => self.min,
            "25%" => self.q25,
            "50%" => self.q50,
            "75%" => self.q75,
            "max" => self.max,
            _ => None,
        }
    }
}

/// Linear interpolation between the two closest ranks of an ascending slice.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let position = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

#[derive(Debug, Clone, Serialize)]
pub struct StatRow {
    pub statistic: &'static str,
    pub values: Vec<Option<f64>>,
}

/// Statistics laid out one row per statistic and one column per numeric
/// column.
#[derive(Debug, Clone, Serialize)]
pub struct StatsTable {
    pub columns: Vec<String>,
    pub rows: Vec<StatRow>,
}

impl StatsTable {
    pub fn from_column_stats(stats: &[ColumnStats]) -> Self {
        let rows = STATISTICS
            .iter()
            .map(|&statistic| StatRow {
                statistic,
                values: stats.iter().map(|s| s.value(statistic)).collect(),
            })
            .collect();

        StatsTable {
            columns: stats.iter().map(|s| s.column.clone()).collect(),
            rows,
        }
    }

    pub fn get(&self, statistic: &str, column: &str) -> Option<f64> {
        let col_idx = self.columns.iter().position(|c| c == column)?;
        self.rows
            .iter()
            .find(|row| row.statistic == statistic)
            .and_then(|row| row.values[col_idx])
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        self.values[i][j]
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

pub fn numeric_columns(df: &DataFrame) -> Vec<String> {
    df.get_columns()
        .iter()
        .filter(|series| series.dtype().is_numeric())
        .map(|series| series.name().to_string())
        .collect()
}

/// Cells of a numeric column as floats, `NaN` counted as missing.
pub fn numeric_values(series: &Series) -> Result<Vec<Option<f64>>, AppError> {
    let floats = series.cast(&DataType::Float64)?;
    let values = floats
        .f64()?
        .into_iter()
        .map(|cell| cell.filter(|v| !v.is_nan()))
        .collect();
    Ok(values)
}

fn numeric_data(df: &DataFrame) -> Result<Vec<(String, Vec<Option<f64>>)>, AppError> {
    numeric_columns(df)
        .into_iter()
        .map(|name| -> Result<(String, Vec<Option<f64>>), AppError> {
            let values = numeric_values(df.column(&name)?)?;
            Ok((name, values))
        })
        .collect()
}

pub fn describe(df: &DataFrame) -> Result<StatsTable, AppError> {
    let data = numeric_data(df)?;
    let stats: Vec<ColumnStats> = data
        .par_iter()
        .map(|(name, values)| {
            let present: Vec<f64> = values.iter().flatten().copied().collect();
            ColumnStats::compute(name, &present)
        })
        .collect();

    tracing::debug!("Described {} numeric column(s)", stats.len());
    Ok(StatsTable::from_column_stats(&stats))
}

/// Whether the present cells hold at least two distinct values.
fn varies(values: &[Option<f64>]) -> bool {
    let mut present = values.iter().flatten();
    match present.next() {
        Some(first) => present.any(|v| v != first),
        None => false,
    }
}

/// Deviations from the mean, rescaled so the largest one has magnitude 1.
/// The input is first divided by its largest magnitude so the mean cannot
/// overflow. `None` when the values do not spread after rescaling.
fn unit_deviations(values: &[f64]) -> Option<Vec<f64>> {
    let magnitude = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if magnitude == 0.0 {
        return None;
    }
    let scaled: Vec<f64> = values.iter().map(|v| v / magnitude).collect();
    let mean = scaled.iter().sum::<f64>() / scaled.len() as f64;
    let deviations: Vec<f64> = scaled.iter().map(|v| v - mean).collect();
    let spread = deviations.iter().fold(0.0f64, |m, d| m.max(d.abs()));
    (spread > 0.0 && spread.is_finite()).then(|| deviations.iter().map(|d| d / spread).collect())
}

/// Pearson correlation over the rows where both cells are present. `None`
/// when fewer than two such rows exist or either side is constant.
pub fn pearson(x: &[Option<f64>], y: &[Option<f64>]) -> Option<f64> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = x
        .iter()
        .zip(y.iter())
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .unzip();
    if xs.len() < 2 {
        return None;
    }

    // constant sides are decided on the raw cells, never on rounded sums
    let constant = |values: &[f64]| values.iter().all(|v| *v == values[0]);
    if constant(&xs) || constant(&ys) {
        return None;
    }

    let dx = unit_deviations(&xs)?;
    let dy = unit_deviations(&ys)?;
    let (mut sxy, mut sxx, mut syy) = (0.0f64, 0.0f64, 0.0f64);
    for (a, b) in dx.iter().zip(dy.iter()) {
        sxy += a * b;
        sxx += a * a;
        syy += b * b;
    }

    let r = sxy / (sxx.sqrt() * syy.sqrt());
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

fn correlation_from(columns: Vec<String>, data: &[Vec<Option<f64>>]) -> CorrelationMatrix {
    let n = data.len();
    let pairs: Vec<(usize, usize)> = (0..n).flat_map(|i| (i..n).map(move |j| (i, j))).collect();

    let coefficients: Vec<((usize, usize), Option<f64>)> = pairs
        .into_par_iter()
        .map(|(i, j)| {
            let r = if i == j {
                varies(&data[i]).then_some(1.0)
            } else {
                pearson(&data[i], &data[j])
            };
            ((i, j), r)
        })
        .collect();

    let mut values = vec![vec![None; n]; n];
    for ((i, j), r) in coefficients {
        values[i][j] = r;
        values[j][i] = r;
    }

    CorrelationMatrix { columns, values }
}

/// Pairwise correlation of every numeric column. No numeric columns gives an
/// empty matrix and a single one gives a 1x1 matrix.
pub fn correlation(df: &DataFrame) -> Result<CorrelationMatrix, AppError> {
    let (columns, data): (Vec<String>, Vec<Vec<Option<f64>>>) = numeric_data(df)?.into_iter().unzip();
    let matrix = correlation_from(columns, &data);
    tracing::debug!("Computed {}x{} correlation matrix", matrix.len(), matrix.len());
    Ok(matrix)
}
