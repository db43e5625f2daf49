use polars::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use crate::error::AppError;
use crate::services::summary::{numeric_values, CorrelationMatrix};
use crate::services::table::any_to_json;

pub const NET_WORTH_COLUMN: &str = "NetWorth";
pub const AGE_COLUMN: &str = "Age";
pub const HOVER_COLUMNS: [&str; 2] = ["Name", "Country"];
pub const HISTOGRAM_BINS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScatterPoint {
    pub row: usize,
    pub x: f64,
    pub y: f64,
    pub hover: BTreeMap<String, Value>,
}

/// Drawing instructions for one chart. Rendering itself happens client side.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Chart {
    Histogram {
        title: &'static str,
        column: String,
        x_label: &'static str,
        y_label: &'static str,
        bins: Vec<HistogramBin>,
    },
    Scatter {
        title: &'static str,
        x: String,
        y: String,
        hover_fields: Vec<String>,
        points: Vec<ScatterPoint>,
    },
    Heatmap {
        title: &'static str,
        color_scale: &'static str,
        domain: [f64; 2],
        annotated: bool,
        columns: Vec<String>,
        values: Vec<Vec<Option<f64>>>,
    },
}

impl Chart {
    pub fn kind(&self) -> &'static str {
        match self {
            Chart::Histogram { .. } => "histogram",
            Chart::Scatter { .. } => "scatter",
            Chart::Heatmap { .. } => "heatmap",
        }
    }
}

/// Equal-width bins over the range of the finite values. Every bin is
/// half-open except the last, which also takes the maximum.
pub fn histogram(values: &[f64], bins: usize) -> Vec<HistogramBin> {
    if bins == 0 {
        return Vec::new();
    }

    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let (low, high) = match (
        finite.iter().copied().reduce(f64::min),
        finite.iter().copied().reduce(f64::max),
    ) {
        (Some(min), Some(max)) if min == max => (min - 0.5, max + 0.5),
        (Some(min), Some(max)) => (min, max),
        _ => (0.0, 1.0),
    };

    // halved so the span of values near f64::MAX stays finite
    let half_span = high / 2.0 - low / 2.0;
    let width = half_span / bins as f64 * 2.0;
    let mut counts = vec![0usize; bins];
    for v in &finite {
        let idx = ((v / 2.0 - low / 2.0) / half_span * bins as f64).floor() as usize;
        counts[idx.min(bins - 1)] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            start: low + i as f64 * width,
            end: if i + 1 == bins { high } else { low + (i + 1) as f64 * width },
            count,
        })
        .collect()
}

fn has_numeric(df: &DataFrame, column: &str) -> bool {
    df.column(column)
        .map(|series| series.dtype().is_numeric())
        .unwrap_or(false)
}

fn net_worth_histogram(df: &DataFrame) -> Result<Chart, AppError> {
    let values: Vec<f64> = numeric_values(df.column(NET_WORTH_COLUMN)?)?
        .into_iter()
        .flatten()
        .collect();

    Ok(Chart::Histogram {
        title: "Distribution of Net Worth",
        column: NET_WORTH_COLUMN.to_string(),
        x_label: "Net Worth",
        y_label: "Frequency",
        bins: histogram(&values, HISTOGRAM_BINS),
    })
}

fn age_net_worth_scatter(df: &DataFrame) -> Result<Chart, AppError> {
    let ages = numeric_values(df.column(AGE_COLUMN)?)?;
    let net_worth = numeric_values(df.column(NET_WORTH_COLUMN)?)?;
    let hover: Vec<&Series> = HOVER_COLUMNS
        .iter()
        .filter_map(|name| df.column(name).ok())
        .collect();

    let mut points = Vec::new();
    for (row, (x, y)) in ages.iter().zip(net_worth.iter()).enumerate() {
        if let (Some(x), Some(y)) = (x, y) {
            let mut fields = BTreeMap::new();
            for series in &hover {
                fields.insert(series.name().to_string(), any_to_json(series.get(row)?));
            }
            points.push(ScatterPoint { row, x: *x, y: *y, hover: fields });
        }
    }

    Ok(Chart::Scatter {
        title: "Age vs Net Worth",
        x: AGE_COLUMN.to_string(),
        y: NET_WORTH_COLUMN.to_string(),
        hover_fields: hover.iter().map(|s| s.name().to_string()).collect(),
        points,
    })
}

fn correlation_heatmap(correlation: &CorrelationMatrix) -> Chart {
    Chart::Heatmap {
        title: "Correlation Heatmap",
        color_scale: "coolwarm",
        domain: [-1.0, 1.0],
        annotated: true,
        columns: correlation.columns.clone(),
        values: correlation.values.clone(),
    }
}

/// Charts for the current frame, in page order: net worth histogram, age vs
/// net worth scatter, then the correlation heatmap once two numeric columns
/// exist.
pub fn build_charts(df: &DataFrame, correlation: &CorrelationMatrix) -> Result<Vec<Chart>, AppError> {
    let mut charts = Vec::new();

    if has_numeric(df, NET_WORTH_COLUMN) {
        charts.push(net_worth_histogram(df)?);
        if has_numeric(df, AGE_COLUMN) {
            charts.push(age_net_worth_scatter(df)?);
        }
    }

    if correlation.len() > 1 {
        charts.push(correlation_heatmap(correlation));
    }

    tracing::debug!(
        "Built {} chart(s): {:?}",
        charts.len(),
        charts.iter().map(Chart::kind).collect::<Vec<_>>()
    );
    Ok(charts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::coerce::coerce_numeric;
    use crate::services::ingest::load_csv;
    use crate::services::summary::correlation;
    use serde_json::json;

    fn kinds(df: &DataFrame) -> Vec<&'static str> {
        let corr = correlation(df).unwrap();
        build_charts(df, &corr).unwrap().iter().map(Chart::kind).collect()
    }

    #[test]
    fn histogram_spans_min_to_max() {
        let bins = histogram(&[0.0, 1.0, 2.0, 10.0], 10);
        assert_eq!(bins.len(), 10);
        assert_eq!(bins[0].start, 0.0);
        assert_eq!(bins[9].end, 10.0);
        assert_eq!(bins[0].count, 1);
        assert_eq!(bins[1].count, 1);
        assert_eq!(bins[2].count, 1);
        // the maximum lands in the closed last bin
        assert_eq!(bins[9].count, 1);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 4);
    }

    #[test]
    fn histogram_handles_constant_and_empty_input() {
        let constant = histogram(&[5.0, 5.0, 5.0], HISTOGRAM_BINS);
        assert_eq!(constant.first().unwrap().start, 4.5);
        assert_eq!(constant.last().unwrap().end, 5.5);
        assert_eq!(constant.iter().map(|b| b.count).sum::<usize>(), 3);

        let empty = histogram(&[f64::INFINITY], 4);
        assert_eq!(empty.len(), 4);
        assert_eq!(empty[0].start, 0.0);
        assert!(empty.iter().all(|b| b.count == 0));
    }

    #[test]
    fn histogram_edges_stay_finite_near_the_float_limit() {
        let bins = histogram(&[-1e308, 0.0, 1e308], 4);
        assert!(bins.iter().all(|b| b.start.is_finite() && b.end.is_finite()));
        assert_eq!(bins[0].start, -1e308);
        assert_eq!(bins[3].end, 1e308);
        assert_eq!(bins.iter().map(|b| b.count).collect::<Vec<_>>(), vec![1, 0, 1, 1]);
        assert!(bins.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn charts_follow_column_presence() {
        let raw = load_csv(b"Name,Age,NetWorth,Country\nA,30,100,PT\nB,40,200,BR\nC,50,abc,US\n").unwrap();
        // NetWorth is still text, one numeric column
        assert!(kinds(&raw).is_empty());

        let coerced = coerce_numeric(&raw, &["NetWorth".to_string()]).unwrap();
        assert_eq!(kinds(&coerced), vec!["histogram", "scatter", "heatmap"]);

        let no_age = load_csv(b"NetWorth\n1\n2\n").unwrap();
        assert_eq!(kinds(&no_age), vec!["histogram"]);

        let other = load_csv(b"x,y\n1,2\n2,1\n").unwrap();
        assert_eq!(kinds(&other), vec!["heatmap"]);
    }

    #[test]
    fn histogram_uses_fifty_bins() {
        let df = load_csv(b"NetWorth\n1\n2\n3\n").unwrap();
        let corr = correlation(&df).unwrap();
        let charts = build_charts(&df, &corr).unwrap();
        match &charts[0] {
            Chart::Histogram { bins, .. } => assert_eq!(bins.len(), HISTOGRAM_BINS),
            other => panic!("unexpected chart {:?}", other.kind()),
        }
    }

    #[test]
    fn scatter_skips_incomplete_rows_and_carries_hover_fields() {
        let df = load_csv(b"Name,Age,NetWorth\nA,30,100\nB,,200\nC,50,300\n").unwrap();
        let corr = correlation(&df).unwrap();
        let charts = build_charts(&df, &corr).unwrap();
        let Chart::Scatter { points, hover_fields, .. } = &charts[1] else {
            panic!("expected scatter as second chart");
        };
        assert_eq!(hover_fields, &vec!["Name".to_string()]);
        assert_eq!(points.iter().map(|p| p.row).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(points[1].hover.get("Name"), Some(&json!("C")));
        assert_eq!((points[1].x, points[1].y), (50.0, 300.0));
    }

    #[test]
    fn charts_serialize_with_kind_tag() {
        let chart = correlation_heatmap(&CorrelationMatrix {
            columns: vec!["a".into(), "b".into()],
            values: vec![vec![Some(1.0), None], vec![None, Some(1.0)]],
        });
        let value = serde_json::to_value(&chart).unwrap();
        assert_eq!(value["kind"], "heatmap");
        assert_eq!(value["color_scale"], "coolwarm");
        assert_eq!(value["values"][0][1], Value::Null);
    }
}
