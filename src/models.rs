use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::services::charts::Chart;
use crate::services::summary::{CorrelationMatrix, StatsTable};
use crate::services::table::{ColumnHeader, TableView};

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ColumnsRequest {
    pub columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SortRequest {
    pub column: String,
}

/// The whole page for one session. `dataset` is absent until a file has
/// been loaded.
#[derive(Debug, Serialize)]
pub struct DashboardView {
    pub session_id: Uuid,
    pub dataset: Option<DatasetView>,
}

#[derive(Debug, Serialize)]
pub struct DatasetView {
    pub status: StatusBanner,
    pub preview: TableView,
    pub coercion: ColumnPicker,
    pub statistics: StatsTable,
    pub correlation: CorrelationMatrix,
    pub charts: Vec<Chart>,
    pub top_rows: TopRowsWidget,
    pub explorer: ExplorerWidget,
}

#[derive(Debug, Serialize)]
pub struct StatusBanner {
    pub message: String,
    pub file_name: Option<String>,
    pub version: u64,
    pub row_count: usize,
    pub column_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ColumnPicker {
    pub options: Vec<ColumnHeader>,
    pub selected: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WidgetResult<T> {
    Ready { table: T },
    Failed { error: String },
}

#[derive(Debug, Serialize)]
pub struct TopRowsWidget {
    pub sort_column: Option<String>,
    pub limit: usize,
    pub result: WidgetResult<TableView>,
}

#[derive(Debug, Serialize)]
pub struct ExplorerWidget {
    pub columns: ColumnPicker,
    pub table: TableView,
}
