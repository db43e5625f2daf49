use bytes::Bytes;
use chrono::{DateTime, Utc};
use lru::LruCache;
use moka::notification::RemovalCause;
use moka::sync::Cache;
use parking_lot::Mutex;
use polars::prelude::DataFrame;
use std::collections::{BTreeSet, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{
    ColumnPicker, DashboardView, DatasetView, ExplorerWidget, StatusBanner, TopRowsWidget, WidgetResult,
};
use crate::services::charts::{build_charts, Chart};
use crate::services::coerce::coerce_numeric;
use crate::services::ingest::{load_csv, validate_upload_name};
use crate::services::summary::{correlation, describe, CorrelationMatrix, StatsTable};
use crate::services::table::{self, column_headers};

pub const PREVIEW_ROWS: usize = 5;
pub const TOP_ROWS: usize = 10;
pub const DEFAULT_DISPLAY_COLUMNS: usize = 5;

const LOADED_MESSAGE: &str = "Data loaded successfully!";

/// A user interaction. Every interaction goes through [`Session::apply`].
#[derive(Debug, Clone)]
pub enum Action {
    Upload {
        file_name: Option<String>,
        content_type: Option<String>,
        bytes: Bytes,
    },
    SetCoercion(Vec<String>),
    SetSortColumn(String),
    SetDisplayColumns(Vec<String>),
    Reset,
}

struct LoadedDataset {
    file_name: Option<String>,
    frame: DataFrame,
    version: u64,
}

#[derive(Debug, Default, Clone)]
struct Selections {
    coerce: Vec<String>,
    sort_column: Option<String>,
    display_columns: Vec<String>,
}

impl Selections {
    fn defaults_for(frame: &DataFrame) -> Self {
        let names: Vec<String> = frame.get_column_names().iter().map(|s| s.to_string()).collect();
        Selections {
            coerce: Vec::new(),
            sort_column: names.first().cloned(),
            display_columns: names.into_iter().take(DEFAULT_DISPLAY_COLUMNS).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AnalysisKey {
    version: u64,
    coerced: BTreeSet<String>,
}

/// Everything derived from the uploaded frame and the coercion selection.
pub struct Analysis {
    pub frame: DataFrame,
    pub statistics: StatsTable,
    pub correlation: CorrelationMatrix,
    pub charts: Vec<Chart>,
}

impl Analysis {
    fn compute(source: &DataFrame, coerce: &[String]) -> Result<Self, AppError> {
        let start = std::time::Instant::now();
        let frame = coerce_numeric(source, coerce)?;
        let statistics = describe(&frame)?;
        let correlation = correlation(&frame)?;
        let charts = build_charts(&frame, &correlation)?;
        tracing::info!(
            "Analysis computed: {} numeric column(s), {} chart(s) in {:?}",
            statistics.columns.len(),
            charts.len(),
            start.elapsed()
        );
        Ok(Analysis { frame, statistics, correlation, charts })
    }
}

fn dedup(columns: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    columns.into_iter().filter(|c| seen.insert(c.clone())).collect()
}

fn ensure_columns(frame: &DataFrame, columns: &[String]) -> Result<(), AppError> {
    match columns.iter().find(|name| frame.column(name).is_err()) {
        Some(missing) => Err(AppError::UnknownColumn(missing.clone())),
        None => Ok(()),
    }
}

/// State of one dashboard user. Created on the first request, dropped when
/// the session ends.
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_action_at: DateTime<Utc>,
    dataset: Option<LoadedDataset>,
    selections: Selections,
    uploads: u64,
    analyses: LruCache<AnalysisKey, Arc<Analysis>>,
}

impl Session {
    pub fn new(analysis_cache_size: NonZeroUsize) -> Self {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            created_at: now,
            last_action_at: now,
            dataset: None,
            selections: Selections::default(),
            uploads: 0,
            analyses: LruCache::new(analysis_cache_size),
        }
    }

    pub fn has_dataset(&self) -> bool {
        self.dataset.is_some()
    }

    fn loaded_frame(&self) -> Result<&DataFrame, AppError> {
        self.dataset
            .as_ref()
            .map(|d| &d.frame)
            .ok_or(AppError::NoDataset)
    }

    fn clear(&mut self) {
        self.dataset = None;
        self.selections = Selections::default();
        self.analyses.clear();
    }

    /// Applies one interaction and returns the page to show next. A rejected
    /// selection leaves the state as it was; a failed upload leaves the
    /// session empty.
    pub fn apply(&mut self, action: Action) -> Result<DashboardView, AppError> {
        match action {
            Action::Upload { file_name, content_type, bytes } => {
                validate_upload_name(file_name.as_deref(), content_type.as_deref())?;
                match load_csv(&bytes) {
                    Ok(frame) => {
                        self.uploads += 1;
                        self.analyses.clear();
                        self.selections = Selections::defaults_for(&frame);
                        tracing::info!(
                            "Session {} loaded {:?} as version {}",
                            self.id,
                            file_name,
                            self.uploads
                        );
                        self.dataset = Some(LoadedDataset {
                            file_name,
                            frame,
                            version: self.uploads,
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Session {} upload failed: {}", self.id, e);
                        self.clear();
                        self.last_action_at = Utc::now();
                        return Err(e);
                    }
                }
            }
            Action::SetCoercion(columns) => {
                let columns = dedup(columns);
                ensure_columns(self.loaded_frame()?, &columns)?;
                self.selections.coerce = columns;
            }
            Action::SetSortColumn(column) => {
                ensure_columns(self.loaded_frame()?, std::slice::from_ref(&column))?;
                self.selections.sort_column = Some(column);
            }
            Action::SetDisplayColumns(columns) => {
                let columns = dedup(columns);
                ensure_columns(self.loaded_frame()?, &columns)?;
                self.selections.display_columns = columns;
            }
            Action::Reset => {
                tracing::info!("Session {} reset", self.id);
                self.clear();
            }
        }

        self.last_action_at = Utc::now();
        self.render()
    }

    /// Memoised on (dataset version, coercion selection).
    fn analysis(&mut self) -> Result<Option<Arc<Analysis>>, AppError> {
        let Some(dataset) = &self.dataset else {
            return Ok(None);
        };

        let key = AnalysisKey {
            version: dataset.version,
            coerced: self.selections.coerce.iter().cloned().collect(),
        };
        if let Some(hit) = self.analyses.get(&key) {
            tracing::debug!("Session {} reusing analysis for {:?}", self.id, key);
            return Ok(Some(Arc::clone(hit)));
        }

        let analysis = Arc::new(Analysis::compute(&dataset.frame, &self.selections.coerce)?);
        self.analyses.put(key, Arc::clone(&analysis));
        Ok(Some(analysis))
    }

    pub fn render(&mut self) -> Result<DashboardView, AppError> {
        let Some(analysis) = self.analysis()? else {
            return Ok(DashboardView { session_id: self.id, dataset: None });
        };
        let dataset = self.dataset.as_ref().ok_or(AppError::NoDataset)?;
        let frame = &analysis.frame;

        let top_rows = match &self.selections.sort_column {
            Some(column) => match table::top_n_view(frame, column, TOP_ROWS) {
                Ok(table) => WidgetResult::Ready { table },
                Err(e) => {
                    tracing::warn!("Session {} top rows by {} failed: {}", self.id, column, e);
                    WidgetResult::Failed { error: e.to_string() }
                }
            },
            None => WidgetResult::Failed { error: "No sort column selected".to_string() },
        };

        let options = column_headers(frame);
        let view = DatasetView {
            status: StatusBanner {
                message: LOADED_MESSAGE.to_string(),
                file_name: dataset.file_name.clone(),
                version: dataset.version,
                row_count: dataset.frame.height(),
                column_count: dataset.frame.width(),
            },
            preview: table::preview(&dataset.frame, PREVIEW_ROWS)?,
            coercion: ColumnPicker {
                options: column_headers(&dataset.frame),
                selected: self.selections.coerce.clone(),
            },
            statistics: analysis.statistics.clone(),
            correlation: analysis.correlation.clone(),
            charts: analysis.charts.clone(),
            top_rows: TopRowsWidget {
                sort_column: self.selections.sort_column.clone(),
                limit: TOP_ROWS,
                result: top_rows,
            },
            explorer: ExplorerWidget {
                table: table::project(frame, &self.selections.display_columns)?,
                columns: ColumnPicker {
                    options,
                    selected: self.selections.display_columns.clone(),
                },
            },
        };

        Ok(DashboardView { session_id: self.id, dataset: Some(view) })
    }
}

/// Live sessions keyed by id. Sessions idle for longer than the configured
/// timeout are evicted, which ends them.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Cache<Uuid, Arc<Mutex<Session>>>,
    analysis_cache_size: NonZeroUsize,
}

impl SessionStore {
    pub fn new(config: &Config) -> Self {
        let sessions = Cache::builder()
            .max_capacity(config.max_sessions)
            .time_to_idle(config.session_idle_timeout)
            .eviction_listener(|id: Arc<Uuid>, _session, cause: RemovalCause| {
                tracing::info!("Session {} ended ({:?})", id, cause);
            })
            .build();

        Self {
            sessions,
            analysis_cache_size: config.analysis_cache_size,
        }
    }

    pub fn create(&self) -> Arc<Mutex<Session>> {
        let session = Session::new(self.analysis_cache_size);
        let id = session.id;
        let session = Arc::new(Mutex::new(session));
        self.sessions.insert(id, Arc::clone(&session));
        tracing::info!("Session {} started", id);
        session
    }

    pub fn get(&self, id: &Uuid) -> Result<Arc<Mutex<Session>>, AppError> {
        self.sessions
            .get(id)
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))
    }

    pub fn remove(&self, id: &Uuid) -> Result<(), AppError> {
        self.sessions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::table::TableView;
    use polars::prelude::DataType;
    use serde_json::json;
    use std::time::Duration;

    const SAMPLE: &str = "Name,Age,NetWorth\nA,30,100\nB,40,200\nC,50,abc\n";

    fn upload(csv: &str) -> Action {
        Action::Upload {
            file_name: Some("people.csv".to_string()),
            content_type: Some("text/csv".to_string()),
            bytes: Bytes::from(csv.to_string()),
        }
    }

    fn loaded_session() -> Session {
        let mut session = Session::new(NonZeroUsize::new(4).unwrap());
        session.apply(upload(SAMPLE)).unwrap();
        session
    }

    fn top_table(view: &DashboardView) -> &TableView {
        match &view.dataset.as_ref().unwrap().top_rows.result {
            WidgetResult::Ready { table } => table,
            WidgetResult::Failed { error } => panic!("top rows failed: {}", error),
        }
    }

    #[test]
    fn new_session_renders_empty_page() {
        let mut session = Session::new(NonZeroUsize::new(2).unwrap());
        let view = session.render().unwrap();
        assert_eq!(view.session_id, session.id);
        assert!(view.dataset.is_none());
    }

    #[test]
    fn upload_sets_default_selections() {
        let mut session = loaded_session();
        let view = session.render().unwrap();
        let dataset = view.dataset.unwrap();

        assert_eq!(dataset.status.message, "Data loaded successfully!");
        assert_eq!(dataset.status.row_count, 3);
        assert_eq!(dataset.preview.index, vec![0, 1, 2]);
        assert!(dataset.coercion.selected.is_empty());
        assert_eq!(dataset.explorer.columns.selected, vec!["Name", "Age", "NetWorth"]);
        assert_eq!(dataset.top_rows.sort_column.as_deref(), Some("Name"));
        // the default sort column is text
        assert!(matches!(dataset.top_rows.result, WidgetResult::Failed { .. }));
        assert_eq!(dataset.explorer.table.rows.len(), 3);
    }

    #[test]
    fn coercing_net_worth_matches_worked_example() {
        let mut session = loaded_session();
        session.apply(Action::SetCoercion(vec!["NetWorth".to_string()])).unwrap();
        let view = session.apply(Action::SetSortColumn("NetWorth".to_string())).unwrap();
        let dataset = view.dataset.as_ref().unwrap();

        assert_eq!(dataset.statistics.get("count", "NetWorth"), Some(2.0));
        assert_eq!(dataset.statistics.get("mean", "NetWorth"), Some(150.0));
        assert_eq!(dataset.explorer.table.rows[2][2], serde_json::Value::Null);

        let top = top_table(&view);
        assert_eq!(top.index, vec![1, 0]);
        assert_eq!(top.rows[0][0], json!("B"));
    }

    #[test]
    fn preview_shows_the_uploaded_types() {
        let mut session = loaded_session();
        let view = session.apply(Action::SetCoercion(vec!["NetWorth".to_string()])).unwrap();
        let dataset = view.dataset.unwrap();
        assert_eq!(dataset.preview.rows[2][2], json!("abc"));
    }

    #[test]
    fn deselecting_restores_original_column() {
        let mut session = loaded_session();
        session.apply(Action::SetCoercion(vec!["NetWorth".to_string()])).unwrap();
        let view = session.apply(Action::SetCoercion(Vec::new())).unwrap();
        let dataset = view.dataset.unwrap();
        assert_eq!(dataset.statistics.columns, vec!["Age"]);
        let net_worth = dataset
            .explorer
            .columns
            .options
            .iter()
            .find(|c| c.name == "NetWorth")
            .unwrap();
        assert_eq!(net_worth.dtype, DataType::String.to_string());
    }

    #[test]
    fn analysis_is_memoised_per_version_and_selection() {
        let mut session = loaded_session();
        let first = session.analysis().unwrap().unwrap();
        let again = session.analysis().unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        session.apply(Action::SetCoercion(vec!["NetWorth".to_string()])).unwrap();
        let coerced = session.analysis().unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &coerced));

        session.apply(Action::SetCoercion(Vec::new())).unwrap();
        let back = session.analysis().unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &back));

        session.apply(upload(SAMPLE)).unwrap();
        let reloaded = session.analysis().unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &reloaded));
    }

    #[test]
    fn top_rows_are_stable_across_renders() {
        let mut session = loaded_session();
        session.apply(Action::SetSortColumn("Age".to_string())).unwrap();
        let first = session.render().unwrap();
        let second = session.render().unwrap();
        assert_eq!(top_table(&first).index, top_table(&second).index);
        assert_eq!(top_table(&first).rows, top_table(&second).rows);
    }

    #[test]
    fn rejected_selections_leave_state_untouched() {
        let mut session = loaded_session();
        session.apply(Action::SetDisplayColumns(vec!["Age".to_string()])).unwrap();

        let err = session
            .apply(Action::SetDisplayColumns(vec!["Age".to_string(), "Salary".to_string()]))
            .unwrap_err();
        assert!(matches!(err, AppError::UnknownColumn(name) if name == "Salary"));

        let view = session.render().unwrap();
        assert_eq!(view.dataset.unwrap().explorer.columns.selected, vec!["Age"]);
    }

    #[test]
    fn rejected_selections_keep_the_last_action_time() {
        let mut session = loaded_session();
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        session.last_action_at = earlier;

        assert!(session.apply(Action::SetSortColumn("Salary".to_string())).is_err());
        assert!(session.apply(Action::SetCoercion(vec!["Salary".to_string()])).is_err());
        assert_eq!(session.last_action_at, earlier);

        session.apply(Action::SetSortColumn("Age".to_string())).unwrap();
        assert!(session.last_action_at > earlier);
    }

    #[test]
    fn display_selection_is_deduplicated_in_order() {
        let mut session = loaded_session();
        let view = session
            .apply(Action::SetDisplayColumns(vec![
                "NetWorth".to_string(),
                "Name".to_string(),
                "NetWorth".to_string(),
            ]))
            .unwrap();
        let explorer = view.dataset.unwrap().explorer;
        assert_eq!(explorer.table.column_names(), vec!["NetWorth", "Name"]);
    }

    #[test]
    fn failed_upload_empties_the_session() {
        let mut session = loaded_session();
        let err = session.apply(upload("")).unwrap_err();
        assert!(matches!(err, AppError::Ingestion(_)));
        assert!(!session.has_dataset());
        assert!(session.render().unwrap().dataset.is_none());
    }

    #[test]
    fn rejected_file_type_keeps_current_dataset() {
        let mut session = loaded_session();
        let err = session
            .apply(Action::Upload {
                file_name: Some("book.xlsx".to_string()),
                content_type: None,
                bytes: Bytes::from_static(b"PK"),
            })
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(session.has_dataset());
    }

    #[test]
    fn selections_need_a_dataset() {
        let mut session = Session::new(NonZeroUsize::new(2).unwrap());
        let err = session.apply(Action::SetSortColumn("Age".to_string())).unwrap_err();
        assert!(matches!(err, AppError::NoDataset));
    }

    #[test]
    fn reset_returns_to_empty_state() {
        let mut session = loaded_session();
        let view = session.apply(Action::Reset).unwrap();
        assert!(view.dataset.is_none());
        assert!(!session.has_dataset());
    }

    #[test]
    fn store_creates_finds_and_removes_sessions() {
        let config = Config {
            session_idle_timeout: Duration::from_secs(60),
            ..Config::default()
        };
        let store = SessionStore::new(&config);
        let id = store.create().lock().id;

        assert_eq!(store.get(&id).unwrap().lock().id, id);
        store.remove(&id).unwrap();
        assert!(matches!(store.get(&id), Err(AppError::SessionNotFound(_))));
        assert!(matches!(store.remove(&id), Err(AppError::SessionNotFound(_))));
    }
}
