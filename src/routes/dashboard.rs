use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;
use crate::{
    AppState,
    error::AppError,
    models::{ColumnsRequest, DashboardView, SessionCreated, SortRequest},
    session::Action,
};

const UPLOAD_FIELD: &str = "file";

pub fn routes() -> Router<Arc<AppState>> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(current_view).delete(end_session))
        .route("/sessions/:id/upload", post(upload_file))
        .route("/sessions/:id/coerce", post(set_coercion))
        .route("/sessions/:id/sort", post(set_sort_column))
        .route("/sessions/:id/display", post(set_display_columns))
        .route("/sessions/:id/reset", post(reset_session))
        .layer(cors)
}

/// Runs one interaction against a session off the async workers.
async fn dispatch(state: &AppState, id: Uuid, action: Action) -> Result<Json<DashboardView>, AppError> {
    let session = state.sessions.get(&id)?;
    let start = std::time::Instant::now();
    let view = tokio::task::spawn_blocking(move || session.lock().apply(action)).await??;
    tracing::debug!("Session {} interaction handled in {:?}", id, start.elapsed());
    Ok(Json(view))
}

async fn create_session(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<SessionCreated>) {
    let session = state.sessions.create();
    let session = session.lock();
    (
        StatusCode::CREATED,
        Json(SessionCreated {
            session_id: session.id,
            created_at: session.created_at,
        }),
    )
}

async fn current_view(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DashboardView>, AppError> {
    let session = state.sessions.get(&id)?;
    let view = tokio::task::spawn_blocking(move || session.lock().render()).await??;
    Ok(Json(view))
}

async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.sessions.remove(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<DashboardView>, AppError> {
    // fail fast before reading the body
    state.sessions.get(&id)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Malformed multipart body", e))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| multipart_error("Failed to read upload", e))?;
        tracing::info!(
            "Session {} received upload {:?} ({} bytes)",
            id,
            file_name,
            bytes.len()
        );

        return dispatch(&state, id, Action::Upload { file_name, content_type, bytes }).await;
    }

    Err(AppError::InvalidInput(format!("Missing multipart field '{}'", UPLOAD_FIELD)))
}

/// The body limit surfaces as a multipart error; keep its 413 visible.
fn multipart_error(context: &str, err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        tracing::warn!("{}: upload exceeds the configured size limit", context);
        AppError::PayloadTooLarge(err.body_text())
    } else {
        AppError::InvalidInput(format!("{}: {}", context, err))
    }
}

async fn set_coercion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ColumnsRequest>,
) -> Result<Json<DashboardView>, AppError> {
    dispatch(&state, id, Action::SetCoercion(request.columns)).await
}

async fn set_sort_column(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<SortRequest>,
) -> Result<Json<DashboardView>, AppError> {
    dispatch(&state, id, Action::SetSortColumn(request.column)).await
}

async fn set_display_columns(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ColumnsRequest>,
) -> Result<Json<DashboardView>, AppError> {
    dispatch(&state, id, Action::SetDisplayColumns(request.columns)).await
}

async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DashboardView>, AppError> {
    dispatch(&state, id, Action::Reset).await
}
