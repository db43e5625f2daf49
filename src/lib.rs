use std::sync::Arc;

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;
pub mod session;

// Application state
pub struct AppState {
    pub config: config::Config,
    pub sessions: session::SessionStore,
}

impl AppState {
    pub fn new(config: config::Config) -> Self {
        let sessions = session::SessionStore::new(&config);
        Self { config, sessions }
    }
}

pub fn app(state: Arc<AppState>) -> axum::Router {
    routes::router(state)
}
