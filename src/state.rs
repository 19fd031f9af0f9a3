// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{config::Config, repository::ExamRepository};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn ExamRepository>,
    pub config: Config,
}

impl AppState {
    pub fn new(repo: Arc<dyn ExamRepository>, config: Config) -> Self {
        Self { repo, config }
    }
}

impl FromRef<AppState> for Arc<dyn ExamRepository> {
    fn from_ref(state: &AppState) -> Self {
        state.repo.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
