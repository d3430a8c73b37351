use std::sync::Arc;

use db::SessionStore;
use orchestrator::JobRunner;

#[derive(Clone)]
pub struct AppState {
    pub runner: JobRunner,
    pub store: Arc<dyn SessionStore>,
}

impl AppState {
    pub fn new(runner: JobRunner, store: Arc<dyn SessionStore>) -> Self {
        Self { runner, store }
    }
}
