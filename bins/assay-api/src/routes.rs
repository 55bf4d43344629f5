use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/evaluate", post(handlers::submit_evaluation))
        .route("/evaluation/:job_id", get(handlers::get_evaluation))
        .route("/fingerprint", post(handlers::fingerprint))
        .route("/fingerprint/compare", post(handlers::compare))
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
}
