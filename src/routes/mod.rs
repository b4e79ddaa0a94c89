use axum::{Json, Router, extract::State, routing::get};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;

mod members;

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let last_cycle = state.scheduler.last_cycle().map(|last| match last.outcome {
        Ok(report) => json!({
            "finishedAt": last.finished_at.to_rfc3339(),
            "ok": true,
            "report": report
        }),
        Err(error) => json!({
            "finishedAt": last.finished_at.to_rfc3339(),
            "ok": false,
            "error": error
        }),
    });

    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "scheduler": state.scheduler.state().as_str(),
        "lastCycle": last_cycle,
        "registeredUsers": state.registry.len().await,
        "confirmationCycles": state.config.confirmation_cycles.get(),
        "dryRun": state.config.dry_run
    }))
}

pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(health_check))
        // Read-only view of registrations and eligibility
        .route("/api/members", get(members::list_members))
        .route("/api/members/{user_id}", get(members::get_member))
        .with_state(state)
}
