use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;
use crate::handlers::eligibility::Status;
use crate::handlers::registration::UserId;
use crate::utils::address::EvmAddress;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub user_id: UserId,
    pub address: EvmAddress,
    pub status: Status,
    pub counter: u32,
}

/// All registered users with their current eligibility record.
///
/// Users that have not been through a cycle yet show the initial invalid/0 record.
pub async fn list_members(State(state): State<Arc<AppState>>) -> Json<Vec<MemberView>> {
    let records = state.tracker.snapshot().await;
    let members = state
        .registry
        .bindings()
        .await
        .into_iter()
        .map(|(user_id, address)| {
            let record = records.get(&user_id).copied().unwrap_or_default();
            MemberView {
                user_id,
                address,
                status: record.status,
                counter: record.counter,
            }
        })
        .collect();

    Json(members)
}

pub async fn get_member(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<MemberView>, (StatusCode, Json<Value>)> {
    let user_id = UserId(user_id);
    let Some(address) = state.registry.address_of(user_id).await else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "User not registered",
                "userId": user_id
            })),
        ));
    };

    let record = state.tracker.get(user_id).await.unwrap_or_default();
    Ok(Json(MemberView {
        user_id,
        address,
        status: record.status,
        counter: record.counter,
    }))
}
