use crate::api::AppState;
use crate::domain::{AccountId, PositionChange};
use crate::error::SwitchError;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionQuery {
    pub include_changes: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    pub account_id: i64,
    pub value: String,
    pub reserved_value: String,
    pub changed_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<PositionChangeDto>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionChangeDto {
    pub id: i64,
    pub subject_id: String,
    pub is_fx: bool,
    pub state: String,
    pub change: String,
    pub value: String,
    pub created_at: i64,
}

impl From<&PositionChange> for PositionChangeDto {
    fn from(change: &PositionChange) -> Self {
        PositionChangeDto {
            id: change.id,
            subject_id: change.subject.id().to_string(),
            is_fx: change.subject.is_fx(),
            state: change.state.to_string(),
            change: change.change.value().to_canonical_string(),
            value: change.value.to_canonical_string(),
            created_at: change.created_at.as_i64(),
        }
    }
}

/// Current position of one account, optionally with its change log.
pub async fn get_position(
    Path(account_id): Path<i64>,
    Query(params): Query<PositionQuery>,
    State(state): State<AppState>,
) -> Result<Json<PositionResponse>, SwitchError> {
    let account_id = AccountId(account_id);
    let position = state
        .repo
        .get_position(account_id)
        .await?
        .ok_or_else(|| SwitchError::NotFound(format!("no position for account {}", account_id)))?;

    let changes = if params.include_changes.unwrap_or(false) {
        let changes = state.repo.list_position_changes(account_id).await?;
        Some(changes.iter().map(PositionChangeDto::from).collect())
    } else {
        None
    };

    Ok(Json(PositionResponse {
        account_id: account_id.as_i64(),
        value: position.value.to_canonical_string(),
        reserved_value: position.reserved_value.to_canonical_string(),
        changed_at: position.changed_at.as_i64(),
        changes,
    }))
}
