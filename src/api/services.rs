use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use std::time::Duration;

use super::error::ApiError;
use super::models::{
    CreateOperationRequest, CreateQueueRequest, CreateQueueResponse, HealthResponse,
    ListOperationsQuery, PeekQuery, ReceiveRequest, SendMessageRequest, SendMessageResponse,
    UpdateStatusRequest,
};
use super::state::AppState;
use crate::config::MAX_WAIT_TIME_SECS;
use crate::ledger::{LedgerError, OperationStore};
use crate::queue::{BrokerClient, QueueAttributes, RedrivePolicy};

pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn create_queue(
    State(state): State<AppState>,
    Json(request): Json<CreateQueueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let queue_id = state
        .broker
        .create_queue(&request.name, request.attributes)
        .await?;
    Ok((StatusCode::CREATED, Json(CreateQueueResponse { queue_id })))
}

pub async fn queue_info(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.broker.queue_info(&name).await?))
}

pub async fn set_attributes(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(attributes): Json<QueueAttributes>,
) -> Result<impl IntoResponse, ApiError> {
    state.broker.set_queue_attributes(&name, attributes).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_redrive_policy(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(policy): Json<RedrivePolicy>,
) -> Result<impl IntoResponse, ApiError> {
    state.broker.set_redrive_policy(&name, policy).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn queue_depth(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.broker.depth(&name).await?))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message_id = state.broker.send(&name, request.body).await?;
    Ok((StatusCode::CREATED, Json(SendMessageResponse { message_id })))
}

pub async fn receive_messages(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ReceiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let wait = Duration::from_millis(request.wait_ms)
        .min(Duration::from_secs(MAX_WAIT_TIME_SECS));
    let messages = state
        .broker
        .receive(&name, request.max_messages, wait)
        .await?;
    Ok(Json(messages))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path((name, receipt)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state.broker.delete(&name, &receipt).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn peek_messages(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<PeekQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.broker.peek(&name, query.limit).await?))
}

pub async fn create_operation(
    State(state): State<AppState>,
    Json(request): Json<CreateOperationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let operation = state
        .store
        .create(&request.user_id, request.job_type, request.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(operation)))
}

pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.store.get(&id).await? {
        Some(operation) => Ok(Json(operation)),
        None => Err(LedgerError::OperationNotFound(id).into()),
    }
}

pub async fn update_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let operation = state
        .store
        .update_status(&id, request.status, request.metadata)
        .await?;
    Ok(Json(operation))
}

/// Newest first; a user filter lists only that user's operations
pub async fn list_operations(
    State(state): State<AppState>,
    Query(query): Query<ListOperationsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut operations = match &query.user {
        Some(user) => {
            let mut owned = state.store.list_by_user(user)?;
            owned.reverse();
            owned
        }
        None => state.store.recent(query.limit)?,
    };
    operations.truncate(query.limit);
    Ok(Json(operations))
}
