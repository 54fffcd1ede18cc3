use super::{ApiError, ApiResult, AppState, JsonBody, PathParam};
use crate::error::Error;
use crate::frida::{self, AuthResponse, HashesRequest, LogEntry, StatusResponse, UserData};
use crate::store::{Admin, HistoryEntry, NewTopic, TopicText};
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde_json::{Value, json};
use tracing::error;

const INTERNAL: &str = "Internal server error";

/// Store failures are logged here and hidden from the client.
fn internal(what: &'static str) -> impl FnOnce(Error) -> ApiError {
    move |e| {
        error!("{what} failed: {e}");
        ApiError::internal(INTERNAL)
    }
}

pub(super) async fn auth(
    State(state): State<AppState>,
    JsonBody(user): JsonBody<UserData>,
) -> ApiResult<Json<AuthResponse>> {
    match frida::authenticate(&state.employees, state.frida_store.as_ref(), &user)
        .await
        .map_err(internal("authentication"))?
    {
        Ok(resp) => Ok(Json(resp)),
        Err(denied) => Err(ApiError::new(StatusCode::FORBIDDEN, denied.to_string())),
    }
}

pub(super) async fn admins(State(state): State<AppState>) -> ApiResult<Json<Vec<Admin>>> {
    let admins = state.frida_store.admins().await.map_err(|e| {
        error!("fetching admins failed: {e}");
        ApiError::internal("Failed to fetch administrators")
    })?;
    Ok(Json(admins))
}

pub(super) async fn is_admin(
    State(state): State<AppState>,
    PathParam(user_id): PathParam<i64>,
) -> ApiResult<Json<Value>> {
    let is_admin = state
        .frida_store
        .is_admin(user_id)
        .await
        .map_err(internal("admin check"))?;
    Ok(Json(json!({"user_id": user_id, "is_admin": is_admin})))
}

pub(super) async fn log(
    State(state): State<AppState>,
    JsonBody(entry): JsonBody<LogEntry>,
) -> ApiResult<Json<StatusResponse>> {
    let resp = frida::log_message(state.frida_store.as_ref(), entry)
        .await
        .map_err(internal("message logging"))?;
    Ok(Json(resp))
}

pub(super) async fn history(
    State(state): State<AppState>,
    PathParam(user_id): PathParam<i64>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    let history = state
        .frida_store
        .history(user_id)
        .await
        .map_err(internal("history fetch"))?;
    Ok(Json(history))
}

pub(super) async fn add_topic(
    State(state): State<AppState>,
    JsonBody(topic): JsonBody<NewTopic>,
) -> ApiResult<Json<StatusResponse>> {
    let resp = frida::add_topic(state.frida_store.as_ref(), &topic)
        .await
        .map_err(internal("topic insert"))?;
    Ok(Json(resp))
}

pub(super) async fn topic_count(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let count = state
        .frida_store
        .topic_count()
        .await
        .map_err(internal("topic count"))?;
    Ok(Json(json!({"count": count})))
}

pub(super) async fn lookup_topics(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<HashesRequest>,
) -> ApiResult<Json<Vec<TopicText>>> {
    let topics = state
        .frida_store
        .topics_by_hashes(&req.hashes)
        .await
        .map_err(internal("topic lookup"))?;
    Ok(Json(topics))
}

pub(super) async fn delete_topics(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<HashesRequest>,
) -> ApiResult<Json<Value>> {
    let deleted = state
        .frida_store
        .delete_topics(&req.hashes)
        .await
        .map_err(internal("topic delete"))?;
    Ok(Json(json!({"deleted": deleted})))
}
