use super::{ApiError, ApiResult, AppState, QueryParams};
use crate::address::{self, Address, AddressList};
use crate::error::Error;
use crate::export::{self, DOWNLOAD_NAME};
use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::error;

#[derive(Deserialize)]
pub(super) struct AddressQuery {
    query_address: String,
}

#[derive(Deserialize)]
pub(super) struct AddressIdQuery {
    address_id: String,
}

#[derive(Deserialize)]
pub(super) struct TerritoryQuery {
    territory_id: String,
}

/// Misses are logged by the lookup itself.
fn log_failure(e: &Error, what: &str) {
    if !matches!(e, Error::NotFound(_)) {
        error!("{what} failed: {e}");
    }
}

pub(super) async fn all_users(State(state): State<AppState>) -> ApiResult<Response> {
    let file = export::export_users(state.json_store.as_ref(), &state.redis, &state.export_dir)
        .await
        .map_err(|e| {
            error!("user export failed: {e}");
            ApiError::internal(e.to_string())
        })?;

    let disposition = format!("attachment; filename=\"{DOWNLOAD_NAME}\"");
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.contents,
    )
        .into_response())
}

pub(super) async fn addresses(
    State(state): State<AppState>,
    QueryParams(q): QueryParams<AddressQuery>,
) -> ApiResult<Json<AddressList>> {
    let list = address::search_addresses(state.json_store.as_ref(), &state.redis, &q.query_address)
        .await
        .inspect_err(|e| log_failure(e, "address search"))?;
    Ok(Json(list))
}

pub(super) async fn address_by_id(
    State(state): State<AppState>,
    QueryParams(q): QueryParams<AddressIdQuery>,
) -> ApiResult<Json<Address>> {
    let address = address::address_by_id(state.json_store.as_ref(), &state.redis, &q.address_id)
        .await
        .inspect_err(|e| log_failure(e, "address lookup"))?;
    Ok(Json(address))
}

pub(super) async fn tariffs(
    State(state): State<AppState>,
    QueryParams(q): QueryParams<TerritoryQuery>,
) -> ApiResult<Json<Value>> {
    let tariffs = address::tariffs(state.json_store.as_ref(), &state.redis, &q.territory_id)
        .await
        .inspect_err(|e| log_failure(e, "tariff lookup"))?;
    Ok(Json(tariffs))
}
