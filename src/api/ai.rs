use super::{ApiError, ApiResult, AppState, JsonBody};
use crate::ai::{AiRequest, AiResponse, DispatchError};
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde_json::json;

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        let message = e.to_string();
        match e {
            DispatchError::UnsupportedModel(_) => Self::new(
                StatusCode::BAD_REQUEST,
                json!({"status": "error", "message": message}),
            ),
            DispatchError::AllModelsFailed { last_error } => Self::internal(json!({
                "status": "error",
                "message": message,
                "error": last_error,
            })),
        }
    }
}

pub(super) async fn answer(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<AiRequest>,
) -> ApiResult<Json<AiResponse>> {
    let ai_response = state.dispatcher.answer(&request).await?;
    Ok(Json(AiResponse { ai_response }))
}
