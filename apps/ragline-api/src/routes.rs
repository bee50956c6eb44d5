use axum::{
	Json, Router,
	extract::{State, rejection::JsonRejection},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};

use ragline_domain::{AnswerResult, DocumentUpdated, Scope};
use ragline_service::Error as ServiceError;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
	pub query: String,
	pub scope: Scope,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentUpdatedResponse {
	pub removed: usize,
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/answer", post(answer))
		.route("/v1/events/document-updated", post(document_updated))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn answer(
	State(state): State<AppState>,
	payload: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<Json<AnswerResult>, ApiError> {
	let Json(payload) = payload?;
	let result = state.service.answer(&payload.query, &payload.scope).await?;

	Ok(Json(result))
}

async fn document_updated(
	State(state): State<AppState>,
	payload: Result<Json<DocumentUpdated>, JsonRejection>,
) -> Result<Json<DocumentUpdatedResponse>, ApiError> {
	let Json(event) = payload?;
	let removed = state.service.document_updated(&event);

	Ok(Json(DocumentUpdatedResponse { removed }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
	pub error_code: String,
	pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: &'static str,
	message: String,
}
impl ApiError {
	fn new(status: StatusCode, error_code: &'static str, message: impl Into<String>) -> Self {
		Self { status, error_code, message: message.into() }
	}
}
impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		match err {
			ServiceError::InvalidScope { message } =>
				Self::new(StatusCode::BAD_REQUEST, "INVALID_SCOPE", message),
			ServiceError::InvalidRequest { message } =>
				Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message),
			ServiceError::RetrievalUnavailable { .. } | ServiceError::ServiceUnavailable { .. } => {
				tracing::error!(error = %err, "Answer service unavailable.");

				Self::new(
					StatusCode::SERVICE_UNAVAILABLE,
					"SERVICE_UNAVAILABLE",
					"The knowledge base is temporarily unreachable. Try again later.",
				)
			},
			ServiceError::Timeout { deadline_ms } => Self::new(
				StatusCode::GATEWAY_TIMEOUT,
				"TIMEOUT",
				format!("The answer took longer than {deadline_ms} ms. Try again."),
			),
			ServiceError::GenerationFailed { .. } => {
				tracing::error!(error = %err, "Answer generation failed.");

				Self::new(
					StatusCode::BAD_GATEWAY,
					"GENERATION_FAILED",
					"The answer could not be generated. Try again later.",
				)
			},
			ServiceError::Provider { .. } | ServiceError::Storage { .. } => {
				tracing::error!(error = %err, "Unexpected collaborator error.");

				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "Internal error.")
			},
		}
	}
}
impl From<JsonRejection> for ApiError {
	fn from(err: JsonRejection) -> Self {
		Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", err.body_text())
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code.to_string(), message: self.message };

		(self.status, Json(body)).into_response()
	}
}
