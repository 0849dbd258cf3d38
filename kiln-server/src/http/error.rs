//! Single shared mapping from `KernelError` to the `{error, code}` envelope
//! (§6/§7) — handlers never construct an error body by hand.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kiln_core::KernelError;
use serde::Serialize;

pub struct ApiError(pub KernelError);

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody { error: self.0.to_string(), code: self.0.code() };
        (status, Json(body)).into_response()
    }
}

impl From<KernelError> for ApiError {
    fn from(err: KernelError) -> Self {
        Self(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
