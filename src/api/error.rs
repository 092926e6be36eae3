//! Error-to-response mapping for the Read API, in the same shape as the
//! teacher's transport-layer error: each variant knows its own status code
//! and body, and nothing else in the handler needs to think about HTTP.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::dto::ErrorResponse;

#[derive(Debug)]
pub enum ApiError {
    /// The symbol isn't in the allow-list at all.
    UnknownSymbol,
    /// The symbol is allow-listed but hasn't finished its first bootstrap.
    NotInitialized,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::UnknownSymbol => (StatusCode::NOT_FOUND, "Símbolo no monitoreado"),
            ApiError::NotInitialized => (StatusCode::SERVICE_UNAVAILABLE, "Order book aún no inicializado"),
        };
        (status, Json(ErrorResponse { error: error.to_string() })).into_response()
    }
}
