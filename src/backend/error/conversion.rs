/**
 * Error Conversion
 *
 * Conversions from `BackendError` into the two shapes a client sees:
 *
 * - an HTTP response, for the upgrade route and other plain HTTP routes
 * - a reply envelope, for requests made over a websocket channel
 *
 * # Response Format
 *
 * ```json
 * {
 *   "error": "Error message",
 *   "status": 400
 * }
 * ```
 */

use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::backend::error::types::BackendError;
use crate::shared::TransData;

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.message();

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response())
    }
}

impl BackendError {
    /// Build the error reply for `request`
    ///
    /// The reply keeps the request's type and correlation id so the client
    /// can match it.
    pub fn into_reply(self, request: &TransData) -> TransData {
        TransData::reply_to(request).with_error(self.message(), self.code())
    }
}
