//! HTTP response building helpers
//!
//! Every error body has the same shape: `{"error": <message>, "code": <tag>}`.
//! Store-level failures never reach the body; they are logged where they
//! happen and surface here as a generic internal error.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::error::QuestError;

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// Build a JSON response with 201 Created status
pub fn created<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::CREATED, body)
}

/// Build an empty response with 204 No Content status
pub fn no_content() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}

fn error_body(status: StatusCode, message: &str, code: &str) -> Response<Full<Bytes>> {
    json_response(status, &serde_json::json!({ "error": message, "code": code }))
}

/// Build a 404 Not Found response with message
pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    error_body(StatusCode::NOT_FOUND, message, "NOT_FOUND")
}

/// Build a 405 Method Not Allowed response
pub fn method_not_allowed() -> Response<Full<Bytes>> {
    error_body(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed", "METHOD_NOT_ALLOWED")
}

/// Status code for a lifecycle error
pub fn status_for(error: &QuestError) -> StatusCode {
    match error {
        QuestError::QuestNotFound | QuestError::ParticipantNotFound | QuestError::NotAParticipant => {
            StatusCode::NOT_FOUND
        }
        QuestError::Forbidden(_) => StatusCode::FORBIDDEN,
        QuestError::CannotJoinOwnQuest
        | QuestError::InvalidStatus { .. }
        | QuestError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        QuestError::AlreadyJoined | QuestError::AlreadySubmitted => StatusCode::CONFLICT,
        QuestError::Unauthenticated => StatusCode::UNAUTHORIZED,
        QuestError::MembershipUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert a QuestError to an appropriate HTTP response
pub fn error_response(error: QuestError) -> Response<Full<Bytes>> {
    let status = status_for(&error);
    let message = match &error {
        QuestError::MembershipUnavailable(_) => "Membership service unavailable".to_string(),
        e if e.is_domain() => e.to_string(),
        _ => "Internal server error".to_string(),
    };

    error_body(status, &message, error.code())
}

/// Result type alias for handlers
pub type HandlerResult = Result<Response<Full<Bytes>>, QuestError>;
