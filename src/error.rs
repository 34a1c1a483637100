//! HTTP-facing error type.
//!
//! Rejections carry only the closed reason code to the client; internal detail
//! (which key, which claim) stays in the logs.
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::services::auth::filter::{ReasonCode, Rejection};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized: {0}")]
    Unauthorized(ReasonCode),
    #[error("forbidden: {0}")]
    Forbidden(ReasonCode),
    #[error("request timed out")]
    RequestTimeout,
    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(code) | AppError::Forbidden(code) => code.as_str(),
            AppError::RequestTimeout => "request_timeout",
            AppError::Internal => "internal_error",
        }
    }
}

impl From<Rejection> for AppError {
    fn from(rejection: Rejection) -> Self {
        let code = rejection.code();
        if code.is_policy_violation() {
            AppError::Forbidden(code)
        } else {
            AppError::Unauthorized(code)
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse { error: self.code() };
        let mut response = (status, Json(body)).into_response();

        // RFC 6750 challenge; no error attribute when no credentials were sent.
        if let AppError::Unauthorized(code) = self {
            let challenge = match code {
                ReasonCode::MissingToken => HeaderValue::from_static("Bearer"),
                _ => HeaderValue::from_static("Bearer error=\"invalid_token\""),
            };
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, challenge);
        }

        response
    }
}
