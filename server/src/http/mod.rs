use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::photo::PhotoError;
use common::tagger::TaggerError;

pub mod api;
pub mod auth;
pub mod svc;

// malformed requests caught by the http layer itself
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{0}")]
    BadRequest(String),
}

// adapted from https://github.com/tokio-rs/axum/blob/main/examples/anyhow-error-response/src/main.rs
//
// the services hand back anyhow errors; the typed ones underneath pick the
// status code and everything else is an internal error
pub struct AppError(anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        if let Some(err) = self.0.downcast_ref::<PhotoError>() {
            return match err {
                PhotoError::NotFound => StatusCode::NOT_FOUND,
                PhotoError::Forbidden => StatusCode::FORBIDDEN,
                PhotoError::UnsupportedImage(_) => StatusCode::BAD_REQUEST,
            };
        }

        if let Some(err) = self.0.downcast_ref::<TaggerError>() {
            return match err {
                TaggerError::Disabled | TaggerError::NotConfigured(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                TaggerError::Image(_) | TaggerError::Provider(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
        }

        if self.0.downcast_ref::<RequestError>().is_some() {
            return StatusCode::BAD_REQUEST;
        }

        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let status = self.status();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!({ error = %self.0 }, "request failed");
            format!("internal server error: {}", self.0)
        } else {
            self.0.to_string()
        };

        (status, Json(ErrorResponse { message })).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: impl Into<anyhow::Error>) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn typed_errors_pick_status() {
        assert_eq!(status_of(PhotoError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_of(PhotoError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(PhotoError::UnsupportedImage(String::from("bad"))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(TaggerError::Disabled),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(TaggerError::NotConfigured(String::from("no key"))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(TaggerError::Provider(String::from("500"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(RequestError::BadRequest(String::from("no file"))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(anyhow::Error::msg("disk on fire")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
