// =============================================================================
// API Error Envelope
// =============================================================================
//
// Every failed request answers the same shape:
//
//   { "success": false, "error": <short>, "message": <detail>, ["ticker"] }
//
// Status mapping: validation → 400, missing chain/spot → 404, upstream 404
// → 404, every other vendor failure (401 included — no retry loop) → 500,
// uncaught → 500.
// =============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::gex::GexError;
use crate::vendor::VendorError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    NotFound {
        message: String,
        ticker: Option<String>,
    },

    #[error(transparent)]
    Vendor(#[from] VendorError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Vendor(VendorError::NotFound) => StatusCode::NOT_FOUND,
            Self::Vendor(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn short(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Bad Request",
            Self::NotFound { .. } | Self::Vendor(VendorError::NotFound) => "Not Found",
            Self::Vendor(_) => "Upstream Error",
            Self::Internal(_) => "Internal Server Error",
        }
    }
}

impl From<GexError> for ApiError {
    fn from(err: GexError) -> Self {
        match err {
            GexError::EmptyChain => Self::NotFound {
                message: "no options chain available for this ticker".to_string(),
                ticker: None,
            },
            GexError::NoSpot => Self::NotFound {
                message: "spot price could not be determined for this ticker".to_string(),
                ticker: None,
            },
            GexError::Vendor(e) => Self::Vendor(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }

        let mut body = json!({
            "success": false,
            "error": self.short(),
            "message": self.to_string(),
        });
        if let Self::NotFound {
            ticker: Some(ticker),
            ..
        } = &self
        {
            body["ticker"] = json!(ticker);
        }

        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound {
                message: "x".into(),
                ticker: None
            }
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Vendor(VendorError::Unauthorized).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Vendor(VendorError::NotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Vendor(VendorError::RateLimited).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn gex_errors_are_404_shaped() {
        assert_eq!(
            ApiError::from(GexError::EmptyChain).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(GexError::NoSpot).status(),
            StatusCode::NOT_FOUND
        );
    }
}
