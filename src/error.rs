use axum::extract::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;

/// Coarse classification used by callers to branch on contention vs. permanent failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    RideAlreadyTaken,
    RideNotFound,
    BidNotFound,
    InvalidTransition,
    StaleBid,
    InvalidInput,
    Unauthorized,
    Timeout,
    Config,
    Database,
    Upstream,
    Unexpected,
}

#[derive(Clone, Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: i32,
    pub message: String,
}

impl Error {
    fn new(kind: ErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn ride_already_taken() -> Self {
        Self::new(ErrorKind::RideAlreadyTaken, 100, "ride already taken")
    }

    pub fn ride_not_found() -> Self {
        Self::new(ErrorKind::RideNotFound, 101, "ride no longer available")
    }

    pub fn bid_not_found() -> Self {
        Self::new(ErrorKind::BidNotFound, 102, "bid no longer available")
    }

    pub fn invalid_transition(detail: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidTransition,
            103,
            format!("invalid transition: {}", detail),
        )
    }

    pub fn stale_bid() -> Self {
        Self::new(
            ErrorKind::StaleBid,
            104,
            "ride is no longer open for bids; bid was recorded but will not be matched",
        )
    }

    pub fn invalid_input(detail: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidInput,
            105,
            format!("invalid input: {}", detail),
        )
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized, 106, "unauthorized")
    }

    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout, 107, "operation timed out")
    }

    pub fn config(detail: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::Config,
            1,
            format!("configuration error: {}", detail),
        )
    }

    pub fn database(detail: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Database, 2, format!("database error: {}", detail))
    }

    pub fn upstream(detail: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Upstream, 3, format!("upstream error: {}", detail))
    }

    pub fn unexpected(detail: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::Unexpected,
            4,
            format!("unexpected error: {}", detail),
        )
    }

    pub fn is_ride_already_taken(&self) -> bool {
        self.kind == ErrorKind::RideAlreadyTaken
    }

    pub fn is_invalid_transition(&self) -> bool {
        self.kind == ErrorKind::InvalidTransition
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::RideNotFound | ErrorKind::BidNotFound)
    }

    /// Infrastructure failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Database | ErrorKind::Upstream)
    }

    fn status_code(&self) -> StatusCode {
        match self.kind {
            ErrorKind::RideAlreadyTaken | ErrorKind::InvalidTransition | ErrorKind::StaleBid => {
                StatusCode::CONFLICT
            }
            ErrorKind::RideNotFound | ErrorKind::BidNotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Config
            | ErrorKind::Database
            | ErrorKind::Upstream
            | ErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::database(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::upstream(err)
    }
}

impl From<oso::OsoError> for Error {
    fn from(err: oso::OsoError) -> Self {
        Error::unexpected(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::unexpected(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::config(err)
    }
}

impl From<std::env::VarError> for Error {
    fn from(err: std::env::VarError) -> Self {
        Error::config(err)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_message = match self.code {
            1..=99 => "Internal Server Error".to_string(),
            _ => self.message,
        };

        let body = Json(json!({
            "code": self.code,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
