use crate::{
    auth::AuthError,
    simulator::SimulatorError,
    store::ClientValidationError,
    webauthn::{CeremonyError, PasskeyError},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

/// Body of every JSON error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// A status code plus a message that is safe to show to the caller.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Not authenticated")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Log `err` and hide it behind a generic 500.
    pub fn internal(context: &str, err: &anyhow::Error) -> Self {
        error!("{context}: {err:#}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            success: false,
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("Request failed", &err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let status = match &err {
            AuthError::InvalidCredentials
            | AuthError::InvalidMfaCode
            | AuthError::MfaTicketExpired => StatusCode::UNAUTHORIZED,
            AuthError::AccountDisabled | AuthError::PasswordLoginDisabled => StatusCode::FORBIDDEN,
            AuthError::MfaNotEnabled
            | AuthError::PasswordMismatch
            | AuthError::MissingCredentials => StatusCode::BAD_REQUEST,
            AuthError::UsernameTaken => StatusCode::CONFLICT,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::Internal(inner) => return Self::internal("Authentication failed", inner),
        };
        Self::new(status, err.to_string())
    }
}

impl From<PasskeyError> for ApiError {
    fn from(err: PasskeyError) -> Self {
        let status = match &err {
            PasskeyError::UserNotFound => StatusCode::NOT_FOUND,
            PasskeyError::AccountDisabled => StatusCode::FORBIDDEN,
            PasskeyError::NoPasskeys | PasskeyError::NoChallenge | PasskeyError::ChallengeExpired => {
                StatusCode::BAD_REQUEST
            }
            PasskeyError::Internal(inner) => return Self::internal("Passkey ceremony failed", inner),
        };
        Self::new(status, err.to_string())
    }
}

impl From<CeremonyError> for ApiError {
    fn from(err: CeremonyError) -> Self {
        Self::bad_request(format!("Passkey verification failed: {err}"))
    }
}

impl From<ClientValidationError> for ApiError {
    fn from(err: ClientValidationError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<SimulatorError> for ApiError {
    fn from(err: SimulatorError) -> Self {
        match err {
            SimulatorError::InvalidAuthorizeUrl(_) => Self::bad_request(err.to_string()),
            // Provider answers are shown verbatim; that is the point of the simulator.
            SimulatorError::Upstream { .. }
            | SimulatorError::Transport { .. }
            | SimulatorError::InvalidResponse { .. } => {
                Self::new(StatusCode::BAD_GATEWAY, err.to_string())
            }
            SimulatorError::Internal(inner) => Self::internal("Simulation failed", &inner),
        }
    }
}
