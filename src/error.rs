// Error types for the escrow client

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failures talking to the escrow ledger node
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("RPC error: {message} ({code})")]
    Rpc { code: i64, message: String },
    #[error("no result in RPC response")]
    EmptyResult,
    #[error("ABI decode failed for {context}: {reason}")]
    Decode { context: String, reason: String },
}

impl LedgerError {
    pub fn decode(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        LedgerError::Decode {
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures reported by the wallet capability
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    /// The user declined or the bridge returned an error code
    #[error("{0}")]
    Rejected(String),
    #[error("unexpected wallet response: {0}")]
    InvalidResponse(String),
    #[error("transaction {0} still pending")]
    StillPending(String),
}

/// Sign-in failures, surfaced as one outcome with the reason attached
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication failed: nonce mismatch: {0}")]
    NonceMismatch(String),
    #[error("authentication failed: signature rejected: {0}")]
    SignatureRejected(String),
    #[error("authentication failed: verification failed: {0}")]
    VerificationFailed(String),
    #[error("authentication failed: auth service unreachable: {0}")]
    Unreachable(String),
    #[error("authentication failed: session not saved: {0}")]
    Storage(#[from] StoreError),
}

/// Reasons a signed sign-in message is not accepted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SiweError {
    #[error("malformed sign-in message: {0}")]
    Malformed(String),
    #[error("invalid signature encoding: {0}")]
    BadSignature(String),
    #[error("nonce in message does not match")]
    NonceMismatch,
    #[error("message expired")]
    Expired,
    #[error("signer does not match message address")]
    SignerMismatch,
}

impl SiweError {
    /// Failures meaning "well-formed but not a valid sign-in"
    pub fn is_invalid_signature(&self) -> bool {
        matches!(self, SiweError::SignerMismatch | SiweError::Expired)
    }
}

/// Attestation object missing a field the claim call requires
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed proof: {field} {problem}")]
pub struct MalformedProofError {
    pub field: String,
    pub problem: String,
}

impl MalformedProofError {
    pub fn missing(field: &str) -> Self {
        Self {
            field: field.to_string(),
            problem: "is missing".to_string(),
        }
    }

    pub fn invalid(field: &str, problem: impl std::fmt::Display) -> Self {
        Self {
            field: field.to_string(),
            problem: format!("is invalid: {}", problem),
        }
    }
}

/// Failures of user-initiated ledger calls
#[derive(Debug, Error)]
pub enum ActionError {
    /// Blocked locally, no network call was made
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    MalformedProof(#[from] MalformedProofError),
    #[error("Transaction failed: {0}")]
    LedgerRejection(String),
    #[error("no authenticated identity")]
    NotAuthenticated,
}

impl ActionError {
    pub fn validation(message: impl Into<String>) -> Self {
        ActionError::Validation(message.into())
    }
}

impl From<WalletError> for ActionError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::Rejected(code) => ActionError::LedgerRejection(code),
            other => ActionError::LedgerRejection(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by the local HTTP API
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    BadGateway(String),
    #[error("{0}")]
    Internal(String),
}

impl From<ActionError> for ApiError {
    fn from(e: ActionError) -> Self {
        match e {
            ActionError::Validation(_) | ActionError::MalformedProof(_) => {
                ApiError::BadRequest(e.to_string())
            }
            ActionError::NotAuthenticated => ApiError::Unauthorized(e.to_string()),
            ActionError::LedgerRejection(_) => ApiError::BadGateway(e.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Storage(_) => ApiError::Internal(e.to_string()),
            AuthError::Unreachable(_) => ApiError::BadGateway(e.to_string()),
            _ => ApiError::Unauthorized(e.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_share_one_outcome() {
        let errors = [
            AuthError::NonceMismatch("Invalid nonce".into()),
            AuthError::SignatureRejected("user declined".into()),
            AuthError::VerificationFailed("Invalid signature".into()),
            AuthError::Unreachable("connection refused".into()),
        ];
        for e in errors {
            assert!(e.to_string().starts_with("authentication failed"));
        }
    }

    #[test]
    fn test_wallet_rejection_becomes_ledger_rejection() {
        let err: ActionError = WalletError::Rejected("simulation_failed".into()).into();
        assert_eq!(err.to_string(), "Transaction failed: simulation_failed");
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let resp = ApiError::from(ActionError::Validation("amount required".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
