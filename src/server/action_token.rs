//! Per-action security tokens for the cleanup endpoints.
//!
//! A token is `hex(sha256(secret ":" action))`. The admin page hands out the
//! tokens, and every mutating or polling request must echo the one for its
//! action in the `X-Action-Token` header.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

pub const ACTION_TOKEN_HEADER: &str = "x-action-token";

pub const ACTION_CLEANUP_RUN: &str = "cleanup_run";
pub const ACTION_CLEANUP_STATUS: &str = "cleanup_status";
pub const ACTION_CLEANUP_LOG: &str = "cleanup_log";
pub const ACTION_CLEANUP_SETTINGS: &str = "cleanup_settings";

pub const ALL_ACTIONS: [&str; 4] = [
    ACTION_CLEANUP_RUN,
    ACTION_CLEANUP_STATUS,
    ACTION_CLEANUP_LOG,
    ACTION_CLEANUP_SETTINGS,
];

#[derive(Clone)]
pub struct ActionTokens {
    secret: String,
}

impl std::fmt::Debug for ActionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionTokens").finish_non_exhaustive()
    }
}

impl ActionTokens {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Tokens valid for the lifetime of this process only.
    pub fn random() -> Self {
        let bytes: [u8; 32] = rand::random();
        Self::new(hex::encode(bytes))
    }

    pub fn from_config(secret: Option<&str>) -> Self {
        match secret {
            Some(secret) => Self::new(secret),
            None => Self::random(),
        }
    }

    pub fn token_for(&self, action: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b":");
        hasher.update(action.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Constant-time via SHA-256 of both sides.
    pub fn verify(&self, action: &str, provided: &str) -> bool {
        let expected = Sha256::digest(self.token_for(action).as_bytes());
        let provided = Sha256::digest(provided.as_bytes());
        expected == provided
    }

    /// Check the `X-Action-Token` header of a request.
    pub fn verify_headers(&self, action: &str, headers: &HeaderMap) -> bool {
        headers
            .get(ACTION_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|provided| self.verify(action, provided))
    }
}
