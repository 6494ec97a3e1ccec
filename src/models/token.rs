use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::utils::validator::Validator;
use crate::utils::{generate_token_plaintext, hash_token};

pub const SCOPE_ACTIVATION: &str = "activation";

pub fn activation_ttl() -> Duration {
    Duration::days(3)
}

/// A token. Only the hash is persisted; the plaintext exists only in the
/// value returned at creation time.
#[derive(Debug, Clone, Serialize)]
pub struct Token {
    #[serde(rename = "token")]
    pub plaintext: String,
    #[serde(skip_serializing)]
    pub hash: Vec<u8>,
    #[serde(skip_serializing)]
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub scope: String,
}

impl Token {
    pub fn generate(user_id: i64, ttl: Duration, scope: &str) -> Self {
        let plaintext = generate_token_plaintext();
        Self {
            hash: hash_token(&plaintext),
            plaintext,
            user_id,
            expiry: Utc::now() + ttl,
            scope: scope.to_string(),
        }
    }
}

pub fn validate_token_plaintext(v: &mut Validator, plaintext: &str) {
    v.check(!plaintext.is_empty(), "token", "must be provided");
    v.check(plaintext.len() == 32, "token", "must be 32 bytes long");
}
