use std::collections::BTreeMap;

use axum::Json;
use bcrypt::{DEFAULT_COST, hash};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::result::ApiResponse;

pub mod validator;

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash(password.as_bytes(), DEFAULT_COST)
}

/// Fresh random token plaintext: 32 lowercase hex characters.
pub fn generate_token_plaintext() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn hash_token(plaintext: &str) -> Vec<u8> {
    Sha256::digest(plaintext.as_bytes()).to_vec()
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}

pub fn error_to_api_response<T>(code: i32, msg: String) -> Json<ApiResponse<T>> {
    Json(ApiResponse::error(code, msg))
}

pub fn error_with_details(
    code: i32,
    msg: String,
    details: BTreeMap<String, String>,
) -> Json<ApiResponse<BTreeMap<String, String>>> {
    Json(ApiResponse {
        code,
        msg,
        resp_data: Some(details),
    })
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const BAD_REQUEST: i32 = 1001;
    pub const METHOD_NOT_ALLOWED: i32 = 1003;
    pub const NOT_FOUND: i32 = 1004;
    pub const RATE_LIMIT: i32 = 1005;
    pub const EDIT_CONFLICT: i32 = 1006;
    pub const INTERNAL_ERROR: i32 = 5000;
}
