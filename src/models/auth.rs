use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub staff: StaffInfo,
}

#[derive(Debug, Serialize)]
pub struct StaffInfo {
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64, // expiration time
    pub iat: i64, // issued at
}

impl Claims {
    pub fn new(username: String) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: username,
            exp: now + (24 * 60 * 60), // 24 hours
            iat: now,
        }
    }
}
