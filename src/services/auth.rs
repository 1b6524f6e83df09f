use bcrypt::verify;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use std::env;
use thiserror::Error;

use crate::models::auth::Claims;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Auth configuration error: {0}")]
    Config(String),
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("Password verification error: {0}")]
    Password(#[from] bcrypt::BcryptError),
}

/// Staff auth against env-configured credentials. There is no user table;
/// the dashboard has a single operator login.
pub struct AuthService {
    jwt_secret: String,
    staff_username: String,
    staff_password_hash: String,
}

impl AuthService {
    pub fn new() -> Result<Self, AuthError> {
        Ok(Self {
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| AuthError::Config("JWT_SECRET not set".to_string()))?,
            staff_username: env::var("STAFF_USERNAME")
                .map_err(|_| AuthError::Config("STAFF_USERNAME not set".to_string()))?,
            staff_password_hash: env::var("STAFF_PASSWORD_HASH")
                .map_err(|_| AuthError::Config("STAFF_PASSWORD_HASH not set".to_string()))?,
        })
    }

    pub fn authenticate(&self, username: &str, password: &str) -> Result<bool, AuthError> {
        if username != self.staff_username {
            return Ok(false);
        }
        Ok(verify(password, &self.staff_password_hash)?)
    }

    pub fn generate_token(&self, username: &str) -> Result<String, AuthError> {
        let claims = Claims::new(username.to_string());
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?;
        Ok(token)
    }

    pub fn verify_token(token: &str, jwt_secret: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(jwt_secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }
}
