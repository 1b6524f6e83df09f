use actix_web::{dev::Payload, error::ErrorUnauthorized, Error, FromRequest, HttpRequest};
use futures_util::future::{ready, Ready};
use std::env;
use tracing::warn;

use crate::services::auth::AuthService;

/// Extractor guarding the staff dashboard surface. Expects
/// `Authorization: Bearer <jwt>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedStaff {
    pub username: String,
}

impl FromRequest for AuthenticatedStaff {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let token = req
            .headers()
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        let Some(token) = token else {
            return ready(Err(ErrorUnauthorized("Missing bearer token")));
        };

        let Ok(jwt_secret) = env::var("JWT_SECRET") else {
            warn!("JWT_SECRET not configured, rejecting staff request");
            return ready(Err(ErrorUnauthorized("Authentication unavailable")));
        };

        match AuthService::verify_token(token, &jwt_secret) {
            Ok(claims) => ready(Ok(AuthenticatedStaff {
                username: claims.sub,
            })),
            Err(e) => {
                warn!("Rejected staff token: {}", e);
                ready(Err(ErrorUnauthorized("Invalid or expired token")))
            }
        }
    }
}
