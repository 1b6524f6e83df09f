use crate::{
    models::auth::{AuthResponse, LoginRequest, StaffInfo},
    services::auth::AuthService,
    utils::helpers::ApiResponse,
};
use actix_web::{web, HttpResponse, Result};
use tracing::{error, warn};

pub async fn login(request: web::Json<LoginRequest>) -> Result<HttpResponse> {
    let auth_service = AuthService::new().map_err(|e| {
        error!("Failed to create auth service: {}", e);
        actix_web::error::ErrorInternalServerError("Authentication service error")
    })?;

    let authenticated = auth_service
        .authenticate(&request.username, &request.password)
        .map_err(|e| {
            error!("Authentication error: {}", e);
            actix_web::error::ErrorInternalServerError("Authentication error")
        })?;

    if !authenticated {
        warn!("Failed login attempt for '{}'", request.username);
        return Ok(HttpResponse::Unauthorized().json(ApiResponse::<()>::error(
            "Invalid credentials".to_string(),
        )));
    }

    let token = auth_service.generate_token(&request.username).map_err(|e| {
        error!("Failed to generate token: {}", e);
        actix_web::error::ErrorInternalServerError("Failed to generate token")
    })?;

    let response = AuthResponse {
        token,
        staff: StaffInfo {
            username: request.username.clone(),
        },
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}
