use crate::{database::connection::DbPool, utils::helpers::ApiResponse};
use actix_web::{web, HttpResponse, Result};
use serde_json::json;
use tracing::error;

pub async fn health(pool: web::Data<DbPool>) -> Result<HttpResponse> {
    match sqlx::query("SELECT 1").execute(pool.get_ref()).await {
        Ok(_) => Ok(HttpResponse::Ok().json(ApiResponse::success(json!({ "database": "up" })))),
        Err(e) => {
            error!("Health check database error: {}", e);
            Ok(HttpResponse::ServiceUnavailable()
                .json(ApiResponse::<()>::error("database unreachable".to_string())))
        }
    }
}
