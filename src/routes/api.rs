use actix_web::{web, HttpResponse};

use crate::handlers;

pub fn scoped_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .service(web::resource("/login").route(web::post().to(handlers::auth::login))),
    )
    .service(
        web::scope("/requests")
            .service(
                web::resource("")
                    .route(web::post().to(handlers::requests::create))
                    .route(web::get().to(handlers::requests::list))
                    .route(web::head().to(HttpResponse::MethodNotAllowed)),
            )
            .service(
                web::resource("/{id}")
                    .route(web::get().to(handlers::requests::get_request))
                    .route(web::patch().to(handlers::requests::update))
                    .route(web::delete().to(handlers::requests::delete)),
            )
            .service(
                web::resource("/{id}/availability")
                    .route(web::post().to(handlers::requests::set_availability)),
            )
            .service(
                web::resource("/{id}/send-link")
                    .route(web::post().to(handlers::requests::send_payment_link)),
            )
            .service(
                web::resource("/{id}/process")
                    .route(web::post().to(handlers::requests::start_processing)),
            )
            .service(
                web::resource("/{id}/dispatch")
                    .route(web::post().to(handlers::requests::dispatch)),
            )
            .service(
                web::resource("/{id}/mark-paid")
                    .route(web::post().to(handlers::requests::mark_paid)),
            )
            .service(
                web::resource("/{id}/notifications")
                    .route(web::get().to(handlers::requests::notifications)),
            ),
    )
    .service(
        web::scope("/payments")
            .service(
                web::resource("/create")
                    .route(web::post().to(handlers::payments::create_payment)),
            )
            .service(
                web::resource("/status/{payment_id}")
                    .route(web::get().to(handlers::payments::payment_status)),
            )
            .service(
                web::resource("/webhook").route(web::post().to(handlers::payments::webhook)),
            ),
    )
    .service(web::resource("/health").route(web::get().to(handlers::health::health)));
}
