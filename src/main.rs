use actix_cors::Cors;
use actix_web::{http, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use spares_portal::config::{AppConfig, GatewaySettings};
use spares_portal::database::connection::establish_pool;
use spares_portal::routes;
use spares_portal::services::gateway::PaymentGateway;
use spares_portal::services::sandbox::SandboxGateway;
use spares_portal::services::stripe::StripeGateway;
use spares_portal::services::workflow::Workflow;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let pool = establish_pool()
        .await
        .context("failed to connect to the database")?;

    let gateway = match &config.gateway {
        GatewaySettings::Stripe(settings) => PaymentGateway::Stripe(StripeGateway::new(
            settings.secret_key.clone(),
            settings.webhook_secret.clone(),
            config.base_url.clone(),
        )),
        GatewaySettings::Sandbox { webhook_secret } => PaymentGateway::Sandbox(
            SandboxGateway::new(config.base_url.clone(), webhook_secret.clone()),
        ),
    };
    info!("Payment gateway: {}", gateway.name());

    let workflow = web::Data::new(Workflow::new(
        pool.clone(),
        Arc::new(gateway),
        config.currency.clone(),
    ));
    let pool_data = web::Data::new(pool);

    let bind_addr = config.bind_addr.clone();
    let cors_origin = config.cors_origin.clone();
    info!("Starting server on {}", bind_addr);

    HttpServer::new(move || {
        let cors = match cors_origin.as_deref() {
            Some(origin) => Cors::default()
                .allowed_origin(origin)
                .allowed_methods(vec!["GET", "POST", "PATCH", "DELETE"])
                .allowed_headers(vec![http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
                .max_age(3600),
            None => Cors::permissive(),
        };

        App::new()
            .wrap(cors)
            .app_data(pool_data.clone())
            .app_data(workflow.clone())
            .service(web::scope("/api").configure(routes::api::scoped_config))
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    Ok(())
}
