use crate::{
    middleware::auth::AuthenticatedStaff,
    requests::payment::CreatePaymentRequest,
    services::gateway::{GatewayError, PaymentOrder, PaymentSession},
    services::notifications::WhatsAppNotifier,
    services::workflow::{WebhookOutcome, Workflow, WorkflowError},
    utils::helpers::ApiResponse,
};
use actix_web::{web, HttpRequest, HttpResponse, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Serialize)]
struct PaymentBreakdown {
    parts_cost: Decimal,
    freight_cost: Decimal,
    total: Decimal,
    currency: String,
}

#[derive(Debug, Serialize)]
struct PaymentCreated {
    payment_id: String,
    payment_url: String,
    expires_at: DateTime<Utc>,
    breakdown: PaymentBreakdown,
    whatsapp_message: String,
}

pub async fn create_payment(
    workflow: web::Data<Workflow>,
    payload: web::Json<CreatePaymentRequest>,
    staff: AuthenticatedStaff,
) -> Result<HttpResponse> {
    info!(
        "Staff {} creating payment session for order {}",
        staff.username, payload.order_id
    );

    let order = PaymentOrder {
        order_id: payload.order_id.clone(),
        customer_name: payload.customer_name.clone(),
        customer_email: payload.customer_email.clone(),
        customer_phone: payload.customer_phone.clone(),
        part_name: payload.part_name.clone(),
        parts_cost: payload.parts_cost,
        freight_cost: payload.freight_cost,
        currency: workflow.currency().to_string(),
    };

    match workflow.gateway().create_payment(&order).await {
        Ok(session) => {
            let whatsapp_message =
                WhatsAppNotifier::new().render_link_for_order(&order, &session.payment_url);
            let response = PaymentCreated {
                payment_id: session.payment_id,
                payment_url: session.payment_url,
                expires_at: session.expires_at,
                breakdown: PaymentBreakdown {
                    parts_cost: order.parts_cost,
                    freight_cost: order.freight_cost,
                    total: order.total(),
                    currency: order.currency.clone(),
                },
                whatsapp_message,
            };
            Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
        }
        Err(GatewayError::Validation(message)) => {
            Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(message)))
        }
        Err(e) => {
            // Provider detail stays in the server log.
            error!("Gateway error creating payment session: {}", e);
            Ok(HttpResponse::BadGateway().json(ApiResponse::<()>::error(
                "Payment gateway error".to_string(),
            )))
        }
    }
}

pub async fn payment_status(
    workflow: web::Data<Workflow>,
    path: web::Path<String>,
    _staff: AuthenticatedStaff,
) -> Result<HttpResponse> {
    let payment_id = path.into_inner();

    match workflow.gateway().payment_status(&payment_id).await {
        Ok(Some(session)) => {
            Ok(HttpResponse::Ok().json(ApiResponse::<PaymentSession>::success(session)))
        }
        Ok(None) => Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(
            "Payment session not found".to_string(),
        ))),
        Err(e) => {
            error!("Gateway error fetching payment {}: {}", payment_id, e);
            Ok(HttpResponse::BadGateway().json(ApiResponse::<()>::error(
                "Payment gateway error".to_string(),
            )))
        }
    }
}

/// Raw-body handler: the signature covers the exact bytes the gateway sent,
/// so no JSON extractor sits in front of it.
pub async fn webhook(
    workflow: web::Data<Workflow>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let signature = req
        .headers()
        .get("stripe-signature")
        .or_else(|| req.headers().get("x-webhook-signature"))
        .and_then(|value| value.to_str().ok());

    match workflow.process_webhook(&body, signature).await {
        Ok(outcome) => {
            if outcome == WebhookOutcome::DuplicateIgnored {
                info!("Webhook replay handled as no-op");
            }
            Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
                (),
                outcome.message().to_string(),
            )))
        }
        Err(WorkflowError::SignatureRejected) => {
            warn!("Webhook rejected: bad or missing signature");
            Ok(HttpResponse::Unauthorized().json(ApiResponse::<()>::error(
                "Invalid webhook signature".to_string(),
            )))
        }
        Err(WorkflowError::Gateway(GatewayError::MalformedWebhook(message))) => {
            warn!("Webhook rejected: malformed payload: {}", message);
            Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(
                "Malformed webhook payload".to_string(),
            )))
        }
        Err(WorkflowError::UnknownOrder { order_id }) => {
            warn!("Webhook for unknown order {}", order_id);
            Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(format!(
                "No request found for order {}",
                order_id
            ))))
        }
        Err(e) => {
            error!("Webhook processing failed: {}", e);
            Ok(HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                "Webhook processing failed".to_string(),
            )))
        }
    }
}
