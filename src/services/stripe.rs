use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::services::gateway::{
    CreatedSession, GatewayError, PaymentOrder, PaymentSession, SessionStatus, WebhookEvent,
    SESSION_TTL_HOURS,
};

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Stripe reports webhook age in its signature header; anything older than
/// this is treated as a replay.
const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    id: String,
    url: Option<String>,
    status: Option<String>,
    payment_status: Option<String>,
    amount_total: Option<i64>,
    currency: Option<String>,
    created: Option<i64>,
    expires_at: Option<i64>,
    #[serde(default)]
    metadata: CheckoutMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct CheckoutMetadata {
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeWebhookEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WebhookCheckoutSession {
    id: String,
    payment_status: Option<String>,
    #[serde(default)]
    metadata: CheckoutMetadata,
}

/// Checkout-session backed gateway. Amounts cross the wire in minor units;
/// everywhere else they stay decimal currency units.
pub struct StripeGateway {
    client: Client,
    secret_key: String,
    webhook_secret: String,
    base_url: String,
}

impl StripeGateway {
    pub fn new(secret_key: String, webhook_secret: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            secret_key,
            webhook_secret,
            base_url,
        }
    }

    pub async fn create_payment(
        &self,
        order: &PaymentOrder,
    ) -> Result<CreatedSession, GatewayError> {
        let unit_amount = to_minor_units(order.total())?;
        let expires_at = Utc::now() + Duration::hours(SESSION_TTL_HOURS);

        let success_url = format!("{}/payment/success?order_id={}", self.base_url, order.order_id);
        let cancel_url = format!("{}/payment/cancelled?order_id={}", self.base_url, order.order_id);
        let unit_amount_str = unit_amount.to_string();
        let expires_at_str = expires_at.timestamp().to_string();

        let response = self
            .client
            .post(format!("{}/checkout/sessions", STRIPE_API_BASE))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&[
                ("mode", "payment"),
                ("success_url", success_url.as_str()),
                ("cancel_url", cancel_url.as_str()),
                ("customer_email", order.customer_email.as_str()),
                ("expires_at", expires_at_str.as_str()),
                ("line_items[0][price_data][currency]", order.currency.as_str()),
                ("line_items[0][price_data][product_data][name]", order.part_name.as_str()),
                ("line_items[0][price_data][unit_amount]", unit_amount_str.as_str()),
                ("line_items[0][quantity]", "1"),
                ("metadata[order_id]", order.order_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::Api(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("Stripe API error: {}", error_text)));
        }

        let session: CheckoutSessionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Api(format!("Failed to parse Stripe response: {}", e)))?;

        let payment_url = session
            .url
            .ok_or_else(|| GatewayError::Api("Stripe session has no checkout URL".to_string()))?;

        Ok(CreatedSession {
            payment_id: session.id,
            payment_url,
            amount: order.total(),
            currency: order.currency.clone(),
            expires_at: session
                .expires_at
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
                .unwrap_or(expires_at),
        })
    }

    pub async fn payment_status(
        &self,
        payment_id: &str,
    ) -> Result<Option<PaymentSession>, GatewayError> {
        let response = self
            .client
            .get(format!("{}/checkout/sessions/{}", STRIPE_API_BASE, payment_id))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| GatewayError::Api(format!("Stripe API error: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("Stripe API error: {}", error_text)));
        }

        let raw: CheckoutSessionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Api(format!("Failed to parse Stripe response: {}", e)))?;

        Ok(Some(map_checkout_session(raw)))
    }

    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_stripe_signature(&self.webhook_secret, payload, signature, Utc::now())
    }

    pub fn parse_webhook(&self, payload: &[u8]) -> Result<WebhookEvent, GatewayError> {
        parse_stripe_webhook(payload)
    }
}

/// Decimal currency units to the gateway's minor units. Only the wire
/// boundary sees minor units.
pub fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| GatewayError::Validation(format!("amount {} out of range", amount)))
}

fn from_minor_units(amount: i64) -> Decimal {
    Decimal::new(amount, 2)
}

fn map_checkout_session(raw: CheckoutSessionResponse) -> PaymentSession {
    let now = Utc::now();
    let created_at = raw
        .created
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or(now);
    let expires_at = raw
        .expires_at
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or(created_at + Duration::hours(SESSION_TTL_HOURS));

    // Stripe vocabulary onto the canonical four statuses.
    let status = match (raw.status.as_deref(), raw.payment_status.as_deref()) {
        (Some("complete"), Some("paid")) => SessionStatus::Completed,
        (Some("complete"), _) => SessionStatus::Pending,
        (Some("expired"), _) => SessionStatus::Expired,
        _ => SessionStatus::Pending,
    };

    let session = PaymentSession {
        payment_id: raw.id,
        order_id: raw.metadata.order_id.unwrap_or_default(),
        amount: raw.amount_total.map(from_minor_units).unwrap_or_default(),
        currency: raw.currency.unwrap_or_default(),
        status,
        payment_url: raw.url.unwrap_or_default(),
        created_at,
        expires_at,
    };

    // Lapsed-but-still-"open" sessions read as expired.
    PaymentSession {
        status: session.effective_status(now),
        ..session
    }
}

fn verify_stripe_signature(
    webhook_secret: &str,
    payload: &[u8],
    signature: &str,
    now: DateTime<Utc>,
) -> bool {
    if webhook_secret.is_empty() {
        return false;
    }

    // Stripe signature format: t=timestamp,v1=signature
    let mut timestamp = None;
    let mut sig_v1 = None;
    for part in signature.split(',') {
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(s) = part.strip_prefix("v1=") {
            sig_v1 = Some(s);
        }
    }

    let (Some(timestamp_str), Some(sig_v1)) = (timestamp, sig_v1) else {
        return false;
    };

    let Ok(timestamp) = timestamp_str.parse::<i64>() else {
        return false;
    };

    let age = now.timestamp() - timestamp;
    if age > WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
        warn!("Stripe webhook rejected: timestamp too old (age={}s)", age);
        return false;
    }
    if age < -60 {
        warn!("Stripe webhook rejected: timestamp in the future (age={}s)", age);
        return false;
    }

    let signed_payload = format!("{}.{}", timestamp_str, String::from_utf8_lossy(payload));

    let Ok(mut mac) = HmacSha256::new_from_slice(webhook_secret.as_bytes()) else {
        return false;
    };
    mac.update(signed_payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    let expected_bytes = expected.as_bytes();
    let provided_bytes = sig_v1.as_bytes();
    if expected_bytes.len() != provided_bytes.len() {
        return false;
    }

    expected_bytes.ct_eq(provided_bytes).into()
}

fn parse_stripe_webhook(payload: &[u8]) -> Result<WebhookEvent, GatewayError> {
    let envelope: StripeWebhookEnvelope = serde_json::from_slice(payload)
        .map_err(|e| GatewayError::MalformedWebhook(e.to_string()))?;

    let canonical = match envelope.event_type.as_str() {
        "checkout.session.completed" => Some(SessionStatus::Completed),
        "checkout.session.async_payment_failed" => Some(SessionStatus::Failed),
        "checkout.session.expired" => Some(SessionStatus::Expired),
        _ => None,
    };

    let Some(outcome) = canonical else {
        return Ok(WebhookEvent::Ignored {
            event: envelope.event_type,
        });
    };

    let session: WebhookCheckoutSession = serde_json::from_value(envelope.data.object)
        .map_err(|e| GatewayError::MalformedWebhook(e.to_string()))?;

    // A completed session that isn't actually paid yet settles later via
    // async_payment events.
    if outcome == SessionStatus::Completed && session.payment_status.as_deref() != Some("paid") {
        return Ok(WebhookEvent::Ignored {
            event: envelope.event_type,
        });
    }

    let order_id = session.metadata.order_id.ok_or_else(|| {
        GatewayError::MalformedWebhook("checkout session has no order_id metadata".to_string())
    })?;

    let event = match outcome {
        SessionStatus::Completed => WebhookEvent::Completed {
            payment_id: session.id,
            order_id,
        },
        SessionStatus::Failed => WebhookEvent::Failed {
            payment_id: session.id,
            order_id,
        },
        SessionStatus::Expired => WebhookEvent::Expired {
            payment_id: session.id,
            order_id,
        },
        SessionStatus::Pending => unreachable!(),
    };

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_convert_to_minor_units() {
        assert_eq!(to_minor_units(Decimal::new(15000, 2)).unwrap(), 15000);
        assert_eq!(to_minor_units(Decimal::new(1, 0)).unwrap(), 100);
        assert_eq!(to_minor_units(Decimal::new(9999, 4)).unwrap(), 100);
    }

    fn signed_header(secret: &str, payload: &[u8], ts: i64) -> String {
        let signed = format!("{}.{}", ts, String::from_utf8_lossy(payload));
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(signed.as_bytes());
        format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_verifies() {
        let now = Utc::now();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = signed_header("whsec_test", payload, now.timestamp());
        assert!(verify_stripe_signature("whsec_test", payload, &header, now));
    }

    #[test]
    fn stale_signature_is_rejected() {
        let now = Utc::now();
        let payload = br#"{}"#;
        let header = signed_header("whsec_test", payload, now.timestamp() - 600);
        assert!(!verify_stripe_signature("whsec_test", payload, &header, now));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let now = Utc::now();
        let header = signed_header("whsec_test", b"original", now.timestamp());
        assert!(!verify_stripe_signature("whsec_test", b"tampered", &header, now));
    }

    #[test]
    fn malformed_header_is_rejected() {
        let now = Utc::now();
        assert!(!verify_stripe_signature("whsec_test", b"{}", "v1=deadbeef", now));
        assert!(!verify_stripe_signature("whsec_test", b"{}", "", now));
    }

    fn completed_payload(payment_status: &str, with_order: bool) -> Vec<u8> {
        let metadata = if with_order {
            serde_json::json!({ "order_id": "REQ-20250101120000-ABCD" })
        } else {
            serde_json::json!({})
        };
        serde_json::to_vec(&serde_json::json!({
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_123",
                "payment_status": payment_status,
                "metadata": metadata,
            }}
        }))
        .unwrap()
    }

    #[test]
    fn completed_event_maps_to_canonical() {
        let event = parse_stripe_webhook(&completed_payload("paid", true)).unwrap();
        assert_eq!(
            event,
            WebhookEvent::Completed {
                payment_id: "cs_test_123".to_string(),
                order_id: "REQ-20250101120000-ABCD".to_string(),
            }
        );
    }

    #[test]
    fn unpaid_completed_event_is_ignored() {
        let event = parse_stripe_webhook(&completed_payload("unpaid", true)).unwrap();
        assert!(matches!(event, WebhookEvent::Ignored { .. }));
    }

    #[test]
    fn missing_order_metadata_is_malformed() {
        assert!(matches!(
            parse_stripe_webhook(&completed_payload("paid", false)),
            Err(GatewayError::MalformedWebhook(_))
        ));
    }

    #[test]
    fn unknown_event_type_is_ignored() {
        let payload = serde_json::to_vec(&serde_json::json!({
            "type": "invoice.paid",
            "data": { "object": {} }
        }))
        .unwrap();
        let event = parse_stripe_webhook(&payload).unwrap();
        assert_eq!(
            event,
            WebhookEvent::Ignored {
                event: "invoice.paid".to_string()
            }
        );
    }

    #[test]
    fn expired_event_maps_to_canonical() {
        let payload = serde_json::to_vec(&serde_json::json!({
            "type": "checkout.session.expired",
            "data": { "object": {
                "id": "cs_test_123",
                "payment_status": "unpaid",
                "metadata": { "order_id": "REQ-1" },
            }}
        }))
        .unwrap();
        let event = parse_stripe_webhook(&payload).unwrap();
        assert_eq!(
            event,
            WebhookEvent::Expired {
                payment_id: "cs_test_123".to_string(),
                order_id: "REQ-1".to_string(),
            }
        );
    }
}
