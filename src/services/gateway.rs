use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::sandbox::SandboxGateway;
use crate::services::stripe::StripeGateway;

/// Sessions expire this long after creation; an unused link simply lapses and
/// staff issue a fresh one.
pub const SESSION_TTL_HOURS: i64 = 24;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid payment order: {0}")]
    Validation(String),
    #[error("Gateway API error: {0}")]
    Api(String),
    #[error("Malformed webhook payload: {0}")]
    MalformedWebhook(String),
}

/// Everything a gateway needs to open a checkout for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub order_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub part_name: String,
    pub parts_cost: Decimal,
    pub freight_cost: Decimal,
    pub currency: String,
}

impl PaymentOrder {
    pub fn total(&self) -> Decimal {
        self.parts_cost + self.freight_cost
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.order_id.trim().is_empty() {
            return Err(GatewayError::Validation("order_id is required".to_string()));
        }
        if self.currency.trim().is_empty() {
            return Err(GatewayError::Validation("currency is required".to_string()));
        }
        if self.parts_cost < Decimal::ZERO || self.freight_cost < Decimal::ZERO {
            return Err(GatewayError::Validation(
                "parts_cost and freight_cost must be non-negative".to_string(),
            ));
        }
        if self.total() <= Decimal::ZERO {
            return Err(GatewayError::Validation(
                "total amount must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

/// A single checkout attempt as the gateway sees it. Owned by the adapter,
/// never written by the request store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub payment_id: String,
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: SessionStatus,
    pub payment_url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PaymentSession {
    /// Canonical view of the status: a pending session whose expiry has
    /// passed reports `Expired` no matter what the gateway last recorded.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SessionStatus {
        if self.status == SessionStatus::Pending && self.expires_at < now {
            SessionStatus::Expired
        } else {
            self.status
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedSession {
    pub payment_id: String,
    pub payment_url: String,
    pub amount: Decimal,
    pub currency: String,
    pub expires_at: DateTime<Utc>,
}

/// Gateway-native events mapped onto a canonical vocabulary. Unknown event
/// types become `Ignored` and are logged, never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    Completed { payment_id: String, order_id: String },
    Failed { payment_id: String, order_id: String },
    Expired { payment_id: String, order_id: String },
    Ignored { event: String },
}

/// Two-variant gateway selected once at startup. The rest of the system only
/// sees this type.
pub enum PaymentGateway {
    Stripe(StripeGateway),
    Sandbox(SandboxGateway),
}

impl PaymentGateway {
    pub fn name(&self) -> &'static str {
        match self {
            PaymentGateway::Stripe(_) => "stripe",
            PaymentGateway::Sandbox(_) => "sandbox",
        }
    }

    pub async fn create_payment(
        &self,
        order: &PaymentOrder,
    ) -> Result<CreatedSession, GatewayError> {
        order.validate()?;
        match self {
            PaymentGateway::Stripe(gw) => gw.create_payment(order).await,
            PaymentGateway::Sandbox(gw) => gw.create_payment(order).await,
        }
    }

    pub async fn payment_status(
        &self,
        payment_id: &str,
    ) -> Result<Option<PaymentSession>, GatewayError> {
        match self {
            PaymentGateway::Stripe(gw) => gw.payment_status(payment_id).await,
            PaymentGateway::Sandbox(gw) => gw.payment_status(payment_id).await,
        }
    }

    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        match self {
            PaymentGateway::Stripe(gw) => gw.verify_webhook_signature(payload, signature),
            PaymentGateway::Sandbox(gw) => gw.verify_webhook_signature(payload, signature),
        }
    }

    pub fn parse_webhook(&self, payload: &[u8]) -> Result<WebhookEvent, GatewayError> {
        match self {
            PaymentGateway::Stripe(gw) => gw.parse_webhook(payload),
            PaymentGateway::Sandbox(gw) => gw.parse_webhook(payload),
        }
    }

    /// Lets the adapter bring its own session bookkeeping in line with a
    /// verified event. Stripe is its own source of truth, so only the sandbox
    /// does anything here.
    pub async fn record_event(&self, event: &WebhookEvent) {
        if let PaymentGateway::Sandbox(gw) = self {
            gw.record_event(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn order(parts: Decimal, freight: Decimal) -> PaymentOrder {
        PaymentOrder {
            order_id: "REQ-20250101120000-ABCD".to_string(),
            customer_name: "Asha Verma".to_string(),
            customer_email: "asha@example.com".to_string(),
            customer_phone: "+971500000001".to_string(),
            part_name: "Front brake caliper".to_string(),
            parts_cost: parts,
            freight_cost: freight,
            currency: "usd".to_string(),
        }
    }

    #[test]
    fn order_total_is_parts_plus_freight() {
        let o = order(Decimal::new(10000, 2), Decimal::new(5000, 2));
        assert_eq!(o.total(), Decimal::new(15000, 2));
    }

    #[test]
    fn validation_rejects_zero_total() {
        let o = order(Decimal::ZERO, Decimal::ZERO);
        assert!(matches!(o.validate(), Err(GatewayError::Validation(_))));
    }

    #[test]
    fn validation_rejects_negative_costs() {
        let o = order(Decimal::new(-100, 2), Decimal::new(5000, 2));
        assert!(matches!(o.validate(), Err(GatewayError::Validation(_))));
    }

    #[test]
    fn validation_accepts_free_freight() {
        let o = order(Decimal::new(10000, 2), Decimal::ZERO);
        assert!(o.validate().is_ok());
    }

    #[test]
    fn pending_session_past_expiry_reads_expired() {
        let now = Utc::now();
        let session = PaymentSession {
            payment_id: "pay_x".to_string(),
            order_id: "REQ-1".to_string(),
            amount: Decimal::new(15000, 2),
            currency: "usd".to_string(),
            status: SessionStatus::Pending,
            payment_url: "https://pay.example/pay_x".to_string(),
            created_at: now - Duration::hours(25),
            expires_at: now - Duration::hours(1),
        };
        assert_eq!(session.effective_status(now), SessionStatus::Expired);
    }

    #[test]
    fn resolved_session_keeps_its_status_past_expiry() {
        let now = Utc::now();
        let session = PaymentSession {
            payment_id: "pay_x".to_string(),
            order_id: "REQ-1".to_string(),
            amount: Decimal::new(15000, 2),
            currency: "usd".to_string(),
            status: SessionStatus::Completed,
            payment_url: "https://pay.example/pay_x".to_string(),
            created_at: now - Duration::hours(30),
            expires_at: now - Duration::hours(6),
        };
        assert_eq!(session.effective_status(now), SessionStatus::Completed);
    }
}
