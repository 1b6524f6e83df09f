use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::services::gateway::{
    CreatedSession, GatewayError, PaymentOrder, PaymentSession, SessionStatus, WebhookEvent,
    SESSION_TTL_HOURS,
};

type HmacSha256 = Hmac<Sha256>;

/// Wire envelope the sandbox gateway posts to the webhook endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct SandboxWebhookPayload {
    pub event: String,
    pub payment_id: String,
    pub order_id: String,
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
}

/// In-memory stand-in for a real checkout provider. Deterministic on purpose:
/// the settlement outcome is a pure function of the payment_id, so tests
/// reproduce without fixtures.
pub struct SandboxGateway {
    sessions: RwLock<HashMap<String, PaymentSession>>,
    webhook_secret: Option<String>,
    base_url: String,
    skip_verification: bool,
    counter: AtomicU64,
}

impl SandboxGateway {
    pub fn new(base_url: String, webhook_secret: Option<String>) -> Self {
        if webhook_secret.is_none() {
            warn!("Sandbox gateway has no webhook secret, all webhooks will be rejected");
        }
        Self {
            sessions: RwLock::new(HashMap::new()),
            webhook_secret,
            base_url,
            skip_verification: false,
            counter: AtomicU64::new(0),
        }
    }

    /// TEST ONLY: accepts unsigned webhooks. Never reachable from
    /// `AppConfig`; exists so unit tests can exercise the pipeline without
    /// threading a secret through every fixture.
    #[cfg(test)]
    pub fn unsigned_for_tests(base_url: String) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            webhook_secret: None,
            base_url,
            skip_verification: true,
            counter: AtomicU64::new(0),
        }
    }

    pub async fn create_payment(
        &self,
        order: &PaymentOrder,
    ) -> Result<CreatedSession, GatewayError> {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let digest = Sha256::digest(order.order_id.as_bytes());
        let payment_id = format!("pay_{}{:02}", hex::encode(&digest[..6]), seq);

        let now = Utc::now();
        let session = PaymentSession {
            payment_id: payment_id.clone(),
            order_id: order.order_id.clone(),
            amount: order.total(),
            currency: order.currency.clone(),
            status: SessionStatus::Pending,
            payment_url: format!("{}/sandbox/checkout/{}", self.base_url, payment_id),
            created_at: now,
            expires_at: now + Duration::hours(SESSION_TTL_HOURS),
        };

        let created = CreatedSession {
            payment_id: session.payment_id.clone(),
            payment_url: session.payment_url.clone(),
            amount: session.amount,
            currency: session.currency.clone(),
            expires_at: session.expires_at,
        };

        self.sessions
            .write()
            .await
            .insert(payment_id.clone(), session);

        info!("Sandbox session {} created for order {}", payment_id, order.order_id);
        Ok(created)
    }

    pub async fn payment_status(
        &self,
        payment_id: &str,
    ) -> Result<Option<PaymentSession>, GatewayError> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(payment_id) else {
            return Ok(None);
        };

        // Normalize lapsed sessions in place so the stored copy agrees with
        // what callers were told.
        if session.effective_status(now) == SessionStatus::Expired {
            session.status = SessionStatus::Expired;
        }

        Ok(Some(session.clone()))
    }

    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        if self.skip_verification {
            warn!("Sandbox gateway accepting webhook WITHOUT signature verification (test mode)");
            return true;
        }

        let Some(secret) = self.webhook_secret.as_deref() else {
            return false;
        };

        let Some(expected) = sign_payload(secret, payload) else {
            return false;
        };

        let expected_bytes = expected.as_bytes();
        let provided_bytes = signature.as_bytes();
        if expected_bytes.len() != provided_bytes.len() {
            return false;
        }

        expected_bytes.ct_eq(provided_bytes).into()
    }

    pub fn parse_webhook(&self, payload: &[u8]) -> Result<WebhookEvent, GatewayError> {
        let parsed: SandboxWebhookPayload = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::MalformedWebhook(e.to_string()))?;

        let event = match parsed.event.as_str() {
            "payment.completed" => WebhookEvent::Completed {
                payment_id: parsed.payment_id,
                order_id: parsed.order_id,
            },
            "payment.failed" => WebhookEvent::Failed {
                payment_id: parsed.payment_id,
                order_id: parsed.order_id,
            },
            "payment.expired" => WebhookEvent::Expired {
                payment_id: parsed.payment_id,
                order_id: parsed.order_id,
            },
            other => WebhookEvent::Ignored {
                event: other.to_string(),
            },
        };

        Ok(event)
    }

    /// Bring the stored session in line with a verified event. Resolved
    /// sessions are never reopened; a late or contradictory event for one is
    /// dropped here.
    pub async fn record_event(&self, event: &WebhookEvent) {
        let (payment_id, status) = match event {
            WebhookEvent::Completed { payment_id, .. } => (payment_id, SessionStatus::Completed),
            WebhookEvent::Failed { payment_id, .. } => (payment_id, SessionStatus::Failed),
            WebhookEvent::Expired { payment_id, .. } => (payment_id, SessionStatus::Expired),
            WebhookEvent::Ignored { .. } => return,
        };

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(payment_id) {
            if session.status == SessionStatus::Pending {
                session.status = status;
            }
        }
    }

    /// Deterministic settlement: the byte sum of the payment_id decides the
    /// outcome, completed roughly nine times out of ten.
    pub fn settlement_outcome(payment_id: &str) -> SessionStatus {
        let sum: u64 = payment_id.bytes().map(u64::from).sum();
        if sum % 10 == 0 {
            SessionStatus::Failed
        } else {
            SessionStatus::Completed
        }
    }

    /// Simulate the customer finishing checkout: resolves the session by the
    /// deterministic outcome and returns the signed webhook the real provider
    /// would deliver. `None` when the session is unknown or already resolved.
    pub async fn settle(&self, payment_id: &str) -> Option<(Vec<u8>, Option<String>)> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(payment_id)?;
        if session.status != SessionStatus::Pending {
            return None;
        }

        let outcome = Self::settlement_outcome(payment_id);
        session.status = outcome;

        let event = match outcome {
            SessionStatus::Completed => "payment.completed",
            SessionStatus::Failed => "payment.failed",
            _ => unreachable!("settlement only completes or fails"),
        };

        let payload = SandboxWebhookPayload {
            event: event.to_string(),
            payment_id: session.payment_id.clone(),
            order_id: session.order_id.clone(),
            status: match outcome {
                SessionStatus::Completed => "completed".to_string(),
                _ => "failed".to_string(),
            },
            amount: session.amount,
            currency: session.currency.clone(),
        };

        let body = serde_json::to_vec(&payload).ok()?;
        let signature = self
            .webhook_secret
            .as_deref()
            .and_then(|secret| sign_payload(secret, &body));

        Some((body, signature))
    }
}

pub fn sign_payload(secret: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> PaymentOrder {
        PaymentOrder {
            order_id: "REQ-20250101120000-ABCD".to_string(),
            customer_name: "Asha Verma".to_string(),
            customer_email: "asha@example.com".to_string(),
            customer_phone: "+971500000001".to_string(),
            part_name: "Front brake caliper".to_string(),
            parts_cost: Decimal::new(10000, 2),
            freight_cost: Decimal::new(5000, 2),
            currency: "usd".to_string(),
        }
    }

    fn signed_gateway() -> SandboxGateway {
        SandboxGateway::new(
            "http://localhost:8080".to_string(),
            Some("whsec_sandbox_test".to_string()),
        )
    }

    #[tokio::test]
    async fn created_session_url_contains_payment_id() {
        let gw = signed_gateway();
        let created = gw.create_payment(&order()).await.unwrap();
        assert!(created.payment_url.contains(&created.payment_id));
        assert_eq!(created.amount, Decimal::new(15000, 2));
    }

    #[tokio::test]
    async fn repeat_sessions_for_same_order_get_distinct_ids() {
        let gw = signed_gateway();
        let first = gw.create_payment(&order()).await.unwrap();
        let second = gw.create_payment(&order()).await.unwrap();
        assert_ne!(first.payment_id, second.payment_id);
    }

    #[tokio::test]
    async fn status_lookup_normalizes_expiry() {
        let gw = signed_gateway();
        let created = gw.create_payment(&order()).await.unwrap();

        {
            let mut sessions = gw.sessions.write().await;
            let session = sessions.get_mut(&created.payment_id).unwrap();
            session.expires_at = Utc::now() - Duration::hours(1);
        }

        let session = gw.payment_status(&created.payment_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Expired);

        // Stored copy was normalized too.
        let again = gw.payment_status(&created.payment_id).await.unwrap().unwrap();
        assert_eq!(again.status, SessionStatus::Expired);
    }

    #[tokio::test]
    async fn unknown_payment_id_is_none() {
        let gw = signed_gateway();
        assert!(gw.payment_status("pay_missing").await.unwrap().is_none());
    }

    #[test]
    fn signature_round_trip() {
        let gw = signed_gateway();
        let payload = br#"{"event":"payment.completed"}"#;
        let sig = sign_payload("whsec_sandbox_test", payload).unwrap();
        assert!(gw.verify_webhook_signature(payload, &sig));
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let gw = signed_gateway();
        let payload = br#"{"event":"payment.completed"}"#;
        assert!(!gw.verify_webhook_signature(payload, "wrong-signature"));
        let other = sign_payload("a-different-secret", payload).unwrap();
        assert!(!gw.verify_webhook_signature(payload, &other));
    }

    #[test]
    fn unsigned_test_gateway_accepts_anything() {
        let gw = SandboxGateway::unsigned_for_tests("http://localhost:8080".to_string());
        assert!(gw.verify_webhook_signature(b"{}", "whatever"));
    }

    #[test]
    fn missing_secret_rejects_everything() {
        let gw = SandboxGateway::new("http://localhost:8080".to_string(), None);
        let payload = br#"{"event":"payment.completed"}"#;
        let sig = sign_payload("whsec_sandbox_test", payload).unwrap();
        assert!(!gw.verify_webhook_signature(payload, &sig));
    }

    #[test]
    fn unknown_events_are_ignored_not_errors() {
        let gw = signed_gateway();
        let payload = serde_json::to_vec(&SandboxWebhookPayload {
            event: "payment.refunded".to_string(),
            payment_id: "pay_x".to_string(),
            order_id: "REQ-1".to_string(),
            status: "refunded".to_string(),
            amount: Decimal::new(15000, 2),
            currency: "usd".to_string(),
        })
        .unwrap();

        let event = gw.parse_webhook(&payload).unwrap();
        assert_eq!(
            event,
            WebhookEvent::Ignored {
                event: "payment.refunded".to_string()
            }
        );
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let gw = signed_gateway();
        assert!(matches!(
            gw.parse_webhook(b"not json"),
            Err(GatewayError::MalformedWebhook(_))
        ));
    }

    #[test]
    fn settlement_outcome_is_deterministic() {
        let a = SandboxGateway::settlement_outcome("pay_abc123");
        let b = SandboxGateway::settlement_outcome("pay_abc123");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn settle_resolves_once() {
        let gw = signed_gateway();
        let created = gw.create_payment(&order()).await.unwrap();

        let first = gw.settle(&created.payment_id).await;
        assert!(first.is_some());
        let (body, signature) = first.unwrap();
        assert!(signature.is_some());
        assert!(gw.verify_webhook_signature(&body, signature.as_deref().unwrap()));

        // Already resolved, never reopened.
        assert!(gw.settle(&created.payment_id).await.is_none());
    }

    /// Create for 100 + 50, deliver a signed payment.completed, and the
    /// session reads completed with amount 150.
    #[tokio::test]
    async fn checkout_scenario_completes_with_summed_amount() {
        let gw = signed_gateway();
        let created = gw.create_payment(&order()).await.unwrap();
        assert_eq!(created.amount, Decimal::new(15000, 2));

        let payload = SandboxWebhookPayload {
            event: "payment.completed".to_string(),
            payment_id: created.payment_id.clone(),
            order_id: "REQ-20250101120000-ABCD".to_string(),
            status: "completed".to_string(),
            amount: created.amount,
            currency: "usd".to_string(),
        };
        let body = serde_json::to_vec(&payload).unwrap();
        let signature = sign_payload("whsec_sandbox_test", &body).unwrap();
        assert!(gw.verify_webhook_signature(&body, &signature));

        let event = gw.parse_webhook(&body).unwrap();
        gw.record_event(&event).await;

        let session = gw.payment_status(&created.payment_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.amount, Decimal::new(15000, 2));
    }

    #[tokio::test]
    async fn record_event_does_not_reopen_resolved_sessions() {
        let gw = signed_gateway();
        let created = gw.create_payment(&order()).await.unwrap();

        gw.record_event(&WebhookEvent::Completed {
            payment_id: created.payment_id.clone(),
            order_id: "REQ-20250101120000-ABCD".to_string(),
        })
        .await;

        gw.record_event(&WebhookEvent::Failed {
            payment_id: created.payment_id.clone(),
            order_id: "REQ-20250101120000-ABCD".to_string(),
        })
        .await;

        let session = gw.payment_status(&created.payment_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }
}
