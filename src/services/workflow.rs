use lazy_static::lazy_static;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::database::connection::DbPool;
use crate::models::notification::{NotificationError, NotificationIntent, NotificationLog};
use crate::models::request::{
    PaymentStatus, Request, RequestError, RequestStatus, UpdateRequest,
};
use crate::services::gateway::{GatewayError, PaymentGateway, PaymentOrder, WebhookEvent};
use crate::services::notifications::WhatsAppNotifier;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Request with ID {id} not found")]
    NotFound { id: String },
    #[error("Cannot move a request from {from:?} to {to:?}")]
    InvalidTransition { from: RequestStatus, to: RequestStatus },
    #[error("parts_cost and freight_cost are required to mark a part available")]
    MissingCosts,
    #[error("Request has no payment link to send")]
    MissingPaymentLink,
    #[error("Webhook signature missing or mismatched")]
    SignatureRejected,
    #[error("Webhook references unknown order {order_id}")]
    UnknownOrder { order_id: String },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Notification(#[from] NotificationError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

lazy_static! {
    /// The forward chain plus the terminal `Not Available` branch. Anything
    /// absent here is not a legal staff-driven move.
    static ref ALLOWED_TRANSITIONS: HashMap<RequestStatus, Vec<RequestStatus>> = {
        use RequestStatus::*;
        HashMap::from([
            (Pending, vec![Available, NotAvailable]),
            (Available, vec![PaymentSent, NotAvailable]),
            (PaymentSent, vec![Paid]),
            (Paid, vec![Processing]),
            (Processing, vec![Dispatched]),
            (NotAvailable, vec![]),
            (Dispatched, vec![]),
        ])
    };
}

pub fn can_transition(from: RequestStatus, to: RequestStatus) -> bool {
    ALLOWED_TRANSITIONS
        .get(&from)
        .map(|targets| targets.contains(&to))
        .unwrap_or(false)
}

/// Whether a gateway-confirmed payment may move this request to `Paid`.
/// Requests already at or past `Paid` are handled as idempotent no-ops;
/// the dead `Not Available` branch never resurrects.
pub fn eligible_for_paid(current: RequestStatus) -> bool {
    current.rank() <= RequestStatus::PaymentSent.rank()
        && current != RequestStatus::NotAvailable
}

/// Whether the money side of this request is already resolved. A completion
/// replay for a settled request still backfills its confirmation message; a
/// late failure or expiry for a settled request changes nothing.
pub fn payment_settled(status: RequestStatus, payment_status: PaymentStatus) -> bool {
    payment_status == PaymentStatus::Paid && status != RequestStatus::NotAvailable
}

/// A staff PATCH may leave the status where it is; any change must be a
/// legal transition. Evaluated against the row-locked current state, never
/// a prior read.
fn validate_patch_status(current: RequestStatus, target: RequestStatus) -> Result<(), WorkflowError> {
    if target != current && !can_transition(current, target) {
        return Err(WorkflowError::InvalidTransition {
            from: current,
            to: target,
        });
    }
    Ok(())
}

/// Audit lines accumulate; existing notes are never replaced.
fn append_note(existing: Option<&str>, line: &str) -> String {
    match existing {
        Some(notes) if !notes.trim().is_empty() => format!("{}\n{}", notes, line),
        _ => line.to_string(),
    }
}

fn dispatch_patch(current: &Request, tracking_number: String) -> Result<UpdateRequest, WorkflowError> {
    if !can_transition(current.status, RequestStatus::Dispatched) {
        return Err(WorkflowError::InvalidTransition {
            from: current.status,
            to: RequestStatus::Dispatched,
        });
    }
    Ok(UpdateRequest {
        status: Some(RequestStatus::Dispatched),
        tracking_number: Some(tracking_number),
        whatsapp_sent: Some(true),
        // dispatched_on lands in the same locked write as the transition,
        // and only on the first dispatch.
        dispatched_on: current.dispatched_on.is_none().then(chrono::Utc::now),
        ..Default::default()
    })
}

fn manual_paid_patch(current: &Request, staff: &str) -> Result<UpdateRequest, WorkflowError> {
    if !eligible_for_paid(current.status) {
        return Err(WorkflowError::InvalidTransition {
            from: current.status,
            to: RequestStatus::Paid,
        });
    }
    let audit = format!(
        "Manually marked paid by {} at {}",
        staff,
        chrono::Utc::now().to_rfc3339()
    );
    Ok(UpdateRequest {
        status: Some(RequestStatus::Paid),
        payment_status: Some(PaymentStatus::Paid),
        notes: Some(append_note(current.notes.as_deref(), &audit)),
        ..Default::default()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Paid,
    DuplicateIgnored,
    PaymentFailed,
    SessionExpired,
    EventIgnored,
}

impl WebhookOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            WebhookOutcome::Paid => "payment confirmed",
            WebhookOutcome::DuplicateIgnored => "already processed",
            WebhookOutcome::PaymentFailed => "payment marked failed",
            WebhookOutcome::SessionExpired => "payment session expired",
            WebhookOutcome::EventIgnored => "event ignored",
        }
    }
}

/// Orchestrates every status change a request can undergo. All mutations go
/// through the request store under a row lock; the gateway and notifier are
/// collaborators, never owners of request state.
pub struct Workflow {
    pool: DbPool,
    gateway: Arc<PaymentGateway>,
    notifier: WhatsAppNotifier,
    currency: String,
}

impl Workflow {
    pub fn new(pool: DbPool, gateway: Arc<PaymentGateway>, currency: String) -> Self {
        Self {
            pool,
            gateway,
            notifier: WhatsAppNotifier::new(),
            currency,
        }
    }

    pub fn gateway(&self) -> &PaymentGateway {
        &self.gateway
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Staff verdict on whether the part can be sourced. `available` with
    /// costs opens a checkout session and stores the link; re-pricing an
    /// already-`Available` request replaces the link (the old session simply
    /// lapses, sessions are never reopened).
    pub async fn set_availability(
        &self,
        id: &str,
        available: bool,
        parts_cost: Option<Decimal>,
        freight_cost: Option<Decimal>,
    ) -> Result<Request, WorkflowError> {
        let request = Request::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound { id: id.to_string() })?;

        if !available {
            return self
                .transition(id, RequestStatus::NotAvailable, UpdateRequest::default())
                .await;
        }

        let (Some(parts_cost), Some(freight_cost)) = (parts_cost, freight_cost) else {
            return Err(WorkflowError::MissingCosts);
        };

        let repricing = request.status == RequestStatus::Available;
        if !repricing && !can_transition(request.status, RequestStatus::Available) {
            return Err(WorkflowError::InvalidTransition {
                from: request.status,
                to: RequestStatus::Available,
            });
        }

        // The gateway call happens before the row lock so a slow provider
        // never pins the request row.
        let order = PaymentOrder {
            order_id: request.request_id.clone(),
            customer_name: request.customer_name.clone(),
            customer_email: request.customer_email.clone(),
            customer_phone: request.customer_phone.clone(),
            part_name: request.part_name.clone(),
            parts_cost,
            freight_cost,
            currency: self.currency.clone(),
        };
        let session = self.gateway.create_payment(&order).await?;

        info!(
            "Opened {} session {} for request {} ({} {})",
            self.gateway.name(),
            session.payment_id,
            id,
            session.amount,
            session.currency
        );

        let patch = UpdateRequest {
            status: Some(RequestStatus::Available),
            payment_status: Some(PaymentStatus::Pending),
            price: Some(parts_cost + freight_cost),
            parts_cost: Some(parts_cost),
            freight_cost: Some(freight_cost),
            payment_link: Some(session.payment_url.clone()),
            ..Default::default()
        };

        let updated = if repricing {
            self.patch_under_lock(id, move |current| {
                if current.status != RequestStatus::Available {
                    return Err(WorkflowError::InvalidTransition {
                        from: current.status,
                        to: RequestStatus::Available,
                    });
                }
                Ok(patch)
            })
            .await?
        } else {
            self.transition(id, RequestStatus::Available, patch).await?
        };

        let message = self
            .notifier
            .render(&updated, NotificationIntent::Availability);
        NotificationLog::record(&self.pool, id, NotificationIntent::Availability, &message)
            .await?;

        Ok(updated)
    }

    /// Staff confirms the link went out to the customer.
    pub async fn send_payment_link(&self, id: &str) -> Result<Request, WorkflowError> {
        let current = Request::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound { id: id.to_string() })?;

        if current.payment_link.is_none() {
            return Err(WorkflowError::MissingPaymentLink);
        }

        let patch = UpdateRequest {
            status: Some(RequestStatus::PaymentSent),
            whatsapp_sent: Some(true),
            ..Default::default()
        };
        let updated = self.transition(id, RequestStatus::PaymentSent, patch).await?;

        let message = self
            .notifier
            .render(&updated, NotificationIntent::PaymentLink);
        NotificationLog::record(&self.pool, id, NotificationIntent::PaymentLink, &message)
            .await?;

        Ok(updated)
    }

    pub async fn start_processing(&self, id: &str) -> Result<Request, WorkflowError> {
        let patch = UpdateRequest {
            status: Some(RequestStatus::Processing),
            ..Default::default()
        };
        self.transition(id, RequestStatus::Processing, patch).await
    }

    pub async fn dispatch(
        &self,
        id: &str,
        tracking_number: &str,
    ) -> Result<Request, WorkflowError> {
        let tracking = tracking_number.to_string();
        let updated = self
            .patch_under_lock(id, move |current| dispatch_patch(current, tracking))
            .await?;

        let message = self.notifier.render(&updated, NotificationIntent::Dispatched);
        NotificationLog::record(&self.pool, id, NotificationIntent::Dispatched, &message).await?;

        Ok(updated)
    }

    /// Admin escape hatch: mark paid without a gateway event. Deliberately
    /// loud in the logs and appended to the notes so it stays auditable.
    pub async fn mark_paid_manual(&self, id: &str, staff: &str) -> Result<Request, WorkflowError> {
        warn!(
            "Manual payment override for request {} by {} without gateway confirmation",
            id, staff
        );

        let staff = staff.to_string();
        self.patch_under_lock(id, move |current| manual_paid_patch(current, &staff))
            .await
    }

    /// Staff PATCH body. Status changes are validated against the row-locked
    /// current state, so a webhook landing between a dashboard read and the
    /// patch cannot be overwritten by a stale status.
    pub async fn patch(
        &self,
        id: &str,
        patch: UpdateRequest,
        staff: &str,
    ) -> Result<Request, WorkflowError> {
        if patch.is_empty() {
            return Err(RequestError::NoUpdateFields.into());
        }

        let staff = staff.to_string();
        self.patch_under_lock(id, move |current| {
            if let Some(to) = patch.status {
                validate_patch_status(current.status, to)?;
                if to == RequestStatus::Paid && current.status != RequestStatus::Paid {
                    warn!(
                        "Staff {} manually set request {} to Paid without a gateway event",
                        staff, current.request_id
                    );
                }
            }
            Ok(patch)
        })
        .await
    }

    /// Verify, parse, and apply one gateway callback. Duplicate completions
    /// are no-ops; failures and expiries touch `payment_status` only and
    /// leave `status` for staff to progress.
    pub async fn process_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, WorkflowError> {
        let signature = signature.ok_or(WorkflowError::SignatureRejected)?;
        if !self.gateway.verify_webhook_signature(payload, signature) {
            return Err(WorkflowError::SignatureRejected);
        }

        let event = self.gateway.parse_webhook(payload)?;
        self.gateway.record_event(&event).await;

        let (order_id, outcome_on_apply) = match &event {
            WebhookEvent::Completed { order_id, .. } => (order_id.clone(), WebhookOutcome::Paid),
            WebhookEvent::Failed { order_id, .. } => {
                (order_id.clone(), WebhookOutcome::PaymentFailed)
            }
            WebhookEvent::Expired { order_id, .. } => {
                (order_id.clone(), WebhookOutcome::SessionExpired)
            }
            WebhookEvent::Ignored { event } => {
                info!("Ignoring unhandled gateway event '{}'", event);
                return Ok(WebhookOutcome::EventIgnored);
            }
        };

        let mut tx = self.pool.begin().await?;
        let request = Request::find_by_id_for_update(&mut tx, &order_id)
            .await?
            .ok_or(WorkflowError::UnknownOrder {
                order_id: order_id.clone(),
            })?;

        match outcome_on_apply {
            WebhookOutcome::Paid => {
                let outcome = if eligible_for_paid(request.status) {
                    let patch = UpdateRequest {
                        status: Some(RequestStatus::Paid),
                        payment_status: Some(PaymentStatus::Paid),
                        ..Default::default()
                    };
                    Request::apply_update(&mut *tx, &order_id, &patch).await?;
                    tx.commit().await?;

                    info!("Request {} confirmed paid by gateway webhook", order_id);
                    WebhookOutcome::Paid
                } else {
                    tx.commit().await?;
                    info!(
                        "Duplicate or late payment.completed for request {} (status {:?}), no-op",
                        order_id, request.status
                    );
                    WebhookOutcome::DuplicateIgnored
                };

                // The catch-up runs on every delivery, including replays, so
                // a crash between the Paid commit and the log on an earlier
                // attempt heals on the gateway's retry. Exactly one
                // confirmation message ever goes out.
                if outcome == WebhookOutcome::Paid
                    || payment_settled(request.status, request.payment_status)
                {
                    if !NotificationLog::already_sent(
                        &self.pool,
                        &order_id,
                        NotificationIntent::PaymentConfirmed,
                    )
                    .await?
                    {
                        let confirmed = Request::find_by_id(&self.pool, &order_id)
                            .await?
                            .ok_or(WorkflowError::UnknownOrder {
                                order_id: order_id.clone(),
                            })?;
                        let message = self
                            .notifier
                            .render(&confirmed, NotificationIntent::PaymentConfirmed);
                        NotificationLog::record(
                            &self.pool,
                            &order_id,
                            NotificationIntent::PaymentConfirmed,
                            &message,
                        )
                        .await?;
                    }
                }

                Ok(outcome)
            }
            WebhookOutcome::PaymentFailed | WebhookOutcome::SessionExpired => {
                // A superseded session can lapse long after its replacement
                // settled; a settled request keeps its paid record.
                if payment_settled(request.status, request.payment_status) {
                    tx.commit().await?;
                    info!(
                        "Ignoring {:?} for settled request {}",
                        outcome_on_apply, order_id
                    );
                    return Ok(WebhookOutcome::DuplicateIgnored);
                }

                // No status value models a failed payment; staff re-issue a
                // link from wherever the request sits.
                let patch = UpdateRequest {
                    payment_status: Some(PaymentStatus::Failed),
                    ..Default::default()
                };
                Request::apply_update(&mut *tx, &order_id, &patch).await?;
                tx.commit().await?;

                warn!(
                    "Payment for request {} reported {:?} by gateway",
                    order_id, outcome_on_apply
                );
                Ok(outcome_on_apply)
            }
            _ => unreachable!("outcome_on_apply is never a no-op variant"),
        }
    }

    /// Generic guarded transition: row-lock, check the move is legal, patch.
    async fn transition(
        &self,
        id: &str,
        to: RequestStatus,
        patch: UpdateRequest,
    ) -> Result<Request, WorkflowError> {
        self.patch_under_lock(id, move |current| {
            if !can_transition(current.status, to) {
                return Err(WorkflowError::InvalidTransition {
                    from: current.status,
                    to,
                });
            }
            Ok(patch)
        })
        .await
    }

    /// Row-lock the request, build the patch from its current state, apply,
    /// commit. Every mutation funnels through here.
    async fn patch_under_lock<F>(&self, id: &str, build_patch: F) -> Result<Request, WorkflowError>
    where
        F: FnOnce(&Request) -> Result<UpdateRequest, WorkflowError>,
    {
        let mut tx = self.pool.begin().await?;
        let current = Request::find_by_id_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound { id: id.to_string() })?;

        let patch = build_patch(&current)?;

        let updated = Request::apply_update(&mut *tx, id, &patch)
            .await?
            .ok_or_else(|| WorkflowError::NotFound { id: id.to_string() })?;
        tx.commit().await?;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestStatus::*;

    fn request_fixture(status: RequestStatus) -> Request {
        Request {
            request_id: "REQ-20250101000000-TEST".to_string(),
            customer_name: "Ada".to_string(),
            customer_email: "ada@example.com".to_string(),
            customer_phone: "+15550100".to_string(),
            vehicle_vin: "1HGCM82633A004352".to_string(),
            part_name: "alternator".to_string(),
            notes: None,
            status,
            payment_status: PaymentStatus::Pending,
            price: None,
            parts_cost: None,
            freight_cost: None,
            payment_link: None,
            whatsapp_sent: false,
            dispatched_on: None,
            tracking_number: None,
            created_at: chrono::Utc::now(),
            last_updated: chrono::Utc::now(),
        }
    }

    #[test]
    fn forward_chain_is_allowed() {
        assert!(can_transition(Pending, Available));
        assert!(can_transition(Available, PaymentSent));
        assert!(can_transition(PaymentSent, Paid));
        assert!(can_transition(Paid, Processing));
        assert!(can_transition(Processing, Dispatched));
    }

    #[test]
    fn unavailable_branch_is_allowed_from_early_states_only() {
        assert!(can_transition(Pending, NotAvailable));
        assert!(can_transition(Available, NotAvailable));
        assert!(!can_transition(PaymentSent, NotAvailable));
        assert!(!can_transition(Paid, NotAvailable));
    }

    #[test]
    fn no_reverse_transitions() {
        assert!(!can_transition(Available, Pending));
        assert!(!can_transition(Paid, PaymentSent));
        assert!(!can_transition(Dispatched, Processing));
        assert!(!can_transition(Processing, Paid));
    }

    #[test]
    fn no_skipping_ahead() {
        assert!(!can_transition(Pending, PaymentSent));
        assert!(!can_transition(Pending, Paid));
        assert!(!can_transition(Available, Paid));
        assert!(!can_transition(PaymentSent, Processing));
        assert!(!can_transition(Paid, Dispatched));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for to in [Pending, Available, NotAvailable, PaymentSent, Paid, Processing, Dispatched] {
            assert!(!can_transition(NotAvailable, to));
            assert!(!can_transition(Dispatched, to));
        }
    }

    /// Dispatched is only reachable through Processing, which is only
    /// reachable through Paid, which requires Payment Sent.
    #[test]
    fn dispatched_requires_the_full_chain() {
        let sources_of = |target: RequestStatus| -> Vec<RequestStatus> {
            [Pending, Available, NotAvailable, PaymentSent, Paid, Processing, Dispatched]
                .into_iter()
                .filter(|from| can_transition(*from, target))
                .collect()
        };

        assert_eq!(sources_of(Dispatched), vec![Processing]);
        assert_eq!(sources_of(Processing), vec![Paid]);
        assert_eq!(sources_of(Paid), vec![PaymentSent]);
    }

    #[test]
    fn paid_eligibility_covers_payment_sent_and_earlier() {
        assert!(eligible_for_paid(Pending));
        assert!(eligible_for_paid(Available));
        assert!(eligible_for_paid(PaymentSent));
    }

    #[test]
    fn paid_eligibility_excludes_resolved_and_dead_requests() {
        assert!(!eligible_for_paid(Paid));
        assert!(!eligible_for_paid(Processing));
        assert!(!eligible_for_paid(Dispatched));
        assert!(!eligible_for_paid(NotAvailable));
    }

    #[test]
    fn settled_requests_keep_their_paid_record() {
        assert!(payment_settled(Paid, PaymentStatus::Paid));
        assert!(payment_settled(Processing, PaymentStatus::Paid));
        assert!(payment_settled(Dispatched, PaymentStatus::Paid));
    }

    #[test]
    fn unsettled_and_dead_requests_are_not_settled() {
        assert!(!payment_settled(Available, PaymentStatus::Pending));
        assert!(!payment_settled(PaymentSent, PaymentStatus::Failed));
        assert!(!payment_settled(NotAvailable, PaymentStatus::Paid));
    }

    /// A dashboard patch validated against a stale read must fail once the
    /// row has moved on: Payment Sent is not a legal target for a request a
    /// concurrent webhook already confirmed Paid.
    #[test]
    fn patch_status_rejects_stale_backward_moves() {
        assert!(validate_patch_status(Paid, PaymentSent).is_err());
        assert!(validate_patch_status(Paid, Available).is_err());
        assert!(validate_patch_status(Dispatched, Processing).is_err());
    }

    #[test]
    fn patch_status_allows_noop_and_forward_moves() {
        assert!(validate_patch_status(Paid, Paid).is_ok());
        assert!(validate_patch_status(Available, PaymentSent).is_ok());
        assert!(validate_patch_status(PaymentSent, Paid).is_ok());
    }

    #[test]
    fn first_dispatch_stamps_timestamp_in_the_same_patch() {
        let current = request_fixture(Processing);
        let patch = dispatch_patch(&current, "TRK-100".to_string()).unwrap();
        assert_eq!(patch.status, Some(Dispatched));
        assert!(patch.dispatched_on.is_some());
        assert_eq!(patch.tracking_number.as_deref(), Some("TRK-100"));
    }

    #[test]
    fn redispatch_is_rejected() {
        let mut current = request_fixture(Dispatched);
        current.dispatched_on = Some(chrono::Utc::now());
        assert!(dispatch_patch(&current, "TRK-200".to_string()).is_err());
    }

    #[test]
    fn manual_paid_override_appends_to_existing_notes() {
        let mut current = request_fixture(PaymentSent);
        current.notes = Some("customer called twice".to_string());
        let patch = manual_paid_patch(&current, "ada").unwrap();
        let notes = patch.notes.unwrap();
        assert!(notes.starts_with("customer called twice\n"));
        assert!(notes.contains("Manually marked paid by ada"));
    }

    #[test]
    fn manual_paid_override_is_rejected_for_dead_requests() {
        let current = request_fixture(NotAvailable);
        assert!(manual_paid_patch(&current, "ada").is_err());
    }

    #[test]
    fn audit_note_stands_alone_without_prior_notes() {
        assert_eq!(append_note(None, "first line"), "first line");
        assert_eq!(append_note(Some("   "), "first line"), "first line");
        assert_eq!(
            append_note(Some("existing"), "new"),
            "existing\nnew"
        );
    }

    #[test]
    fn outcome_messages_are_stable() {
        assert_eq!(WebhookOutcome::DuplicateIgnored.message(), "already processed");
        assert_eq!(WebhookOutcome::Paid.message(), "payment confirmed");
    }
}
