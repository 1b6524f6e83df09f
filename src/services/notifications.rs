use rust_decimal::Decimal;

use crate::models::notification::NotificationIntent;
use crate::models::request::Request;
use crate::services::gateway::PaymentOrder;

/// Renders customer-facing WhatsApp text for a workflow milestone. Delivery
/// over the messaging channel is an external collaborator; this service's
/// contract ends at the final message string.
pub struct WhatsAppNotifier;

impl WhatsAppNotifier {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, request: &Request, intent: NotificationIntent) -> String {
        match intent {
            NotificationIntent::Availability => self.render_availability(request),
            NotificationIntent::PaymentLink => self.render_payment_link(request),
            NotificationIntent::PaymentConfirmed => self.render_payment_confirmed(request),
            NotificationIntent::Dispatched => self.render_dispatched(request),
        }
    }

    fn render_availability(&self, request: &Request) -> String {
        format!(
            "Hi {}! Good news - your requested part \"{}\" is available.\n\n\
             Parts: {}\nFreight: {}\nTotal: {}\n\n\
             Reference: {}",
            request.customer_name,
            request.part_name,
            format_amount(request.parts_cost),
            format_amount(request.freight_cost),
            format_amount(request.price),
            request.request_id,
        )
    }

    fn render_payment_link(&self, request: &Request) -> String {
        format!(
            "Hi {}! Your payment for \"{}\" (total {}) is ready.\n\n\
             Pay securely here: {}\n\n\
             The link is valid for 24 hours. Reference: {}",
            request.customer_name,
            request.part_name,
            format_amount(request.price),
            request.payment_link.as_deref().unwrap_or("-"),
            request.request_id,
        )
    }

    fn render_payment_confirmed(&self, request: &Request) -> String {
        format!(
            "Hi {}! We received your payment of {} for \"{}\".\n\n\
             We'll start preparing your order right away. Reference: {}",
            request.customer_name,
            format_amount(request.price),
            request.part_name,
            request.request_id,
        )
    }

    /// Variant used by the standalone payment-create endpoint, where the
    /// order details arrive in the request body instead of the store.
    pub fn render_link_for_order(&self, order: &PaymentOrder, payment_url: &str) -> String {
        format!(
            "Hi {}! Your payment for \"{}\" (total {:.2} {}) is ready.\n\n\
             Pay securely here: {}\n\n\
             The link is valid for 24 hours. Reference: {}",
            order.customer_name,
            order.part_name,
            order.total(),
            order.currency,
            payment_url,
            order.order_id,
        )
    }

    fn render_dispatched(&self, request: &Request) -> String {
        format!(
            "Hi {}! Your part \"{}\" has been dispatched.\n\n\
             Tracking number: {}\n\n\
             Thank you for your order! Reference: {}",
            request.customer_name,
            request.part_name,
            request.tracking_number.as_deref().unwrap_or("-"),
            request.request_id,
        )
    }
}

impl Default for WhatsAppNotifier {
    fn default() -> Self {
        Self::new()
    }
}

fn format_amount(amount: Option<Decimal>) -> String {
    match amount {
        Some(value) => format!("{:.2}", value),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::{PaymentStatus, RequestStatus};
    use chrono::Utc;

    fn request() -> Request {
        Request {
            request_id: "REQ-20250101120000-ABCD".to_string(),
            customer_name: "Asha Verma".to_string(),
            customer_email: "asha@example.com".to_string(),
            customer_phone: "+971500000001".to_string(),
            vehicle_vin: "WDB1234567890".to_string(),
            part_name: "Front brake caliper".to_string(),
            notes: None,
            status: RequestStatus::Available,
            payment_status: PaymentStatus::Pending,
            price: Some(Decimal::new(15000, 2)),
            parts_cost: Some(Decimal::new(10000, 2)),
            freight_cost: Some(Decimal::new(5000, 2)),
            payment_link: Some("https://pay.example/pay_abc".to_string()),
            whatsapp_sent: false,
            dispatched_on: None,
            tracking_number: Some("TRK-991".to_string()),
            created_at: Utc::now(),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn availability_message_carries_breakdown() {
        let msg = WhatsAppNotifier::new().render(&request(), NotificationIntent::Availability);
        assert!(msg.contains("Asha Verma"));
        assert!(msg.contains("Front brake caliper"));
        assert!(msg.contains("100.00"));
        assert!(msg.contains("50.00"));
        assert!(msg.contains("150.00"));
    }

    #[test]
    fn payment_link_message_carries_the_url() {
        let msg = WhatsAppNotifier::new().render(&request(), NotificationIntent::PaymentLink);
        assert!(msg.contains("https://pay.example/pay_abc"));
        assert!(msg.contains("150.00"));
    }

    #[test]
    fn confirmation_message_carries_amount_and_reference() {
        let msg =
            WhatsAppNotifier::new().render(&request(), NotificationIntent::PaymentConfirmed);
        assert!(msg.contains("150.00"));
        assert!(msg.contains("REQ-20250101120000-ABCD"));
    }

    #[test]
    fn dispatch_message_carries_tracking_number() {
        let msg = WhatsAppNotifier::new().render(&request(), NotificationIntent::Dispatched);
        assert!(msg.contains("TRK-991"));
    }

    #[test]
    fn missing_amounts_render_placeholders() {
        let mut req = request();
        req.price = None;
        req.payment_link = None;
        let msg = WhatsAppNotifier::new().render(&req, NotificationIntent::PaymentLink);
        assert!(msg.contains("total -"));
        assert!(!msg.contains("https://"));
    }
}
