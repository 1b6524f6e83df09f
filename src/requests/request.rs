use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::request::{PaymentStatus, RequestStatus};

/// Public intake form payload.
#[derive(Debug, Deserialize)]
pub struct IntakeRequest {
    pub request_id: Option<String>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub vehicle_vin: String,
    pub part_name: String,
    pub notes: Option<String>,
}

/// Staff PATCH body, restricted to the whitelisted fields.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequestPayload {
    pub status: Option<RequestStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub price: Option<Decimal>,
    pub parts_cost: Option<Decimal>,
    pub freight_cost: Option<Decimal>,
    pub payment_link: Option<String>,
    pub notes: Option<String>,
    pub whatsapp_sent: Option<bool>,
    pub dispatched_on: Option<chrono::DateTime<chrono::Utc>>,
    pub tracking_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub available: bool,
    pub parts_cost: Option<Decimal>,
    pub freight_cost: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub tracking_number: String,
}
