use rust_decimal::Decimal;
use serde::Deserialize;

/// Body of `POST /api/payments/create`, matching the gateway boundary: the
/// caller supplies the order details directly.
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub order_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub part_name: String,
    pub parts_cost: Decimal,
    pub freight_cost: Decimal,
}
