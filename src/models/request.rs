use crate::database::connection::DbPool;
use crate::utils::helpers::generate_request_id;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Postgres, QueryBuilder, Type};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Request with ID {id} not found")]
    NotFound { id: String },
    #[error("Request with ID {id} already exists")]
    DuplicateId { id: String },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("No fields provided for update")]
    NoUpdateFields,
    #[error("Could not allocate a unique request ID")]
    IdExhausted,
}

/// Workflow position of a request. Forward-only, except the
/// `Not Available` side branch which is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "request_status", rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Available,
    #[serde(rename = "Not Available")]
    NotAvailable,
    #[serde(rename = "Payment Sent")]
    PaymentSent,
    Paid,
    Processing,
    Dispatched,
}

impl RequestStatus {
    /// Position along the forward chain. `Not Available` sits beside
    /// `Available` and never advances.
    pub fn rank(&self) -> u8 {
        match self {
            RequestStatus::Pending => 0,
            RequestStatus::Available | RequestStatus::NotAvailable => 1,
            RequestStatus::PaymentSent => 2,
            RequestStatus::Paid => 3,
            RequestStatus::Processing => 4,
            RequestStatus::Dispatched => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::NotAvailable | RequestStatus::Dispatched)
    }
}

impl FromStr for RequestStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(RequestStatus::Pending),
            "Available" => Ok(RequestStatus::Available),
            "Not Available" => Ok(RequestStatus::NotAvailable),
            "Payment Sent" => Ok(RequestStatus::PaymentSent),
            "Paid" => Ok(RequestStatus::Paid),
            "Processing" => Ok(RequestStatus::Processing),
            "Dispatched" => Ok(RequestStatus::Dispatched),
            _ => Err(()),
        }
    }
}

/// The gateway's view of the money, tracked independently of `status`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl FromStr for PaymentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PaymentStatus::Pending),
            "Paid" => Ok(PaymentStatus::Paid),
            "Failed" => Ok(PaymentStatus::Failed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Request {
    pub request_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub vehicle_vin: String,
    pub part_name: String,
    pub notes: Option<String>,
    pub status: RequestStatus,
    pub payment_status: PaymentStatus,
    pub price: Option<Decimal>,
    pub parts_cost: Option<Decimal>,
    pub freight_cost: Option<Decimal>,
    pub payment_link: Option<String>,
    pub whatsapp_sent: bool,
    pub dispatched_on: Option<DateTime<Utc>>,
    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRequest {
    pub request_id: Option<String>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub vehicle_vin: String,
    pub part_name: String,
    pub notes: Option<String>,
}

/// Whitelisted partial patch. Fields left `None` are untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRequest {
    pub status: Option<RequestStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub price: Option<Decimal>,
    pub parts_cost: Option<Decimal>,
    pub freight_cost: Option<Decimal>,
    pub payment_link: Option<String>,
    pub notes: Option<String>,
    pub whatsapp_sent: Option<bool>,
    pub dispatched_on: Option<DateTime<Utc>>,
    pub tracking_number: Option<String>,
}

impl UpdateRequest {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.payment_status.is_none()
            && self.price.is_none()
            && self.parts_cost.is_none()
            && self.freight_cost.is_none()
            && self.payment_link.is_none()
            && self.notes.is_none()
            && self.whatsapp_sent.is_none()
            && self.dispatched_on.is_none()
            && self.tracking_number.is_none()
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Timestamp,
    CustomerName,
    Status,
    Price,
}

impl SortBy {
    fn column(&self) -> &'static str {
        match self {
            SortBy::Timestamp => "created_at",
            SortBy::CustomerName => "customer_name",
            SortBy::Status => "status",
            SortBy::Price => "price",
        }
    }
}

impl Default for SortBy {
    fn default() -> Self {
        SortBy::Timestamp
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Desc
    }
}

/// Absent dimensions match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilter {
    pub search: Option<String>,
    pub status: Option<RequestStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub sort_order: SortOrder,
}

const ID_ALLOCATION_ATTEMPTS: usize = 5;

impl Request {
    pub async fn create(pool: &DbPool, data: CreateRequest) -> Result<Self, RequestError> {
        let now = Utc::now();

        let request_id = match data.request_id {
            Some(id) => {
                if Self::exists(pool, &id).await? {
                    return Err(RequestError::DuplicateId { id });
                }
                id
            }
            None => {
                let mut allocated = None;
                for _ in 0..ID_ALLOCATION_ATTEMPTS {
                    let candidate = generate_request_id();
                    if !Self::exists(pool, &candidate).await? {
                        allocated = Some(candidate);
                        break;
                    }
                }
                allocated.ok_or(RequestError::IdExhausted)?
            }
        };

        let request = sqlx::query_as::<_, Request>(
            "INSERT INTO requests (request_id, customer_name, customer_email, customer_phone,
                                   vehicle_vin, part_name, notes, status, payment_status,
                                   whatsapp_sent, created_at, last_updated)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, $10, $10)
             RETURNING *",
        )
        .bind(&request_id)
        .bind(&data.customer_name)
        .bind(&data.customer_email)
        .bind(&data.customer_phone)
        .bind(&data.vehicle_vin)
        .bind(&data.part_name)
        .bind(&data.notes)
        .bind(RequestStatus::Pending)
        .bind(PaymentStatus::Pending)
        .bind(now)
        .fetch_one(pool)
        .await?;

        Ok(request)
    }

    async fn exists(pool: &DbPool, id: &str) -> Result<bool, RequestError> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT request_id FROM requests WHERE request_id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        Ok(found.is_some())
    }

    pub async fn find_by_id(pool: &DbPool, id: &str) -> Result<Option<Self>, RequestError> {
        let request = sqlx::query_as::<_, Request>("SELECT * FROM requests WHERE request_id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(request)
    }

    /// Row-locked fetch for workflow transitions. Must run inside a
    /// transaction so concurrent updates to the same request serialize
    /// instead of racing last-write-wins.
    pub async fn find_by_id_for_update(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        id: &str,
    ) -> Result<Option<Self>, RequestError> {
        let request =
            sqlx::query_as::<_, Request>("SELECT * FROM requests WHERE request_id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?;

        Ok(request)
    }

    pub async fn list(pool: &DbPool, filter: &ListFilter) -> Result<Vec<Self>, RequestError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM requests WHERE TRUE");

        if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search);
            qb.push(" AND (customer_name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR vehicle_vin ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR part_name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR request_id ILIKE ")
                .push_bind(pattern)
                .push(")");
        }

        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status);
        }

        if let Some(payment_status) = filter.payment_status {
            qb.push(" AND payment_status = ").push_bind(payment_status);
        }

        if let Some(after) = filter.created_after {
            qb.push(" AND created_at >= ").push_bind(after);
        }

        if let Some(before) = filter.created_before {
            qb.push(" AND created_at <= ").push_bind(before);
        }

        qb.push(" ORDER BY ").push(filter.sort_by.column()).push(match filter.sort_order {
            SortOrder::Asc => " ASC",
            SortOrder::Desc => " DESC",
        });
        // Ties break by arrival order regardless of the chosen sort key.
        qb.push(", created_at ASC, request_id ASC");

        let requests = qb.build_query_as::<Request>().fetch_all(pool).await?;

        Ok(requests)
    }

    /// Partial patch against any executor; every caller goes through the
    /// workflow's row lock. Stamps `last_updated` unconditionally.
    pub async fn apply_update<'e, E>(
        executor: E,
        id: &str,
        update_data: &UpdateRequest,
    ) -> Result<Option<Self>, RequestError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let now = Utc::now();

        let updated = sqlx::query_as::<_, Request>(
            r#"
            UPDATE requests
            SET
                status = COALESCE($2, status),
                payment_status = COALESCE($3, payment_status),
                price = COALESCE($4, price),
                parts_cost = COALESCE($5, parts_cost),
                freight_cost = COALESCE($6, freight_cost),
                payment_link = COALESCE($7, payment_link),
                notes = COALESCE($8, notes),
                whatsapp_sent = COALESCE($9, whatsapp_sent),
                dispatched_on = COALESCE($10, dispatched_on),
                tracking_number = COALESCE($11, tracking_number),
                last_updated = $12
            WHERE request_id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update_data.status)
        .bind(update_data.payment_status)
        .bind(update_data.price)
        .bind(update_data.parts_cost)
        .bind(update_data.freight_cost)
        .bind(update_data.payment_link.as_deref())
        .bind(update_data.notes.as_deref())
        .bind(update_data.whatsapp_sent)
        .bind(update_data.dispatched_on)
        .bind(update_data.tracking_number.as_deref())
        .bind(now)
        .fetch_optional(executor)
        .await?;

        Ok(updated)
    }

    pub async fn delete(pool: &DbPool, id: &str) -> Result<(), RequestError> {
        let result = sqlx::query("DELETE FROM requests WHERE request_id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RequestError::NotFound { id: id.to_string() });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_dashboard_strings() {
        assert_eq!("Not Available".parse(), Ok(RequestStatus::NotAvailable));
        assert_eq!("Payment Sent".parse(), Ok(RequestStatus::PaymentSent));
        assert_eq!("Paid".parse(), Ok(RequestStatus::Paid));
        assert!("payment sent".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn status_serializes_dashboard_strings() {
        let json = serde_json::to_string(&RequestStatus::PaymentSent).unwrap();
        assert_eq!(json, "\"Payment Sent\"");
        let json = serde_json::to_string(&RequestStatus::NotAvailable).unwrap();
        assert_eq!(json, "\"Not Available\"");
    }

    #[test]
    fn rank_orders_the_forward_chain() {
        let chain = [
            RequestStatus::Pending,
            RequestStatus::Available,
            RequestStatus::PaymentSent,
            RequestStatus::Paid,
            RequestStatus::Processing,
            RequestStatus::Dispatched,
        ];
        for pair in chain.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
        assert_eq!(
            RequestStatus::NotAvailable.rank(),
            RequestStatus::Available.rank()
        );
    }

    #[test]
    fn terminal_states() {
        assert!(RequestStatus::NotAvailable.is_terminal());
        assert!(RequestStatus::Dispatched.is_terminal());
        assert!(!RequestStatus::Paid.is_terminal());
    }

    #[test]
    fn empty_update_is_detected() {
        assert!(UpdateRequest::default().is_empty());
        let patch = UpdateRequest {
            notes: Some("called customer".to_string()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn filter_defaults_match_all() {
        let filter: ListFilter = serde_json::from_str("{}").unwrap();
        assert!(filter.search.is_none());
        assert!(filter.status.is_none());
        assert_eq!(filter.sort_by, SortBy::Timestamp);
        assert_eq!(filter.sort_order, SortOrder::Desc);
    }
}
