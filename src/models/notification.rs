use crate::database::connection::DbPool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Customer-facing message milestones. One log row per intent per send, so a
/// dispatch message is distinguishable from the availability message that
/// preceded it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationIntent {
    Availability,
    PaymentLink,
    PaymentConfirmed,
    Dispatched,
}

impl NotificationIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationIntent::Availability => "availability",
            NotificationIntent::PaymentLink => "payment_link",
            NotificationIntent::PaymentConfirmed => "payment_confirmed",
            NotificationIntent::Dispatched => "dispatched",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationLog {
    pub id: Uuid,
    pub request_id: String,
    pub intent: String,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

impl NotificationLog {
    pub async fn record(
        pool: &DbPool,
        request_id: &str,
        intent: NotificationIntent,
        message: &str,
    ) -> Result<Self, NotificationError> {
        let entry = sqlx::query_as::<_, NotificationLog>(
            "INSERT INTO notification_log (id, request_id, intent, message, sent_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(request_id)
        .bind(intent.as_str())
        .bind(message)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(entry)
    }

    pub async fn find_by_request(
        pool: &DbPool,
        request_id: &str,
    ) -> Result<Vec<Self>, NotificationError> {
        let entries = sqlx::query_as::<_, NotificationLog>(
            "SELECT * FROM notification_log WHERE request_id = $1 ORDER BY sent_at ASC",
        )
        .bind(request_id)
        .fetch_all(pool)
        .await?;

        Ok(entries)
    }

    /// Whether a message for this intent has already gone out. Used to keep
    /// webhook retries from double-notifying the customer.
    pub async fn already_sent(
        pool: &DbPool,
        request_id: &str,
        intent: NotificationIntent,
    ) -> Result<bool, NotificationError> {
        let found: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM notification_log WHERE request_id = $1 AND intent = $2 LIMIT 1",
        )
        .bind(request_id)
        .bind(intent.as_str())
        .fetch_optional(pool)
        .await?;

        Ok(found.is_some())
    }
}
