use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Статус попытки оплаты. Переходы только pending -> paid и
/// pending -> failed; paid — терминальный статус, повторные колбэки
/// провайдера его не меняют.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// Одна строка на инициированную попытку оплаты.
///
/// `invoice_id` — ключ корреляции с провайдером и ключ идемпотентности
/// для обоих каналов колбэков. `amount` хранится текстом ровно в том
/// виде, в каком был зафиксирован при инициации, и сравнивается с
/// входящими суммами численно (см. services::reconciliation).
#[derive(Debug, Clone, Serialize)]
pub struct PaymentAttempt {
    pub invoice_id: i64,
    pub booking_id: i64,
    pub amount: String,
    pub status: PaymentStatus,
    pub raw_body: Option<String>,
    pub fail_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ошибки сверки платежа с уведомлением провайдера.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment attempt for invoice {0} not found")]
    InvoiceNotFound(i64),

    #[error("invalid callback signature for invoice {0}")]
    SignatureInvalid(i64),

    #[error("callback amount does not match stored amount: expected {expected}, got {received}")]
    AmountMismatch { expected: String, received: String },

    #[error("payment attempt for invoice {0} is not pending")]
    NotPending(i64),

    #[error("payment store error: {0}")]
    Store(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [PaymentStatus::Pending, PaymentStatus::Paid, PaymentStatus::Failed] {
            assert_eq!(PaymentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::parse("refunded"), None);
    }
}
