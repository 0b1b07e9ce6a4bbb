//! Хранилище попыток оплаты.
//!
//! Вся координация конкурирующих колбэков выполняется здесь, в БД,
//! условными UPDATE с проверкой rows_affected. Любая запись, меняющая
//! статус, охраняется условием «ещё не paid»: оплаченная запись
//! терминальна, повторы и гонки не должны её трогать.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{PaymentAttempt, PaymentStatus};

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Создаёт запись о новой попытке оплаты; invoice_id выдаёт БД.
    async fn create(&self, booking_id: i64, amount: &str) -> Result<PaymentAttempt, sqlx::Error>;

    async fn get_by_invoice_id(&self, invoice_id: i64) -> Result<Option<PaymentAttempt>, sqlx::Error>;

    /// Общий переход статуса с записью сырого payload и причины.
    /// Не срабатывает для уже оплаченной записи.
    async fn update_status(
        &self,
        invoice_id: i64,
        status: PaymentStatus,
        raw_body: &str,
        reason: Option<&str>,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error>;

    /// Возвращает запись в pending (например, после Fail-редиректа
    /// браузера), если она ещё не оплачена.
    async fn update_status_pending_if_not_paid(&self, invoice_id: i64, raw_body: &str) -> Result<(), sqlx::Error>;

    /// Сохраняет последний сырой payload Success-редиректа для аудита,
    /// не меняя статус.
    async fn save_success_raw_body(&self, invoice_id: i64, raw_body: &str) -> Result<(), sqlx::Error>;

    /// Идемпотентный переход pending -> paid.
    ///
    /// При N конкурирующих вызовах с одним invoice_id ровно один
    /// получает true и записывает paid_at; остальные получают false без
    /// изменения состояния и без ошибки.
    async fn mark_paid_idempotent(
        &self,
        invoice_id: i64,
        raw_body: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error>;
}

#[derive(Clone)]
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type AttemptRow = (
    i64,
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn row_to_attempt(row: AttemptRow) -> Result<PaymentAttempt, sqlx::Error> {
    let (invoice_id, booking_id, amount, status, raw_body, fail_reason, paid_at, created_at, updated_at) = row;
    let status = PaymentStatus::parse(&status)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown payment status '{}'", status).into()))?;
    Ok(PaymentAttempt {
        invoice_id,
        booking_id,
        amount,
        status,
        raw_body,
        fail_reason,
        paid_at,
        created_at,
        updated_at,
    })
}

const ATTEMPT_COLUMNS: &str =
    "invoice_id, booking_id, amount, status, raw_body, fail_reason, paid_at, created_at, updated_at";

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn create(&self, booking_id: i64, amount: &str) -> Result<PaymentAttempt, sqlx::Error> {
        let row: AttemptRow = sqlx::query_as(&format!(
            "INSERT INTO payment_attempts (booking_id, amount, status)
             VALUES ($1, $2, 'pending')
             RETURNING {}",
            ATTEMPT_COLUMNS
        ))
        .bind(booking_id)
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;

        row_to_attempt(row)
    }

    async fn get_by_invoice_id(&self, invoice_id: i64) -> Result<Option<PaymentAttempt>, sqlx::Error> {
        let row: Option<AttemptRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payment_attempts WHERE invoice_id = $1",
            ATTEMPT_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_attempt).transpose()
    }

    async fn update_status(
        &self,
        invoice_id: i64,
        status: PaymentStatus,
        raw_body: &str,
        reason: Option<&str>,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE payment_attempts
             SET status = $2, raw_body = $3, fail_reason = $4,
                 paid_at = COALESCE($5, paid_at), updated_at = NOW()
             WHERE invoice_id = $1 AND status <> 'paid'",
        )
        .bind(invoice_id)
        .bind(status.as_str())
        .bind(raw_body)
        .bind(reason)
        .bind(paid_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_status_pending_if_not_paid(&self, invoice_id: i64, raw_body: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE payment_attempts
             SET status = 'pending', raw_body = $2, updated_at = NOW()
             WHERE invoice_id = $1 AND status <> 'paid'",
        )
        .bind(invoice_id)
        .bind(raw_body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_success_raw_body(&self, invoice_id: i64, raw_body: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE payment_attempts SET raw_body = $2, updated_at = NOW() WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .bind(raw_body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_paid_idempotent(
        &self,
        invoice_id: i64,
        raw_body: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        // Единственная точка сериализации гонки двух каналов: победитель
        // определяется атомарным условным UPDATE, не чтением-записью.
        let result = sqlx::query(
            "UPDATE payment_attempts
             SET status = 'paid', raw_body = $2, paid_at = $3, updated_at = NOW()
             WHERE invoice_id = $1 AND status = 'pending'",
        )
        .bind(invoice_id)
        .bind(raw_body)
        .bind(paid_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
