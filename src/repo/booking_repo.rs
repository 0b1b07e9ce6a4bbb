//! Чтение бронирований и запись их платёжного статуса.
//!
//! Движок сверки никогда не пишет в bookings напрямую: строка брони
//! принадлежит этому хранилищу, граница «деньги зачислены» / «бронь это
//! отражает» проходит здесь.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::Booking;

#[async_trait]
pub trait BookingReader: Send + Sync {
    async fn get_by_id(&self, booking_id: i64) -> Result<Option<Booking>, sqlx::Error>;
}

#[async_trait]
pub trait BookingPaymentWriter: Send + Sync {
    /// Пользовательский переход платёжного статуса (с проверкой владельца).
    async fn update_payment_status(
        &self,
        booking_id: i64,
        user_id: i32,
        payment_status: &str,
    ) -> Result<bool, sqlx::Error>;

    /// Системный переход: вызывается движком сверки, владелец не
    /// участвует. Оплата подтверждает бронь.
    async fn update_payment_status_system(&self, booking_id: i64, payment_status: &str) -> Result<bool, sqlx::Error>;
}

#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingReader for PgBookingStore {
    async fn get_by_id(&self, booking_id: i64) -> Result<Option<Booking>, sqlx::Error> {
        sqlx::query_as::<_, Booking>(
            "SELECT id, room_id, user_id, starts_at, ends_at, status, payment_status,
                    comment, created_at, updated_at
             FROM bookings WHERE id = $1",
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
    }
}

#[async_trait]
impl BookingPaymentWriter for PgBookingStore {
    async fn update_payment_status(
        &self,
        booking_id: i64,
        user_id: i32,
        payment_status: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE bookings SET payment_status = $3, updated_at = NOW()
             WHERE id = $1 AND user_id = $2",
        )
        .bind(booking_id)
        .bind(user_id)
        .bind(payment_status)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_payment_status_system(&self, booking_id: i64, payment_status: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE bookings
             SET payment_status = $2,
                 status = CASE WHEN $2 = 'paid' THEN 'confirmed' ELSE status END,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(booking_id)
        .bind(payment_status)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
