use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use validator::Validate;

use crate::{
    repo::{BookingPaymentWriter, PaymentRepository, PgBookingStore, PgPaymentRepository},
    services::signature,
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", get(get_user_bookings))
        .route("/bookings", post(create_booking))
        .route("/bookings/initiatePayment", patch(initiate_payment))
        .route("/bookings/cancel", patch(cancel_booking))
}

/* ---------- helpers ---------- */

fn status_419() -> StatusCode {
    StatusCode::from_u16(419).unwrap_or(StatusCode::CONFLICT)
}

async fn booking_belongs_to_user(pool: &sqlx::PgPool, booking_id: i64, user_id: i32) -> sqlx::Result<bool> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM bookings WHERE id = $1 AND user_id = $2)"
    )
    .bind(booking_id)
    .bind(user_id)
    .fetch_one(pool)
    .await
}

/* ---------- BOOKINGS ---------- */

// POST /api/bookings
#[derive(Debug, Deserialize, Validate)]
struct CreateBookingRequest {
    #[validate(range(min = 1))]
    pub room_id: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[validate(length(max = 500))]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateBookingResponse {
    pub id: i64,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: crate::middleware::AuthUser,
    Json(req): Json<CreateBookingRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.validate().is_err() {
        return Err((StatusCode::BAD_REQUEST, "Некорректные параметры бронирования".to_string()));
    }
    if req.starts_at >= req.ends_at {
        return Err((StatusCode::BAD_REQUEST, "Время начала должно быть раньше времени окончания".to_string()));
    }
    if req.starts_at < Utc::now() {
        return Err((StatusCode::BAD_REQUEST, "Нельзя бронировать время в прошлом".to_string()));
    }

    let room_active = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM rooms WHERE id = $1 AND is_active = true)"
    )
    .bind(req.room_id)
    .fetch_one(&state.db.pool)
    .await
    .unwrap_or(false);

    if !room_active {
        return Err((StatusCode::NOT_FOUND, "Зал не найден".to_string()));
    }

    // Простая проверка пересечения интервалов по залу
    let overlaps = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
          SELECT 1 FROM bookings
          WHERE room_id = $1 AND status <> 'cancelled'
            AND starts_at < $3 AND ends_at > $2
        )
        "#
    )
    .bind(req.room_id)
    .bind(req.starts_at)
    .bind(req.ends_at)
    .fetch_one(&state.db.pool)
    .await
    .map_err(|e| {
        tracing::error!("create_booking overlap check error: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Ошибка БД".to_string())
    })?;

    if overlaps {
        return Err((status_419(), "Зал уже забронирован на это время".to_string()));
    }

    let res = sqlx::query_scalar::<_, i64>(
        "INSERT INTO bookings (room_id, user_id, starts_at, ends_at, comment, status)
         VALUES ($1, $2, $3, $4, $5, 'created')
         RETURNING id"
    )
    .bind(req.room_id)
    .bind(user.user_id)
    .bind(req.starts_at)
    .bind(req.ends_at)
    .bind(&req.comment)
    .fetch_one(&state.db.pool)
    .await;

    match res {
        Ok(id) => {
            state.cache.invalidate_schedule(req.room_id).await;
            Ok((StatusCode::CREATED, Json(CreateBookingResponse { id })))
        }
        Err(e) => {
            tracing::error!("create_booking sql error: {:?}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Не удалось создать бронирование".to_string()))
        }
    }
}

// GET /api/bookings
#[derive(Debug, Serialize)]
struct BookingResponse {
    pub id: i64,
    pub room_id: i64,
    pub room_name: String,
    pub studio_name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: String,
    pub payment_status: String,
}

async fn get_user_bookings(
    State(state): State<Arc<AppState>>,
    user: crate::middleware::AuthUser,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let rows: Vec<(i64, i64, String, String, DateTime<Utc>, DateTime<Utc>, String, String)> = sqlx::query_as(
        r#"
        SELECT b.id, b.room_id, r.name, s.name, b.starts_at, b.ends_at, b.status, b.payment_status
        FROM bookings b
        JOIN rooms r ON r.id = b.room_id
        JOIN studios s ON s.id = r.studio_id
        WHERE b.user_id = $1
        ORDER BY b.starts_at DESC
        "#
    )
    .bind(user.user_id)
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| {
        tracing::error!("get_user_bookings sql error: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Не удалось получить список бронирований".to_string())
    })?;

    let resp: Vec<BookingResponse> = rows
        .into_iter()
        .map(|(id, room_id, room_name, studio_name, starts_at, ends_at, status, payment_status)| BookingResponse {
            id,
            room_id,
            room_name,
            studio_name,
            starts_at,
            ends_at,
            status,
            payment_status,
        })
        .collect();

    Ok((StatusCode::OK, Json(resp)))
}

// PATCH /api/bookings/initiatePayment
#[derive(Debug, Deserialize)]
struct InitiatePaymentRequest {
    pub booking_id: i64,
}

async fn initiate_payment(
    State(state): State<Arc<AppState>>,
    user: crate::middleware::AuthUser,
    Json(req): Json<InitiatePaymentRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.booking_id <= 0 {
        return Err((StatusCode::BAD_REQUEST, "booking_id должен быть > 0".to_string()));
    }

    // Стоимость считаем в БД: ставка зала умножается на длительность и
    // фиксируется текстом с двумя знаками — ровно эта строка станет
    // эталоном при сверке колбэков провайдера.
    let booking_data: Option<(i64, String, String)> = sqlx::query_as(
        r#"
        SELECT r.id, r.name,
               (r.hourly_rate * (EXTRACT(EPOCH FROM (b.ends_at - b.starts_at)) / 3600.0))::numeric(12,2)::text AS amount
        FROM bookings b
        JOIN rooms r ON r.id = b.room_id
        WHERE b.id = $1 AND b.user_id = $2 AND b.status IN ('created', 'pending_payment')
        "#
    )
    .bind(req.booking_id)
    .bind(user.user_id)
    .fetch_optional(&state.db.pool)
    .await
    .map_err(|e| {
        tracing::error!("initiate_payment sql error: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Ошибка БД".to_string())
    })?;

    let (room_id, room_name, amount) = booking_data
        .ok_or_else(|| (status_419(), "Бронирование не найдено или уже обработано".to_string()))?;

    let payments = PgPaymentRepository::new(state.db.pool.clone());
    let attempt = payments.create(req.booking_id, &amount).await.map_err(|e| {
        tracing::error!("failed to create payment attempt: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Не удалось создать платёж".to_string())
    })?;

    // Пользовательский переход платёжного статуса брони
    let bookings = PgBookingStore::new(state.db.pool.clone());
    bookings
        .update_payment_status(req.booking_id, user.user_id, "pending")
        .await
        .map_err(|e| {
            tracing::error!("failed to update booking payment status: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Ошибка БД".to_string())
        })?;

    sqlx::query("UPDATE bookings SET status = 'pending_payment', updated_at = NOW() WHERE id = $1")
        .bind(req.booking_id)
        .execute(&state.db.pool)
        .await
        .map_err(|e| {
            tracing::error!("failed to update booking status: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Ошибка БД".to_string())
        })?;

    // Ссылка на платёжную страницу провайдера, подписанную секретом
    // браузерного канала
    let code = signature::sign(
        &attempt.amount,
        attempt.invoice_id,
        &BTreeMap::new(),
        &state.config.payment.success_secret,
    );
    let payment_url = format!(
        "{}?MerchantLogin={}&OutSum={}&InvId={}&SignatureValue={}",
        state.config.payment.page_url,
        state.config.payment.merchant_login,
        attempt.amount,
        attempt.invoice_id,
        code,
    );

    tracing::info!(
        "создан платёж для бронирования {}: invoice_id={}, сумма={}",
        req.booking_id,
        attempt.invoice_id,
        attempt.amount
    );

    Ok((StatusCode::OK, Json(serde_json::json!({
        "success": true,
        "invoice_id": attempt.invoice_id,
        "amount": attempt.amount,
        "room": room_name,
        "room_id": room_id,
        "payment_url": payment_url
    }))))
}

// PATCH /api/bookings/cancel
#[derive(Debug, Deserialize)]
struct CancelBookingRequest {
    pub booking_id: i64,
}

async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: crate::middleware::AuthUser,
    Json(req): Json<CancelBookingRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.booking_id <= 0 {
        return Err((StatusCode::BAD_REQUEST, "booking_id должен быть > 0".to_string()));
    }

    // проверка владельца
    let belongs = booking_belongs_to_user(&state.db.pool, req.booking_id, user.user_id)
        .await
        .unwrap_or(false);
    if !belongs {
        return Err((StatusCode::FORBIDDEN, "Бронирование не найдено или не принадлежит вам".to_string()));
    }

    // Оплаченную бронь из личного кабинета не отменить
    let room_id: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE bookings
        SET status = 'cancelled', updated_at = NOW()
        WHERE id = $1 AND user_id = $2 AND payment_status <> 'paid' AND status <> 'cancelled'
        RETURNING room_id
        "#
    )
    .bind(req.booking_id)
    .bind(user.user_id)
    .fetch_optional(&state.db.pool)
    .await
    .map_err(|e| {
        tracing::error!("cancel_booking sql error: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Ошибка БД".to_string())
    })?;

    match room_id {
        Some(room_id) => {
            state.cache.invalidate_schedule(room_id).await;
            Ok((StatusCode::OK, Json(serde_json::json!({"message": "Бронь успешно отменена"}))))
        }
        None => Err((status_419(), "Не удалось отменить бронирование".to_string())),
    }
}
