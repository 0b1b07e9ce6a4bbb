use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{
    models::PaymentError,
    repo::{PgBookingStore, PgPaymentRepository},
    services::reconciliation::{CallbackParams, ReconcileOutcome, ReconciliationEngine},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments/result", post(result_notification))
        .route("/payments/success", get(success_redirect_get).post(success_redirect_post))
        .route("/payments/fail", get(fail_redirect_get).post(fail_redirect_post))
}

/* ---------- разбор wire-формата провайдера ---------- */

// Колбэки приходят form-encoded: OutSum, InvId, SignatureValue плюс
// сквозные Shp-параметры. Сырая строка сохраняется в записи платежа
// как есть — для аудита и разбора споров.
fn parse_callback_params(raw: &str) -> Result<CallbackParams, String> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(raw).map_err(|e| format!("malformed payload: {}", e))?;

    let mut amount = None;
    let mut invoice = None;
    let mut signature = None;
    let mut extra = BTreeMap::new();

    for (key, value) in pairs {
        if key == "OutSum" {
            amount = Some(value);
        } else if key == "InvId" {
            invoice = Some(value);
        } else if key == "SignatureValue" {
            signature = Some(value);
        } else if key.to_ascii_lowercase().starts_with("shp") {
            // Сквозные параметры участвуют в подписи
            extra.insert(key, value);
        }
        // остальные поля провайдера в подписи не участвуют
    }

    let invoice_id = invoice
        .ok_or_else(|| "InvId is required".to_string())?
        .parse::<i64>()
        .map_err(|_| "InvId must be an integer".to_string())?;

    Ok(CallbackParams {
        amount: amount.ok_or_else(|| "OutSum is required".to_string())?,
        invoice_id,
        signature: signature.ok_or_else(|| "SignatureValue is required".to_string())?,
        extra,
        raw_body: raw.to_string(),
    })
}

// У Fail-редиректа подписи нет: из него нужен только номер счёта.
fn parse_invoice_id(raw: &str) -> Result<i64, String> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(raw).map_err(|e| format!("malformed payload: {}", e))?;
    pairs
        .into_iter()
        .find(|(key, _)| key == "InvId")
        .ok_or_else(|| "InvId is required".to_string())?
        .1
        .parse::<i64>()
        .map_err(|_| "InvId must be an integer".to_string())
}

fn reconcile_engine(
    state: &Arc<AppState>,
) -> ReconciliationEngine<PgPaymentRepository, PgBookingStore> {
    ReconciliationEngine::from_config(
        &state.config.payment,
        PgPaymentRepository::new(state.db.pool.clone()),
        PgBookingStore::new(state.db.pool.clone()),
    )
}

fn error_status(err: &PaymentError) -> StatusCode {
    match err {
        PaymentError::InvoiceNotFound(_) => StatusCode::NOT_FOUND,
        PaymentError::SignatureInvalid(_) => StatusCode::BAD_REQUEST,
        PaymentError::AmountMismatch { .. } => StatusCode::BAD_REQUEST,
        PaymentError::NotPending(_) => StatusCode::CONFLICT,
        PaymentError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Одноразовые действия после выигранного перехода в paid
async fn after_transition(state: &Arc<AppState>, outcome: &ReconcileOutcome) {
    if !outcome.transitioned {
        return;
    }
    if let Some(booking) = &outcome.booking {
        state.cache.invalidate_schedule(booking.room_id).await;
    }
}

/* ---------- HTTP Handlers ---------- */

/// POST /api/payments/result
///
/// Серверное уведомление провайдера. Успех подтверждается телом
/// `OK{InvId}`; любой отказ отдаёт не-2xx, и провайдер повторит
/// доставку по своей политике.
async fn result_notification(
    State(state): State<Arc<AppState>>,
    body: String,
) -> (StatusCode, String) {
    let params = match parse_callback_params(&body) {
        Ok(params) => params,
        Err(reason) => {
            tracing::warn!("result notification rejected: {}", reason);
            return (StatusCode::BAD_REQUEST, reason);
        }
    };

    tracing::info!(
        "result notification: invoice={}, amount={}",
        params.invoice_id,
        params.amount
    );

    match reconcile_engine(&state).process_result_notification(&params).await {
        Ok(outcome) => {
            after_transition(&state, &outcome).await;
            (StatusCode::OK, format!("OK{}", params.invoice_id))
        }
        Err(e) => {
            tracing::warn!("result notification for invoice {} rejected: {}", params.invoice_id, e);
            (error_status(&e), e.to_string())
        }
    }
}

/// GET /api/payments/success
async fn success_redirect_get(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    success_redirect(state, query.unwrap_or_default()).await
}

/// POST /api/payments/success
async fn success_redirect_post(
    State(state): State<Arc<AppState>>,
    body: String,
) -> impl IntoResponse {
    success_redirect(state, body).await
}

// Браузерный редирект после оплаты. Пользователь может обновить
// страницу сколько угодно раз: повтор возвращает тот же успешный ответ
// без повторного зачисления.
async fn success_redirect(state: Arc<AppState>, raw: String) -> (StatusCode, Json<serde_json::Value>) {
    let params = match parse_callback_params(&raw) {
        Ok(params) => params,
        Err(reason) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "message": reason})),
            );
        }
    };

    match reconcile_engine(&state).process_success_redirect(&params).await {
        Ok(outcome) => {
            after_transition(&state, &outcome).await;
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "Оплата подтверждена",
                    "invoice_id": outcome.attempt.invoice_id,
                    "booking_id": outcome.attempt.booking_id,
                    "amount": outcome.attempt.amount,
                    "paid_at": outcome.attempt.paid_at,
                })),
            )
        }
        Err(e) => {
            tracing::warn!("success redirect for invoice {} rejected: {}", params.invoice_id, e);
            // Страница неуспеха никогда не утверждает, что оплата прошла
            (
                error_status(&e),
                Json(json!({
                    "success": false,
                    "message": "Не удалось подтвердить оплату"
                })),
            )
        }
    }
}

/// GET /api/payments/fail
async fn fail_redirect_get(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    fail_redirect(state, query.unwrap_or_default()).await
}

/// POST /api/payments/fail
async fn fail_redirect_post(State(state): State<Arc<AppState>>, body: String) -> impl IntoResponse {
    fail_redirect(state, body).await
}

// Пользователь прервал оплату на странице провайдера. Исход платежа
// определяет Result-канал, поэтому здесь только фиксируем payload.
async fn fail_redirect(state: Arc<AppState>, raw: String) -> (StatusCode, Json<serde_json::Value>) {
    let invoice_id = match parse_invoice_id(&raw) {
        Ok(invoice_id) => invoice_id,
        Err(reason) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "message": reason})),
            );
        }
    };

    match reconcile_engine(&state).record_fail_redirect(invoice_id, &raw).await {
        Ok(attempt) => (
            StatusCode::OK,
            Json(json!({
                "success": false,
                "message": "Оплата не была завершена",
                "invoice_id": attempt.invoice_id,
                "booking_id": attempt.booking_id,
            })),
        ),
        Err(e) => {
            tracing::warn!("fail redirect for invoice {} rejected: {}", invoice_id, e);
            (
                error_status(&e),
                Json(json!({"success": false, "message": "Платёж не найден"})),
            )
        }
    }
}
