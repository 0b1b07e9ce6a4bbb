use axum::{
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/studios", get(get_studios))
        .route("/studios/{studio_id}/rooms", get(get_studio_rooms))
        .route("/rooms/{room_id}/schedule", get(get_room_schedule))
}

// GET /api/studios
async fn get_studios(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let studios = state.cache.get_studios().await;
    (StatusCode::OK, Json(studios))
}

// GET /api/studios/{studio_id}/rooms
async fn get_studio_rooms(
    State(state): State<Arc<AppState>>,
    Path(studio_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if studio_id <= 0 {
        return Err((StatusCode::BAD_REQUEST, "studio_id должен быть > 0".to_string()));
    }

    let rooms = state.cache.get_rooms(studio_id).await;
    Ok((StatusCode::OK, Json(rooms)))
}

#[derive(Debug, Serialize)]
struct BusySlot {
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
}

// GET /api/rooms/{room_id}/schedule
//
// Занятые интервалы зала на будущее. Ответ кешируется целиком и
// инвалидируется при создании/отмене брони и при подтверждении оплаты.
async fn get_room_schedule(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<i64>,
) -> Result<Response, (StatusCode, String)> {
    if room_id <= 0 {
        return Err((StatusCode::BAD_REQUEST, "room_id должен быть > 0".to_string()));
    }

    // 1. Пытаемся отдать из кеша
    if let Some(cached_json) = state.cache.get_cached_schedule(room_id).await {
        return Response::builder()
            .header("Content-Type", "application/json")
            .header("X-Cache", "HIT")
            .body(Body::from(cached_json))
            .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "Ошибка ответа".to_string()));
    }

    // 2. Cache Miss: идём в базу данных
    let slots: Vec<(DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT starts_at, ends_at
        FROM bookings
        WHERE room_id = $1 AND status <> 'cancelled' AND ends_at > NOW()
        ORDER BY starts_at
        "#,
    )
    .bind(room_id)
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| {
        tracing::error!("get_room_schedule sql error: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Не удалось получить расписание".to_string())
    })?;

    let busy: Vec<BusySlot> = slots
        .into_iter()
        .map(|(starts_at, ends_at)| BusySlot { starts_at, ends_at })
        .collect();

    let payload = json!({
        "success": true,
        "room_id": room_id,
        "busy": busy
    });

    // 3. Сохраняем в кеш и отдаём
    let json_str = serde_json::to_string(&payload)
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "Ошибка сериализации".to_string()))?;
    state.cache.cache_schedule(room_id, &json_str).await;

    Response::builder()
        .header("Content-Type", "application/json")
        .header("X-Cache", "MISS")
        .body(Body::from(json_str))
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "Ошибка ответа".to_string()))
}
