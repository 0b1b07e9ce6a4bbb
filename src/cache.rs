use crate::models::{Room, Studio};
use crate::{database::Database, redis_client::RedisClient};
use redis::AsyncCommands;
use tracing::info;

#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    db: Database,
}

impl CacheService {
    pub fn new(redis: RedisClient, db: Database) -> Self {
        Self { redis, db }
    }

    // Прогрев кеша при старте
    pub async fn warmup_cache(&self) {
        info!("Starting cache warmup...");

        if let Ok(studios) = self.load_studios_from_db().await {
            info!("Loaded {} studios", studios.len());
            let _ = self.save_studios_to_cache(&studios).await;
        }

        info!("Cache warmup done");
    }

    // Получить список студий
    pub async fn get_studios(&self) -> Vec<Studio> {
        // Сначала пробуем кеш
        if let Ok(studios) = self.get_studios_from_cache().await {
            return studios;
        }

        // Если кеш не работает - идем в БД
        if let Ok(studios) = self.load_studios_from_db().await {
            let _ = self.save_studios_to_cache(&studios).await;
            return studios;
        }

        vec![]
    }

    // Получить залы студии
    pub async fn get_rooms(&self, studio_id: i64) -> Vec<Room> {
        if let Ok(rooms) = self.get_rooms_from_cache(studio_id).await {
            return rooms;
        }

        if let Ok(rooms) = self.load_rooms_from_db(studio_id).await {
            let _ = self.save_rooms_to_cache(studio_id, &rooms).await;
            return rooms;
        }

        vec![]
    }

    // Кешированное расписание зала (готовый JSON-ответ)
    pub async fn get_cached_schedule(&self, room_id: i64) -> Option<String> {
        let mut conn = self.redis.conn.clone();
        let key = format!("schedule:{}", room_id);
        conn.get(key).await.unwrap_or(None)
    }

    pub async fn cache_schedule(&self, room_id: i64, json: &str) {
        let mut conn = self.redis.conn.clone();
        let key = format!("schedule:{}", room_id);
        // 5 минут: расписание меняется бронированиями и оплатой
        let _: Result<(), _> = conn.set_ex(key, json, 300).await;
    }

    // Инвалидировать кеш расписания зала
    pub async fn invalidate_schedule(&self, room_id: i64) {
        let key = format!("schedule:{}", room_id);
        let mut conn = self.redis.conn.clone();
        let _: Result<(), _> = conn.del(&key).await;
        info!("Invalidated schedule cache for room {}", room_id);
    }

    // === Работа с БД ===

    async fn load_studios_from_db(&self) -> Result<Vec<Studio>, sqlx::Error> {
        sqlx::query_as::<_, Studio>(
            "SELECT id, name, description, address, is_active, created_at
             FROM studios
             WHERE is_active = true
             ORDER BY name",
        )
        .fetch_all(&self.db.pool)
        .await
    }

    async fn load_rooms_from_db(&self, studio_id: i64) -> Result<Vec<Room>, sqlx::Error> {
        sqlx::query_as::<_, Room>(
            "SELECT id, studio_id, name, hourly_rate::FLOAT as hourly_rate, capacity, is_active
             FROM rooms
             WHERE studio_id = $1 AND is_active = true
             ORDER BY id",
        )
        .bind(studio_id)
        .fetch_all(&self.db.pool)
        .await
    }

    // === Работа с кешем ===

    async fn get_studios_from_cache(&self) -> Result<Vec<Studio>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: String = conn.get("studios").await?;
        let studios: Vec<Studio> = serde_json::from_str(&data).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error"))
        })?;
        Ok(studios)
    }

    async fn save_studios_to_cache(&self, studios: &[Studio]) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(studios).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex("studios", data, 3600).await // 1 час
    }

    async fn get_rooms_from_cache(&self, studio_id: i64) -> Result<Vec<Room>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let key = format!("rooms:{}", studio_id);
        let data: String = conn.get(key).await?;
        let rooms: Vec<Room> = serde_json::from_str(&data).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error"))
        })?;
        Ok(rooms)
    }

    async fn save_rooms_to_cache(&self, studio_id: i64, rooms: &[Room]) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(rooms).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let key = format!("rooms:{}", studio_id);
        let mut conn = self.redis.conn.clone();
        conn.set_ex(key, data, 3600).await // 1 час
    }
}
