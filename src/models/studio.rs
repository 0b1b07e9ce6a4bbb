use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Studio {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub address: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Room {
    pub id: i64,
    pub studio_id: i64,
    pub name: String,
    pub hourly_rate: f64,
    pub capacity: i32,
    pub is_active: bool,
}
