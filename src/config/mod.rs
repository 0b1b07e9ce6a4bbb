use serde::Deserialize;
use std::env;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub payment: PaymentConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Настройки Redis
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

// Настройки платёжного провайдера.
// У каждого канала колбэков свой секрет: result_secret подписывает
// серверные Result-уведомления, success_secret — браузерный редирект и
// ссылку на платёжную страницу.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub merchant_login: String,
    pub result_secret: String,
    pub success_secret: String,
    pub page_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "studio_booking=debug,tower_http=debug".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
            },
            payment: PaymentConfig {
                merchant_login: env::var("MERCHANT_LOGIN").expect("MERCHANT_LOGIN must be set"),
                result_secret: env::var("PAYMENT_RESULT_SECRET")
                    .expect("PAYMENT_RESULT_SECRET must be set"),
                success_secret: env::var("PAYMENT_SUCCESS_SECRET")
                    .expect("PAYMENT_SUCCESS_SECRET must be set"),
                page_url: env::var("PAYMENT_PAGE_URL")
                    .unwrap_or_else(|_| "https://pay.example.com/merchant".to_string()),
            },
        }
    }
}
