//! Проверка подписи колбэков платёжного провайдера.
//!
//! Провайдер подписывает сумму, номер счёта и сквозные Shp-параметры
//! общим секретом канала. Каналов два — серверное Result-уведомление и
//! браузерный Success-редирект — и у каждого свой секрет, поэтому
//! секрет передаётся вызывающей стороной, а не хранится здесь.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Вычисляет код аутентификации: SHA-256 от
/// `"{amount}:{invoice_id}:{secret}"` плюс `":{key}={value}"` для каждого
/// сквозного параметра в порядке возрастания ключей.
pub fn sign(amount: &str, invoice_id: i64, extra: &BTreeMap<String, String>, secret: &str) -> String {
    let mut base = format!("{}:{}:{}", amount, invoice_id, secret);
    for (key, value) in extra {
        base.push_str(&format!(":{}={}", key, value));
    }
    let mut hasher = Sha256::new();
    hasher.update(base.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Сверяет предъявленный код с вычисленным. Регистр не учитывается:
/// провайдер присылает подпись то в верхнем, то в нижнем регистре.
pub fn verify(
    amount: &str,
    invoice_id: i64,
    extra: &BTreeMap<String, String>,
    secret: &str,
    provided: &str,
) -> bool {
    sign(amount, invoice_id, extra, secret).eq_ignore_ascii_case(provided)
}
