//! reconciliation.rs
//!
//! Движок сверки платежей с асинхронными уведомлениями провайдера.
//!
//! Ключевые компоненты:
//! 1.  **CallbackParams**: разобранные поля колбэка (сумма, номер счёта,
//!     подпись, сквозные параметры) плюс сырой payload для аудита.
//! 2.  **Проверка подписи и суммы**: оба канала — серверное
//!     Result-уведомление и браузерный Success-редирект — проходят один
//!     и тот же путь: подпись своим секретом канала, затем численная
//!     сверка суммы с зафиксированной при инициации.
//! 3.  **Идемпотентный переход в paid**: гонку двух каналов разрешает
//!     хранилище условным UPDATE; движок не держит никакого
//!     разделяемого состояния в памяти.
//! 4.  **Синхронизация брони**: после фиксации оплаты бронь помечается
//!     оплаченной best-effort; ошибка синка логируется и не отменяет
//!     уже зафиксированный платёж.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::config::PaymentConfig;
use crate::models::{Booking, PaymentAttempt, PaymentError, PaymentStatus};
use crate::repo::{BookingPaymentWriter, BookingReader, PaymentRepository};
use crate::services::signature;

/// Разобранные поля колбэка провайдера.
#[derive(Debug, Clone)]
pub struct CallbackParams {
    pub amount: String,
    pub invoice_id: i64,
    pub signature: String,
    pub extra: BTreeMap<String, String>,
    pub raw_body: String,
}

/// Результат успешной сверки.
///
/// `transitioned` — именно этот вызов перевёл запись в paid. Повтор того
/// же колбэка вернёт false без ошибки: это сигнал вызывающей стороне не
/// запускать одноразовые действия (синхронизацию брони, инвалидацию
/// кеша) второй раз.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub attempt: PaymentAttempt,
    pub transitioned: bool,
    pub booking: Option<Booking>,
}

/// Численная сверка суммы колбэка с суммой, зафиксированной при
/// инициации. Провайдер форматирует сумму нестабильно ("300" и "300.00"
/// равны), поэтому текстовое сравнение недопустимо. Любая ошибка
/// разбора — несовпадение.
pub fn validate_amount(stored: &str, received: &str) -> Result<(), PaymentError> {
    let mismatch = || PaymentError::AmountMismatch {
        expected: stored.to_string(),
        received: received.to_string(),
    };

    let stored_value = Decimal::from_str(stored.trim()).map_err(|_| mismatch())?;
    let received_value = Decimal::from_str(received.trim()).map_err(|_| mismatch())?;

    if stored_value == received_value {
        Ok(())
    } else {
        Err(mismatch())
    }
}

pub struct ReconciliationEngine<R, B> {
    payments: R,
    bookings: B,
    /// Секрет серверного Result-канала.
    result_secret: String,
    /// Секрет браузерного Success-редиректа.
    success_secret: String,
}

impl<R, B> ReconciliationEngine<R, B>
where
    R: PaymentRepository,
    B: BookingReader + BookingPaymentWriter,
{
    pub fn new(payments: R, bookings: B, result_secret: String, success_secret: String) -> Self {
        Self {
            payments,
            bookings,
            result_secret,
            success_secret,
        }
    }

    pub fn from_config(config: &PaymentConfig, payments: R, bookings: B) -> Self {
        Self::new(
            payments,
            bookings,
            config.result_secret.clone(),
            config.success_secret.clone(),
        )
    }

    /// Серверное Result-уведомление провайдера об исходе платежа.
    pub async fn process_result_notification(
        &self,
        params: &CallbackParams,
    ) -> Result<ReconcileOutcome, PaymentError> {
        let attempt = self.authenticate(params, &self.result_secret).await?;
        self.settle(attempt, params).await
    }

    /// Браузерный Success-редирект. Может приходить многократно
    /// (перезагрузка страницы), поэтому полностью идемпотентен: повтор
    /// возвращает тот же успешный исход с transitioned = false.
    pub async fn process_success_redirect(
        &self,
        params: &CallbackParams,
    ) -> Result<ReconcileOutcome, PaymentError> {
        let attempt = self.authenticate(params, &self.success_secret).await?;

        // Сырой payload редиректа сохраняем до перехода: он нужен для
        // разбора споров даже если переход уже выполнил другой канал.
        self.payments
            .save_success_raw_body(params.invoice_id, &params.raw_body)
            .await?;

        self.settle(attempt, params).await
    }

    /// Fail-редирект браузера: пользователь прервал оплату. Исход
    /// платежа определяет Result-канал, поэтому запись остаётся pending;
    /// оплаченную запись редирект не трогает.
    pub async fn record_fail_redirect(
        &self,
        invoice_id: i64,
        raw_body: &str,
    ) -> Result<PaymentAttempt, PaymentError> {
        let attempt = self
            .payments
            .get_by_invoice_id(invoice_id)
            .await?
            .ok_or(PaymentError::InvoiceNotFound(invoice_id))?;

        self.payments
            .update_status_pending_if_not_paid(invoice_id, raw_body)
            .await?;

        info!("payment {} fail redirect recorded, status left to result channel", invoice_id);
        Ok(attempt)
    }

    /// Общая для обоих каналов аутентификация колбэка: поиск записи,
    /// подпись, сумма. Неудача подписи или суммы фиксируется ровно одной
    /// охраняемой записью failed (не трогающей уже оплаченную запись).
    async fn authenticate(
        &self,
        params: &CallbackParams,
        secret: &str,
    ) -> Result<PaymentAttempt, PaymentError> {
        let attempt = self
            .payments
            .get_by_invoice_id(params.invoice_id)
            .await?
            .ok_or(PaymentError::InvoiceNotFound(params.invoice_id))?;

        if !signature::verify(
            &params.amount,
            params.invoice_id,
            &params.extra,
            secret,
            &params.signature,
        ) {
            warn!("payment {} callback with invalid signature", params.invoice_id);
            self.payments
                .update_status(
                    params.invoice_id,
                    PaymentStatus::Failed,
                    &params.raw_body,
                    Some("invalid signature"),
                    None,
                )
                .await?;
            return Err(PaymentError::SignatureInvalid(params.invoice_id));
        }

        if let Err(e) = validate_amount(&attempt.amount, &params.amount) {
            warn!(
                "payment {} amount mismatch: stored {}, received {}",
                params.invoice_id, attempt.amount, params.amount
            );
            self.payments
                .update_status(
                    params.invoice_id,
                    PaymentStatus::Failed,
                    &params.raw_body,
                    Some("amount mismatch"),
                    None,
                )
                .await?;
            return Err(e);
        }

        Ok(attempt)
    }

    /// Идемпотентный переход в paid и best-effort синхронизация брони.
    async fn settle(
        &self,
        attempt: PaymentAttempt,
        params: &CallbackParams,
    ) -> Result<ReconcileOutcome, PaymentError> {
        let transitioned = self
            .payments
            .mark_paid_idempotent(params.invoice_id, &params.raw_body, Utc::now())
            .await?;

        let stored = self
            .payments
            .get_by_invoice_id(params.invoice_id)
            .await?
            .ok_or(PaymentError::InvoiceNotFound(params.invoice_id))?;

        if transitioned {
            info!("payment {} marked paid, syncing booking {}", params.invoice_id, attempt.booking_id);
            let booking = self.sync_booking(attempt.booking_id).await;
            return Ok(ReconcileOutcome {
                attempt: stored,
                transitioned: true,
                booking,
            });
        }

        match stored.status {
            // Переход уже выполнил другой канал или повтор того же:
            // исход успешный, одноразовые действия не повторяются.
            PaymentStatus::Paid => Ok(ReconcileOutcome {
                attempt: stored,
                transitioned: false,
                booking: None,
            }),
            // Запись уже терминально failed: корректный колбэк для неё —
            // конфликт, разбирается оператором по raw_body.
            _ => Err(PaymentError::NotPending(params.invoice_id)),
        }
    }

    /// Платёж уже надёжно зафиксирован, поэтому ошибки здесь только
    /// логируются: досинхронизацию выполняет внешний sweep.
    async fn sync_booking(&self, booking_id: i64) -> Option<Booking> {
        let booking = match self.bookings.get_by_id(booking_id).await {
            Ok(Some(booking)) => booking,
            Ok(None) => {
                warn!("booking {} not found during payment sync", booking_id);
                return None;
            }
            Err(e) => {
                error!("failed to load booking {} for payment sync: {:?}", booking_id, e);
                return None;
            }
        };

        match self
            .bookings
            .update_payment_status_system(booking_id, "paid")
            .await
        {
            Ok(true) => info!("booking {} marked paid", booking_id),
            Ok(false) => warn!("booking {} disappeared during payment sync", booking_id),
            Err(e) => error!("failed to mark booking {} paid: {:?}", booking_id, e),
        }

        Some(booking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const RESULT_SECRET: &str = "result-secret";
    const SUCCESS_SECRET: &str = "success-secret";

    #[derive(Clone, Default)]
    struct MemPayments {
        rows: Arc<Mutex<HashMap<i64, PaymentAttempt>>>,
        status_writes: Arc<AtomicUsize>,
    }

    impl MemPayments {
        fn seed(&self, invoice_id: i64, booking_id: i64, amount: &str, status: PaymentStatus) {
            let now = Utc::now();
            self.rows.lock().unwrap().insert(
                invoice_id,
                PaymentAttempt {
                    invoice_id,
                    booking_id,
                    amount: amount.to_string(),
                    status,
                    raw_body: None,
                    fail_reason: None,
                    paid_at: match status {
                        PaymentStatus::Paid => Some(now),
                        _ => None,
                    },
                    created_at: now,
                    updated_at: now,
                },
            );
        }

        fn get(&self, invoice_id: i64) -> PaymentAttempt {
            self.rows.lock().unwrap().get(&invoice_id).cloned().unwrap()
        }
    }

    #[async_trait]
    impl PaymentRepository for MemPayments {
        async fn create(&self, booking_id: i64, amount: &str) -> Result<PaymentAttempt, sqlx::Error> {
            let mut rows = self.rows.lock().unwrap();
            let invoice_id = rows.keys().max().copied().unwrap_or(0) + 1;
            let now = Utc::now();
            let attempt = PaymentAttempt {
                invoice_id,
                booking_id,
                amount: amount.to_string(),
                status: PaymentStatus::Pending,
                raw_body: None,
                fail_reason: None,
                paid_at: None,
                created_at: now,
                updated_at: now,
            };
            rows.insert(invoice_id, attempt.clone());
            Ok(attempt)
        }

        async fn get_by_invoice_id(&self, invoice_id: i64) -> Result<Option<PaymentAttempt>, sqlx::Error> {
            Ok(self.rows.lock().unwrap().get(&invoice_id).cloned())
        }

        async fn update_status(
            &self,
            invoice_id: i64,
            status: PaymentStatus,
            raw_body: &str,
            reason: Option<&str>,
            paid_at: Option<DateTime<Utc>>,
        ) -> Result<(), sqlx::Error> {
            self.status_writes.fetch_add(1, Ordering::SeqCst);
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows.get_mut(&invoice_id) {
                if row.status != PaymentStatus::Paid {
                    row.status = status;
                    row.raw_body = Some(raw_body.to_string());
                    row.fail_reason = reason.map(str::to_string);
                    if paid_at.is_some() {
                        row.paid_at = paid_at;
                    }
                    row.updated_at = Utc::now();
                }
            }
            Ok(())
        }

        async fn update_status_pending_if_not_paid(&self, invoice_id: i64, raw_body: &str) -> Result<(), sqlx::Error> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows.get_mut(&invoice_id) {
                if row.status != PaymentStatus::Paid {
                    row.status = PaymentStatus::Pending;
                    row.raw_body = Some(raw_body.to_string());
                    row.updated_at = Utc::now();
                }
            }
            Ok(())
        }

        async fn save_success_raw_body(&self, invoice_id: i64, raw_body: &str) -> Result<(), sqlx::Error> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows.get_mut(&invoice_id) {
                row.raw_body = Some(raw_body.to_string());
                row.updated_at = Utc::now();
            }
            Ok(())
        }

        async fn mark_paid_idempotent(
            &self,
            invoice_id: i64,
            raw_body: &str,
            paid_at: DateTime<Utc>,
        ) -> Result<bool, sqlx::Error> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(&invoice_id) {
                Some(row) if row.status == PaymentStatus::Pending => {
                    row.status = PaymentStatus::Paid;
                    row.raw_body = Some(raw_body.to_string());
                    row.paid_at = Some(paid_at);
                    row.updated_at = Utc::now();
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }

    #[derive(Clone, Default)]
    struct MemBookings {
        rows: Arc<Mutex<HashMap<i64, Booking>>>,
        sync_calls: Arc<AtomicUsize>,
        fail_sync: bool,
    }

    impl MemBookings {
        fn seed(&self, booking_id: i64) {
            let now = Utc::now();
            self.rows.lock().unwrap().insert(
                booking_id,
                Booking {
                    id: booking_id,
                    room_id: 1,
                    user_id: 1,
                    starts_at: now + Duration::hours(1),
                    ends_at: now + Duration::hours(3),
                    status: "pending_payment".to_string(),
                    payment_status: "pending".to_string(),
                    comment: None,
                    created_at: now,
                    updated_at: now,
                },
            );
        }

        fn get(&self, booking_id: i64) -> Booking {
            self.rows.lock().unwrap().get(&booking_id).cloned().unwrap()
        }
    }

    #[async_trait]
    impl BookingReader for MemBookings {
        async fn get_by_id(&self, booking_id: i64) -> Result<Option<Booking>, sqlx::Error> {
            Ok(self.rows.lock().unwrap().get(&booking_id).cloned())
        }
    }

    #[async_trait]
    impl BookingPaymentWriter for MemBookings {
        async fn update_payment_status(
            &self,
            booking_id: i64,
            user_id: i32,
            payment_status: &str,
        ) -> Result<bool, sqlx::Error> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(&booking_id) {
                Some(row) if row.user_id == user_id => {
                    row.payment_status = payment_status.to_string();
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn update_payment_status_system(&self, booking_id: i64, payment_status: &str) -> Result<bool, sqlx::Error> {
            self.sync_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_sync {
                return Err(sqlx::Error::PoolClosed);
            }
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(&booking_id) {
                Some(row) => {
                    row.payment_status = payment_status.to_string();
                    if payment_status == "paid" {
                        row.status = "confirmed".to_string();
                    }
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    fn engine(
        payments: &MemPayments,
        bookings: &MemBookings,
    ) -> ReconciliationEngine<MemPayments, MemBookings> {
        ReconciliationEngine::new(
            payments.clone(),
            bookings.clone(),
            RESULT_SECRET.to_string(),
            SUCCESS_SECRET.to_string(),
        )
    }

    fn callback(amount: &str, invoice_id: i64, secret: &str) -> CallbackParams {
        let extra = BTreeMap::new();
        CallbackParams {
            amount: amount.to_string(),
            invoice_id,
            signature: signature::sign(amount, invoice_id, &extra, secret),
            extra,
            raw_body: format!("OutSum={}&InvId={}", amount, invoice_id),
        }
    }

    #[test]
    fn equal_amounts_with_different_text_validate() {
        assert!(validate_amount("300.00", "300").is_ok());
        assert!(validate_amount("300", "300.00").is_ok());
        assert!(validate_amount("1500.50", "1500.5").is_ok());
    }

    #[test]
    fn different_or_garbage_amounts_fail() {
        assert!(matches!(
            validate_amount("100.00", "50.00"),
            Err(PaymentError::AmountMismatch { .. })
        ));
        assert!(validate_amount("100.00", "not-a-number").is_err());
        assert!(validate_amount("100.00", "").is_err());
    }

    proptest! {
        #[test]
        fn trailing_zeros_never_break_equality(cents in 0u64..100_000_000) {
            let canonical = format!("{}.{:02}", cents / 100, cents % 100);
            let bare = if cents % 100 == 0 {
                format!("{}", cents / 100)
            } else {
                canonical.clone()
            };
            prop_assert!(validate_amount(&canonical, &bare).is_ok());
            prop_assert!(validate_amount(&bare, &canonical).is_ok());
        }

        #[test]
        fn unequal_values_always_mismatch(a in 0u64..10_000_000, b in 0u64..10_000_000) {
            prop_assume!(a != b);
            let left = format!("{}.{:02}", a / 100, a % 100);
            let right = format!("{}.{:02}", b / 100, b % 100);
            prop_assert!(validate_amount(&left, &right).is_err());
        }
    }

    #[tokio::test]
    async fn result_notification_marks_pending_attempt_paid() {
        let payments = MemPayments::default();
        let bookings = MemBookings::default();
        payments.seed(77, 10, "300.00", PaymentStatus::Pending);
        bookings.seed(10);
        let engine = engine(&payments, &bookings);

        // Провайдер прислал "300" против сохранённого "300.00"
        let outcome = engine
            .process_result_notification(&callback("300", 77, RESULT_SECRET))
            .await
            .unwrap();

        assert!(outcome.transitioned);
        assert_eq!(outcome.attempt.status, PaymentStatus::Paid);
        assert!(outcome.attempt.paid_at.is_some());
        assert_eq!(payments.get(77).amount, "300.00");
        assert_eq!(bookings.get(10).payment_status, "paid");
        assert_eq!(bookings.get(10).status, "confirmed");
        assert_eq!(bookings.sync_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_invoice_is_rejected_without_writes() {
        let payments = MemPayments::default();
        let bookings = MemBookings::default();
        let engine = engine(&payments, &bookings);

        let err = engine
            .process_result_notification(&callback("300.00", 404, RESULT_SECRET))
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::InvoiceNotFound(404)));
        assert!(payments.rows.lock().unwrap().is_empty());
        assert_eq!(bookings.sync_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn forged_signature_never_pays() {
        let payments = MemPayments::default();
        let bookings = MemBookings::default();
        payments.seed(5, 10, "300.00", PaymentStatus::Pending);
        bookings.seed(10);
        let engine = engine(&payments, &bookings);

        let mut params = callback("300.00", 5, RESULT_SECRET);
        params.signature = "deadbeef".to_string();

        let err = engine.process_result_notification(&params).await.unwrap_err();

        assert!(matches!(err, PaymentError::SignatureInvalid(5)));
        let stored = payments.get(5);
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.fail_reason.as_deref(), Some("invalid signature"));
        assert!(stored.raw_body.is_some());
        assert_eq!(bookings.sync_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn secret_of_the_other_channel_is_rejected() {
        let payments = MemPayments::default();
        let bookings = MemBookings::default();
        payments.seed(6, 10, "300.00", PaymentStatus::Pending);
        let engine = engine(&payments, &bookings);

        // Подпись Success-канала не проходит в Result-канале
        let err = engine
            .process_result_notification(&callback("300.00", 6, SUCCESS_SECRET))
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::SignatureInvalid(6)));
    }

    #[tokio::test]
    async fn amount_mismatch_records_exactly_one_failure() {
        let payments = MemPayments::default();
        let bookings = MemBookings::default();
        payments.seed(99, 10, "100.00", PaymentStatus::Pending);
        bookings.seed(10);
        let engine = engine(&payments, &bookings);

        // Подпись корректна, но над суммой "50.00"
        let err = engine
            .process_result_notification(&callback("50.00", 99, RESULT_SECRET))
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::AmountMismatch { .. }));
        let stored = payments.get(99);
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.fail_reason.as_deref(), Some("amount mismatch"));
        assert!(stored.raw_body.is_some());
        assert_eq!(payments.status_writes.load(Ordering::SeqCst), 1);
        // Бронь не тронута
        assert_eq!(bookings.get(10).payment_status, "pending");
        assert_eq!(bookings.sync_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_redirect_is_idempotent_across_repeats() {
        let payments = MemPayments::default();
        let bookings = MemBookings::default();
        payments.seed(77, 10, "300.00", PaymentStatus::Pending);
        bookings.seed(10);
        let engine = engine(&payments, &bookings);
        let params = callback("300", 77, SUCCESS_SECRET);

        let first = engine.process_success_redirect(&params).await.unwrap();
        assert!(first.transitioned);
        let paid_at = first.attempt.paid_at.unwrap();

        // Пользователь обновил страницу подтверждения
        let second = engine.process_success_redirect(&params).await.unwrap();
        assert!(!second.transitioned);
        assert_eq!(second.attempt.status, PaymentStatus::Paid);
        assert_eq!(second.attempt.paid_at.unwrap(), paid_at);
        assert_eq!(bookings.sync_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn result_after_success_is_error_free_noop() {
        let payments = MemPayments::default();
        let bookings = MemBookings::default();
        payments.seed(77, 10, "300.00", PaymentStatus::Pending);
        bookings.seed(10);
        let engine = engine(&payments, &bookings);

        let first = engine
            .process_success_redirect(&callback("300.00", 77, SUCCESS_SECRET))
            .await
            .unwrap();
        let paid_at = first.attempt.paid_at.unwrap();

        let second = engine
            .process_result_notification(&callback("300.00", 77, RESULT_SECRET))
            .await
            .unwrap();

        assert!(!second.transitioned);
        assert_eq!(second.attempt.paid_at.unwrap(), paid_at);
        assert_eq!(second.attempt.amount, "300.00");
        assert_eq!(bookings.sync_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callbacks_have_single_winner() {
        let payments = MemPayments::default();
        let bookings = MemBookings::default();
        payments.seed(77, 10, "300.00", PaymentStatus::Pending);
        bookings.seed(10);
        let engine = Arc::new(engine(&payments, &bookings));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let engine = engine.clone();
            // Чётные задачи бьют в Result-канал, нечётные — в Success
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    engine
                        .process_result_notification(&callback("300.00", 77, RESULT_SECRET))
                        .await
                } else {
                    engine
                        .process_success_redirect(&callback("300.00", 77, SUCCESS_SECRET))
                        .await
                }
            }));
        }

        let outcomes = futures::future::join_all(tasks).await;
        let mut winners = 0;
        let mut winner_paid_at = None;
        for outcome in outcomes {
            let outcome = outcome.unwrap().unwrap();
            assert_eq!(outcome.attempt.status, PaymentStatus::Paid);
            if outcome.transitioned {
                winners += 1;
                winner_paid_at = outcome.attempt.paid_at;
            }
        }

        assert_eq!(winners, 1);
        let stored = payments.get(77);
        assert_eq!(stored.status, PaymentStatus::Paid);
        // paid_at остаётся меткой выигравшего перехода
        assert_eq!(stored.paid_at, winner_paid_at);
        assert_eq!(bookings.sync_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn valid_callback_for_failed_attempt_is_conflict() {
        let payments = MemPayments::default();
        let bookings = MemBookings::default();
        payments.seed(8, 10, "300.00", PaymentStatus::Failed);
        let engine = engine(&payments, &bookings);

        let err = engine
            .process_result_notification(&callback("300.00", 8, RESULT_SECRET))
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::NotPending(8)));
        assert_eq!(payments.get(8).status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn bad_signature_does_not_unpay_paid_attempt() {
        let payments = MemPayments::default();
        let bookings = MemBookings::default();
        payments.seed(9, 10, "300.00", PaymentStatus::Paid);
        let engine = engine(&payments, &bookings);

        let mut params = callback("300.00", 9, RESULT_SECRET);
        params.signature = "deadbeef".to_string();
        let err = engine.process_result_notification(&params).await.unwrap_err();

        assert!(matches!(err, PaymentError::SignatureInvalid(9)));
        // Охрана status <> 'paid' не даёт аудиту затронуть оплату
        assert_eq!(payments.get(9).status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn fail_redirect_keeps_pending_and_never_clobbers_paid() {
        let payments = MemPayments::default();
        let bookings = MemBookings::default();
        payments.seed(11, 10, "300.00", PaymentStatus::Pending);
        payments.seed(12, 10, "300.00", PaymentStatus::Paid);
        let engine = engine(&payments, &bookings);

        engine.record_fail_redirect(11, "InvId=11").await.unwrap();
        assert_eq!(payments.get(11).status, PaymentStatus::Pending);
        assert_eq!(payments.get(11).raw_body.as_deref(), Some("InvId=11"));

        engine.record_fail_redirect(12, "InvId=12").await.unwrap();
        assert_eq!(payments.get(12).status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn booking_sync_failure_does_not_fail_reconciliation() {
        let payments = MemPayments::default();
        let bookings = MemBookings {
            fail_sync: true,
            ..Default::default()
        };
        payments.seed(77, 10, "300.00", PaymentStatus::Pending);
        bookings.seed(10);
        let engine = engine(&payments, &bookings);

        let outcome = engine
            .process_result_notification(&callback("300.00", 77, RESULT_SECRET))
            .await
            .unwrap();

        // Платёж зафиксирован, хотя синк брони упал
        assert!(outcome.transitioned);
        assert_eq!(payments.get(77).status, PaymentStatus::Paid);
        assert_eq!(bookings.get(10).payment_status, "pending");
    }
}
