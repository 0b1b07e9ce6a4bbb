pub mod payment_repo;
pub mod booking_repo;

pub use booking_repo::{BookingPaymentWriter, BookingReader, PgBookingStore};
pub use payment_repo::{PaymentRepository, PgPaymentRepository};
