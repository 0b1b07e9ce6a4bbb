pub mod user;
pub mod studio;
pub mod booking;
pub mod payment;

pub use user::User;
pub use studio::{Room, Studio};
pub use booking::Booking;
pub use payment::{PaymentAttempt, PaymentError, PaymentStatus};
