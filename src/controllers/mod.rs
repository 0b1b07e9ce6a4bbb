pub mod studios;
pub mod bookings;
pub mod payment;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(studios::routes())
        .merge(bookings::routes())
        .merge(payment::routes())
}
