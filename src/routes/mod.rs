use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub mod checkout;
pub mod health;
pub mod invoices;
pub mod jobs;
pub mod payments;
pub mod tenancies;
pub mod webhooks;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(checkout::router())
        .merge(webhooks::router())
        .merge(tenancies::router())
        .merge(invoices::router())
        .merge(payments::router())
        .merge(jobs::router())
}
