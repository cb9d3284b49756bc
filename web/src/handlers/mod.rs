//! HTTP request handlers.

pub mod health;
pub mod stock;

pub use health::{health_check, metrics, readiness};
pub use stock::{batch_set_stock, get_stock, set_stock};
