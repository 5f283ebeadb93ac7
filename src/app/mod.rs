pub mod cart_store;
pub mod kv_store;
pub mod model;
pub mod navigation;
pub mod notify;
pub mod ownership_store;
pub mod payment;
pub mod pending;
pub mod progress_store;
pub mod purchase;
pub mod recent_store;
pub mod storefront;
