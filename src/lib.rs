pub mod auth;
pub mod engine;
pub mod http;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod reconcile;
pub mod slot;
pub mod wal;
