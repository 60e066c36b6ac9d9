pub mod config;
pub mod engine;
pub mod export;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod provider;
pub mod refresher;
pub mod rooms;
pub mod session;
pub mod wal;
