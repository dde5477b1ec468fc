pub mod audit;
pub mod calendar;
pub mod compactor;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod time;
pub mod validator;
pub mod wal;
pub mod wire;
