pub mod auth;
pub mod health_handlers;
pub mod session_handlers;
pub mod storage_handlers;
