//! Hook Dispatch: maps webhook deliveries to registered actions.

pub mod actions;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod notify;
pub mod server;
