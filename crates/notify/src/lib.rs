//! Operator alerting for the collector and consumer processes.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable alert channels
//! - Log, webhook and in-memory notifier implementations
//! - Dispatcher that fans an alert out to every configured channel

pub mod dispatcher;
pub mod log;
pub mod memory;
pub mod traits;
pub mod webhook;

pub use dispatcher::Dispatcher;
pub use log::LogNotifier;
pub use memory::MemoryNotifier;
pub use traits::{Notification, Notifier, NotifyError};
pub use webhook::WebhookNotifier;
