// src/lib.rs
//! proxsave-notify - Backup report notifications for Proxmox VE and PBS hosts.

pub mod cli;
pub mod config;
pub mod error;
pub mod notify;
pub mod report;
pub mod template;

// Re-export commonly used types
pub use cli::LogFormat;
pub use config::Config;
pub use error::{ConfigError, NotifyError};
pub use notify::{DeliveryMethod, DeliveryResult, Dispatcher, Notifier};
pub use report::Report;
