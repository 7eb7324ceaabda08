//! Notification channels for backup reports.
//!
//! Each channel implements [`Notifier`] and turns a finished [`Report`] into
//! a [`DeliveryResult`]. The [`Dispatcher`] runs every enabled channel in
//! parallel and never lets a channel failure escape as an error.
//!
//! # Architecture
//!
//! ```text
//! report -> template/ -> Dispatcher -> email    (relay | sendmail | forwarder)
//!                                   -> telegram (personal | centralized)
//!                                   -> gotify
//!                                   -> webhook  (one task per endpoint)
//! ```
//!
//! HTTP channels share the retry, signing and masking helpers in [`http`];
//! subprocess channels go through the [`process::ProcessRunner`] seam.
//!
//! [`Report`]: crate::report::Report

pub mod dispatcher;
pub mod email;
pub mod forwarder;
pub mod gotify;
pub mod http;
pub mod mime;
pub mod process;
pub mod relay;
pub mod result;
pub mod sendmail;
pub mod telegram;
pub mod traits;
pub mod webhook;

pub use dispatcher::Dispatcher;
pub use email::EmailNotifier;
pub use gotify::GotifyNotifier;
pub use result::{DeliveryMethod, DeliveryResult};
pub use telegram::TelegramNotifier;
pub use traits::Notifier;
pub use webhook::WebhookNotifier;

#[cfg(test)]
mod tests;
