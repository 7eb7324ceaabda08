//! Notifier trait definition.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{DeliveryMethod, DeliveryResult};
use crate::error::NotifyError;
use crate::report::Report;

/// Uniform contract of a notification channel.
///
/// Implementations must be `Send + Sync` to be driven from spawned tasks.
/// Each channel manages its own retries and fallbacks internally.
///
/// # Example
///
/// ```ignore
/// use proxsave_notify::notify::{DeliveryResult, DeliveryMethod, Notifier};
///
/// struct Console;
///
/// #[async_trait]
/// impl Notifier for Console {
///     fn name(&self) -> &str { "console" }
///     fn notifier_type(&self) -> &str { "console" }
///     fn primary_method(&self) -> DeliveryMethod { DeliveryMethod::Webhook }
///     async fn send(&self, report: &Report, _cancel: &CancellationToken)
///         -> Result<DeliveryResult, NotifyError> {
///         println!("{}", report.hostname);
///         Ok(DeliveryResult::success("console", DeliveryMethod::Webhook))
///     }
/// }
/// ```
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name as shown in results (e.g. "email", "telegram").
    fn name(&self) -> &str;

    /// Channel kind (e.g. "email", "webhook").
    fn notifier_type(&self) -> &str;

    /// Method reported when the channel fails before choosing a transport.
    fn primary_method(&self) -> DeliveryMethod;

    /// Disabled channels are skipped by the dispatcher.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Whether a failure of this channel may abort the caller.
    ///
    /// Notification channels are never critical; the hook exists for
    /// channels embedded by a host process.
    fn is_critical(&self) -> bool {
        false
    }

    /// Deliver a report.
    ///
    /// # Arguments
    ///
    /// * `report` - The finished backup report
    /// * `cancel` - Observed at every suspension point
    ///
    /// # Returns
    ///
    /// * `Ok(DeliveryResult)` - Populated result, successful or not
    /// * `Err(NotifyError)` - Reserved for broken internal invariants
    async fn send(
        &self,
        report: &Report,
        cancel: &CancellationToken,
    ) -> Result<DeliveryResult, NotifyError>;
}

impl std::fmt::Debug for dyn Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("name", &self.name())
            .field("type", &self.notifier_type())
            .finish()
    }
}
