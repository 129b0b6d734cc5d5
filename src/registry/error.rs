//! Registry error types
//!
//! Error types for subscription registry operations. Both are programmer
//! errors and are returned synchronously to the call site.

use thiserror::Error;

use super::entry::SubscriptionId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Pattern is neither a valid exact channel nor a valid regex
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Handle was never issued or has already been unsubscribed
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),
}
