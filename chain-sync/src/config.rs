//! Subscriber configuration.

use std::time::Duration;

use crate::chain::Address;

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Address the wallet helper attributes outputs and events to.
    pub wallet_address: Address,
    /// Maximum age a block may have for its host announcements to be
    /// persisted. Must be non-zero.
    pub announcement_max_age: Duration,
    /// Intervals slept between retries of a failed chain update transaction.
    /// A batch is attempted `len() + 1` times; an empty list means a single
    /// attempt.
    pub retry_tx_intervals: Vec<Duration>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            wallet_address: Address::default(),
            announcement_max_age: Duration::from_secs(24 * 60 * 60),
            retry_tx_intervals: vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
        }
    }
}
