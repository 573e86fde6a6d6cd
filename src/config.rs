//! Runtime configuration shared by the controllers

use std::time::Duration;

use crate::{DEFAULT_FIELD_MANAGER, DEFAULT_RECONCILE_WAIT_SECS};

/// Knobs the reconcilers read on every pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Delay before a pass is repeated, after success or a retryable failure
    pub reconcile_wait: Duration,
    /// Field manager used for status writes and event reporting
    pub field_manager: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            reconcile_wait: Duration::from_secs(DEFAULT_RECONCILE_WAIT_SECS),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }
}

impl ReconcileConfig {
    /// Override the requeue delay
    pub fn with_reconcile_wait(mut self, wait: Duration) -> Self {
        self.reconcile_wait = wait;
        self
    }

    /// Override the field manager
    pub fn with_field_manager(mut self, manager: impl Into<String>) -> Self {
        self.field_manager = manager.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_wait_thirty_seconds() {
        let config = ReconcileConfig::default();
        assert_eq!(config.reconcile_wait, Duration::from_secs(30));
        assert_eq!(config.field_manager, "oam-runtime");
    }

    #[test]
    fn test_builder_overrides() {
        let config = ReconcileConfig::default()
            .with_reconcile_wait(Duration::from_secs(5))
            .with_field_manager("custom");
        assert_eq!(config.reconcile_wait, Duration::from_secs(5));
        assert_eq!(config.field_manager, "custom");
    }
}
