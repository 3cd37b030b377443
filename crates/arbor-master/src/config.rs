//! Master configuration

use arbor_authz::Acls;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_allocation_interval_secs() -> f64 {
    1.0
}

/// Configuration for a [`Master`](crate::Master)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Seconds between periodic allocation passes
    #[serde(default = "default_allocation_interval_secs")]
    pub allocation_interval_secs: f64,

    /// Operator ACLs governing reserve and unreserve
    #[serde(default)]
    pub acls: Acls,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            allocation_interval_secs: default_allocation_interval_secs(),
            acls: Acls::default(),
        }
    }
}

impl MasterConfig {
    pub fn allocation_interval(&self) -> Duration {
        Duration::from_secs_f64(self.allocation_interval_secs.max(0.0))
    }
}
