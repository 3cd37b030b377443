//! The per-agent resource ledger
//!
//! Invariant enforced by every mutation: `available + offered + used ==
//! total`, entry-for-entry by name, role, and reservation metadata. A
//! mutation that cannot hold the invariant fails with no change applied.

use arbor_types::{ResourceError, ResourceSet};

/// A reservation transform applied to an agent's available pool
///
/// `Reserve` carries the desired dynamically reserved set; its unreserved
/// equivalent is withdrawn from `available` and the reserved form put
/// back. `Unreserve` is the inverse.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceOperation {
    Reserve { resources: ResourceSet },
    Unreserve { resources: ResourceSet },
}

/// A point-in-time copy of one agent's partition
#[derive(Debug, Clone, PartialEq)]
pub struct AgentPartition {
    pub total: ResourceSet,
    pub available: ResourceSet,
    pub offered: ResourceSet,
    pub used: ResourceSet,
}

impl AgentPartition {
    /// Whether `available + offered + used == total` as multisets
    pub fn conserved(&self) -> bool {
        let sum = self.available.merge(&self.offered).merge(&self.used);
        sum.contains(&self.total) && self.total.contains(&sum)
    }
}

/// One agent's authoritative resource partition
#[derive(Debug)]
pub struct AgentLedger {
    total: ResourceSet,
    available: ResourceSet,
    offered: ResourceSet,
    used: ResourceSet,
}

impl AgentLedger {
    /// A fresh ledger: everything available, nothing offered or used
    pub fn new(total: ResourceSet) -> Self {
        Self {
            available: total.clone(),
            offered: ResourceSet::new(),
            used: ResourceSet::new(),
            total,
        }
    }

    pub fn total(&self) -> &ResourceSet {
        &self.total
    }

    pub fn available(&self) -> &ResourceSet {
        &self.available
    }

    pub fn offered(&self) -> &ResourceSet {
        &self.offered
    }

    pub fn used(&self) -> &ResourceSet {
        &self.used
    }

    pub fn partition(&self) -> AgentPartition {
        AgentPartition {
            total: self.total.clone(),
            available: self.available.clone(),
            offered: self.offered.clone(),
            used: self.used.clone(),
        }
    }

    /// Move resources from available to offered
    pub fn offer(&mut self, resources: &ResourceSet) -> Result<(), ResourceError> {
        let available = self.available.checked_sub(resources)?;
        self.available = available;
        self.offered = self.offered.merge(resources);
        debug_assert!(self.partition().conserved());
        Ok(())
    }

    /// Return declined or rescinded offer resources from offered to available
    pub fn recover(&mut self, resources: &ResourceSet) -> Result<(), ResourceError> {
        let offered = self.offered.checked_sub(resources)?;
        self.offered = offered;
        self.available = self.available.merge(resources);
        debug_assert!(self.partition().conserved());
        Ok(())
    }

    /// Return finished-task resources from used to available
    pub fn release_used(&mut self, resources: &ResourceSet) -> Result<(), ResourceError> {
        let used = self.used.checked_sub(resources)?;
        self.used = used;
        self.available = self.available.merge(resources);
        debug_assert!(self.partition().conserved());
        Ok(())
    }

    /// Move resources from offered to used (an accepted offer's task grant)
    pub fn mark_used(&mut self, resources: &ResourceSet) -> Result<(), ResourceError> {
        let offered = self.offered.checked_sub(resources)?;
        self.offered = offered;
        self.used = self.used.merge(resources);
        debug_assert!(self.partition().conserved());
        Ok(())
    }

    /// Apply reservation transforms to the available pool
    ///
    /// Transactional: all operations apply or none do. Both `available`
    /// and `total` are rewritten so the partition stays entry-for-entry.
    pub fn update_available(&mut self, operations: &[ResourceOperation]) -> Result<(), ResourceError> {
        let mut available = self.available.clone();
        let mut total = self.total.clone();
        for operation in operations {
            match operation {
                ResourceOperation::Reserve { resources } => {
                    let target = resources.flatten_unreserved();
                    available = available.checked_sub(&target)?.merge(resources);
                    total = total.checked_sub(&target)?.merge(resources);
                }
                ResourceOperation::Unreserve { resources } => {
                    let unreserved = resources.flatten_unreserved();
                    available = available.checked_sub(resources)?.merge(&unreserved);
                    total = total.checked_sub(resources)?.merge(&unreserved);
                }
            }
        }
        self.available = available;
        self.total = total;
        debug_assert!(self.partition().conserved());
        Ok(())
    }
}
