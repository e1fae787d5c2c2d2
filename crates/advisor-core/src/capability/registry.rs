//! Capability registry
//!
//! Holds the capabilities visible to one agent, grouped under a name
//! (`AgentsPlugin`, `MCP`). The registry is built once when the agent is
//! created and only read afterwards, so it is shared behind an `Arc`
//! without locking.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{Capability, CapabilityDescriptor};

/// Named group of capabilities
pub struct CapabilityGroup {
    name: String,
    capabilities: Vec<Arc<dyn Capability>>,
}

impl CapabilityGroup {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &[Arc<dyn Capability>] {
        &self.capabilities
    }
}

/// A capability found by name, together with the group that owns it
pub struct ResolvedCapability<'a> {
    pub group: &'a str,
    pub capability: &'a Arc<dyn Capability>,
}

/// Registry for the capabilities of one agent
#[derive(Default)]
pub struct CapabilityRegistry {
    groups: Vec<CapabilityGroup>,
    /// name -> (group index, position within group)
    index: HashMap<String, (usize, usize)>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register capabilities under a group name
    ///
    /// An empty list is a no-op. A name that is already registered is
    /// replaced by the newer capability.
    pub fn register(&mut self, group: &str, capabilities: Vec<Arc<dyn Capability>>) {
        if capabilities.is_empty() {
            return;
        }

        for capability in capabilities {
            let name = capability.name().to_string();
            if self.index.contains_key(&name) {
                warn!(capability = %name, group, "Duplicate capability name, replacing");
                self.remove(&name);
            }

            let group_idx = match self.groups.iter().position(|g| g.name == group) {
                Some(idx) => idx,
                None => {
                    self.groups.push(CapabilityGroup {
                        name: group.to_string(),
                        capabilities: Vec::new(),
                    });
                    self.groups.len() - 1
                }
            };

            let slot = self.groups[group_idx].capabilities.len();
            self.groups[group_idx].capabilities.push(capability);
            self.index.insert(name.clone(), (group_idx, slot));
            debug!(capability = %name, group, "Registered capability");
        }
    }

    fn remove(&mut self, name: &str) {
        if let Some((group_idx, slot)) = self.index.remove(name) {
            self.groups[group_idx].capabilities.remove(slot);
            self.reindex();
        }
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (group_idx, group) in self.groups.iter().enumerate() {
            for (slot, capability) in group.capabilities.iter().enumerate() {
                self.index
                    .insert(capability.name().to_string(), (group_idx, slot));
            }
        }
    }

    /// Look up a capability by function name
    pub fn lookup(&self, name: &str) -> Option<ResolvedCapability<'_>> {
        let &(group_idx, slot) = self.index.get(name)?;
        let group = &self.groups[group_idx];
        Some(ResolvedCapability {
            group: &group.name,
            capability: &group.capabilities[slot],
        })
    }

    /// Descriptors for every capability, in registration order
    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.groups
            .iter()
            .flat_map(|g| g.capabilities.iter().map(|c| c.descriptor()))
            .collect()
    }

    pub fn groups(&self) -> &[CapabilityGroup] {
        &self.groups
    }

    /// Capability names, in registration order
    pub fn names(&self) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|g| g.capabilities.iter().map(|c| c.name().to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
