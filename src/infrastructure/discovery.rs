//! Instance discovery from operator configuration.
//!
//! Accounts are described in `[[instances]]`; an entry is usable when its
//! client version is in the version table and its data directory exists.

use crate::domain::{DiscoveredInstance, InstanceConfig, InstanceDiscovery, Result, VersionTable};

pub struct ConfiguredDiscovery {
    instances: Vec<InstanceConfig>,
}

impl ConfiguredDiscovery {
    #[must_use]
    pub const fn new(instances: Vec<InstanceConfig>) -> Self {
        Self { instances }
    }
}

impl InstanceDiscovery for ConfiguredDiscovery {
    fn discover(&self, table: &VersionTable) -> Result<Vec<DiscoveredInstance>> {
        let found: Vec<DiscoveredInstance> = self
            .instances
            .iter()
            .filter(|entry| {
                if !table.supports(&entry.version) {
                    tracing::warn!(
                        owner_id = %entry.owner_id,
                        version = %entry.version,
                        "Skipping instance: version not in version table"
                    );
                    return false;
                }
                if !entry.source_dir.is_dir() {
                    tracing::warn!(
                        owner_id = %entry.owner_id,
                        source = %entry.source_dir.display(),
                        "Skipping instance: data directory not found"
                    );
                    return false;
                }
                true
            })
            .map(|entry| DiscoveredInstance {
                owner_id: entry.owner_id.clone(),
                display_name: if entry.display_name.trim().is_empty() {
                    entry.owner_id.clone()
                } else {
                    entry.display_name.clone()
                },
                version: entry.version.clone(),
                source_dir: entry.source_dir.clone(),
                key: entry.key.clone(),
            })
            .collect();

        tracing::debug!(
            configured = self.instances.len(),
            usable = found.len(),
            "Discovered instances"
        );

        Ok(found)
    }
}
