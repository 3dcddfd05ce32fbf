//! Host-version compatibility gate evaluated at `load` time, before a
//! sandbox child is ever spawned for a plugin.

use semver::Version;

use sandbox_types::PluginRecord;

use crate::error::HostError;

/// Checks a [`PluginRecord::min_host_version`] against the running host
/// platform version.
#[derive(Debug, Clone)]
pub struct VersionChecker {
    host_version: Version,
}

impl VersionChecker {
    pub fn new(host_version: Version) -> Self {
        Self { host_version }
    }

    /// The running host platform version this checker was built with.
    pub fn host_version(&self) -> &Version {
        &self.host_version
    }

    /// Reject a plugin whose declared minimum host version exceeds the one
    /// actually running.
    pub fn check(&self, record: &PluginRecord) -> Result<(), HostError> {
        if record.min_host_version > self.host_version {
            return Err(HostError::InvalidArgument(format!(
                "plugin '{}' requires host version {} or higher, but the running host is {}",
                record.id, record.min_host_version, self.host_version
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_types::PluginId;

    fn record(min_host_version: Version) -> PluginRecord {
        PluginRecord {
            id: PluginId::new("demo-automation").unwrap(),
            version: Version::new(1, 0, 0),
            declared_capabilities: vec![],
            developer_id: "dev-1".to_string(),
            min_host_version,
            content_digest: "abc".to_string(),
        }
    }

    #[test]
    fn accepts_plugin_requiring_an_older_host() {
        let checker = VersionChecker::new(Version::new(2, 0, 0));
        assert!(checker.check(&record(Version::new(1, 5, 0))).is_ok());
    }

    #[test]
    fn rejects_plugin_requiring_a_newer_host() {
        let checker = VersionChecker::new(Version::new(1, 0, 0));
        let result = checker.check(&record(Version::new(2, 0, 0)));
        assert!(matches!(result, Err(HostError::InvalidArgument(_))));
    }

    #[test]
    fn accepts_exact_match() {
        let checker = VersionChecker::new(Version::new(1, 4, 0));
        assert!(checker.check(&record(Version::new(1, 4, 0))).is_ok());
    }
}
