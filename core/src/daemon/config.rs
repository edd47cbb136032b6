//! Daemon configuration

use std::path::PathBuf;

/// Configuration for a skiff node.
///
/// Components take a snapshot of what they need at construction; the
/// config is not consulted again afterwards.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// The local endpoint identifier, e.g. `dtn://alpha`.
    pub local_eid: String,

    /// Working directory holding the bundle blobs.
    /// If None, uses a default path in the user's data directory.
    pub workdir: Option<PathBuf>,

    /// Capacity cap for stored bundles in bytes.
    /// 0 means unbounded.
    pub max_storage_bytes: u64,

    /// Auto-connect interval in seconds.
    /// 0 disables auto-connect.
    pub auto_connect_interval_secs: u64,

    /// Write-buffer of the blob engine: how many bundle writes may be
    /// queued before `store` waits.
    pub buffer_limit: usize,

    /// Capacity of the event bus.
    pub event_channel_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            local_eid: "dtn://skiff".to_string(),
            workdir: None,
            max_storage_bytes: 0,
            auto_connect_interval_secs: 0,
            buffer_limit: 16,
            event_channel_capacity: 1000,
        }
    }
}

impl DaemonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local endpoint identifier.
    pub fn with_local_eid(mut self, eid: impl Into<String>) -> Self {
        self.local_eid = eid.into();
        self
    }

    /// Set the working directory.
    pub fn with_workdir(mut self, path: PathBuf) -> Self {
        self.workdir = Some(path);
        self
    }

    /// Set the storage capacity cap (0 = unbounded).
    pub fn with_max_storage(mut self, bytes: u64) -> Self {
        self.max_storage_bytes = bytes;
        self
    }

    /// Set the auto-connect interval (0 = disabled).
    pub fn with_auto_connect_interval(mut self, secs: u64) -> Self {
        self.auto_connect_interval_secs = secs;
        self
    }

    /// Set the blob engine write-buffer size.
    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = limit;
        self
    }

    /// Set the event bus capacity.
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Configuration for testing (small buffers, no auto-connect).
    pub fn for_testing() -> Self {
        Self {
            local_eid: "dtn://test".to_string(),
            workdir: None,
            max_storage_bytes: 10 * 1024 * 1024, // 10 MB
            auto_connect_interval_secs: 0,
            buffer_limit: 4,
            event_channel_capacity: 64,
        }
    }
}

/// Platform-appropriate default working directory.
pub fn default_workdir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("skiff").join("bundles"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.local_eid, "dtn://skiff");
        assert_eq!(config.max_storage_bytes, 0);
        assert_eq!(config.auto_connect_interval_secs, 0);
        assert!(config.buffer_limit > 0);
    }

    #[test]
    fn test_builder_pattern() {
        let config = DaemonConfig::new()
            .with_local_eid("dtn://alpha")
            .with_workdir(PathBuf::from("/tmp/skiff"))
            .with_max_storage(1024)
            .with_auto_connect_interval(30)
            .with_buffer_limit(8)
            .with_event_channel_capacity(256);

        assert_eq!(config.local_eid, "dtn://alpha");
        assert_eq!(config.workdir, Some(PathBuf::from("/tmp/skiff")));
        assert_eq!(config.max_storage_bytes, 1024);
        assert_eq!(config.auto_connect_interval_secs, 30);
        assert_eq!(config.buffer_limit, 8);
        assert_eq!(config.event_channel_capacity, 256);
    }

    #[test]
    fn test_testing_config() {
        let config = DaemonConfig::for_testing();
        assert_eq!(config.auto_connect_interval_secs, 0);
        assert_eq!(config.max_storage_bytes, 10 * 1024 * 1024);
    }
}
