use std::sync::Arc;

use bfs_core::{ApiError, FileSystem, FileSystemAsync, Result};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct AsyncMirrorConfig {
    /// Serves every request. Must be synchronous.
    pub sync: Arc<dyn FileSystem>,
    /// Receives the replicated mutations.
    pub backing: Arc<dyn FileSystemAsync>,
    /// Copy the backing store into the mirror before serving requests.
    pub populate: bool,
}

impl AsyncMirrorConfig {
    pub fn new(sync: Arc<dyn FileSystem>, backing: Arc<dyn FileSystemAsync>) -> Self {
        Self {
            sync,
            backing,
            populate: true,
        }
    }

    pub fn with_populate(mut self, populate: bool) -> Self {
        self.populate = populate;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.sync.supports_synch() {
            return Err(ApiError::einval(
                "The mirror of an AsyncMirror must be a synchronous file system.",
            ));
        }
        if self.sync.is_read_only() || self.backing.is_read_only() {
            return Err(ApiError::einval(
                "AsyncMirror cannot replicate to or from a read-only file system.",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct WorkerFsConfig {
    /// Bound of the request and reply channels built by [`channel`](crate::channel).
    pub channel_capacity: usize,
}

impl Default for WorkerFsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl WorkerFsConfig {
    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(ApiError::einval("Channel capacity must be at least 1."));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct OverlayFsConfig {
    /// Receives every modification and the deletion log.
    pub writable: Arc<dyn FileSystem>,
    /// Initial content. Never written to.
    pub readable: Arc<dyn FileSystem>,
}

impl OverlayFsConfig {
    pub fn new(writable: Arc<dyn FileSystem>, readable: Arc<dyn FileSystem>) -> Self {
        Self { writable, readable }
    }

    pub fn validate(&self) -> Result<()> {
        if self.writable.is_read_only() {
            return Err(ApiError::einval("Writable file system must be writable."));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfs_core::{AsyncFsFromSync, ErrorCode};
    use bfs_kv::InMemoryFileSystem;

    fn memory() -> Arc<dyn FileSystem> {
        Arc::new(InMemoryFileSystem::in_memory().unwrap())
    }

    #[test]
    fn mirror_config_accepts_writable_pairs() {
        let backing: Arc<dyn FileSystemAsync> = Arc::new(AsyncFsFromSync::new(memory()));
        let config = AsyncMirrorConfig::new(memory(), backing);
        assert!(config.populate);
        assert!(config.validate().is_ok());
    }

    #[derive(Debug)]
    struct Sealed;

    impl FileSystem for Sealed {
        fn name(&self) -> String {
            "Sealed".to_owned()
        }

        fn is_read_only(&self) -> bool {
            true
        }

        fn supports_links(&self) -> bool {
            false
        }

        fn supports_props(&self) -> bool {
            false
        }
    }

    #[test]
    fn overlays_need_a_writable_upper_layer() {
        assert!(OverlayFsConfig::new(memory(), Arc::new(Sealed)).validate().is_ok());
        let err = OverlayFsConfig::new(Arc::new(Sealed), memory())
            .validate()
            .unwrap_err();
        assert_eq!(err.message(), "Error: EINVAL: Writable file system must be writable.");
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(WorkerFsConfig::default().validate().is_ok());
        let err = WorkerFsConfig::default()
            .with_channel_capacity(0)
            .validate()
            .unwrap_err();
        assert_eq!(err.errno(), ErrorCode::Inval);
    }
}
