use std::sync::Arc;

use bfs_core::{ApiError, FileSystem, Result};

pub const DEFAULT_FIRST_FD: u32 = 100;

#[derive(Clone, Debug)]
pub struct FacadeConfig {
    /// Directory relative paths are resolved against.
    pub cwd: String,
    /// First descriptor handed out by `open`.
    pub first_fd: u32,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            cwd: "/".to_owned(),
            first_fd: DEFAULT_FIRST_FD,
        }
    }
}

impl FacadeConfig {
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_first_fd(mut self, first_fd: u32) -> Self {
        self.first_fd = first_fd;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.cwd.starts_with('/') {
            return Err(ApiError::einval(format!(
                "Working directory must be absolute: '{}'.",
                self.cwd
            )));
        }
        if self.cwd.contains('\0') {
            return Err(ApiError::einval("Path must be a string without null bytes."));
        }
        Ok(())
    }
}

/// Mount points applied by [`MountableFileSystem::with_config`](crate::MountableFileSystem::with_config),
/// in insertion order.
#[derive(Clone, Debug, Default)]
pub struct MountConfig {
    pub mounts: Vec<(String, Arc<dyn FileSystem>)>,
}

impl MountConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mount(mut self, mount_point: impl Into<String>, fs: Arc<dyn FileSystem>) -> Self {
        self.mounts.push((mount_point.into(), fs));
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (point, _) in &self.mounts {
            if point.is_empty() || point.contains('\0') {
                return Err(ApiError::einval(format!("Invalid mount point '{point}'.")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_cwd_is_rejected() {
        assert!(FacadeConfig::default().validate().is_ok());
        let err = FacadeConfig::default().with_cwd("home").validate().unwrap_err();
        assert_eq!(err.errno(), bfs_core::ErrorCode::Inval);
    }

    #[test]
    fn empty_mount_point_is_rejected() {
        let fs: Arc<dyn FileSystem> = Arc::new(bfs_kv::InMemoryFileSystem::in_memory().unwrap());
        assert!(MountConfig::new().with_mount("/a", fs.clone()).validate().is_ok());
        assert!(MountConfig::new().with_mount("", fs).validate().is_err());
    }
}
