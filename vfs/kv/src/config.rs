use bfs_core::{ApiError, Result};

/// Largest lookup cache an engine will allocate up front.
pub const MAX_CACHE_SIZE: usize = 1 << 20;

#[derive(Clone, Debug)]
pub struct AsyncKvConfig {
    /// Number of path to inode-key lookups kept by the engine. Zero disables
    /// the cache.
    pub cache_size: usize,
}

impl Default for AsyncKvConfig {
    fn default() -> Self {
        Self { cache_size: 100 }
    }
}

impl AsyncKvConfig {
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_size > MAX_CACHE_SIZE {
            return Err(ApiError::einval(format!(
                "Cache size {} exceeds the limit of {MAX_CACHE_SIZE} entries.",
                self.cache_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfs_core::ErrorCode;

    #[test]
    fn oversized_caches_are_rejected() {
        assert!(AsyncKvConfig::default().validate().is_ok());
        assert!(AsyncKvConfig::default().with_cache_size(0).validate().is_ok());
        assert!(
            AsyncKvConfig::default()
                .with_cache_size(MAX_CACHE_SIZE)
                .validate()
                .is_ok()
        );
        let err = AsyncKvConfig::default()
            .with_cache_size(usize::MAX)
            .validate()
            .unwrap_err();
        assert_eq!(err.errno(), ErrorCode::Inval);
    }
}
