use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use bfs_core::{ApiError, Result};

use crate::index::Fetch;

/// Configuration for a [`ZipFs`](crate::ZipFs).
#[derive(Clone, Debug, Default)]
pub struct ZipFsConfig {
    /// The whole archive.
    pub data: Bytes,
    /// Optional label appended to the file system name.
    pub name: String,
}

impl ZipFsConfig {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            name: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.data.is_empty() {
            return Err(ApiError::einval("ZipFS requires a non-empty archive buffer."));
        }
        Ok(())
    }
}

/// Configuration for an [`IsoFs`](crate::IsoFs).
#[derive(Clone, Debug, Default)]
pub struct IsoFsConfig {
    /// The whole disc image.
    pub data: Bytes,
    /// Optional label appended to the file system name.
    pub name: String,
}

impl IsoFsConfig {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            name: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        // The system area alone occupies the first 16 sectors.
        if self.data.len() < 17 * crate::iso::SECTOR_SIZE {
            return Err(ApiError::einval(
                "IsoFS image is too small to hold a volume descriptor.",
            ));
        }
        Ok(())
    }
}

/// Configuration for an [`IndexFs`](crate::IndexFs).
#[derive(Clone, Debug)]
pub struct IndexFsConfig {
    /// Nested JSON listing: objects are directories, `null` leaves are files.
    pub listing: Value,
    pub fetcher: Arc<dyn Fetch>,
    /// Prepended to each relative path handed to the fetcher.
    pub prefix: String,
    /// Optional label appended to the file system name.
    pub name: String,
}

impl IndexFsConfig {
    pub fn new(listing: Value, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            listing,
            fetcher,
            prefix: String::new(),
            name: String::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.listing.is_object() {
            return Err(ApiError::einval("Directory listing must be a JSON object."));
        }
        Ok(())
    }
}
