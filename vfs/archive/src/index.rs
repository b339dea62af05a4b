//! Read-only file system described by a nested JSON listing.
//!
//! The listing gives the tree shape only. File contents, and with them the
//! file sizes, come from a [`Fetch`] source the first time a file is
//! stat'ed or opened.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;

use bfs_core::{
    ActionType, ApiError, ErrorCode, File, FileFlag, FileIndex, FileSystem, IndexNode, NoSync,
    NoSyncFile, Result, Stats,
};

use crate::config::IndexFsConfig;

/// Source of file contents for an [`IndexFs`].
///
/// Paths are the file system path with its leading `/` replaced by the
/// configured prefix.
pub trait Fetch: fmt::Debug + Send + Sync + 'static {
    fn fetch(&self, path: &str) -> Result<Bytes>;

    /// Size of the file without its contents. Defaults to a full fetch.
    fn fetch_size(&self, path: &str) -> Result<u64> {
        self.fetch(path).map(|data| data.len() as u64)
    }
}

#[derive(Debug, Default)]
struct State {
    index: FileIndex<Stats>,
    /// Files whose size has been learned from the source.
    sized: HashSet<String>,
    contents: HashMap<String, Bytes>,
}

impl State {
    fn record(&mut self, path: &str, size: u64) {
        if let Some(stats) = self.index.file_data_mut(path) {
            stats.set_size(size);
            self.sized.insert(path.to_owned());
        }
    }

    fn forget(&mut self, path: &str) {
        self.index.remove_path(path);
        self.sized.remove(path);
        self.contents.remove(path);
    }
}

pub struct IndexFs {
    name: String,
    prefix: String,
    fetcher: Arc<dyn Fetch>,
    state: RwLock<State>,
}

impl IndexFs {
    pub const NAME: &'static str = "IndexFS";

    pub fn new(config: IndexFsConfig) -> Result<Self> {
        config.validate()?;
        let IndexFsConfig {
            listing,
            fetcher,
            prefix,
            name,
        } = config;
        let index = FileIndex::from_listing(&listing)?;
        tracing::debug!(
            name = %name,
            dirs = index.dir_count(),
            files = index.files().count(),
            "indexed directory listing"
        );
        Ok(Self {
            name,
            prefix,
            fetcher,
            state: RwLock::new(State {
                index,
                ..State::default()
            }),
        })
    }

    /// The current tree in the listing format it was built from. Entries
    /// found missing at the source are no longer part of it.
    pub fn listing(&self) -> Value {
        self.state.read().index.to_listing()
    }

    /// Seeds the contents of `path` so opening it does not hit the source.
    pub fn preload_file(&self, path: &str, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        let mut state = self.state.write();
        if state.index.resolve(path)?.is_dir() {
            return Err(ApiError::eisdir(path));
        }
        state.record(path, data.len() as u64);
        state.contents.insert(path.to_owned(), data);
        Ok(())
    }

    /// Fetches every file not yet held in memory and returns how many were
    /// fetched.
    pub fn prefetch(&self) -> Result<usize> {
        let pending: Vec<String> = {
            let state = self.state.read();
            state
                .index
                .files()
                .map(|(path, _)| path)
                .filter(|path| !state.contents.contains_key(path))
                .collect()
        };
        for path in &pending {
            self.contents(path)?;
        }
        Ok(pending.len())
    }

    /// Drops every cached file body. Learned sizes are kept.
    pub fn empty(&self) {
        self.state.write().contents.clear();
    }

    fn source_path(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path.trim_start_matches('/'))
    }

    /// Runs a request against the source, removing `path` from the tree when
    /// the source no longer has it.
    fn request<R>(
        &self,
        path: &str,
        call: impl FnOnce(&dyn Fetch, &str) -> Result<R>,
    ) -> Result<R> {
        let source = self.source_path(path);
        call(self.fetcher.as_ref(), &source).map_err(|err| {
            if err.errno() == ErrorCode::Noent {
                tracing::warn!(path, "listed file is missing at the source");
                self.state.write().forget(path);
                ApiError::enoent(path)
            } else {
                err
            }
        })
    }

    fn contents(&self, path: &str) -> Result<(Stats, Bytes)> {
        {
            let state = self.state.read();
            let stats = file_stats(&state.index, path)?;
            if let Some(data) = state.contents.get(path) {
                return Ok((stats, data.clone()));
            }
        }
        let data = self.request(path, |fetcher, source| fetcher.fetch(source))?;
        tracing::trace!(path, size = data.len(), "fetched file");
        let mut state = self.state.write();
        state.record(path, data.len() as u64);
        state.contents.insert(path.to_owned(), data.clone());
        let stats = file_stats(&state.index, path)?;
        Ok((stats, data))
    }
}

fn file_stats(index: &FileIndex<Stats>, path: &str) -> Result<Stats> {
    match index.resolve(path)? {
        IndexNode::File(file) => Ok(file.data().clone()),
        IndexNode::Dir(_) => Err(ApiError::eisdir(path)),
    }
}

impl fmt::Debug for IndexFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexFs")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("fetcher", &self.fetcher)
            .finish()
    }
}

impl FileSystem for IndexFs {
    fn name(&self) -> String {
        if self.name.is_empty() {
            Self::NAME.to_owned()
        } else {
            format!("{}:{}", Self::NAME, self.name)
        }
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

    fn stat(&self, path: &str, _is_lstat: bool) -> Result<Stats> {
        {
            let state = self.state.read();
            match state.index.resolve(path)? {
                IndexNode::Dir(dir) => return Ok(dir.stats()),
                IndexNode::File(file) if state.sized.contains(path) => {
                    return Ok(file.data().clone());
                }
                IndexNode::File(_) => {}
            }
        }
        let size = self.request(path, |fetcher, source| fetcher.fetch_size(source))?;
        let mut state = self.state.write();
        state.record(path, size);
        file_stats(&state.index, path)
    }

    fn open(&self, path: &str, flag: FileFlag, _mode: u16) -> Result<Box<dyn File>> {
        if flag.is_writeable() {
            return Err(ApiError::eperm(path));
        }
        match flag.path_exists_action() {
            ActionType::ThrowException | ActionType::TruncateFile => {
                // Still report a missing or directory path before EEXIST.
                file_stats(&self.state.read().index, path)?;
                Err(ApiError::eexist(path))
            }
            ActionType::Nop => {
                let (stats, data) = self.contents(path)?;
                let file = NoSyncFile::new(NoSync, path, flag, stats, data.to_vec())?;
                Ok(Box::new(file))
            }
            ActionType::CreateFile => Err(ApiError::einval("Invalid FileFlag object.")),
        }
    }

    fn readdir(&self, path: &str) -> Result<Vec<String>> {
        match self.state.read().index.resolve(path)? {
            IndexNode::Dir(dir) => Ok(dir.listing()),
            IndexNode::File(_) => Err(ApiError::enotdir(path)),
        }
    }
}
