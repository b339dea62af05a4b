//! Absolute path → node map used by read-only backends.
//!
//! Directories are stored by full path in a flat map; each directory keeps
//! an ordered listing of its children. File payloads live inside their
//! parent's listing, so a lookup is at most two map lookups.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::path;
use crate::stats::{FileType, READ_ONLY_MODE, Stats};
use crate::{ApiError, Result};

#[derive(Debug, Clone)]
pub struct FileInode<T> {
    data: T,
}

impl<T> FileInode<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn set_data(&mut self, data: T) {
        self.data = data;
    }

    pub fn into_data(self) -> T {
        self.data
    }
}

#[derive(Debug, Clone)]
enum Child<T> {
    File(FileInode<T>),
    Dir,
}

#[derive(Debug, Clone)]
pub struct DirInode<T> {
    data: Option<T>,
    listing: IndexMap<String, Child<T>>,
}

impl<T> Default for DirInode<T> {
    fn default() -> Self {
        Self {
            data: None,
            listing: IndexMap::new(),
        }
    }
}

impl<T> DirInode<T> {
    pub fn new(data: Option<T>) -> Self {
        Self {
            data,
            listing: IndexMap::new(),
        }
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Stats reported for directories that carry no metadata of their own.
    pub fn stats(&self) -> Stats {
        Stats::new(FileType::Directory, 4096, Some(READ_ONLY_MODE))
    }

    /// Child names, in insertion order.
    pub fn listing(&self) -> Vec<String> {
        self.listing.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.listing.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.listing.is_empty()
    }
}

/// An owned node, as inserted into or removed from the index.
#[derive(Debug, Clone)]
pub enum IndexEntry<T> {
    File(FileInode<T>),
    Dir(DirInode<T>),
}

impl<T> IndexEntry<T> {
    pub fn file(data: T) -> Self {
        IndexEntry::File(FileInode::new(data))
    }

    pub fn dir(data: Option<T>) -> Self {
        IndexEntry::Dir(DirInode::new(data))
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, IndexEntry::Dir(_))
    }
}

/// A borrowed node returned by lookups.
#[derive(Debug)]
pub enum IndexNode<'a, T> {
    File(&'a FileInode<T>),
    Dir(&'a DirInode<T>),
}

impl<T> Clone for IndexNode<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for IndexNode<'_, T> {}

impl<'a, T> IndexNode<'a, T> {
    pub fn is_file(&self) -> bool {
        matches!(self, IndexNode::File(_))
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, IndexNode::Dir(_))
    }

    /// Payload of the node: always present for files, optional for dirs.
    pub fn data(&self) -> Option<&'a T> {
        match self {
            IndexNode::File(f) => Some(f.data()),
            IndexNode::Dir(d) => d.data(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileIndex<T> {
    index: HashMap<String, DirInode<T>>,
}

impl<T> Default for FileIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FileIndex<T> {
    pub fn new() -> Self {
        let mut index = HashMap::new();
        index.insert("/".to_owned(), DirInode::default());
        Self { index }
    }

    /// Adds `entry` at `path`, creating missing parent directories.
    ///
    /// Returns `false` if a file already occupies the path. Adding a directory
    /// over an implicitly created one attaches the payload and keeps the
    /// existing children.
    pub fn add_path(&mut self, path: &str, entry: IndexEntry<T>) -> Result<bool> {
        if !path.starts_with('/') {
            return Err(ApiError::einval(format!(
                "Path must be absolute, got: {path}"
            )));
        }
        let path = path::normalize(path);
        Ok(self.insert(&path, entry))
    }

    /// Like [`add_path`](Self::add_path) but trusts `path` to already be
    /// absolute and normalized.
    pub fn add_path_fast(&mut self, path: &str, entry: IndexEntry<T>) -> bool {
        self.insert(path, entry)
    }

    fn insert(&mut self, path: &str, entry: IndexEntry<T>) -> bool {
        if path == "/" {
            return match entry {
                IndexEntry::Dir(dir) => {
                    let root = self.index.entry("/".to_owned()).or_default();
                    if root.data.is_none() {
                        root.data = dir.data;
                    }
                    true
                }
                IndexEntry::File(_) => false,
            };
        }

        let (parent, name) = path::split(path);
        if !self.index.contains_key(parent) {
            self.insert(parent, IndexEntry::Dir(DirInode::default()));
        }
        let Some(parent_dir) = self.index.get_mut(parent) else {
            // The parent path is occupied by a file.
            return false;
        };

        let existing = parent_dir
            .listing
            .get(name)
            .map(|child| matches!(child, Child::Dir));
        match (existing, entry) {
            (None, IndexEntry::File(file)) => {
                parent_dir.listing.insert(name.to_owned(), Child::File(file));
                true
            }
            (None, IndexEntry::Dir(dir)) => {
                parent_dir.listing.insert(name.to_owned(), Child::Dir);
                self.index.insert(path.to_owned(), dir);
                true
            }
            (Some(true), IndexEntry::Dir(dir)) => {
                if let Some(existing) = self.index.get_mut(path) {
                    if existing.data.is_none() {
                        existing.data = dir.data;
                    }
                }
                true
            }
            (Some(_), _) => false,
        }
    }

    /// Removes the node at `path` and, for directories, every descendant.
    pub fn remove_path(&mut self, path: &str) -> Option<IndexEntry<T>> {
        let (parent, name) = path::split(path);
        let child = self.index.get_mut(parent)?.listing.shift_remove(name)?;
        match child {
            Child::File(file) => Some(IndexEntry::File(file)),
            Child::Dir => {
                let dir = self.index.remove(path)?;
                self.prune_descendants(path, &dir);
                Some(IndexEntry::Dir(dir))
            }
        }
    }

    fn prune_descendants(&mut self, path: &str, dir: &DirInode<T>) {
        for (name, child) in &dir.listing {
            if let Child::Dir = child {
                let child_path = path::join(path, name);
                if let Some(sub) = self.index.remove(&child_path) {
                    self.prune_descendants(&child_path, &sub);
                }
            }
        }
    }

    /// Child names of the directory at `path`.
    pub fn ls(&self, path: &str) -> Option<Vec<String>> {
        self.index.get(path).map(DirInode::listing)
    }

    /// Direct lookup without walking intermediate directories.
    pub fn get_inode(&self, path: &str) -> Option<IndexNode<'_, T>> {
        if let Some(dir) = self.index.get(path) {
            return Some(IndexNode::Dir(dir));
        }
        let (parent, name) = path::split(path);
        match self.index.get(parent)?.listing.get(name)? {
            Child::File(file) => Some(IndexNode::File(file)),
            Child::Dir => self.index.get(path).map(IndexNode::Dir),
        }
    }

    /// Mutable access to the payload of the file at `path`.
    pub fn file_data_mut(&mut self, path: &str) -> Option<&mut T> {
        let (parent, name) = path::split(path);
        match self.index.get_mut(parent)?.listing.get_mut(name)? {
            Child::File(file) => Some(&mut file.data),
            Child::Dir => None,
        }
    }

    /// Walks `path` from the root one segment at a time.
    ///
    /// Fails with `ENOENT` at the first missing segment and `ENOTDIR` when a
    /// file stands where a directory is required.
    pub fn resolve(&self, path: &str) -> Result<IndexNode<'_, T>> {
        let mut current = String::from("/");
        let mut dir = self.index.get("/").ok_or_else(|| ApiError::enoent(path))?;
        let mut segments = path::segments(path).peekable();
        while let Some(seg) = segments.next() {
            match dir.listing.get(seg) {
                None => return Err(ApiError::enoent(path)),
                Some(Child::File(file)) => {
                    if segments.peek().is_some() {
                        return Err(ApiError::enotdir(path));
                    }
                    return Ok(IndexNode::File(file));
                }
                Some(Child::Dir) => {
                    current = path::join(&current, seg);
                    dir = self
                        .index
                        .get(&current)
                        .ok_or_else(|| ApiError::enoent(path))?;
                }
            }
        }
        Ok(IndexNode::Dir(dir))
    }

    /// Every file in the index with its absolute path.
    pub fn files(&self) -> impl Iterator<Item = (String, &T)> + '_ {
        self.index.iter().flat_map(|(dir_path, dir)| {
            dir.listing.iter().filter_map(move |(name, child)| match child {
                Child::File(f) => Some((path::join(dir_path, name), f.data())),
                Child::Dir => None,
            })
        })
    }

    /// Number of directories, root included.
    pub fn dir_count(&self) -> usize {
        self.index.len()
    }

    /// Builds an index from the nested JSON listing format: each key is a path
    /// segment, `null` marks a file and an object marks a directory.
    pub fn from_listing_with<F>(listing: &Value, mut make_file: F) -> Result<Self>
    where
        F: FnMut(&str) -> T,
    {
        let root = listing
            .as_object()
            .ok_or_else(|| ApiError::einval("Directory listing must be a JSON object."))?;
        let mut idx = Self::new();
        let mut queue: Vec<(String, &Map<String, Value>)> = vec![("/".to_owned(), root)];
        while let Some((pwd, tree)) = queue.pop() {
            for (name, children) in tree {
                let child_path = path::join(&pwd, name);
                match children {
                    Value::Null => {
                        let data = make_file(&child_path);
                        idx.add_path_fast(&child_path, IndexEntry::file(data));
                    }
                    Value::Object(sub) => {
                        idx.add_path_fast(&child_path, IndexEntry::dir(None));
                        queue.push((child_path, sub));
                    }
                    _ => {
                        return Err(ApiError::einval(format!(
                            "Invalid listing entry for '{child_path}'."
                        )));
                    }
                }
            }
        }
        Ok(idx)
    }

    /// Serializes the tree back into the nested JSON listing format.
    pub fn to_listing(&self) -> Value {
        Value::Object(self.listing_of("/"))
    }

    fn listing_of(&self, dir_path: &str) -> Map<String, Value> {
        let mut out = Map::new();
        if let Some(dir) = self.index.get(dir_path) {
            for (name, child) in &dir.listing {
                let value = match child {
                    Child::File(_) => Value::Null,
                    Child::Dir => Value::Object(self.listing_of(&path::join(dir_path, name))),
                };
                out.insert(name.clone(), value);
            }
        }
        out
    }
}

impl FileIndex<Stats> {
    /// Index for a listing whose file sizes are unknown until fetched.
    pub fn from_listing(listing: &Value) -> Result<Self> {
        Self::from_listing_with(listing, |_| {
            Stats::new(FileType::File, 0, Some(READ_ONLY_MODE))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use pretty_assertions::assert_eq;

    #[test]
    fn add_path_creates_parents() {
        let mut idx = FileIndex::new();
        assert!(idx.add_path("/a/b/c.txt", IndexEntry::file(1)).unwrap());
        assert_eq!(idx.ls("/"), Some(vec!["a".to_owned()]));
        assert_eq!(idx.ls("/a"), Some(vec!["b".to_owned()]));
        assert_eq!(idx.ls("/a/b"), Some(vec!["c.txt".to_owned()]));
        assert_eq!(idx.get_inode("/a/b/c.txt").and_then(|n| n.data()), Some(&1));
        assert!(idx.get_inode("/a/b").unwrap().is_dir());
    }

    #[test]
    fn conflicting_insert_is_refused() {
        let mut idx = FileIndex::new();
        assert!(idx.add_path("/f", IndexEntry::file(1)).unwrap());
        assert!(!idx.add_path("/f", IndexEntry::file(2)).unwrap());
        assert!(!idx.add_path("/f", IndexEntry::dir(None)).unwrap());
        assert!(idx.add_path("relative", IndexEntry::file(3)).is_err());
    }

    #[test]
    fn explicit_dir_after_implicit_keeps_children() {
        let mut idx = FileIndex::new();
        idx.add_path_fast("/d/x", IndexEntry::file(1));
        assert!(idx.add_path_fast("/d", IndexEntry::dir(Some(7))));
        assert_eq!(idx.ls("/d"), Some(vec!["x".to_owned()]));
        assert_eq!(idx.get_inode("/d").and_then(|n| n.data()), Some(&7));
    }

    #[test]
    fn resolve_fails_fast() {
        let mut idx = FileIndex::new();
        idx.add_path_fast("/a/file", IndexEntry::file(()));
        assert!(idx.resolve("/a/file").unwrap().is_file());
        assert_eq!(
            idx.resolve("/a/file/deeper").unwrap_err().errno(),
            ErrorCode::Notdir
        );
        assert_eq!(idx.resolve("/b/c").unwrap_err().errno(), ErrorCode::Noent);
        assert!(idx.resolve("/").unwrap().is_dir());
    }

    #[test]
    fn remove_path_prunes_descendants() {
        let mut idx = FileIndex::new();
        idx.add_path_fast("/a/b/c", IndexEntry::file(1));
        idx.add_path_fast("/a/d", IndexEntry::file(2));
        assert!(idx.remove_path("/a").unwrap().is_dir());
        assert!(idx.get_inode("/a").is_none());
        assert!(idx.get_inode("/a/b").is_none());
        assert_eq!(idx.dir_count(), 1);
        assert_eq!(idx.ls("/"), Some(vec![]));
    }

    #[test]
    fn listing_round_trips_in_order() {
        let listing: Value =
            serde_json::from_str(r#"{"README.md":null,"src":{"main.rs":null,"bin":{}},"z":null}"#)
                .unwrap();
        let idx = FileIndex::from_listing(&listing).unwrap();
        assert!(idx.get_inode("/src/main.rs").unwrap().is_file());
        assert!(idx.get_inode("/src/bin").unwrap().is_dir());
        assert_eq!(
            serde_json::to_string(&idx.to_listing()).unwrap(),
            r#"{"README.md":null,"src":{"main.rs":null,"bin":{}},"z":null}"#
        );

        let mut files: Vec<String> = idx.files().map(|(p, _)| p).collect();
        files.sort();
        assert_eq!(files, vec!["/README.md", "/src/main.rs", "/z"]);
    }

    #[test]
    fn file_payloads_can_be_updated_in_place() {
        let mut idx = FileIndex::new();
        idx.add_path_fast("/a/f", IndexEntry::file(1));
        idx.add_path_fast("/a/g", IndexEntry::file(2));
        *idx.file_data_mut("/a/f").unwrap() = 10;
        assert!(idx.file_data_mut("/a").is_none());
        assert!(idx.file_data_mut("/a/missing").is_none());
        assert_eq!(idx.resolve("/a/f").unwrap().data(), Some(&10));
        assert_eq!(idx.ls("/a"), Some(vec!["f".to_owned(), "g".to_owned()]));
    }

    #[test]
    fn listing_rejects_scalars() {
        let listing: Value = serde_json::from_str(r#"{"a":1}"#).unwrap();
        assert!(FileIndex::from_listing(&listing).is_err());
    }
}
