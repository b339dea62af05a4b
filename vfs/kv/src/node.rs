//! Record layout shared by the sync and async engines.
//!
//! A directory inode's data record is its listing, a JSON object mapping
//! child name to the key of the child's inode record. The root inode is
//! stored under the fixed key `/`.

use bfs_core::{ApiError, DEFAULT_DIR_MODE, FileType, Inode, Result, now_ms};
use indexmap::IndexMap;

pub(crate) const ROOT_NODE_ID: &str = "/";

/// Attempts at finding an unused random key before giving up.
pub(crate) const MAX_ID_ATTEMPTS: usize = 5;

pub(crate) const EMPTY_LISTING: &[u8] = b"{}";

pub(crate) type DirListing = IndexMap<String, String>;

pub(crate) fn random_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn new_root_inode() -> Inode {
    let now = now_ms();
    Inode::new(
        random_id(),
        4096,
        DEFAULT_DIR_MODE | FileType::Directory.bits(),
        now,
        now,
        now,
    )
}

pub(crate) fn decode_listing(path: &str, data: &[u8]) -> Result<DirListing> {
    serde_json::from_slice(data).map_err(|_| ApiError::enoent(path))
}

pub(crate) fn encode_listing(listing: &DirListing) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(listing)?)
}

pub(crate) fn out_of_ids() -> ApiError {
    ApiError::eio("Unable to commit data to key-value store.")
}

/// True when `new_parent` is `old_path` or lies below it.
pub(crate) fn moves_into_itself(old_path: &str, new_parent: &str) -> bool {
    format!("{new_parent}/").starts_with(&format!("{old_path}/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn listing_keeps_insertion_order() {
        let mut listing = DirListing::new();
        listing.insert("b".to_owned(), "id-b".to_owned());
        listing.insert("a".to_owned(), "id-a".to_owned());
        let bytes = encode_listing(&listing).unwrap();
        assert_eq!(bytes, br#"{"b":"id-b","a":"id-a"}"#);
        assert_eq!(decode_listing("/", &bytes).unwrap(), listing);
    }

    #[test]
    fn corrupt_listing_reads_as_missing() {
        let err = decode_listing("/dir", b"not json").unwrap_err();
        assert_eq!(err.path(), Some("/dir"));
    }

    #[test]
    fn detects_moves_into_own_subtree() {
        assert!(moves_into_itself("/a", "/a"));
        assert!(moves_into_itself("/a", "/a/b"));
        assert!(!moves_into_itself("/a", "/ab"));
        assert!(!moves_into_itself("/a", "/"));
    }
}
