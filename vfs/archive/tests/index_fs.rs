use std::collections::HashMap;
use std::sync::Arc;

use bfs_archive::{Fetch, IndexFs, IndexFsConfig};
use bfs_core::{ApiError, ErrorCode, FileFlag, FileSystem, FileType, READ_ONLY_MODE, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;

#[derive(Debug, Default)]
struct Served {
    files: HashMap<String, Bytes>,
    fetched: Mutex<Vec<String>>,
    sized: Mutex<Vec<String>>,
}

impl Served {
    fn with(mut self, path: &str, data: &[u8]) -> Self {
        self.files
            .insert(path.to_owned(), Bytes::copy_from_slice(data));
        self
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }
}

impl Fetch for Served {
    fn fetch(&self, path: &str) -> Result<Bytes> {
        self.fetched.lock().push(path.to_owned());
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| ApiError::enoent(path))
    }

    fn fetch_size(&self, path: &str) -> Result<u64> {
        self.sized.lock().push(path.to_owned());
        self.files
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| ApiError::enoent(path))
    }
}

fn listing() -> serde_json::Value {
    json!({
        "README.md": null,
        "src": { "lib.rs": null, "gone.rs": null, "empty": {} },
    })
}

fn served() -> Arc<Served> {
    Arc::new(
        Served::default()
            .with("README.md", b"# hello")
            .with("src/lib.rs", b"pub fn f() {}"),
    )
}

fn mount(source: Arc<Served>) -> IndexFs {
    IndexFs::new(IndexFsConfig::new(listing(), source)).unwrap()
}

#[test]
fn the_tree_comes_from_the_listing() {
    let fs = mount(served());
    assert_eq!(fs.readdir("/").unwrap(), vec!["README.md", "src"]);
    assert_eq!(fs.readdir("/src").unwrap(), vec!["lib.rs", "gone.rs", "empty"]);
    assert!(fs.readdir("/src/empty").unwrap().is_empty());

    let dir = fs.stat("/src", false).unwrap();
    assert_eq!(dir.file_type(), FileType::Directory);
    assert_eq!(dir.size, 4096);
    assert!(fs.is_read_only());
    assert_eq!(fs.listing(), listing());
}

#[test]
fn sizes_are_learned_without_fetching_contents() {
    let source = served();
    let fs = mount(source.clone());
    let stats = fs.stat("/README.md", false).unwrap();
    assert_eq!(stats.size, 7);
    assert_eq!(stats.permissions(), READ_ONLY_MODE);
    assert!(source.fetched().is_empty());

    fs.stat("/README.md", false).unwrap();
    assert_eq!(*source.sized.lock(), vec!["README.md"]);
}

#[test]
fn contents_are_fetched_once() {
    let source = served();
    let fs = mount(source.clone());
    assert_eq!(fs.read_file("/src/lib.rs", FileFlag::Read).unwrap(), b"pub fn f() {}");
    assert_eq!(fs.read_file("/src/lib.rs", FileFlag::Read).unwrap(), b"pub fn f() {}");
    assert_eq!(source.fetched(), vec!["src/lib.rs"]);

    fs.empty();
    fs.read_file("/src/lib.rs", FileFlag::Read).unwrap();
    assert_eq!(source.fetched().len(), 2);
}

#[test]
fn bad_paths_and_flags_are_refused() {
    let fs = mount(served());
    let notdir = fs.stat("/README.md/x", false).unwrap_err();
    assert_eq!(notdir.errno(), ErrorCode::Notdir);
    assert_eq!(fs.stat("/nope", false).unwrap_err().errno(), ErrorCode::Noent);
    assert_eq!(fs.readdir("/README.md").unwrap_err().errno(), ErrorCode::Notdir);
    assert_eq!(
        fs.open("/README.md", FileFlag::ReadWrite, 0o644).unwrap_err().errno(),
        ErrorCode::Perm
    );
    assert_eq!(
        fs.open("/src", FileFlag::Read, 0o644).unwrap_err().errno(),
        ErrorCode::Isdir
    );
    assert!(fs.mkdir("/new", 0o755).is_err());
}

#[test_log::test]
fn entries_missing_at_the_source_are_pruned() {
    let fs = mount(served());
    let err = fs.read_file("/src/gone.rs", FileFlag::Read).unwrap_err();
    assert_eq!(err.errno(), ErrorCode::Noent);
    assert_eq!(err.path(), Some("/src/gone.rs"));

    assert_eq!(fs.readdir("/src").unwrap(), vec!["lib.rs", "empty"]);
    assert_eq!(
        fs.listing(),
        json!({ "README.md": null, "src": { "lib.rs": null, "empty": {} } })
    );
    assert!(!fs.exists("/src/gone.rs"));
}

#[test]
fn preloaded_files_skip_the_source() {
    let source = served();
    let fs = mount(source.clone());
    fs.preload_file("/src/gone.rs", &b"local"[..]).unwrap();
    assert_eq!(fs.stat("/src/gone.rs", false).unwrap().size, 5);
    assert_eq!(fs.read_file("/src/gone.rs", FileFlag::Read).unwrap(), b"local");
    assert!(source.fetched().is_empty());
    assert!(source.sized.lock().is_empty());

    assert_eq!(
        fs.preload_file("/src", Bytes::new()).unwrap_err().errno(),
        ErrorCode::Isdir
    );
}

#[test]
fn prefetch_stops_at_the_first_missing_file() {
    let source = Arc::new(
        Served::default()
            .with("README.md", b"a")
            .with("src/lib.rs", b"b")
            .with("src/gone.rs", b"c"),
    );
    let fs = mount(source.clone());
    assert_eq!(fs.prefetch().unwrap(), 3);
    assert_eq!(fs.prefetch().unwrap(), 0);
    assert_eq!(source.fetched().len(), 3);

    let fs = mount(served());
    assert_eq!(fs.prefetch().unwrap_err().errno(), ErrorCode::Noent);
}

#[test]
fn prefixes_are_joined_with_relative_paths() {
    let source = Arc::new(Served::default().with("pkg/README.md", b"x"));
    let config = IndexFsConfig::new(json!({ "README.md": null }), source.clone())
        .with_prefix("pkg/")
        .with_name("cdn");
    let fs = IndexFs::new(config).unwrap();
    assert_eq!(fs.name(), "IndexFS:cdn");
    assert_eq!(fs.read_file("/README.md", FileFlag::Read).unwrap(), b"x");
    assert_eq!(source.fetched(), vec!["pkg/README.md"]);
}
