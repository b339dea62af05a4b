//! The sync and async engines must fail the same way for the same call.

use bfs_core::{DEFAULT_DIR_MODE, ErrorCode, FileSystem, FileSystemAsync};
use bfs_kv::{
    AsyncKeyValueFileSystem, AsyncKvConfig, InMemoryAsyncStore, InMemoryFileSystem,
    MAX_CACHE_SIZE,
};
use pretty_assertions::assert_eq;

async fn engines() -> (InMemoryFileSystem, AsyncKeyValueFileSystem<InMemoryAsyncStore>) {
    let sync = InMemoryFileSystem::in_memory().unwrap();
    let asynchronous =
        AsyncKeyValueFileSystem::new(InMemoryAsyncStore::new(), AsyncKvConfig::default())
            .await
            .unwrap();
    (sync, asynchronous)
}

#[tokio::test]
async fn renames_check_the_source_before_the_target() {
    let (sync, asynchronous) = engines().await;
    let cases = [
        ("/missing", "/missing/x", ErrorCode::Noent),
        ("/d", "/d/inner", ErrorCode::Busy),
        ("/d", "/d/sub/deeper", ErrorCode::Busy),
    ];
    FileSystem::mkdir(&sync, "/d", DEFAULT_DIR_MODE).unwrap();
    FileSystemAsync::mkdir(&asynchronous, "/d", DEFAULT_DIR_MODE)
        .await
        .unwrap();

    for (from, to, errno) in cases {
        let sync_err = FileSystem::rename(&sync, from, to).unwrap_err();
        let async_err = FileSystemAsync::rename(&asynchronous, from, to)
            .await
            .unwrap_err();
        assert_eq!(sync_err.errno(), errno, "sync rename {from} -> {to}");
        assert_eq!(async_err.errno(), errno, "async rename {from} -> {to}");
        assert_eq!(sync_err.path(), async_err.path());
    }
}

#[tokio::test]
async fn oversized_lookup_caches_are_refused() {
    let config = AsyncKvConfig::default().with_cache_size(MAX_CACHE_SIZE + 1);
    let err = AsyncKeyValueFileSystem::new(InMemoryAsyncStore::new(), config)
        .await
        .unwrap_err();
    assert_eq!(err.errno(), ErrorCode::Inval);
}
