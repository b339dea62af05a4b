use std::io::{Cursor, Write};
use std::sync::Arc;

use bfs_archive::{ZipFs, ZipFsConfig};
use bfs_core::{DEFAULT_FILE_MODE, ErrorCode, FileFlag, FileSystem};
use bfs_frontend::{Facade, MountConfig, MountableFileSystem};
use bfs_kv::InMemoryFileSystem;
use pretty_assertions::assert_eq;
use zip::write::SimpleFileOptions;

fn memory() -> Arc<dyn FileSystem> {
    Arc::new(InMemoryFileSystem::in_memory().unwrap())
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[test]
fn requests_reach_the_mounted_backend_relative_to_the_mount_point() {
    let tree = MountableFileSystem::new().unwrap();
    let data = memory();
    tree.mount("/mnt/a", data.clone()).unwrap();

    tree.write_file("/mnt/a/x", b"routed", FileFlag::Write, DEFAULT_FILE_MODE)
        .unwrap();
    assert_eq!(data.read_file("/x", FileFlag::Read).unwrap(), b"routed");
    assert_eq!(tree.stat("/mnt/a/x", false).unwrap().size, 6);
    assert_eq!(tree.realpath("/mnt/a/x").unwrap(), "/mnt/a/x");
    assert_eq!(tree.mount_points(), vec!["/mnt/a"]);
}

#[test]
fn listings_include_mount_point_directories() {
    let tree = MountableFileSystem::new().unwrap();
    tree.mount("/mnt/a", memory()).unwrap();
    tree.write_file("/top", b"", FileFlag::Write, DEFAULT_FILE_MODE)
        .unwrap();
    tree.write_file("/mnt/a/inner", b"", FileFlag::Write, DEFAULT_FILE_MODE)
        .unwrap();

    assert_eq!(sorted(tree.readdir("/").unwrap()), vec!["mnt", "top"]);
    assert_eq!(tree.readdir("/mnt").unwrap(), vec!["a"]);
    assert_eq!(tree.readdir("/mnt/a").unwrap(), vec!["inner"]);
}

#[test]
fn mount_points_are_unique_and_unmount_prunes_empty_parents() {
    let tree = MountableFileSystem::new().unwrap();
    tree.mount("/mnt/a", memory()).unwrap();
    let err = tree.mount("mnt/a/", memory()).unwrap_err();
    assert_eq!(err.errno(), ErrorCode::Inval);
    assert_eq!(
        err.message(),
        "Error: EINVAL: Mount point /mnt/a is already taken."
    );

    tree.umount("/mnt/a").unwrap();
    assert!(tree.readdir("/").unwrap().is_empty());
    let err = tree.umount("/mnt/a").unwrap_err();
    assert_eq!(
        err.message(),
        "Error: EINVAL: Mount point /mnt/a is already unmounted."
    );
}

#[test]
fn unmount_keeps_parents_that_hold_other_entries() {
    let tree = MountableFileSystem::new().unwrap();
    tree.mount("/mnt/a", memory()).unwrap();
    tree.mount("/mnt/b", memory()).unwrap();
    tree.umount("/mnt/a").unwrap();
    assert_eq!(tree.readdir("/mnt").unwrap(), vec!["b"]);
}

#[test]
fn directories_holding_mount_points_cannot_be_removed() {
    let tree = MountableFileSystem::new().unwrap();
    tree.mount("/mnt/a", memory()).unwrap();
    assert_eq!(tree.rmdir("/mnt").unwrap_err().errno(), ErrorCode::Notempty);
    assert_eq!(tree.rmdir("/mnt/a").unwrap_err().errno(), ErrorCode::Notempty);
}

#[test]
fn errors_name_the_caller_visible_path() {
    let tree = MountableFileSystem::new().unwrap();
    tree.mount("/mnt/a", memory()).unwrap();
    let err = tree.read_file("/mnt/a/missing", FileFlag::Read).unwrap_err();
    assert_eq!(err.errno(), ErrorCode::Noent);
    assert_eq!(err.path(), Some("/mnt/a/missing"));
    assert!(err.message().ends_with("'/mnt/a/missing'"));
}

#[test]
fn rename_across_mounts_copies_and_preserves_permissions() {
    let tree = MountableFileSystem::new().unwrap();
    let data = memory();
    tree.mount("/mnt/a", data.clone()).unwrap();
    tree.write_file("/mnt/a/x", b"moving", FileFlag::Write, 0o600)
        .unwrap();

    tree.rename("/mnt/a/x", "/y").unwrap();
    assert!(!data.exists("/x"));
    assert_eq!(tree.read_file("/y", FileFlag::Read).unwrap(), b"moving");
    assert_eq!(tree.stat("/y", false).unwrap().permissions(), 0o600);
}

#[test]
fn rename_within_a_mount_stays_in_the_backend() {
    let tree = MountableFileSystem::new().unwrap();
    let data = memory();
    tree.mount("/mnt/a", data.clone()).unwrap();
    tree.mkdir("/mnt/a/dir", 0o755).unwrap();
    tree.rename("/mnt/a/dir", "/mnt/a/moved").unwrap();
    assert!(data.stat("/moved", false).unwrap().is_directory());

    let err = tree.rename("/mnt/a/gone", "/mnt/a/other").unwrap_err();
    assert_eq!(err.path(), Some("/mnt/a/gone"));
}

#[test]
fn nested_mounts_prefer_the_longest_match() {
    let tree = MountableFileSystem::new().unwrap();
    let outer = memory();
    let inner = memory();
    tree.mount("/mnt", outer.clone()).unwrap();
    tree.mount("/mnt/inner", inner.clone()).unwrap();

    tree.write_file("/mnt/inner/f", b"in", FileFlag::Write, DEFAULT_FILE_MODE)
        .unwrap();
    tree.write_file("/mnt/g", b"out", FileFlag::Write, DEFAULT_FILE_MODE)
        .unwrap();
    assert!(inner.exists("/f"));
    assert!(outer.exists("/g"));
    assert!(!outer.exists("/inner/f"));
    assert_eq!(sorted(tree.readdir("/mnt").unwrap()), vec!["g", "inner"]);
}

#[test]
fn sibling_names_sharing_a_prefix_are_not_captured() {
    let tree = MountableFileSystem::new().unwrap();
    let data = memory();
    tree.mount("/data", data.clone()).unwrap();
    tree.write_file("/database", b"root", FileFlag::Write, DEFAULT_FILE_MODE)
        .unwrap();
    assert!(!data.exists("/base"));
    assert!(tree.exists("/database"));
    assert_eq!(sorted(tree.readdir("/").unwrap()), vec!["data", "database"]);
}

#[test]
fn config_mounts_every_entry() {
    let config = MountConfig::new()
        .with_mount("/tmp", memory())
        .with_mount("home/user", memory());
    let tree = MountableFileSystem::with_config(config).unwrap();
    assert_eq!(tree.mount_points(), vec!["/home/user", "/tmp"]);

    let bad = MountConfig::new().with_mount("", memory());
    assert_eq!(
        MountableFileSystem::with_config(bad).unwrap_err().errno(),
        ErrorCode::Inval
    );
}

fn archive() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let deflated =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    writer.start_file("docs/readme.txt", deflated).unwrap();
    writer.write_all(b"read me").unwrap();
    writer.finish().unwrap().into_inner()
}

#[test_log::test]
fn facade_over_a_mounted_archive() {
    let tree = MountableFileSystem::new().unwrap();
    let zip = ZipFs::new(ZipFsConfig::new(archive()).with_name("bundle")).unwrap();
    tree.mount("/zip", Arc::new(zip)).unwrap();
    tree.mount("/tmp", memory()).unwrap();

    let facade = Facade::default();
    let tree: Arc<dyn FileSystem> = Arc::new(tree);
    facade.initialize(tree);

    assert_eq!(
        facade.read_file("/zip/docs/readme.txt", FileFlag::Read).unwrap(),
        b"read me"
    );
    assert_eq!(facade.readdir("/zip").unwrap(), vec!["docs"]);

    let err = facade
        .write_file("/zip/new.txt", b"no", FileFlag::Write, None)
        .unwrap_err();
    assert_eq!(err.errno(), ErrorCode::Perm);
    assert_eq!(err.path(), Some("/zip/new.txt"));

    assert!(facade.rename("/zip/docs/readme.txt", "/tmp/readme.txt").is_err());
    assert!(facade.exists("/zip/docs/readme.txt"));
    facade
        .write_file("/tmp/scratch", b"ok", FileFlag::Write, None)
        .unwrap();
    assert_eq!(sorted(facade.readdir("/").unwrap()), vec!["tmp", "zip"]);
}
