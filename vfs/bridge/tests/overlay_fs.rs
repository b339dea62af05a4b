use std::sync::Arc;

use bfs_bridge::{DELETION_LOG_PATH, OverlayFs, OverlayFsConfig};
use bfs_core::{ErrorCode, File, FileFlag, FileSystem};
use bfs_kv::InMemoryFileSystem;
use pretty_assertions::assert_eq;

fn memory() -> Arc<dyn FileSystem> {
    Arc::new(InMemoryFileSystem::in_memory().unwrap())
}

/// A readable layer holding `/docs/readme`, `/docs/guide/intro` and `/top`.
fn readable() -> Arc<dyn FileSystem> {
    let fs = memory();
    fs.mkdir("/docs", 0o755).unwrap();
    fs.mkdir("/docs/guide", 0o755).unwrap();
    fs.write_file("/docs/readme", b"lower readme", FileFlag::Write, 0o444)
        .unwrap();
    fs.write_file("/docs/guide/intro", b"intro", FileFlag::Write, 0o444)
        .unwrap();
    fs.write_file("/top", b"top", FileFlag::Write, 0o644).unwrap();
    fs
}

fn overlay(writable: Arc<dyn FileSystem>, readable: Arc<dyn FileSystem>) -> OverlayFs {
    OverlayFs::new(OverlayFsConfig::new(writable, readable)).unwrap()
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[test]
fn reads_fall_through_to_the_readable_layer() {
    let fs = overlay(memory(), readable());
    assert_eq!(fs.read_file("/docs/readme", FileFlag::Read).unwrap(), b"lower readme");
    let stats = fs.stat("/docs/readme", false).unwrap();
    assert_eq!(stats.permissions(), 0o666);
    assert!(fs.stat("/docs", false).unwrap().is_directory());
    assert!(!fs.writable().exists("/docs"));
    assert_eq!(fs.name(), "OverlayFS");
    assert!(!fs.is_read_only());
}

#[test]
fn writes_copy_up_and_leave_the_readable_layer_alone() {
    let lower = readable();
    let fs = overlay(memory(), lower.clone());
    fs.write_file("/docs/guide/intro", b"rewritten", FileFlag::Write, 0o644)
        .unwrap();

    assert_eq!(fs.read_file("/docs/guide/intro", FileFlag::Read).unwrap(), b"rewritten");
    assert_eq!(lower.read_file("/docs/guide/intro", FileFlag::Read).unwrap(), b"intro");
    let upper = fs.writable();
    assert!(upper.stat("/docs/guide", false).unwrap().is_directory());
    assert_eq!(upper.stat("/docs", false).unwrap().permissions(), 0o777);
    assert!(!upper.exists("/docs/readme"));
}

#[test]
fn edits_to_lower_files_reach_the_writable_layer_on_sync() {
    let fs = overlay(memory(), readable());
    let mut fd = fs.open("/top", FileFlag::ReadWrite, 0o644).unwrap();
    fd.write(b"TOP", Some(0)).unwrap();
    assert!(!fs.writable().exists("/top"));
    fd.sync().unwrap();
    fd.close().unwrap();

    assert_eq!(fs.writable().read_file("/top", FileFlag::Read).unwrap(), b"TOP");
    assert_eq!(fs.readable().read_file("/top", FileFlag::Read).unwrap(), b"top");

    let mut untouched = fs.open("/docs/readme", FileFlag::Read, 0o644).unwrap();
    untouched.close().unwrap();
    assert!(!fs.writable().exists("/docs/readme"));
}

#[test]
fn deletions_are_logged_and_survive_a_remount() {
    let upper = memory();
    let lower = readable();
    let fs = overlay(upper.clone(), lower.clone());
    fs.unlink("/top").unwrap();
    assert!(!fs.exists("/top"));
    assert_eq!(fs.stat("/top", false).unwrap_err().errno(), ErrorCode::Noent);
    assert!(lower.exists("/top"));
    assert_eq!(fs.deletion_log(), "d/top\n");
    assert_eq!(
        upper.read_file(DELETION_LOG_PATH, FileFlag::Read).unwrap(),
        b"d/top\n"
    );

    let remounted = overlay(upper, lower);
    assert!(!remounted.exists("/top"));
    assert_eq!(sorted(remounted.readdir("/").unwrap()), vec!["docs"]);
}

#[test]
fn unlinking_a_copied_up_file_hides_the_lower_one_too() {
    let fs = overlay(memory(), readable());
    fs.write_file("/top", b"new", FileFlag::Write, 0o644).unwrap();
    fs.unlink("/top").unwrap();
    assert!(!fs.exists("/top"));
    assert_eq!(fs.deletion_log(), "d/top\n");

    fs.write_file("/only-upper", b"u", FileFlag::Write, 0o644).unwrap();
    fs.unlink("/only-upper").unwrap();
    assert_eq!(fs.deletion_log(), "d/top\n");
    assert_eq!(fs.unlink("/docs").unwrap_err().errno(), ErrorCode::Isdir);
}

#[test]
fn listings_merge_both_layers() {
    let fs = overlay(memory(), readable());
    fs.write_file("/docs/readme", b"upper", FileFlag::Write, 0o644)
        .unwrap();
    fs.write_file("/docs/new", b"n", FileFlag::Write, 0o644).unwrap();
    assert_eq!(
        sorted(fs.readdir("/docs").unwrap()),
        vec!["guide", "new", "readme"]
    );

    fs.unlink("/top").unwrap();
    assert!(fs.writable().exists(DELETION_LOG_PATH));
    assert_eq!(sorted(fs.readdir("/").unwrap()), vec!["docs"]);
    assert_eq!(fs.readdir("/top").unwrap_err().errno(), ErrorCode::Noent);
    assert_eq!(fs.readdir("/docs/readme").unwrap_err().errno(), ErrorCode::Notdir);
}

#[test]
fn removed_directories_do_not_resurrect_lower_children() {
    let fs = overlay(memory(), readable());
    assert_eq!(fs.rmdir("/docs/guide").unwrap_err().errno(), ErrorCode::Notempty);
    assert_eq!(fs.rmdir("/nope").unwrap_err().errno(), ErrorCode::Noent);

    fs.unlink("/docs/guide/intro").unwrap();
    fs.rmdir("/docs/guide").unwrap();
    assert!(!fs.exists("/docs/guide"));

    fs.mkdir("/docs/guide", 0o755).unwrap();
    assert!(fs.readdir("/docs/guide").unwrap().is_empty());
    assert!(!fs.exists("/docs/guide/intro"));
}

#[test]
fn mkdir_refuses_paths_either_layer_holds() {
    let fs = overlay(memory(), readable());
    assert_eq!(fs.mkdir("/docs", 0o755).unwrap_err().errno(), ErrorCode::Exist);
    fs.mkdir("/docs/guide/deeper", 0o700).unwrap();
    assert_eq!(
        fs.writable().stat("/docs/guide/deeper", false).unwrap().permissions(),
        0o700
    );
    assert_eq!(
        fs.open("/top", FileFlag::WriteExclusive, 0o644).unwrap_err().errno(),
        ErrorCode::Exist
    );
}

#[test]
fn files_rename_across_layers() {
    let fs = overlay(memory(), readable());
    fs.rename("/top", "/docs/moved").unwrap();
    assert!(!fs.exists("/top"));
    assert_eq!(fs.read_file("/docs/moved", FileFlag::Read).unwrap(), b"top");
    assert_eq!(fs.stat("/docs/moved", false).unwrap().permissions(), 0o666);
    assert_eq!(
        fs.rename("/docs/readme", "/docs/guide").unwrap_err().errno(),
        ErrorCode::Isdir
    );
    assert_eq!(fs.rename("/gone", "/x").unwrap_err().errno(), ErrorCode::Noent);
}

#[test]
fn directories_rename_across_layers() {
    let fs = overlay(memory(), readable());
    fs.write_file("/docs/guide/extra", b"e", FileFlag::Write, 0o644)
        .unwrap();
    fs.rename("/docs", "/manual").unwrap();

    assert!(!fs.exists("/docs"));
    assert_eq!(
        sorted(fs.readdir("/manual/guide").unwrap()),
        vec!["extra", "intro"]
    );
    assert_eq!(fs.read_file("/manual/readme", FileFlag::Read).unwrap(), b"lower readme");
    assert!(fs.readable().exists("/docs/readme"));

    assert_eq!(
        fs.rename("/manual", "/manual/inside").unwrap_err().errno(),
        ErrorCode::Busy
    );
    assert_eq!(
        fs.rename("/manual/guide", "/top").unwrap_err().errno(),
        ErrorCode::Notdir
    );
}

#[test]
fn upper_only_directories_rename_in_place() {
    let fs = overlay(memory(), readable());
    fs.mkdir("/scratch", 0o755).unwrap();
    fs.write_file("/scratch/a", b"a", FileFlag::Write, 0o644).unwrap();
    fs.rename("/scratch", "/kept").unwrap();
    assert_eq!(fs.read_file("/kept/a", FileFlag::Read).unwrap(), b"a");
    assert_eq!(fs.deletion_log(), "");
}

#[test]
fn the_deletion_log_is_off_limits() {
    let fs = overlay(memory(), readable());
    fs.unlink("/top").unwrap();
    for err in [
        fs.open(DELETION_LOG_PATH, FileFlag::Read, 0o644).unwrap_err(),
        fs.unlink(DELETION_LOG_PATH).unwrap_err(),
        fs.rename(DELETION_LOG_PATH, "/log").unwrap_err(),
        fs.rename("/docs/readme", DELETION_LOG_PATH).unwrap_err(),
    ] {
        assert_eq!(err.errno(), ErrorCode::Perm);
    }
    assert_eq!(
        fs.rename(DELETION_LOG_PATH, "/log").unwrap_err().message(),
        "Error: EPERM: Cannot rename deletion log."
    );
}

#[test]
fn attribute_changes_copy_up() {
    let fs = overlay(memory(), readable());
    fs.chmod("/docs/readme", false, 0o600).unwrap();
    assert_eq!(fs.stat("/docs/readme", false).unwrap().permissions(), 0o600);
    assert_eq!(
        fs.writable().read_file("/docs/readme", FileFlag::Read).unwrap(),
        b"lower readme"
    );
    assert_eq!(fs.readable().stat("/docs/readme", false).unwrap().permissions(), 0o444);

    fs.utimes("/top", 1_000.0, 2_000.0).unwrap();
    assert_eq!(fs.stat("/top", false).unwrap().mtime_ms, 2_000.0);
    assert_eq!(
        fs.chmod("/missing", false, 0o600).unwrap_err().errno(),
        ErrorCode::Noent
    );
}

#[test_log::test]
fn restoring_the_log_brings_entries_back() {
    let upper = memory();
    let fs = overlay(upper.clone(), readable());
    fs.unlink("/top").unwrap();
    fs.restore_deletion_log("").unwrap();
    assert!(fs.exists("/top"));
    assert_eq!(upper.read_file(DELETION_LOG_PATH, FileFlag::Read).unwrap(), b"");

    fs.restore_deletion_log("d/docs\n").unwrap();
    assert!(!fs.exists("/docs/readme"));
    assert_eq!(sorted(fs.readdir("/").unwrap()), vec!["top"]);
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
fn read_only_upper_layers_are_refused() {
    let err = OverlayFs::new(OverlayFsConfig::new(Arc::new(Sealed), readable())).unwrap_err();
    assert_eq!(err.errno(), ErrorCode::Inval);

    let over_sealed = overlay(memory(), Arc::new(Sealed));
    assert!(!over_sealed.exists("/anything"));
}
