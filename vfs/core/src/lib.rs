//! Shared types and backend contracts for the bfs virtual file system.

mod error;
mod file;
mod file_flag;
mod file_index;
mod fs;
mod inode;
mod preload_file;
mod stats;
mod sync_adapter;

pub mod path;

pub use error::{ApiError, ErrorCode, Result, WireError};
pub use file::{File, FileAsync};
pub use file_flag::{ActionType, FileFlag};
pub use file_index::{DirInode, FileIndex, FileInode, IndexEntry, IndexNode};
pub use fs::{DiskSpace, FileSystem, FileSystemAsync, MAX_SYMLINK_HOPS, realpath_with_links};
pub use inode::Inode;
pub use preload_file::{AsyncBacking, NoSync, NoSyncFile, PreloadFile, SyncBacking};
pub use stats::{
    DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, FileType, MAX_FILE_SIZE, PERMISSION_MASK, READ_ONLY_MODE,
    Stats, TYPE_MASK, now_ms,
};
pub use sync_adapter::{AsyncFsFromSync, FileAsyncFromSync};
