//! Several backends combined into one tree by mount point.
//!
//! A request for `/mnt/data/a.txt` against a backend mounted at
//! `/mnt/data` reaches that backend as `/a.txt`. Paths outside every mount
//! point go to the root backend, which also holds the directories the mount
//! points live in.

use std::sync::Arc;

use bfs_core::{ApiError, DEFAULT_DIR_MODE, File, FileFlag, FileSystem, Result, Stats, path};
use bfs_kv::InMemoryFileSystem;
use parking_lot::RwLock;

use crate::config::MountConfig;

#[derive(Debug, Clone)]
struct MountPoint {
    path: String,
    fs: Arc<dyn FileSystem>,
}

/// Where a caller-visible path lands.
struct Route {
    fs: Arc<dyn FileSystem>,
    /// Path inside `fs`.
    local: String,
    mount_point: String,
    /// No mount point matched.
    is_root: bool,
}

impl Route {
    fn standardize(&self, err: ApiError, visible: &str) -> ApiError {
        err.with_path_rewritten(&self.local, visible)
    }
}

#[derive(Debug)]
pub struct MountableFileSystem {
    root: Arc<dyn FileSystem>,
    /// Longest mount point first, so nested mounts win.
    mounts: RwLock<Vec<MountPoint>>,
}

impl MountableFileSystem {
    pub const NAME: &'static str = "MountableFileSystem";

    /// An empty tree over a fresh in-memory root.
    pub fn new() -> Result<Self> {
        Ok(Self::with_root(Arc::new(InMemoryFileSystem::in_memory()?)))
    }

    pub fn with_root(root: Arc<dyn FileSystem>) -> Self {
        Self {
            root,
            mounts: RwLock::new(Vec::new()),
        }
    }

    pub fn with_config(config: MountConfig) -> Result<Self> {
        config.validate()?;
        let fs = Self::new()?;
        for (point, backend) in config.mounts {
            fs.mount(&point, backend)?;
        }
        Ok(fs)
    }

    pub fn mount(&self, mount_point: &str, fs: Arc<dyn FileSystem>) -> Result<()> {
        let mount_point = mount_path(mount_point);
        let mut mounts = self.mounts.write();
        if mounts.iter().any(|m| m.path == mount_point) {
            return Err(ApiError::einval(format!(
                "Mount point {mount_point} is already taken."
            )));
        }
        mkdirp(self.root.as_ref(), &mount_point)?;
        tracing::debug!(mount_point = %mount_point, backend = %fs.name(), "mounted file system");
        mounts.push(MountPoint {
            path: mount_point,
            fs,
        });
        mounts.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Ok(())
    }

    /// Detaches the backend at `mount_point` and removes the directories
    /// leading to it that are left empty.
    pub fn umount(&self, mount_point: &str) -> Result<()> {
        let mut mount_point = mount_path(mount_point);
        {
            let mut mounts = self.mounts.write();
            let Some(idx) = mounts.iter().position(|m| m.path == mount_point) else {
                return Err(ApiError::einval(format!(
                    "Mount point {mount_point} is already unmounted."
                )));
            };
            mounts.remove(idx);
        }
        tracing::debug!(mount_point = %mount_point, "unmounted file system");
        while mount_point != "/" {
            if !self.root.readdir(&mount_point)?.is_empty() {
                break;
            }
            self.root.rmdir(&mount_point)?;
            mount_point = path::dirname(&mount_point).to_owned();
        }
        Ok(())
    }

    pub fn mount_points(&self) -> Vec<String> {
        self.mounts.read().iter().map(|m| m.path.clone()).collect()
    }

    fn route(&self, p: &str) -> Route {
        let mounts = self.mounts.read();
        for m in mounts.iter() {
            if let Some(local) = strip_mount(p, &m.path) {
                return Route {
                    fs: m.fs.clone(),
                    local,
                    mount_point: m.path.clone(),
                    is_root: false,
                };
            }
        }
        Route {
            fs: self.root.clone(),
            local: p.to_owned(),
            mount_point: "/".to_owned(),
            is_root: true,
        }
    }

    /// True when a mount point lies at or below `p`.
    fn contains_mount_point(&self, p: &str) -> bool {
        self.mounts
            .read()
            .iter()
            .any(|m| strip_mount(&m.path, p).is_some())
    }

    fn forward<T>(
        &self,
        p: &str,
        op: impl FnOnce(&dyn FileSystem, &str) -> Result<T>,
    ) -> Result<T> {
        let route = self.route(p);
        op(route.fs.as_ref(), &route.local).map_err(|e| route.standardize(e, p))
    }
}

fn mount_path(mount_point: &str) -> String {
    if mount_point.starts_with('/') {
        path::normalize(mount_point)
    } else {
        path::normalize(&format!("/{mount_point}"))
    }
}

/// The part of `p` below `mount_point`, rooted at `/`; `None` when `p`
/// lies outside it.
fn strip_mount(p: &str, mount_point: &str) -> Option<String> {
    if mount_point == "/" {
        return Some(p.to_owned());
    }
    let rest = p.strip_prefix(mount_point)?;
    if rest.is_empty() {
        Some("/".to_owned())
    } else if rest.starts_with('/') {
        Some(rest.to_owned())
    } else {
        None
    }
}

fn mkdirp(fs: &dyn FileSystem, p: &str) -> Result<()> {
    let mut current = String::from("/");
    for seg in path::segments(p) {
        current = path::join(&current, seg);
        if !fs.exists(&current) {
            fs.mkdir(&current, DEFAULT_DIR_MODE)?;
        }
    }
    Ok(())
}

impl FileSystem for MountableFileSystem {
    fn name(&self) -> String {
        Self::NAME.to_owned()
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn supports_links(&self) -> bool {
        false
    }

    fn supports_props(&self) -> bool {
        false
    }

    fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let from = self.route(old_path);
        let to = self.route(new_path);
        if from.is_root == to.is_root && from.mount_point == to.mount_point {
            return from
                .fs
                .rename(&from.local, &to.local)
                .map_err(|e| to.standardize(from.standardize(e, old_path), new_path));
        }
        let data = self.read_file(old_path, FileFlag::Read)?;
        let mode = self.stat(old_path, false)?.permissions();
        self.write_file(new_path, &data, FileFlag::Write, mode)?;
        self.unlink(old_path)
    }

    fn stat(&self, p: &str, is_lstat: bool) -> Result<Stats> {
        self.forward(p, |fs, local| fs.stat(local, is_lstat))
    }

    fn open(&self, p: &str, flag: FileFlag, mode: u16) -> Result<Box<dyn File>> {
        self.forward(p, |fs, local| fs.open(local, flag, mode))
    }

    fn unlink(&self, p: &str) -> Result<()> {
        self.forward(p, |fs, local| fs.unlink(local))
    }

    fn rmdir(&self, p: &str) -> Result<()> {
        if self.contains_mount_point(p) {
            return Err(ApiError::enotempty(p));
        }
        self.forward(p, |fs, local| fs.rmdir(local))
    }

    fn mkdir(&self, p: &str, mode: u16) -> Result<()> {
        self.forward(p, |fs, local| fs.mkdir(local, mode))
    }

    /// Lists the routed directory plus any mount point directories the root
    /// holds at `p`.
    fn readdir(&self, p: &str) -> Result<Vec<String>> {
        let route = self.route(p);
        let from_root = if route.is_root {
            None
        } else {
            self.root.readdir(p).ok()
        };
        match (route.fs.readdir(&route.local), from_root) {
            (Ok(names), None) => Ok(names),
            (Ok(mut names), Some(extra)) => {
                for name in extra {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
                Ok(names)
            }
            (Err(_), Some(extra)) => Ok(extra),
            (Err(e), None) => Err(route.standardize(e, p)),
        }
    }

    fn exists(&self, p: &str) -> bool {
        let route = self.route(p);
        route.fs.exists(&route.local)
    }

    fn realpath(&self, p: &str) -> Result<String> {
        let route = self.route(p);
        let real = route
            .fs
            .realpath(&route.local)
            .map_err(|e| route.standardize(e, p))?;
        Ok(path::normalize(&path::join(&route.mount_point, &real)))
    }

    fn truncate(&self, p: &str, len: u64) -> Result<()> {
        self.forward(p, |fs, local| fs.truncate(local, len))
    }

    fn read_file(&self, p: &str, flag: FileFlag) -> Result<Vec<u8>> {
        self.forward(p, |fs, local| fs.read_file(local, flag))
    }

    fn write_file(&self, p: &str, data: &[u8], flag: FileFlag, mode: u16) -> Result<()> {
        self.forward(p, |fs, local| fs.write_file(local, data, flag, mode))
    }

    fn append_file(&self, p: &str, data: &[u8], flag: FileFlag, mode: u16) -> Result<()> {
        self.forward(p, |fs, local| fs.append_file(local, data, flag, mode))
    }

    fn chmod(&self, p: &str, is_lchmod: bool, mode: u16) -> Result<()> {
        self.forward(p, |fs, local| fs.chmod(local, is_lchmod, mode))
    }

    fn chown(&self, p: &str, is_lchown: bool, uid: u32, gid: u32) -> Result<()> {
        self.forward(p, |fs, local| fs.chown(local, is_lchown, uid, gid))
    }

    fn utimes(&self, p: &str, atime_ms: f64, mtime_ms: f64) -> Result<()> {
        self.forward(p, |fs, local| fs.utimes(local, atime_ms, mtime_ms))
    }

    fn readlink(&self, p: &str) -> Result<String> {
        self.forward(p, |fs, local| fs.readlink(local))
    }
}
